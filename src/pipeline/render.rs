//! Overlay rendering: draw ink-style stamps onto a transparent PDF page.
//!
//! Each stamp is a double-rule border plus centred text (and an optional
//! date line), all in Courier-Bold. Every rule and every text line is drawn
//! several times at low opacity with a small Gaussian offset, which reads as
//! uneven ink on paper.
//!
//! The offsets come from a ChaCha8 generator seeded with the SHA-256 of
//! `"<document id>:<stamp text>"`. The generator is created per stamp and
//! handed down explicitly, so the same stamp always renders to the same
//! bytes and two stamps never share a stream.

use crate::error::StampError;
use crate::pipeline::layout::{self, StampPlacement, StampSpec, MM};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

const FONT_NAME: &[u8] = b"Courier-Bold";
const FONT_RESOURCE: &str = "F1";

/// Gap in points between inner and outer border.
const BORDER_GAP: f64 = 2.0;
/// Overlapping strokes per border rule.
const BORDER_STROKES: usize = 7;
/// Overlapping passes per text line.
const TEXT_STROKES: usize = 4;
/// Standard deviation of the border jitter in points. Text uses half.
const JITTER_SCALE: f64 = 0.4;
const BORDER_LINE_WIDTH: f32 = 0.8;
const MAX_ALPHA: f64 = 0.5;

/// Standard page sizes in points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    A4,
    Letter,
}

impl PageSize {
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::Letter => (612.0, 792.0),
        }
    }
}

/// Convert `#RRGGBB` (leading `#` optional) into `[0, 1]` channel floats.
pub fn hex_to_rgb(hex_color: &str) -> Result<(f64, f64, f64), StampError> {
    let h = hex_color.trim_start_matches('#');
    if h.len() != 6 || !h.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StampError::Generation(format!("Invalid hex color: {hex_color}")));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&h[i..i + 2], 16)
            .map(|v| f64::from(v) / 255.0)
            .map_err(|_| StampError::Generation(format!("Invalid hex color: {hex_color}")))
    };
    Ok((channel(0)?, channel(2)?, channel(4)?))
}

/// Jitter generator for one stamp.
pub fn stamp_rng(stamp: &StampSpec) -> ChaCha8Rng {
    let seed = Sha256::digest(format!("{}:{}", stamp.document_id(), stamp.text()).as_bytes());
    ChaCha8Rng::from_seed(seed.into())
}

/// Render a transparent single-page PDF carrying every stamp.
///
/// # Errors
/// [`StampError::Generation`] when `stamps` is empty, a page dimension is not
/// positive, or a stamp color is not a 6-digit hex color.
pub fn generate_overlay(
    page_width: f64,
    page_height: f64,
    stamps: &[StampSpec],
) -> Result<Vec<u8>, StampError> {
    let placements = layout::place_stamps(page_width, page_height, stamps)?;
    render_overlay(page_width, page_height, &placements)
}

/// Render precomputed placements onto one transparent page.
pub fn render_overlay(
    page_width: f64,
    page_height: f64,
    placements: &[StampPlacement],
) -> Result<Vec<u8>, StampError> {
    if placements.is_empty() {
        return Err(StampError::Generation("At least one stamp is required".into()));
    }
    layout::validate_page(page_width, page_height)?;

    let mut canvas = Canvas::default();
    for placement in placements {
        let color = hex_to_rgb(placement.stamp.color())?;
        let mut rng = stamp_rng(&placement.stamp);
        draw_stamp(&mut canvas, placement, color, &mut rng)?;
    }

    let bytes = canvas.finish(page_width, page_height)?;
    debug!(
        "Rendered overlay with {} stamp(s) → {} bytes",
        placements.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Build a plain text PDF, used for previews and tests.
pub fn sample_document(page_width: f64, page_height: f64, pages: usize) -> Result<Vec<u8>, StampError> {
    layout::validate_page(page_width, page_height)?;
    if pages == 0 {
        return Err(StampError::Generation("A sample needs at least one page".into()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(type1_font(b"Helvetica"));

    let mut kids = Vec::with_capacity(pages);
    for n in 1..=pages {
        let lines = [
            (24.0, "Sample Document".to_string()),
            (12.0, format!("Page {n} of {pages}")),
            (12.0, "This page is intentionally plain so stamps stand out.".to_string()),
        ];
        let mut ops = Vec::new();
        let mut y = page_height - 72.0;
        for (size, line) in lines {
            ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(FONT_RESOURCE.into()), real(size)]),
                Operation::new("Td", vec![real(72.0), real(y)]),
                Operation::new("Tj", vec![Object::string_literal(win_ansi(&line))]),
                Operation::new("ET", vec![]),
            ]);
            y -= size * 1.6;
        }
        let content = Content { operations: ops }
            .encode()
            .map_err(|e| StampError::Internal(format!("content encoding: {e}")))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let page_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
            ("MediaBox", media_box(page_width, page_height)),
            (
                "Resources",
                Object::Dictionary(Dictionary::from_iter([(
                    "Font",
                    Object::Dictionary(Dictionary::from_iter([(FONT_RESOURCE, Object::Reference(font_id))])),
                )])),
            ),
        ]));
        kids.push(Object::Reference(page_id));
    }

    finish_document(doc, pages_id, kids)
}

// ── Drawing ──────────────────────────────────────────────────────────────

/// Content operations plus the graphics states they reference.
#[derive(Default)]
struct Canvas {
    ops: Vec<Operation>,
    /// `(is_fill, alpha in hundredths)` → resource name.
    alpha_states: BTreeMap<(bool, u32), String>,
}

impl Canvas {
    fn push(&mut self, operator: &str, operands: Vec<Object>) {
        self.ops.push(Operation::new(operator, operands));
    }

    /// Resource name of an ExtGState with the given stroke or fill alpha.
    fn alpha_state(&mut self, fill: bool, alpha: f64) -> String {
        let key = (fill, (alpha * 100.0).round() as u32);
        let next = self.alpha_states.len();
        self.alpha_states
            .entry(key)
            .or_insert_with(|| format!("GS{next}"))
            .clone()
    }

    fn finish(self, page_width: f64, page_height: f64) -> Result<Vec<u8>, StampError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(type1_font(FONT_NAME));

        let mut states = Dictionary::new();
        for ((fill, hundredths), name) in &self.alpha_states {
            let alpha = Object::Real(*hundredths as f32 / 100.0);
            let key = if *fill { "ca" } else { "CA" };
            let state = Dictionary::from_iter([("Type", Object::Name(b"ExtGState".to_vec())), (key, alpha)]);
            states.set(name.as_bytes().to_vec(), Object::Dictionary(state));
        }

        let content = Content { operations: self.ops }
            .encode()
            .map_err(|e| StampError::Internal(format!("content encoding: {e}")))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let resources = Dictionary::from_iter([
            (
                "Font",
                Object::Dictionary(Dictionary::from_iter([(FONT_RESOURCE, Object::Reference(font_id))])),
            ),
            ("ExtGState", Object::Dictionary(states)),
        ]);
        let page_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
            ("MediaBox", media_box(page_width, page_height)),
            ("Resources", Object::Dictionary(resources)),
        ]));

        finish_document(doc, pages_id, vec![Object::Reference(page_id)])
    }
}

/// Border, text and date for one stamp, inside its rotated frame.
fn draw_stamp(
    canvas: &mut Canvas,
    placement: &StampPlacement,
    color: (f64, f64, f64),
    rng: &mut ChaCha8Rng,
) -> Result<(), StampError> {
    let StampPlacement {
        stamp,
        layout,
        tilt_degrees,
        center_x,
        center_y,
    } = placement;
    let (w, h) = (layout.width, layout.height);
    let tilt = tilt_degrees.to_radians();

    canvas.push("q", vec![]);
    canvas.push(
        "cm",
        vec![
            real(tilt.cos()),
            real(tilt.sin()),
            real(-tilt.sin()),
            real(tilt.cos()),
            real(*center_x),
            real(*center_y),
        ],
    );

    draw_border(canvas, -w / 2.0, -h / 2.0, w, h, color, rng)?;

    match stamp.date() {
        Some(date) => {
            let text_y = -layout.font_size * 0.2 + MM;
            let date_y = text_y - layout.date_font_size - 2.0 * MM;
            draw_text(canvas, stamp.text(), text_y, layout.font_size, color, rng)?;
            draw_text(canvas, date, date_y, layout.date_font_size, color, rng)?;
        }
        None => {
            let text_y = -layout.font_size * 0.35;
            draw_text(canvas, stamp.text(), text_y, layout.font_size, color, rng)?;
        }
    }

    canvas.push("Q", vec![]);
    Ok(())
}

fn draw_border(
    canvas: &mut Canvas,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    (r, g, b): (f64, f64, f64),
    rng: &mut ChaCha8Rng,
) -> Result<(), StampError> {
    let jitter = normal(JITTER_SCALE)?;
    for inset in [0.0, BORDER_GAP + 1.5] {
        let (rw, rh) = (w - 2.0 * inset, h - 2.0 * inset);
        if rw <= 0.0 || rh <= 0.0 {
            continue;
        }
        for stroke in 0..BORDER_STROKES {
            let alpha = (0.08 + 0.04 * stroke as f64).min(MAX_ALPHA);
            let state = canvas.alpha_state(false, alpha);
            let jx = jitter.sample(rng);
            let jy = jitter.sample(rng);

            canvas.push("q", vec![]);
            canvas.push("gs", vec![Object::Name(state.into_bytes())]);
            canvas.push("RG", vec![real(r), real(g), real(b)]);
            canvas.push("w", vec![Object::Real(BORDER_LINE_WIDTH)]);
            canvas.push("re", vec![real(x + inset + jx), real(y + inset + jy), real(rw), real(rh)]);
            canvas.push("S", vec![]);
            canvas.push("Q", vec![]);
        }
    }
    Ok(())
}

/// Text centred on x = 0 with its baseline at `y`.
fn draw_text(
    canvas: &mut Canvas,
    text: &str,
    y: f64,
    font_size: f64,
    (r, g, b): (f64, f64, f64),
    rng: &mut ChaCha8Rng,
) -> Result<(), StampError> {
    let jitter = normal(JITTER_SCALE * 0.5)?;
    let text_width = text.chars().count() as f64 * layout::CHAR_WIDTH_RATIO * font_size;
    let encoded = win_ansi(text);

    for stroke in 0..TEXT_STROKES {
        let alpha = (0.12 + 0.10 * stroke as f64).min(MAX_ALPHA);
        let state = canvas.alpha_state(true, alpha);
        let jx = jitter.sample(rng);
        let jy = jitter.sample(rng);

        canvas.push("q", vec![]);
        canvas.push("gs", vec![Object::Name(state.into_bytes())]);
        canvas.push("rg", vec![real(r), real(g), real(b)]);
        canvas.push("BT", vec![]);
        canvas.push("Tf", vec![Object::Name(FONT_RESOURCE.into()), real(font_size)]);
        canvas.push("Td", vec![real(-text_width / 2.0 + jx), real(y + jy)]);
        canvas.push("Tj", vec![Object::string_literal(encoded.clone())]);
        canvas.push("ET", vec![]);
        canvas.push("Q", vec![]);
    }
    Ok(())
}

// ── PDF helpers ──────────────────────────────────────────────────────────

fn normal(std_dev: f64) -> Result<Normal<f64>, StampError> {
    Normal::new(0.0, std_dev).map_err(|e| StampError::Internal(format!("jitter distribution: {e}")))
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

fn media_box(width: f64, height: f64) -> Object {
    Object::Array(vec![real(0.0), real(0.0), real(width), real(height)])
}

fn type1_font(base_font: &[u8]) -> Dictionary {
    Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(base_font.to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ])
}

/// Latin-1 bytes for the standard fonts; other characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn finish_document(mut doc: Document, pages_id: lopdf::ObjectId, kids: Vec<Object>) -> Result<Vec<u8>, StampError> {
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| StampError::Internal(format!("Failed to save PDF: {e}")))?;
    Ok(output)
}
