//! Stamp geometry: box sizes, font sizes, tilt and stacking placement.
//!
//! All functions here are pure. Coordinates are PDF user-space points with
//! the origin at the bottom-left of the page.
//!
//! ## Stacking
//!
//! ```text
//!              90% of width
//!   ┌────────────────┬──┐
//!   │       ┌──────┐ │  │ ← 90% of height: top edge of stamp 1
//!   │       │ PAID │ │  │
//!   │       └──────┘ │  │ ← projected bottom of stamp 1
//!   │                │  │   gap = height₁ × (spacing − 1)
//!   │      ┌────────┐│  │ ← projected top of stamp 2
//!   │      │RECEIVED││  │
//!   │      └────────┘│  │
//! ```
//!
//! Each stamp is rotated by its tilt, so the vertical extent it occupies is
//! `|h·cos θ| + |w·sin θ|`, not `h`. Stacking uses that projected extent.

use crate::error::StampError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One millimetre in points.
pub const MM: f64 = 72.0 / 25.4;

/// Stamp box width as a fraction of page width.
pub const STAMP_WIDTH_RATIO: f64 = 0.20;
/// Right edge of the stamp column as a fraction of page width.
pub const STAMP_RIGHT_EDGE: f64 = 0.90;
/// Top edge of the first stamp as a fraction of page height.
pub const STAMP_TOP_EDGE: f64 = 0.90;
/// Vertical spacing multiplier between stacked stamps. Must be > 1.0.
pub const STACK_SPACING: f64 = 1.3;
/// Date font size relative to the main text.
pub const DATE_FONT_RATIO: f64 = 0.35;
/// Padding relative to font size.
pub const PADDING_RATIO: f64 = 0.25;
/// Advance width of one Courier glyph relative to the font size.
pub const CHAR_WIDTH_RATIO: f64 = 0.6;
/// Smallest font size ever chosen.
pub const MIN_FONT_SIZE: f64 = 8.0;

const DEFAULT_STAMP_COLOR: &str = "#003399";

/// A single stamp mark to draw on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampSpec {
    text: String,
    document_id: u64,
    date: Option<String>,
    color: String,
}

impl StampSpec {
    /// Create a stamp; `text` is upper-cased.
    pub fn new(text: impl AsRef<str>, document_id: u64) -> Self {
        Self {
            text: text.as_ref().to_uppercase(),
            document_id,
            date: None,
            color: DEFAULT_STAMP_COLOR.to_string(),
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_optional_date(mut self, date: Option<String>) -> Self {
        self.date = date;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn document_id(&self) -> u64 {
        self.document_id
    }

    /// Date line; empty strings count as absent.
    pub fn date(&self) -> Option<&str> {
        self.date.as_deref().filter(|d| !d.is_empty())
    }

    pub fn color(&self) -> &str {
        &self.color
    }
}

/// Dimensions of one stamp box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StampLayout {
    pub width: f64,
    pub height: f64,
    pub font_size: f64,
    pub date_font_size: f64,
    pub padding: f64,
}

/// Final render instruction for one stamp on the overlay page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampPlacement {
    pub stamp: StampSpec,
    pub layout: StampLayout,
    pub tilt_degrees: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl StampPlacement {
    /// Half of the vertical extent the rotated box covers.
    pub fn projected_half_height(&self) -> f64 {
        projected_half_height(self.layout.width, self.layout.height, self.tilt_degrees)
    }

    /// Highest page y covered by the rotated box.
    pub fn top_edge(&self) -> f64 {
        self.center_y + self.projected_half_height()
    }

    /// Lowest page y covered by the rotated box.
    pub fn bottom_edge(&self) -> f64 {
        self.center_y - self.projected_half_height()
    }
}

/// Deterministic tilt in `[-3, -1] ∪ [1, 3]` degrees for a document.
///
/// The SHA-256 of the decimal id is read as two big-endian `u32`s: the
/// first picks the sign (odd → negative), the second the magnitude.
pub fn compute_tilt(document_id: u64) -> f64 {
    let digest = Sha256::digest(document_id.to_string().as_bytes());
    let sign_source = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let magnitude_source = u32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);

    let sign = if sign_source % 2 == 1 { -1.0 } else { 1.0 };
    let magnitude = 1.0 + (f64::from(magnitude_source) / f64::from(u32::MAX)) * 2.0;
    sign * magnitude
}

/// Largest Courier size at which `text` fits `max_width` minus padding.
pub fn fit_font_size(text: &str, max_width: f64, padding: f64) -> f64 {
    let available = max_width - 2.0 * padding;
    let chars = text.chars().count();
    if available <= 0.0 || chars == 0 {
        return MIN_FONT_SIZE;
    }
    let size = available / (chars as f64 * CHAR_WIDTH_RATIO);
    size.max(MIN_FONT_SIZE)
}

/// Compute box and font dimensions for one stamp.
pub fn stamp_layout(stamp: &StampSpec, stamp_width: f64) -> StampLayout {
    let font_size = fit_font_size(stamp.text(), stamp_width, stamp_width * PADDING_RATIO);
    let padding = font_size * PADDING_RATIO;
    let date_font_size = font_size * DATE_FONT_RATIO;

    let height = if stamp.date().is_some() {
        font_size + date_font_size + 2.0 * MM + 2.0 * padding
    } else {
        font_size + 2.0 * padding
    };

    StampLayout {
        width: stamp_width,
        height,
        font_size,
        date_font_size,
        padding,
    }
}

/// Half of the page-vertical extent of a `width × height` box rotated by `tilt_degrees`.
pub fn projected_half_height(width: f64, height: f64, tilt_degrees: f64) -> f64 {
    let tilt = tilt_degrees.to_radians();
    ((height * tilt.cos()).abs() + (width * tilt.sin()).abs()) / 2.0
}

/// Check that a page size can carry stamps.
pub fn validate_page(page_width: f64, page_height: f64) -> Result<(), StampError> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !valid(page_width) || !valid(page_height) {
        return Err(StampError::Generation(format!(
            "Invalid page dimensions: {page_width}x{page_height}"
        )));
    }
    Ok(())
}

/// Stack stamps down the right side of the page using [`STACK_SPACING`].
pub fn place_stamps(
    page_width: f64,
    page_height: f64,
    stamps: &[StampSpec],
) -> Result<Vec<StampPlacement>, StampError> {
    place_stamps_with_spacing(page_width, page_height, stamps, STACK_SPACING)
}

/// Stack stamps with an explicit spacing factor.
///
/// Output order matches input order. Stamp `k + 1`'s projected top edge sits
/// exactly `height_k × (spacing − 1)` below stamp `k`'s projected bottom edge.
pub fn place_stamps_with_spacing(
    page_width: f64,
    page_height: f64,
    stamps: &[StampSpec],
    spacing: f64,
) -> Result<Vec<StampPlacement>, StampError> {
    if stamps.is_empty() {
        return Err(StampError::Generation("At least one stamp is required".into()));
    }
    validate_page(page_width, page_height)?;
    if !(spacing.is_finite() && spacing > 1.0) {
        return Err(StampError::Generation(format!(
            "Stack spacing must be greater than 1.0, got {spacing}"
        )));
    }

    let stamp_width = page_width * STAMP_WIDTH_RATIO;
    let center_x = page_width * STAMP_RIGHT_EDGE - stamp_width / 2.0;
    let mut next_top_edge = page_height * STAMP_TOP_EDGE;

    let mut placements = Vec::with_capacity(stamps.len());
    for stamp in stamps {
        let layout = stamp_layout(stamp, stamp_width);
        let tilt_degrees = compute_tilt(stamp.document_id());
        let half = projected_half_height(layout.width, layout.height, tilt_degrees);
        let center_y = next_top_edge - half;

        let gap = layout.height * (spacing - 1.0);
        next_top_edge = center_y - half - gap;

        placements.push(StampPlacement {
            stamp: stamp.clone(),
            layout,
            tilt_degrees,
            center_x,
            center_y,
        });
    }

    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A4: (f64, f64) = (595.28, 841.89);

    #[test]
    fn text_is_upper_cased() {
        let s = StampSpec::new("paid", 42);
        assert_eq!(s.text(), "PAID");
        assert_eq!(s.color(), "#003399");
        assert_eq!(s.date(), None);
    }

    #[test]
    fn empty_date_counts_as_absent() {
        let s = StampSpec::new("paid", 1).with_date("");
        assert_eq!(s.date(), None);
    }

    #[test]
    fn tilt_is_deterministic() {
        for id in [0_u64, 1, 42, 999, 123_456_789] {
            assert_eq!(compute_tilt(id).to_bits(), compute_tilt(id).to_bits());
        }
    }

    #[test]
    fn tilt_range_holds_over_wide_sample() {
        let mut saw_negative = false;
        let mut saw_positive = false;
        for id in 0..5000_u64 {
            let t = compute_tilt(id);
            assert!((1.0..=3.0).contains(&t.abs()), "id {id}: tilt {t}");
            saw_negative |= t < 0.0;
            saw_positive |= t > 0.0;
        }
        assert!(saw_negative && saw_positive);
    }

    #[test]
    fn font_size_fits_width() {
        let width = A4.0 * STAMP_WIDTH_RATIO;
        let padding = width * PADDING_RATIO;
        let size = fit_font_size("PAID", width, padding);
        let text_width = 4.0 * CHAR_WIDTH_RATIO * size;
        assert!((text_width - (width - 2.0 * padding)).abs() < 1e-9);
    }

    #[test]
    fn font_size_has_floor() {
        assert_eq!(fit_font_size("A VERY LONG STAMP TEXT INDEED", 40.0, 5.0), MIN_FONT_SIZE);
        assert_eq!(fit_font_size("", 100.0, 5.0), MIN_FONT_SIZE);
        assert_eq!(fit_font_size("PAID", 10.0, 6.0), MIN_FONT_SIZE);
    }

    #[test]
    fn date_makes_box_taller() {
        let width = 120.0;
        let plain = stamp_layout(&StampSpec::new("paid", 1), width);
        let dated = stamp_layout(&StampSpec::new("paid", 1).with_date("2024-03-15"), width);
        assert_eq!(plain.font_size, dated.font_size);
        assert!(dated.height > plain.height);
        assert!((dated.height - plain.height - dated.date_font_size - 2.0 * MM).abs() < 1e-9);
    }

    #[test]
    fn projected_height_without_tilt() {
        assert!((projected_half_height(100.0, 40.0, 0.0) - 20.0).abs() < 1e-12);
        assert!((projected_half_height(100.0, 40.0, 90.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn first_stamp_anchored_top_right() {
        let placements = place_stamps(A4.0, A4.1, &[StampSpec::new("paid", 42)]).unwrap();
        let p = &placements[0];
        let width = A4.0 * STAMP_WIDTH_RATIO;
        assert!((p.center_x + width / 2.0 - A4.0 * STAMP_RIGHT_EDGE).abs() < 1e-9);
        assert!((p.top_edge() - A4.1 * STAMP_TOP_EDGE).abs() < 1e-9);
    }

    #[test]
    fn stacked_stamps_never_overlap() {
        let stamps = vec![
            StampSpec::new("paid", 42).with_date("2024-03-15"),
            StampSpec::new("received", 42),
            StampSpec::new("x", 42).with_date("2024-01-01"),
        ];
        let placements = place_stamps(A4.0, A4.1, &stamps).unwrap();
        assert_eq!(placements.len(), 3);
        for pair in placements.windows(2) {
            let gap = pair[0].bottom_edge() - pair[1].top_edge();
            let expected = pair[0].layout.height * (STACK_SPACING - 1.0);
            assert!(gap >= 0.0);
            assert!((gap - expected).abs() < 1e-9, "gap {gap} expected {expected}");
        }
    }

    #[test]
    fn placements_keep_input_order() {
        let stamps = vec![StampSpec::new("paid", 7), StampSpec::new("received", 7)];
        let placements = place_stamps(612.0, 792.0, &stamps).unwrap();
        assert_eq!(placements[0].stamp.text(), "PAID");
        assert_eq!(placements[1].stamp.text(), "RECEIVED");
        assert!(placements[0].center_y > placements[1].center_y);
    }

    #[test]
    fn empty_stamp_list_rejected() {
        let err = place_stamps(A4.0, A4.1, &[]).unwrap_err();
        assert!(err.to_string().contains("At least one stamp"), "got: {err}");
    }

    #[test]
    fn non_positive_page_rejected() {
        let s = [StampSpec::new("paid", 1)];
        for (w, h) in [(0.0, 800.0), (-100.0, 800.0), (600.0, 0.0), (f64::NAN, 800.0)] {
            let err = place_stamps(w, h, &s).unwrap_err();
            assert!(err.to_string().contains("Invalid page dimensions"), "got: {err}");
        }
    }

    #[test]
    fn spacing_must_exceed_one() {
        let s = [StampSpec::new("paid", 1)];
        assert!(place_stamps_with_spacing(A4.0, A4.1, &s, 1.0).is_err());
        assert!(place_stamps_with_spacing(A4.0, A4.1, &s, 1.5).is_ok());
    }
}
