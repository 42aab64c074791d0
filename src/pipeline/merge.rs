//! Merge a stamp overlay onto page 1 of an existing PDF.
//!
//! The overlay page is imported as a Form XObject and painted after the
//! original page-1 content, which is wrapped in `q … Q` so any graphics
//! state it leaves behind cannot leak into the stamps. Every other page is
//! left exactly as it was.
//!
//! Both documents are loaded into memory and the merged result is only
//! serialised once every step succeeded, so a failure never yields a
//! half-written file.

use crate::error::StampError;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeSet;
use tracing::debug;

/// Page boxes inherit through the page tree; stop after this many parents.
const MAX_TREE_DEPTH: usize = 32;
/// MediaBox used when a page tree carries none (US Letter).
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];
const OVERLAY_XOBJECT: &str = "StampOverlay";

/// Width and height of page 1's MediaBox in points.
///
/// # Errors
/// [`StampError::Merge`] if the document is encrypted or cannot be read.
pub fn page1_dimensions(pdf: &[u8]) -> Result<(f64, f64), StampError> {
    let doc = load(pdf)?;
    let page_id = first_page(&doc)?;
    let [x0, y0, x1, y1] = media_box(&doc, page_id);
    Ok((x1 - x0, y1 - y0))
}

/// Overlay the first page of `overlay_pdf` onto page 1 of `original_pdf`.
///
/// # Errors
/// [`StampError::Merge`] with [`crate::error::MergeCause::Encrypted`] for
/// input that needs a user password and [`crate::error::MergeCause::Invalid`] for
/// anything else that cannot be parsed or written.
pub fn merge_overlay(original_pdf: &[u8], overlay_pdf: &[u8]) -> Result<Vec<u8>, StampError> {
    let mut original = load(original_pdf)?;
    let mut overlay = load(overlay_pdf)?;

    let target_page = first_page(&original)?;
    let [x0, y0, _, _] = media_box(&original, target_page);

    // Renumber so overlay ids cannot collide with the original's.
    overlay.renumber_objects_with(original.max_id + 1);
    let overlay_page = first_page(&overlay)?;
    let [ox0, oy0, ox1, oy1] = media_box(&overlay, overlay_page);
    let overlay_content = overlay
        .get_page_content(overlay_page)
        .map_err(|e| StampError::invalid_pdf(format!("overlay content: {e}")))?;
    let overlay_resources = inherited_resources(&overlay, overlay_page)?;
    let skipped = page_content_ids(&overlay, overlay_page);

    for (id, object) in std::mem::take(&mut overlay.objects) {
        let structural = matches!(object.type_name().unwrap_or(""), "Catalog" | "Pages" | "Page");
        if !structural && !skipped.contains(&id) {
            original.objects.insert(id, object);
        }
    }
    original.max_id = original.max_id.max(overlay.max_id);

    let form = Stream::new(
        Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Form".to_vec())),
            ("BBox", number_array(&[ox0, oy0, ox1, oy1])),
            ("Matrix", number_array(&[1.0, 0.0, 0.0, 1.0, x0, y0])),
            ("Resources", Object::Dictionary(overlay_resources)),
        ]),
        overlay_content,
    );
    let form_id = original.add_object(form);

    let mut resources = inherited_resources(&original, target_page)?;
    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => original
            .get_dictionary(*id)
            .map_err(|e| StampError::invalid_pdf(format!("XObject resources: {e}")))?
            .clone(),
        _ => Dictionary::new(),
    };
    let name = unique_name(&xobjects, OVERLAY_XOBJECT);
    xobjects.set(name.clone(), Object::Reference(form_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut contents = existing_contents(&original, target_page);
    let open_id = original.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close_id = original.add_object(Stream::new(
        Dictionary::new(),
        format!("\nQ\nq /{name} Do Q\n").into_bytes(),
    ));
    contents.insert(0, Object::Reference(open_id));
    contents.push(Object::Reference(close_id));

    let page = original
        .get_object_mut(target_page)
        .and_then(Object::as_dict_mut)
        .map_err(|e| StampError::invalid_pdf(format!("page 1: {e}")))?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));

    let mut output = Vec::new();
    original
        .save_to(&mut output)
        .map_err(|e| StampError::invalid_pdf(format!("Failed to merge PDFs: {e}")))?;
    debug!("Merged overlay onto page 1 → {} bytes", output.len());
    Ok(output)
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn load(bytes: &[u8]) -> Result<Document, StampError> {
    let mut doc = Document::load_mem(bytes).map_err(|e| StampError::invalid_pdf(e.to_string()))?;
    if doc.is_encrypted() {
        // Owner-password-only files open with an empty user password.
        doc.decrypt("")
            .map_err(|e| StampError::encrypted(format!("a password is required to open it ({e})")))?;
        doc.trailer.remove(b"Encrypt");
        debug!("Opened encrypted PDF with an empty user password");
    }
    Ok(doc)
}

fn first_page(doc: &Document) -> Result<ObjectId, StampError> {
    doc.get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| StampError::invalid_pdf("document has no pages"))
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    let mut current = doc.get_dictionary(page_id).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let Some(dict) = current else { break };
        if let Some(values) = dict.get(b"MediaBox").ok().and_then(|o| numbers(doc, o)) {
            if let [x0, y0, x1, y1] = values[..] {
                return [x0, y0, x1, y1];
            }
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
            _ => None,
        };
    }
    DEFAULT_MEDIA_BOX
}

fn numbers(doc: &Document, object: &Object) -> Option<Vec<f64>> {
    let array = match object {
        Object::Array(a) => a,
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
        _ => return None,
    };
    array
        .iter()
        .map(|o| match o {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(f64::from(*r)),
            _ => None,
        })
        .collect()
}

/// Page resources, resolving references and inheritance, as an owned dictionary.
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, StampError> {
    let mut current = doc.get_dictionary(page_id).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let Some(dict) = current else { break };
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(d)) => return Ok(d.clone()),
            Ok(Object::Reference(id)) => {
                return doc
                    .get_dictionary(*id)
                    .cloned()
                    .map_err(|e| StampError::invalid_pdf(format!("page resources: {e}")));
            }
            _ => {}
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
            _ => None,
        };
    }
    Ok(Dictionary::new())
}

/// Content stream references of a page, flattening an indirect array.
fn existing_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn page_content_ids(doc: &Document, page_id: ObjectId) -> BTreeSet<ObjectId> {
    existing_contents(doc, page_id)
        .iter()
        .filter_map(|o| o.as_reference().ok())
        .collect()
}

fn unique_name(xobjects: &Dictionary, base: &str) -> String {
    if !xobjects.has(base.as_bytes()) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| base.to_string())
}

fn number_array(values: &[f64]) -> Object {
    Object::Array(values.iter().map(|v| Object::Real(*v as f32)).collect())
}
