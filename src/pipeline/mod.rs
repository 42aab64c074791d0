//! Pipeline stages for stamping a PDF.
//!
//! Each submodule implements exactly one transformation step, and all of
//! them are synchronous and CPU-bound. The worker runs the whole chain in
//! `spawn_blocking`.
//!
//! ## Data Flow
//!
//! ```text
//! original PDF ──▶ merge::page1_dimensions ──▶ layout ──▶ render ──▶ merge::merge_overlay
//!                  (page-1 MediaBox)          (geometry) (overlay)   (page 1 + overlay)
//! ```
//!
//! 1. [`layout`]: stamp box sizes, tilt and stacking positions
//! 2. [`render`]: draw the stamps onto a transparent one-page PDF
//! 3. [`merge`]: read page-1 size and composite the overlay onto page 1

pub mod layout;
pub mod merge;
pub mod render;

use crate::error::StampError;
use layout::StampSpec;
use tracing::debug;

/// Stamp page 1 of `original` with every stamp in `stamps`.
///
/// Chains [`merge::page1_dimensions`], [`render::generate_overlay`] and
/// [`merge::merge_overlay`].
pub fn stamp_pdf(original: &[u8], stamps: &[StampSpec]) -> Result<Vec<u8>, StampError> {
    let (page_width, page_height) = merge::page1_dimensions(original)?;
    debug!("Page 1 is {:.2} x {:.2} pt", page_width, page_height);
    let overlay = render::generate_overlay(page_width, page_height, stamps)?;
    merge::merge_overlay(original, &overlay)
}
