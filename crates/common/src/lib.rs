//! Shared value types for the tiling surface renderer.
//!
//! Everything here is plain data: identifiers, rectangles, colors and the
//! small enums both render paths agree on.

mod types;

pub use types::{BlendMode, EntityId, FilterId, Rect, TextureId, Tint};

pub fn crate_info() -> &'static str {
    "tilesurface-common v0.1.0"
}
