//! Rendering adapter: raster and batched GPU paths for tiling surfaces.
//!
//! # Invariants
//! - Renderers never add, remove or tick surfaces; they only synthesize caches
//!   and wrap tile offsets.
//! - The canvas path leaves the session's transform, alpha, blend mode and
//!   mask stack as it found them.
//! - The GPU path restarts a paused batch exactly once per masked or filtered
//!   surface.

mod batch;
mod canvas;
mod config;
mod gpu;
mod renderer;
mod session;

pub use batch::{BatchCommand, GpuBatch, RecordingBatch, TilingQuad};
pub use canvas::render_canvas;
pub use config::RenderConfig;
pub use gpu::render_gpu;
pub use renderer::{CanvasRenderer, DebugTextRenderer, GpuRenderer, Renderer};
pub use session::{CanvasSession, SessionState, to_skia_blend};

/// Errors from the render paths.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot allocate a {width}x{height} render target")]
    TargetAllocation { width: u32, height: u32 },
    #[error("invalid render config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn crate_info() -> &'static str {
    "tilesurface-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
