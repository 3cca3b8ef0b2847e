//! wgpu render backend for tiling surfaces.
//!
//! Draws tiling quads as instances over power-of-two textures with a
//! repeating sampler. Masks map to scissor rectangles.
//!
//! # Invariants
//! - Renderer never mutates scene state.
//! - Device textures are keyed by the surface cache's `TextureId` and freed
//!   only through `release_texture`.

mod gpu;
mod headless;
mod projection;
mod shaders;

pub use gpu::{FrameStats, WgpuBatch, WgpuTilingRenderer};
pub use headless::{OffscreenTarget, request_device};
pub use projection::ScreenProjection;

/// Errors from device setup and readback.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("invalid {width}x{height} render target")]
    InvalidTarget { width: u32, height: u32 },
    #[error("readback failed: {0}")]
    Readback(String),
}
