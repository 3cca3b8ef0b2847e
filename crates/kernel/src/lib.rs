//! Tiling surface kernel: the entity, its tile state and its texture cache.
//!
//! # Invariants
//! - Scroll advances exactly once per tick, before the capability gates.
//! - The cache is only (re)synthesized from a render call, and a failed
//!   synthesis never leaves a stale cache drawable.
//! - A GPU-mode cache is power-of-two on both axes; a raster-mode cache has
//!   the untrimmed frame size.

mod bounds;
mod cache;
mod gates;
mod refresh;
mod scene;
mod surface;
mod tile;

pub use bounds::compute_bounds;
pub use cache::{GpuTextureHandle, SynthesisMode, TilingTextureCache, synthesize, tinted_crop};
pub use gates::{
    BoundsTransition, GateKind, InputHandler, Lifespan, PhysicsBody, SurfaceEvent, TickContext,
    UPDATE_ORDER, WorldBoundsCheck,
};
pub use refresh::{RefreshEvent, RefreshState};
pub use scene::{Scene, SceneEvent};
pub use surface::TileSurface;
pub use tile::{TileError, TileState};

pub fn crate_info() -> &'static str {
    "tilesurface-kernel v0.1.0"
}
