//! Capability gates evaluated by the per-tick update chain.

use glam::Vec2;
use std::fmt::Debug;
use tilesurface_common::Rect;

/// One step of the pre-update chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Physics,
    Lifespan,
    InWorld,
    Core,
}

/// Evaluation order of the gates. The first failing gate ends the chain.
pub const UPDATE_ORDER: [GateKind; 4] = [
    GateKind::Physics,
    GateKind::Lifespan,
    GateKind::InWorld,
    GateKind::Core,
];

/// Timing and world data for one simulation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    /// Elapsed simulation time in seconds.
    pub elapsed: f32,
    /// World rectangle used by the in-world gate, if any.
    pub world_bounds: Option<Rect>,
}

impl Default for TickContext {
    fn default() -> Self {
        Self::fixed(60.0)
    }
}

impl TickContext {
    /// Fixed timestep at `hz` ticks per second.
    pub fn fixed(hz: f32) -> Self {
        Self {
            elapsed: 1.0 / hz,
            world_bounds: None,
        }
    }

    pub fn with_world_bounds(mut self, bounds: Rect) -> Self {
        self.world_bounds = Some(bounds);
        self
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.elapsed * 1000.0
    }
}

/// Physics body attached to a surface. Returning `false` skips the rest of
/// the tick for that surface.
pub trait PhysicsBody: Debug {
    fn pre_update(&mut self, position: Vec2, ctx: &TickContext) -> bool;

    fn destroy(&mut self) {}
}

/// Input hit-testing handler attached to a surface.
pub trait InputHandler: Debug {
    fn destroy(&mut self);
}

/// Remaining lifetime in milliseconds. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Lifespan {
    pub remaining_ms: f32,
}

impl Lifespan {
    pub fn new(ms: f32) -> Self {
        Self { remaining_ms: ms }
    }

    /// Count down by `elapsed_ms`. Returns true when the lifespan just ran out.
    pub fn tick(&mut self, elapsed_ms: f32) -> bool {
        if self.remaining_ms <= 0.0 {
            return false;
        }
        self.remaining_ms -= elapsed_ms;
        self.remaining_ms <= 0.0
    }
}

/// Edge between inside and outside the world bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsTransition {
    Left,
    Entered,
}

/// Tracks whether a surface is inside the world bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorldBoundsCheck {
    pub enabled: bool,
    pub kill_on_exit: bool,
    out_of_bounds: bool,
}

impl WorldBoundsCheck {
    pub fn enabled(kill_on_exit: bool) -> Self {
        Self {
            enabled: true,
            kill_on_exit,
            out_of_bounds: false,
        }
    }

    pub fn is_out_of_bounds(&self) -> bool {
        self.out_of_bounds
    }

    pub fn reset(&mut self) {
        self.out_of_bounds = false;
    }

    /// Compare `bounds` with `world`, reporting a transition only on the edge.
    pub fn update(&mut self, bounds: &Rect, world: &Rect) -> Option<BoundsTransition> {
        let inside = world.intersects(bounds);
        match (self.out_of_bounds, inside) {
            (true, true) => {
                self.out_of_bounds = false;
                Some(BoundsTransition::Entered)
            }
            (false, false) => {
                self.out_of_bounds = true;
                Some(BoundsTransition::Left)
            }
            _ => None,
        }
    }
}

/// Notable things that happened to a surface during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    LeftBounds,
    EnteredBounds,
    Killed,
    Destroyed,
}
