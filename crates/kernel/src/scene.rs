use crate::gates::{SurfaceEvent, TickContext};
use crate::surface::TileSurface;
use glam::Affine2;
use std::collections::BTreeMap;
use tilesurface_common::{EntityId, TextureId};

/// An event record produced by scene mutations and ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    Added { id: EntityId },
    /// Surface was destroyed and dropped from the scene.
    Removed { id: EntityId },
    Stepped { tick: u64 },
    /// Something a surface reported during a tick.
    Surface { id: EntityId, event: SurfaceEvent },
}

/// Owner of the top-level tiling surfaces.
///
/// Surfaces are kept in insertion order, which is also the draw order.
/// Textures released by destroyed surfaces are collected here until the
/// backend drains them.
#[derive(Debug, Default)]
pub struct Scene {
    surfaces: BTreeMap<EntityId, TileSurface>,
    order: Vec<EntityId>,
    tick: u64,
    events: Vec<SceneEvent>,
    released: Vec<TextureId>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulation tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Take ownership of `surface` and return its id.
    pub fn add(&mut self, surface: TileSurface) -> EntityId {
        let id = EntityId::new();
        self.surfaces.insert(id, surface);
        self.order.push(id);
        self.events.push(SceneEvent::Added { id });
        id
    }

    pub fn get(&self, id: EntityId) -> Option<&TileSurface> {
        self.surfaces.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut TileSurface> {
        self.surfaces.get_mut(&id)
    }

    /// Surfaces in draw order.
    pub fn iter_display(&self) -> impl Iterator<Item = (EntityId, &TileSurface)> {
        self.order
            .iter()
            .filter_map(|id| self.surfaces.get(id).map(|s| (*id, s)))
    }

    /// Visit every surface mutably in draw order.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(EntityId, &mut TileSurface)) {
        for id in &self.order {
            if let Some(surface) = self.surfaces.get_mut(id) {
                f(*id, surface);
            }
        }
    }

    /// Recompute world matrices from each surface's local transform.
    pub fn update_transforms(&mut self) {
        self.for_each_mut(|_, s| s.update_transform(&Affine2::IDENTITY, 1.0));
    }

    /// Advance the simulation by one tick.
    ///
    /// Every surface runs its pre-update chain; surfaces destroyed during the
    /// tick are removed afterwards. Events of nested children are reported
    /// under the id of their top-level surface.
    pub fn step(&mut self, ctx: &TickContext) {
        let _span = tracing::trace_span!("scene_step", tick = self.tick + 1).entered();
        for id in &self.order {
            let Some(surface) = self.surfaces.get_mut(id) else {
                continue;
            };
            surface.pre_update(ctx);
            for event in surface.drain_events() {
                self.events.push(SceneEvent::Surface { id: *id, event });
            }
            // Children detached during the tick hand their textures up.
            self.released.append(&mut surface.take_released_textures());
        }
        self.prune_destroyed();
        self.tick += 1;
        self.events.push(SceneEvent::Stepped { tick: self.tick });
    }

    /// Destroy and remove a surface. Returns false for unknown ids.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        let Some(mut surface) = self.surfaces.remove(&id) else {
            return false;
        };
        surface.destroy();
        self.released.append(&mut surface.take_released_textures());
        self.order.retain(|o| *o != id);
        self.events.push(SceneEvent::Removed { id });
        true
    }

    fn prune_destroyed(&mut self) {
        let dead: Vec<EntityId> = self
            .order
            .iter()
            .filter(|id| self.surfaces.get(*id).is_some_and(TileSurface::is_destroyed))
            .copied()
            .collect();
        for id in dead {
            self.destroy(id);
        }
    }

    /// Texture ids the GPU backend should free.
    pub fn drain_released_textures(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut self.released)
    }

    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }
}
