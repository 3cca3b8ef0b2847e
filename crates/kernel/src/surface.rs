use crate::bounds::compute_bounds;
use crate::cache::{SynthesisMode, TilingTextureCache, synthesize, tinted_crop};
use crate::gates::{
    BoundsTransition, GateKind, InputHandler, Lifespan, PhysicsBody, SurfaceEvent, TickContext,
    UPDATE_ORDER, WorldBoundsCheck,
};
use crate::refresh::{RefreshEvent, RefreshState};
use crate::tile::{TileError, TileState};
use glam::{Affine2, Vec2};
use std::sync::Arc;
use tilesurface_assets::Frame;
use tilesurface_common::{BlendMode, FilterId, Rect, TextureId, Tint};
use tiny_skia::Pixmap;

#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundsKey {
    width: f32,
    height: f32,
    anchor: Vec2,
    transform: Affine2,
}

/// A rectangle filled with a repeating, scrollable copy of a source frame.
///
/// The surface owns its tiling texture cache; the render paths ask it to
/// (re)synthesize the cache through [`TileSurface::prepare_texture`] and then
/// draw from it.
#[derive(Debug)]
pub struct TileSurface {
    width: f32,
    height: f32,
    pub position: Vec2,
    /// Rotation in radians.
    pub rotation: f32,
    pub scale: Vec2,
    /// Origin of the quad as a fraction of its size.
    pub anchor: Vec2,
    pub visible: bool,
    pub renderable: bool,
    pub blend_mode: BlendMode,
    /// Clip rectangle in world units.
    pub mask: Option<Rect>,
    pub filters: Vec<FilterId>,
    /// Stamp a border on the cached texture when it is synthesized.
    pub debug_outline: bool,
    pub lifespan: Lifespan,
    pub world_bounds_check: WorldBoundsCheck,

    alpha: f32,
    parent_alpha: f32,
    world_alpha: f32,
    world_transform: Affine2,
    previous_position: Vec2,

    exists: bool,
    alive: bool,
    pending_destroy: bool,
    destroyed: bool,

    tile: TileState,
    refresh: RefreshState,
    texture: Arc<Frame>,
    tint: Tint,
    /// Tint and tinted crop the raster cache was built from.
    tinted: Option<(Tint, Pixmap)>,
    cache: Option<TilingTextureCache>,
    bounds_cache: Option<(BoundsKey, Rect)>,

    children: Vec<TileSurface>,
    physics: Option<Box<dyn PhysicsBody>>,
    input: Option<Box<dyn InputHandler>>,
    events: Vec<SurfaceEvent>,
    released: Vec<TextureId>,
}

impl TileSurface {
    /// Create a `width` x `height` surface at `(x, y)` tiling `texture`.
    /// The cache is allocated on the first render.
    pub fn new(texture: Arc<Frame>, x: f32, y: f32, width: f32, height: f32) -> Self {
        let position = Vec2::new(x, y);
        Self {
            width: sanitize_extent(width),
            height: sanitize_extent(height),
            position,
            rotation: 0.0,
            scale: Vec2::ONE,
            anchor: Vec2::ZERO,
            visible: true,
            renderable: true,
            blend_mode: BlendMode::Normal,
            mask: None,
            filters: Vec::new(),
            debug_outline: false,
            lifespan: Lifespan::default(),
            world_bounds_check: WorldBoundsCheck::default(),
            alpha: 1.0,
            parent_alpha: 1.0,
            world_alpha: 1.0,
            world_transform: Affine2::from_translation(position),
            previous_position: position,
            exists: true,
            alive: true,
            pending_destroy: false,
            destroyed: false,
            tile: TileState::default(),
            refresh: RefreshState::default().on(RefreshEvent::Constructed),
            texture,
            tint: Tint::WHITE,
            tinted: None,
            cache: None,
            bounds_cache: None,
            children: Vec::new(),
            physics: None,
            input: None,
            events: Vec::new(),
            released: Vec::new(),
        }
    }

    // --- Size ---

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// Set the logical width. Scale is not affected.
    pub fn set_width(&mut self, width: f32) -> Result<(), TileError> {
        self.set_size(width, self.height)
    }

    pub fn set_height(&mut self, height: f32) -> Result<(), TileError> {
        self.set_size(self.width, height)
    }

    pub fn set_size(&mut self, width: f32, height: f32) -> Result<(), TileError> {
        if !(width.is_finite() && height.is_finite() && width >= 0.0 && height >= 0.0) {
            return Err(TileError::InvalidSize { width, height });
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    // --- Tile state ---

    pub fn autoscroll(&mut self, vx: f32, vy: f32) {
        self.tile.autoscroll(vx, vy);
    }

    pub fn stop_scroll(&mut self) {
        self.tile.stop_scroll();
    }

    pub fn tile_state(&self) -> &TileState {
        &self.tile
    }

    pub fn tile_offset(&self) -> Vec2 {
        self.tile.offset()
    }

    pub fn set_tile_offset(&mut self, x: f32, y: f32) {
        self.tile.set_offset(x, y);
    }

    pub fn tile_scale(&self) -> Vec2 {
        self.tile.scale()
    }

    /// Zoom of the repeating pattern. Zero, negative and non-finite scales are rejected.
    pub fn set_tile_scale(&mut self, x: f32, y: f32) -> Result<(), TileError> {
        self.tile.set_scale(x, y)
    }

    pub fn tile_scale_correction(&self) -> Vec2 {
        self.tile.scale_correction()
    }

    /// Wrap the tile offset into the cache dimensions and return it.
    pub fn wrap_tile_offset(&mut self) -> Vec2 {
        match self.cache.as_ref() {
            Some(cache) => self.tile.wrap_offset(cache.size()),
            None => self.tile.offset(),
        }
    }

    // --- Texture ---

    pub fn texture(&self) -> &Arc<Frame> {
        &self.texture
    }

    /// Swap the source frame. Returns true if the reference changed, in
    /// which case the cache is rebuilt on the next render.
    pub fn set_texture(&mut self, texture: Arc<Frame>) -> bool {
        if Arc::ptr_eq(&self.texture, &texture) {
            return false;
        }
        self.texture = texture;
        self.tinted = None;
        self.transition(RefreshEvent::TextureSwapped);
        true
    }

    pub fn tint(&self) -> Tint {
        self.tint
    }

    pub fn set_tint(&mut self, tint: Tint) {
        if self.tint != tint {
            self.tint = tint;
            self.transition(RefreshEvent::TintChanged);
        }
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.refresh
    }

    pub fn needs_refresh(&self) -> bool {
        self.refresh.needs_synthesis()
    }

    pub fn cache(&self) -> Option<&TilingTextureCache> {
        self.cache.as_ref()
    }

    pub fn cache_mut(&mut self) -> Option<&mut TilingTextureCache> {
        self.cache.as_mut()
    }

    /// Rebuild the tinted crop if the tint moved away from what the raster
    /// cache was built with. Returns true when a refresh was forced.
    pub fn resolve_tint(&mut self) -> bool {
        let resolved = self.tinted.as_ref().map(|(t, _)| *t);
        if self.tint.is_default() {
            if resolved.is_some() {
                self.tinted = None;
                self.transition(RefreshEvent::TintChanged);
                return true;
            }
            return false;
        }
        if resolved == Some(self.tint) {
            return false;
        }
        match tinted_crop(&self.texture, self.tint) {
            Some(crop) => {
                self.tinted = Some((self.tint, crop));
                self.transition(RefreshEvent::TintChanged);
                true
            }
            None => false,
        }
    }

    /// Synthesize the cache if it is stale or missing and return it.
    ///
    /// `None` means nothing may be drawn this frame: either the source is not
    /// loaded yet or the surface is destroyed. A stale cache is never returned.
    pub fn prepare_texture(&mut self, mode: SynthesisMode) -> Option<&mut TilingTextureCache> {
        if self.destroyed {
            return None;
        }
        let wrong_padding = self
            .cache
            .as_ref()
            .is_some_and(|c| (mode == SynthesisMode::Gpu) != c.is_power_of_two());
        if self.needs_refresh() || self.cache.is_none() || wrong_padding {
            // Tint is baked into the raster cache; the GPU path tints in the shader.
            let tinted = match mode {
                SynthesisMode::Canvas => self.tinted.as_ref().map(|(_, crop)| crop),
                SynthesisMode::Gpu => None,
            };
            let correction = synthesize(
                &mut self.cache,
                &self.texture,
                tinted,
                mode,
                self.debug_outline,
            )?;
            self.tile.set_scale_correction(correction);
            self.transition(RefreshEvent::Synthesized);
        }
        self.cache.as_mut()
    }

    fn transition(&mut self, event: RefreshEvent) {
        let next = self.refresh.on(event);
        if next != self.refresh {
            tracing::trace!(?event, from = ?self.refresh, to = ?next, "refresh state");
        }
        self.refresh = next;
    }

    // --- Transform, alpha, bounds ---

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
        self.world_alpha = self.alpha * self.parent_alpha;
    }

    pub fn world_alpha(&self) -> f32 {
        self.world_alpha
    }

    pub fn world_transform(&self) -> &Affine2 {
        &self.world_transform
    }

    /// Install a world matrix computed by an external scene graph.
    pub fn set_world_transform(&mut self, transform: Affine2) {
        self.world_transform = transform;
    }

    /// Compose the local position/rotation/scale with the parent's world
    /// matrix and alpha, then propagate to children.
    pub fn update_transform(&mut self, parent: &Affine2, parent_alpha: f32) {
        let local = Affine2::from_scale_angle_translation(self.scale, self.rotation, self.position);
        self.world_transform = *parent * local;
        self.parent_alpha = parent_alpha;
        self.world_alpha = self.alpha * parent_alpha;
        let (transform, alpha) = (self.world_transform, self.world_alpha);
        for child in &mut self.children {
            child.update_transform(&transform, alpha);
        }
    }

    /// Axis-aligned world bounds. Reused until size, anchor or transform change.
    pub fn bounds(&mut self) -> Rect {
        let key = BoundsKey {
            width: self.width,
            height: self.height,
            anchor: self.anchor,
            transform: self.world_transform,
        };
        if let Some((cached_key, rect)) = self.bounds_cache {
            if cached_key == key {
                return rect;
            }
        }
        let rect = compute_bounds(self.width, self.height, self.anchor, &self.world_transform);
        self.bounds_cache = Some((key, rect));
        rect
    }

    /// Visible, renderable, not fully transparent and not destroyed.
    pub fn is_drawable(&self) -> bool {
        !self.destroyed && self.visible && self.renderable && self.world_alpha > 0.0
    }

    // --- Children and capabilities ---

    pub fn add_child(&mut self, mut child: TileSurface) {
        child.update_transform(&self.world_transform, self.world_alpha);
        self.children.push(child);
    }

    pub fn children(&self) -> &[TileSurface] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [TileSurface] {
        &mut self.children
    }

    pub fn set_physics_body(&mut self, body: Box<dyn PhysicsBody>) {
        self.physics = Some(body);
    }

    pub fn set_input_handler(&mut self, handler: Box<dyn InputHandler>) {
        self.input = Some(handler);
    }

    // --- Lifecycle ---

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn alive(&self) -> bool {
        self.alive
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn previous_position(&self) -> Vec2 {
        self.previous_position
    }

    /// Destroy during the core gate of the next tick.
    pub fn request_destroy(&mut self) {
        self.pending_destroy = true;
    }

    pub fn kill(&mut self) {
        self.alive = false;
        self.exists = false;
        self.visible = false;
        self.events.push(SurfaceEvent::Killed);
    }

    /// Move to `(x, y)`, zero the tile offset and bring the surface back to life.
    pub fn reset(&mut self, x: f32, y: f32) {
        self.position = Vec2::new(x, y);
        self.previous_position = self.position;
        self.world_transform.translation = self.position;
        self.tile.set_offset(0.0, 0.0);
        self.exists = true;
        self.visible = true;
        self.renderable = true;
        self.alive = true;
        self.pending_destroy = false;
        self.world_bounds_check.reset();
    }

    /// Release the cache and GPU handle, capabilities and children.
    /// Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.exists = false;
        self.alive = false;
        self.visible = false;
        self.pending_destroy = false;

        if let Some(cache) = self.cache.take() {
            self.released.push(cache.gpu().id());
        }
        self.tinted = None;
        self.bounds_cache = None;
        self.tile = TileState::default();

        if let Some(mut body) = self.physics.take() {
            body.destroy();
        }
        if let Some(mut input) = self.input.take() {
            input.destroy();
        }
        for mut child in self.children.drain(..) {
            child.destroy();
            self.released.append(&mut child.released);
        }
        self.filters.clear();
        self.mask = None;
        self.events.push(SurfaceEvent::Destroyed);
        tracing::debug!(released = self.released.len(), "tile surface destroyed");
    }

    /// GPU textures released by `destroy`, for the backend to free.
    pub fn take_released_textures(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut self.released)
    }

    pub fn drain_events(&mut self) -> Vec<SurfaceEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Per-tick update ---

    /// Advance the scroll offset, then run the capability gates in
    /// [`UPDATE_ORDER`]. Returns false as soon as one gate fails; the scroll
    /// advance has been applied either way.
    pub fn pre_update(&mut self, ctx: &TickContext) -> bool {
        if self.destroyed {
            return false;
        }
        self.tile.advance(ctx.elapsed);
        UPDATE_ORDER.iter().all(|gate| self.run_gate(*gate, ctx))
    }

    fn run_gate(&mut self, gate: GateKind, ctx: &TickContext) -> bool {
        match gate {
            GateKind::Physics => {
                let position = self.position;
                match self.physics.as_mut() {
                    Some(body) => body.pre_update(position, ctx),
                    None => true,
                }
            }
            GateKind::Lifespan => {
                if self.lifespan.tick(ctx.elapsed_ms()) {
                    self.kill();
                    return false;
                }
                true
            }
            GateKind::InWorld => {
                if !self.world_bounds_check.enabled {
                    return true;
                }
                let Some(world) = ctx.world_bounds else {
                    return true;
                };
                let bounds = self.bounds();
                match self.world_bounds_check.update(&bounds, &world) {
                    Some(BoundsTransition::Left) => {
                        self.events.push(SurfaceEvent::LeftBounds);
                        if self.world_bounds_check.kill_on_exit {
                            self.kill();
                            return false;
                        }
                        true
                    }
                    Some(BoundsTransition::Entered) => {
                        self.events.push(SurfaceEvent::EnteredBounds);
                        true
                    }
                    None => true,
                }
            }
            GateKind::Core => {
                if self.pending_destroy {
                    self.destroy();
                    return false;
                }
                self.previous_position = self.position;
                if !self.exists {
                    return false;
                }
                for child in &mut self.children {
                    child.pre_update(ctx);
                    self.events.append(&mut child.events);
                }
                let released = &mut self.released;
                self.children.retain_mut(|child| {
                    if !child.is_destroyed() {
                        return true;
                    }
                    released.append(&mut child.released);
                    false
                });
                true
            }
        }
    }
}

fn sanitize_extent(v: f32) -> f32 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}
