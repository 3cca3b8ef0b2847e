use glam::Vec2;

/// Errors from tile parameter validation.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TileError {
    #[error("tile scale must be finite and positive, got ({x}, {y})")]
    InvalidTileScale { x: f32, y: f32 },
    #[error("surface size must be finite and non-negative, got ({width}, {height})")]
    InvalidSize { width: f32, height: f32 },
}

/// Scroll and zoom of the repeating pattern, independent of the surface size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileState {
    scroll_velocity: Vec2,
    offset: Vec2,
    scale: Vec2,
    /// `original / padded` size of the cached texture.
    scale_correction: Vec2,
}

impl Default for TileState {
    fn default() -> Self {
        Self {
            scroll_velocity: Vec2::ZERO,
            offset: Vec2::ZERO,
            scale: Vec2::ONE,
            scale_correction: Vec2::ONE,
        }
    }
}

impl TileState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scroll continuously at `(vx, vy)` pixels per second.
    pub fn autoscroll(&mut self, vx: f32, vy: f32) {
        self.scroll_velocity = Vec2::new(vx, vy);
    }

    pub fn stop_scroll(&mut self) {
        self.scroll_velocity = Vec2::ZERO;
    }

    pub fn scroll_velocity(&self) -> Vec2 {
        self.scroll_velocity
    }

    pub fn is_scrolling(&self) -> bool {
        self.scroll_velocity != Vec2::ZERO
    }

    /// Advance the offset by `velocity * elapsed`. Axes are updated independently.
    pub fn advance(&mut self, elapsed: f32) {
        if self.scroll_velocity.x != 0.0 {
            self.offset.x += self.scroll_velocity.x * elapsed;
        }
        if self.scroll_velocity.y != 0.0 {
            self.offset.y += self.scroll_velocity.y * elapsed;
        }
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn set_offset(&mut self, x: f32, y: f32) {
        self.offset = Vec2::new(x, y);
    }

    /// Wrap the offset into `[0, dims)` per axis. Axes with a non-positive
    /// dimension are left alone.
    pub fn wrap_offset(&mut self, dims: Vec2) -> Vec2 {
        self.offset.x = wrap(self.offset.x, dims.x);
        self.offset.y = wrap(self.offset.y, dims.y);
        self.offset
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn set_scale(&mut self, x: f32, y: f32) -> Result<(), TileError> {
        if !(x.is_finite() && y.is_finite() && x > 0.0 && y > 0.0) {
            return Err(TileError::InvalidTileScale { x, y });
        }
        self.scale = Vec2::new(x, y);
        Ok(())
    }

    pub fn scale_correction(&self) -> Vec2 {
        self.scale_correction
    }

    pub(crate) fn set_scale_correction(&mut self, correction: Vec2) {
        self.scale_correction = correction;
    }
}

fn wrap(value: f32, extent: f32) -> f32 {
    if extent <= 0.0 || !value.is_finite() {
        return value;
    }
    let wrapped = value.rem_euclid(extent);
    // rem_euclid can round up to `extent` for tiny negative inputs.
    if wrapped >= extent { 0.0 } else { wrapped }
}
