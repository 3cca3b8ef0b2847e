//! Raster render session: target pixmap plus a save/restore state stack.

use crate::{RenderConfig, RenderError};
use glam::{Affine2, Vec2};
use tilesurface_common::{BlendMode, Rect};
use tiny_skia::{
    Color, FillRule, FilterQuality, Mask, Paint, PathBuilder, Pattern, Pixmap, SpreadMode,
    Transform,
};

/// Drawing state restored by [`CanvasSession::with_saved_state`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionState {
    pub transform: Transform,
    pub alpha: f32,
    pub blend_mode: BlendMode,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            alpha: 1.0,
            blend_mode: BlendMode::Normal,
        }
    }
}

/// Raster drawing context for the canvas path.
pub struct CanvasSession {
    target: Pixmap,
    config: RenderConfig,
    /// Camera-shake offset in device pixels.
    pub shake: Vec2,
    state: SessionState,
    saved: Vec<SessionState>,
    /// Clip masks; the top one is the intersection of all pushed rects.
    masks: Vec<Mask>,
    draw_calls: usize,
}

impl std::fmt::Debug for CanvasSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasSession")
            .field("size", &(self.target.width(), self.target.height()))
            .field("config", &self.config)
            .field("state", &self.state)
            .field("save_depth", &self.saved.len())
            .field("mask_depth", &self.masks.len())
            .field("draw_calls", &self.draw_calls)
            .finish()
    }
}

impl CanvasSession {
    /// Allocate a `width` x `height` target cleared to the configured color.
    pub fn new(width: u32, height: u32, config: RenderConfig) -> Result<Self, RenderError> {
        let mut target =
            Pixmap::new(width, height).ok_or(RenderError::TargetAllocation { width, height })?;
        let [r, g, b, a] = config.clear_color;
        target.fill(Color::from_rgba8(r, g, b, a));
        Ok(Self {
            target,
            config,
            shake: Vec2::ZERO,
            state: SessionState::default(),
            saved: Vec::new(),
            masks: Vec::new(),
            draw_calls: 0,
        })
    }

    pub fn target(&self) -> &Pixmap {
        &self.target
    }

    pub fn into_target(self) -> Pixmap {
        self.target
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn save_depth(&self) -> usize {
        self.saved.len()
    }

    pub fn mask_depth(&self) -> usize {
        self.masks.len()
    }

    /// Number of pattern fills issued so far.
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    /// Run `f` and restore transform, alpha and blend mode afterwards,
    /// whatever `f` changed.
    pub fn with_saved_state<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.saved.push(self.state);
        let result = f(self);
        if let Some(state) = self.saved.pop() {
            self.state = state;
        }
        result
    }

    /// World matrix scaled by the resolution and offset by the shake.
    pub fn device_transform(&self, world: &Affine2) -> Transform {
        let res = self.config.resolution;
        let m = world.matrix2;
        let t = world.translation;
        Transform::from_row(
            m.x_axis.x * res,
            m.x_axis.y * res,
            m.y_axis.x * res,
            m.y_axis.y * res,
            t.x * res + self.shake.x,
            t.y * res + self.shake.y,
        )
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.state.transform = transform;
    }

    pub fn pre_concat(&mut self, transform: Transform) {
        self.state.transform = self.state.transform.pre_concat(transform);
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.state.alpha = alpha.clamp(0.0, 1.0);
    }

    /// Returns true if the blend mode actually changed.
    pub fn set_blend_mode(&mut self, mode: BlendMode) -> bool {
        if self.state.blend_mode == mode {
            return false;
        }
        self.state.blend_mode = mode;
        true
    }

    /// Clip subsequent draws to `rect` (world units), intersected with the
    /// current mask.
    pub fn push_mask(&mut self, rect: &Rect) {
        let (w, h) = (self.target.width(), self.target.height());
        let Some(mut mask) = Mask::new(w, h) else {
            return;
        };
        let device = rect.scaled(self.config.resolution);
        if let Some(r) = tiny_skia::Rect::from_xywh(device.x, device.y, device.width, device.height) {
            let shake = Transform::from_translate(self.shake.x, self.shake.y);
            mask.fill_path(&PathBuilder::from_rect(r), FillRule::Winding, false, shake);
        }
        if let Some(parent) = self.masks.last() {
            for (dst, src) in mask.data_mut().iter_mut().zip(parent.data()) {
                *dst = ((u16::from(*dst) * u16::from(*src) + 127) / 255) as u8;
            }
        }
        self.masks.push(mask);
    }

    pub fn pop_mask(&mut self) {
        self.masks.pop();
    }

    /// Fill `rect` (local units) with `pattern` repeated from the local origin.
    pub fn fill_pattern(&mut self, rect: tiny_skia::Rect, pattern: &Pixmap) {
        let paint = Paint {
            shader: Pattern::new(
                pattern.as_ref(),
                SpreadMode::Repeat,
                FilterQuality::Nearest,
                self.state.alpha,
                Transform::identity(),
            ),
            blend_mode: to_skia_blend(self.state.blend_mode),
            anti_alias: false,
            ..Paint::default()
        };
        self.target
            .fill_rect(rect, &paint, self.state.transform, self.masks.last());
        self.draw_calls += 1;
    }
}

/// Raster equivalent of a blend mode.
pub fn to_skia_blend(mode: BlendMode) -> tiny_skia::BlendMode {
    match mode {
        BlendMode::Normal => tiny_skia::BlendMode::SourceOver,
        BlendMode::Add => tiny_skia::BlendMode::Plus,
        BlendMode::Multiply => tiny_skia::BlendMode::Multiply,
        BlendMode::Screen => tiny_skia::BlendMode::Screen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CanvasSession {
        CanvasSession::new(8, 8, RenderConfig::default()).unwrap()
    }

    fn solid(rgba: [u8; 4]) -> Pixmap {
        let mut p = Pixmap::new(2, 2).unwrap();
        p.fill(Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]));
        p
    }

    #[test]
    fn zero_sized_target_is_an_error() {
        assert!(matches!(
            CanvasSession::new(0, 4, RenderConfig::default()),
            Err(RenderError::TargetAllocation { width: 0, height: 4 })
        ));
    }

    #[test]
    fn saved_state_is_restored() {
        let mut s = session();
        let before = s.state();
        s.with_saved_state(|s| {
            s.set_alpha(0.3);
            s.set_blend_mode(BlendMode::Add);
            s.pre_concat(Transform::from_scale(2.0, 2.0));
            s.with_saved_state(|s| s.set_transform(Transform::from_translate(5.0, 5.0)));
            assert_eq!(s.save_depth(), 1);
        });
        assert_eq!(s.state(), before);
        assert_eq!(s.save_depth(), 0);
    }

    #[test]
    fn blend_change_is_reported() {
        let mut s = session();
        assert!(!s.set_blend_mode(BlendMode::Normal));
        assert!(s.set_blend_mode(BlendMode::Screen));
        assert!(!s.set_blend_mode(BlendMode::Screen));
    }

    #[test]
    fn device_transform_applies_resolution_and_shake() {
        let config = RenderConfig {
            resolution: 2.0,
            ..RenderConfig::default()
        };
        let mut s = CanvasSession::new(4, 4, config).unwrap();
        s.shake = Vec2::new(1.0, -1.0);
        let t = s.device_transform(&Affine2::from_translation(Vec2::new(3.0, 4.0)));
        assert_eq!(t, Transform::from_row(2.0, 0.0, 0.0, 2.0, 7.0, 7.0));
    }

    #[test]
    fn fill_respects_mask() {
        let mut s = session();
        s.push_mask(&Rect::new(0.0, 0.0, 4.0, 8.0));
        s.fill_pattern(tiny_skia::Rect::from_xywh(0.0, 0.0, 8.0, 8.0).unwrap(), &solid([255, 0, 0, 255]));
        s.pop_mask();
        assert_eq!(s.target().pixel(1, 1).unwrap().red(), 255);
        assert_eq!(s.target().pixel(6, 1).unwrap().alpha(), 0);
        assert_eq!(s.draw_calls(), 1);
        assert_eq!(s.mask_depth(), 0);
    }

    #[test]
    fn nested_masks_intersect() {
        let mut s = session();
        s.push_mask(&Rect::new(0.0, 0.0, 4.0, 8.0));
        s.push_mask(&Rect::new(2.0, 0.0, 6.0, 8.0));
        s.fill_pattern(tiny_skia::Rect::from_xywh(0.0, 0.0, 8.0, 8.0).unwrap(), &solid([0, 0, 255, 255]));
        assert_eq!(s.target().pixel(0, 0).unwrap().alpha(), 0);
        assert_eq!(s.target().pixel(3, 0).unwrap().blue(), 255);
        assert_eq!(s.target().pixel(5, 0).unwrap().alpha(), 0);
    }

    #[test]
    fn alpha_scales_pattern() {
        let mut s = session();
        s.set_alpha(0.5);
        s.fill_pattern(tiny_skia::Rect::from_xywh(0.0, 0.0, 8.0, 8.0).unwrap(), &solid([255, 255, 255, 255]));
        let a = s.target().pixel(4, 4).unwrap().alpha();
        assert!((126..=129).contains(&a), "alpha {a}");
    }

    #[test]
    fn mask_is_scaled_by_resolution() {
        let config = RenderConfig {
            resolution: 2.0,
            ..RenderConfig::default()
        };
        let mut s = CanvasSession::new(8, 8, config).unwrap();
        s.push_mask(&Rect::new(0.0, 0.0, 2.0, 4.0));
        s.fill_pattern(tiny_skia::Rect::from_xywh(0.0, 0.0, 8.0, 8.0).unwrap(), &solid([255, 0, 0, 255]));
        assert_eq!(s.target().pixel(3, 7).unwrap().red(), 255);
        assert_eq!(s.target().pixel(4, 0).unwrap().alpha(), 0);
    }
}
