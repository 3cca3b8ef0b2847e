//! Off-screen tiling texture cache and the synthesis that fills it.

use glam::Vec2;
use tilesurface_assets::Frame;
use tilesurface_common::{TextureId, Tint};
use tiny_skia::{
    Color, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, PremultipliedColorU8, Rect,
    Stroke, Transform,
};

/// Backend the cache is synthesized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisMode {
    /// Raster path: the surface keeps the untrimmed frame size.
    Canvas,
    /// GPU path: each dimension is padded to the next power of two.
    Gpu,
}

/// Device-side view over the cache surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTextureHandle {
    id: TextureId,
    atlas_index: u32,
    dirty: bool,
}

impl GpuTextureHandle {
    fn new() -> Self {
        Self {
            id: TextureId::next(),
            atlas_index: 0,
            dirty: true,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn atlas_index(&self) -> u32 {
        self.atlas_index
    }

    /// True when the surface changed since the last upload.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record an upload into atlas slot `atlas_index`.
    pub fn mark_uploaded(&mut self, atlas_index: u32) {
        self.atlas_index = atlas_index;
        self.dirty = false;
    }
}

/// Reusable off-screen surface holding one period of the tiled pattern.
#[derive(Debug)]
pub struct TilingTextureCache {
    surface: Pixmap,
    gpu: GpuTextureHandle,
    power_of_two: bool,
}

impl TilingTextureCache {
    fn allocate(width: u32, height: u32) -> Option<Self> {
        tracing::debug!(width, height, "allocating tiling surface");
        Some(Self {
            surface: Pixmap::new(width, height)?,
            gpu: GpuTextureHandle::new(),
            power_of_two: false,
        })
    }

    /// Resize for a new synthesis, keeping the handle id. Returns false if the
    /// new size cannot be allocated.
    fn reuse(&mut self, width: u32, height: u32) -> bool {
        if self.surface.width() == width && self.surface.height() == height {
            self.surface.fill(Color::TRANSPARENT);
        } else {
            tracing::debug!(width, height, "resizing tiling surface");
            let Some(surface) = Pixmap::new(width, height) else {
                return false;
            };
            self.surface = surface;
        }
        self.gpu.dirty = true;
        true
    }

    pub fn surface(&self) -> &Pixmap {
        &self.surface
    }

    pub fn gpu(&self) -> &GpuTextureHandle {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut GpuTextureHandle {
        &mut self.gpu
    }

    /// Padded size of the surface in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.surface.width(), self.surface.height())
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.surface.width() as f32, self.surface.height() as f32)
    }

    /// True when the last synthesis padded to powers of two.
    pub fn is_power_of_two(&self) -> bool {
        self.power_of_two
    }
}

/// Copy of the frame's crop with `tint` multiplied into every pixel.
/// `None` while the source is still loading.
pub fn tinted_crop(frame: &Frame, tint: Tint) -> Option<Pixmap> {
    let mut crop = frame.crop()?;
    let [tr, tg, tb] = tint.channels().map(u16::from);
    let mul = |c: u8, t: u16| ((u16::from(c) * t + 127) / 255) as u8;
    for px in crop.pixels_mut() {
        let tinted = PremultipliedColorU8::from_rgba(
            mul(px.red(), tr),
            mul(px.green(), tg),
            mul(px.blue(), tb),
            px.alpha(),
        );
        if let Some(tinted) = tinted {
            *px = tinted;
        }
    }
    Some(crop)
}

/// Regenerate `cache` from `frame`.
///
/// Returns the tile scale correction (`original / padded` per axis), or
/// `None` when nothing could be synthesized; the caller must not draw in that
/// case. `tinted` replaces the raw crop when a tint is active.
pub fn synthesize(
    cache: &mut Option<TilingTextureCache>,
    frame: &Frame,
    tinted: Option<&Pixmap>,
    mode: SynthesisMode,
    debug_outline: bool,
) -> Option<Vec2> {
    let _span = tracing::trace_span!("synthesize", key = %frame.key, frame = %frame.name, ?mode).entered();

    if !frame.has_loaded() {
        tracing::trace!("source image not loaded yet");
        return None;
    }

    let owned;
    let crop = match tinted {
        Some(pixmap) => pixmap,
        None => {
            owned = frame.crop()?;
            &owned
        }
    };

    let original = (frame.source_size.w, frame.source_size.h);
    if original.0 == 0 || original.1 == 0 {
        return None;
    }
    let padded = match mode {
        SynthesisMode::Canvas => original,
        SynthesisMode::Gpu => (original.0.next_power_of_two(), original.1.next_power_of_two()),
    };

    let ready = match cache.as_mut() {
        Some(existing) => existing.reuse(padded.0, padded.1),
        None => {
            *cache = TilingTextureCache::allocate(padded.0, padded.1);
            cache.is_some()
        }
    };
    if !ready {
        return None;
    }
    let target = cache.as_mut()?;

    if debug_outline {
        stroke_outline(&mut target.surface);
    }

    let fit = Vec2::new(
        padded.0 as f32 / original.0 as f32,
        padded.1 as f32 / original.1 as f32,
    );
    let (dx, dy) = if frame.trimmed {
        (frame.trim_offset.0 as f32, frame.trim_offset.1 as f32)
    } else {
        (0.0, 0.0)
    };
    let paint = PixmapPaint {
        quality: if fit == Vec2::ONE {
            FilterQuality::Nearest
        } else {
            FilterQuality::Bilinear
        },
        ..PixmapPaint::default()
    };
    let transform = Transform::from_row(fit.x, 0.0, 0.0, fit.y, dx * fit.x, dy * fit.y);
    target
        .surface
        .draw_pixmap(0, 0, crop.as_ref(), &paint, transform, None);

    target.power_of_two = mode == SynthesisMode::Gpu;

    tracing::trace!(width = padded.0, height = padded.1, "synthesized tiling texture");
    Some(Vec2::new(
        original.0 as f32 / padded.0 as f32,
        original.1 as f32 / padded.1 as f32,
    ))
}

fn stroke_outline(surface: &mut Pixmap) {
    let (w, h) = (surface.width() as f32, surface.height() as f32);
    let Some(rect) = Rect::from_xywh(0.5, 0.5, (w - 1.0).max(0.0), (h - 1.0).max(0.0)) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color_rgba8(0, 255, 0, 255);
    let stroke = Stroke {
        width: 1.0,
        ..Stroke::default()
    };
    surface.stroke_path(&PathBuilder::from_rect(rect), &paint, &stroke, Transform::identity(), None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tilesurface_assets::{FrameTable, PixelRect, PixelSize, SourceImage};

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Pixmap {
        let mut p = Pixmap::new(w, h).unwrap();
        p.fill(Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]));
        p
    }

    fn whole(w: u32, h: u32) -> Arc<Frame> {
        let mut table = FrameTable::new();
        table.add_image("src", SourceImage::loaded("src", solid(w, h, [255, 0, 0, 255])))
    }

    #[test]
    fn raster_mode_keeps_source_size() {
        let frame = whole(30, 20);
        let mut cache = None;
        let correction = synthesize(&mut cache, &frame, None, SynthesisMode::Canvas, false).unwrap();
        let cache = cache.unwrap();
        assert_eq!(cache.dimensions(), (30, 20));
        assert_eq!(correction, Vec2::ONE);
        assert!(!cache.is_power_of_two());
    }

    #[test]
    fn gpu_mode_pads_to_power_of_two() {
        let frame = whole(30, 30);
        let mut cache = None;
        let correction = synthesize(&mut cache, &frame, None, SynthesisMode::Gpu, false).unwrap();
        let cache = cache.unwrap();
        assert_eq!(cache.dimensions(), (32, 32));
        assert_eq!(correction, Vec2::new(30.0 / 32.0, 30.0 / 32.0));
        assert!(correction.x < 1.0);
        assert!(cache.is_power_of_two());
        assert!(cache.gpu().is_dirty());
    }

    #[test]
    fn gpu_mode_dimensions_are_powers_of_two() {
        for (w, h) in [(1, 1), (3, 17), (64, 64), (65, 100), (200, 8)] {
            let frame = whole(w, h);
            let mut cache = None;
            synthesize(&mut cache, &frame, None, SynthesisMode::Gpu, false).unwrap();
            let (pw, ph) = cache.unwrap().dimensions();
            assert!(pw.is_power_of_two() && pw >= w);
            assert!(ph.is_power_of_two() && ph >= h);
        }
    }

    #[test]
    fn non_power_of_two_source_fills_padded_surface() {
        let frame = whole(30, 30);
        let mut cache = None;
        synthesize(&mut cache, &frame, None, SynthesisMode::Gpu, false).unwrap();
        let surface = cache.unwrap();
        let corner = surface.surface().pixel(31, 31).unwrap();
        assert!(corner.alpha() > 0);
    }

    #[test]
    fn trimmed_frame_lands_at_trim_offset() {
        let mut table = FrameTable::new();
        let mut sheet = solid(16, 16, [0, 0, 0, 0]);
        // Opaque 2x2 block at (8, 8) holds the trimmed pixels.
        sheet.fill_rect(
            Rect::from_xywh(8.0, 8.0, 2.0, 2.0).unwrap(),
            &{
                let mut p = Paint::default();
                p.set_color_rgba8(0, 0, 255, 255);
                p
            },
            Transform::identity(),
            None,
        );
        table.add_image("sheet", SourceImage::loaded("sheet", sheet));
        let frame = table
            .add_frame(
                "sheet",
                "trimmed",
                PixelRect::new(8, 8, 2, 2),
                PixelSize { w: 8, h: 6 },
                Some((3, 4)),
            )
            .unwrap();

        let mut cache = None;
        synthesize(&mut cache, &frame, None, SynthesisMode::Canvas, false).unwrap();
        let cache = cache.unwrap();
        assert_eq!(cache.dimensions(), (8, 6));
        let s = cache.surface();
        for (x, y) in [(3, 4), (4, 4), (3, 5), (4, 5)] {
            let px = s.pixel(x, y).unwrap();
            assert_eq!((px.blue(), px.alpha()), (255, 255), "pixel ({x}, {y})");
        }
        assert_eq!(s.pixel(0, 0).unwrap().alpha(), 0);
        assert_eq!(s.pixel(5, 4).unwrap().alpha(), 0);
        assert_eq!(s.pixel(3, 3).unwrap().alpha(), 0);
    }

    #[test]
    fn trimmed_frame_is_stretched_into_padded_surface() {
        let mut table = FrameTable::new();
        let mut sheet = solid(16, 16, [0, 0, 0, 0]);
        let mut blue = Paint::default();
        blue.set_color_rgba8(0, 0, 255, 255);
        sheet.fill_rect(Rect::from_xywh(8.0, 8.0, 6.0, 6.0).unwrap(), &blue, Transform::identity(), None);
        table.add_image("sheet", SourceImage::loaded("sheet", sheet));
        let frame = table
            .add_frame(
                "sheet",
                "trimmed",
                PixelRect::new(8, 8, 6, 6),
                PixelSize { w: 12, h: 12 },
                Some((3, 3)),
            )
            .unwrap();

        let mut cache = None;
        let correction = synthesize(&mut cache, &frame, None, SynthesisMode::Gpu, false).unwrap();
        assert_eq!(correction, Vec2::splat(12.0 / 16.0));
        let cache = cache.unwrap();
        assert_eq!(cache.dimensions(), (16, 16));

        // Offset (3, 3) and size 6x6 scale by 16/12 to (4, 4) and 8x8.
        let s = cache.surface();
        for (x, y) in [(5, 5), (7, 7), (10, 10), (5, 10)] {
            let px = s.pixel(x, y).unwrap();
            assert_eq!((px.blue(), px.alpha()), (255, 255), "pixel ({x}, {y})");
        }
        for (x, y) in [(2, 2), (3, 7), (7, 13), (13, 13)] {
            assert_eq!(s.pixel(x, y).unwrap().alpha(), 0, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn unloaded_source_is_a_no_op() {
        let mut table = FrameTable::new();
        let frame = table.add_image("late", SourceImage::pending("late", 8, 8));
        let mut cache = None;
        assert!(synthesize(&mut cache, &frame, None, SynthesisMode::Gpu, false).is_none());
        assert!(cache.is_none());
    }

    #[test]
    fn reuse_keeps_handle_and_marks_dirty() {
        let frame = whole(16, 16);
        let mut cache = None;
        synthesize(&mut cache, &frame, None, SynthesisMode::Gpu, false).unwrap();
        let id = cache.as_ref().unwrap().gpu().id();
        cache.as_mut().unwrap().gpu_mut().mark_uploaded(3);
        assert!(!cache.as_ref().unwrap().gpu().is_dirty());

        let bigger = whole(40, 16);
        synthesize(&mut cache, &bigger, None, SynthesisMode::Gpu, false).unwrap();
        let cache = cache.unwrap();
        assert_eq!(cache.gpu().id(), id);
        assert!(cache.gpu().is_dirty());
        assert_eq!(cache.dimensions(), (64, 16));
    }

    #[test]
    fn debug_outline_marks_border() {
        let mut table = FrameTable::new();
        let frame = table.add_image(
            "clear",
            SourceImage::loaded("clear", solid(8, 8, [0, 0, 0, 0])),
        );
        let mut cache = None;
        synthesize(&mut cache, &frame, None, SynthesisMode::Canvas, true).unwrap();
        let cache = cache.unwrap();
        let edge = cache.surface().pixel(0, 4).unwrap();
        assert_eq!(edge.green(), 255);
        assert_eq!(cache.surface().pixel(4, 4).unwrap().alpha(), 0);
    }

    #[test]
    fn tint_multiplies_channels() {
        let mut table = FrameTable::new();
        let frame = table.add_image(
            "white",
            SourceImage::loaded("white", solid(2, 2, [255, 255, 255, 255])),
        );
        let tinted = tinted_crop(&frame, Tint(0xFF8000)).unwrap();
        let px = tinted.pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.green(), px.blue(), px.alpha()), (255, 128, 0, 255));

        let mut cache = None;
        synthesize(&mut cache, &frame, Some(&tinted), SynthesisMode::Canvas, false).unwrap();
        let px = cache.unwrap().surface().pixel(1, 1).unwrap();
        assert_eq!((px.red(), px.green(), px.blue()), (255, 128, 0));
    }
}
