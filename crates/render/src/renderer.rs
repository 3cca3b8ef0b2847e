use crate::batch::GpuBatch;
use crate::canvas::render_canvas;
use crate::gpu::render_gpu;
use crate::session::CanvasSession;
use crate::{RenderConfig, RenderError};
use glam::Vec2;
use std::fmt::Write;
use tilesurface_kernel::Scene;
use tiny_skia::Pixmap;

/// Renderer-agnostic interface. All renderers implement this trait.
///
/// Rendering may synthesize tiling caches and wrap tile offsets, so it takes
/// the scene mutably; it never adds, removes or ticks surfaces.
pub trait Renderer {
    /// The output type produced by this renderer.
    type Output;

    /// Render one frame of the scene in display order.
    fn render(&mut self, scene: &mut Scene) -> Self::Output;
}

/// Raster renderer producing a fresh pixmap per frame.
#[derive(Debug, Clone)]
pub struct CanvasRenderer {
    pub width: u32,
    pub height: u32,
    pub config: RenderConfig,
    pub shake: Vec2,
}

impl CanvasRenderer {
    pub fn new(width: u32, height: u32, config: RenderConfig) -> Self {
        Self {
            width,
            height,
            config,
            shake: Vec2::ZERO,
        }
    }
}

impl Renderer for CanvasRenderer {
    type Output = Result<Pixmap, RenderError>;

    fn render(&mut self, scene: &mut Scene) -> Self::Output {
        let _span = tracing::debug_span!("canvas_frame", tick = scene.tick()).entered();
        let mut session = CanvasSession::new(self.width, self.height, self.config)?;
        session.shake = self.shake;
        scene.for_each_mut(|_, surface| render_canvas(surface, &mut session));
        tracing::debug!(draw_calls = session.draw_calls(), "canvas frame done");
        Ok(session.into_target())
    }
}

/// Renderer feeding any [`GpuBatch`].
#[derive(Debug, Default)]
pub struct GpuRenderer<B> {
    pub batch: B,
}

impl<B: GpuBatch> GpuRenderer<B> {
    pub fn new(batch: B) -> Self {
        Self { batch }
    }

    pub fn into_batch(self) -> B {
        self.batch
    }
}

impl<B: GpuBatch> Renderer for GpuRenderer<B> {
    type Output = ();

    fn render(&mut self, scene: &mut Scene) {
        let _span = tracing::debug_span!("gpu_frame", tick = scene.tick()).entered();
        for texture in scene.drain_released_textures() {
            self.batch.release_texture(texture);
        }
        self.batch.start();
        let batch: &mut dyn GpuBatch = &mut self.batch;
        scene.for_each_mut(|_, surface| render_gpu(surface, batch));
        self.batch.stop();
    }
}

/// Debug text renderer.
///
/// Produces a human-readable dump of the scene and each surface's tile and
/// cache state. Useful for CLI output, logging, and testing.
#[derive(Debug, Default)]
pub struct DebugTextRenderer;

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&mut self, scene: &mut Scene) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Scene (tick={}) ===", scene.tick());
        let _ = writeln!(out, "Surfaces: {}", scene.len());

        for (id, s) in scene.iter_display() {
            let p = s.position;
            let o = s.tile_offset();
            let k = s.tile_scale();
            let c = s.tile_scale_correction();
            let _ = write!(
                out,
                "  [{:.8}] pos=({:.2}, {:.2}) size={}x{} offset=({:.2}, {:.2}) scale=({:.2}, {:.2}) correction=({:.4}, {:.4})",
                &id.0.to_string()[..8],
                p.x,
                p.y,
                s.width(),
                s.height(),
                o.x,
                o.y,
                k.x,
                k.y,
                c.x,
                c.y,
            );
            match s.cache() {
                Some(cache) => {
                    let (w, h) = cache.dimensions();
                    let _ = write!(out, " cache={w}x{h}");
                }
                None => out.push_str(" cache=none"),
            }
            let _ = writeln!(out, " refresh={:?} children={}", s.refresh_state(), s.children().len());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchCommand, RecordingBatch};
    use std::sync::Arc;
    use tilesurface_assets::{Frame, FrameTable, SourceImage};
    use tilesurface_kernel::{TickContext, TileSurface};
    use tiny_skia::Color;

    fn frame(w: u32, h: u32) -> Arc<Frame> {
        let mut p = Pixmap::new(w, h).unwrap();
        p.fill(Color::from_rgba8(0, 128, 255, 255));
        let mut table = FrameTable::new();
        table.add_image("src", SourceImage::loaded("src", p))
    }

    #[test]
    fn debug_renderer_empty_scene() {
        let output = DebugTextRenderer::new().render(&mut Scene::new());
        assert!(output.contains("tick=0"));
        assert!(output.contains("Surfaces: 0"));
    }

    #[test]
    fn debug_renderer_lists_cache_state() {
        let mut scene = Scene::new();
        scene.add(TileSurface::new(frame(30, 30), 0.0, 0.0, 64.0, 64.0));
        let before = DebugTextRenderer::new().render(&mut scene);
        assert!(before.contains("cache=none"));
        assert!(before.contains("NeedsSynthesis"));

        GpuRenderer::new(RecordingBatch::new()).render(&mut scene);
        let after = DebugTextRenderer::new().render(&mut scene);
        assert!(after.contains("cache=32x32"), "{after}");
        assert!(after.contains("refresh=Clean"));
    }

    #[test]
    fn canvas_renderer_draws_scene() {
        let mut scene = Scene::new();
        scene.add(TileSurface::new(frame(4, 4), 2.0, 2.0, 4.0, 4.0));
        let pixmap = CanvasRenderer::new(8, 8, RenderConfig::default())
            .render(&mut scene)
            .unwrap();
        assert_eq!(pixmap.pixel(3, 3).unwrap().blue(), 255);
        assert_eq!(pixmap.pixel(0, 0).unwrap().alpha(), 0);
    }

    #[test]
    fn canvas_renderer_reports_bad_target() {
        let mut scene = Scene::new();
        let result = CanvasRenderer::new(0, 0, RenderConfig::default()).render(&mut scene);
        assert!(matches!(result, Err(RenderError::TargetAllocation { .. })));
    }

    #[test]
    fn gpu_renderer_brackets_frame_and_releases_textures() {
        let mut scene = Scene::new();
        let doomed = scene.add(TileSurface::new(frame(8, 8), 0.0, 0.0, 8.0, 8.0));
        scene.add(TileSurface::new(frame(8, 8), 8.0, 0.0, 8.0, 8.0));

        let mut renderer = GpuRenderer::new(RecordingBatch::new());
        renderer.render(&mut scene);
        let first = renderer.batch.take();
        assert_eq!(first.first(), Some(&BatchCommand::Start));
        assert_eq!(first.last(), Some(&BatchCommand::Stop));
        assert_eq!(
            first.iter().filter(|c| matches!(c, BatchCommand::Draw(_))).count(),
            2
        );

        let released = scene.get(doomed).unwrap().cache().unwrap().gpu().id();
        scene.get_mut(doomed).unwrap().request_destroy();
        scene.step(&TickContext::default());
        renderer.render(&mut scene);
        let second = renderer.batch.take();
        assert_eq!(second[0], BatchCommand::Release(released));
        assert_eq!(
            second.iter().filter(|c| matches!(c, BatchCommand::Draw(_))).count(),
            1
        );
    }
}
