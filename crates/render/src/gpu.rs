use crate::batch::{GpuBatch, TilingQuad};
use glam::Vec2;
use tilesurface_kernel::{SynthesisMode, TileSurface};

/// Submit `surface` and its children to a GPU batch.
///
/// A mask pauses the batch around the push; filters flush it. Both are
/// popped after the draw with a single stop/start pair, also when the draw
/// itself was skipped.
pub fn render_gpu(surface: &mut TileSurface, batch: &mut dyn GpuBatch) {
    if !surface.is_drawable() {
        return;
    }
    let _span = tracing::trace_span!("render_gpu", width = surface.width(), height = surface.height())
        .entered();

    let masked = match surface.mask {
        Some(rect) => {
            batch.stop();
            batch.push_mask(&rect);
            batch.start();
            true
        }
        None => false,
    };
    let filtered = !surface.filters.is_empty();
    if filtered {
        batch.flush();
        batch.push_filters(&surface.filters);
    }

    draw(surface, batch);

    if masked || filtered {
        batch.stop();
        if filtered {
            batch.pop_filters();
        }
        if masked {
            batch.pop_mask();
        }
        batch.start();
    }
}

fn draw(surface: &mut TileSurface, batch: &mut dyn GpuBatch) {
    let atlas_index = surface.texture().image.index();
    let Some(cache) = surface.prepare_texture(SynthesisMode::Gpu) else {
        tracing::trace!("tiling texture unavailable, skipping draw");
        return;
    };
    if cache.gpu().is_dirty() {
        tracing::debug!(texture = cache.gpu().id().0, atlas_index, "uploading tiling texture");
        batch.upload_texture(cache.gpu().id(), cache.surface(), atlas_index);
        cache.gpu_mut().mark_uploaded(atlas_index);
    }
    let (texture, texture_size) = (cache.gpu().id(), cache.size());

    let quad = TilingQuad {
        texture,
        texture_size,
        transform: *surface.world_transform(),
        size: Vec2::new(surface.width(), surface.height()),
        anchor: surface.anchor,
        tile_offset: surface.tile_offset(),
        tile_scale: surface.tile_scale(),
        scale_correction: surface.tile_scale_correction(),
        alpha: surface.world_alpha(),
        tint: surface.tint(),
        blend_mode: surface.blend_mode,
    };
    batch.draw_tiling_quad(&quad);

    for child in surface.children_mut() {
        render_gpu(child, batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchCommand, RecordingBatch};
    use std::sync::Arc;
    use tilesurface_assets::{Frame, FrameTable, SourceImage};
    use tilesurface_common::{FilterId, Rect, Tint};
    use tiny_skia::Pixmap;

    fn frame(w: u32, h: u32) -> Arc<Frame> {
        let mut table = FrameTable::new();
        table.add_image("src", SourceImage::loaded("src", Pixmap::new(w, h).unwrap()))
    }

    fn surface() -> TileSurface {
        TileSurface::new(frame(30, 30), 0.0, 0.0, 100.0, 50.0)
    }

    fn kinds(commands: &[BatchCommand]) -> Vec<&'static str> {
        commands
            .iter()
            .map(|c| match c {
                BatchCommand::Start => "start",
                BatchCommand::Stop => "stop",
                BatchCommand::Flush => "flush",
                BatchCommand::PushMask(_) => "push_mask",
                BatchCommand::PopMask => "pop_mask",
                BatchCommand::PushFilters(_) => "push_filters",
                BatchCommand::PopFilters => "pop_filters",
                BatchCommand::Upload { .. } => "upload",
                BatchCommand::Draw(_) => "draw",
                BatchCommand::Release(_) => "release",
            })
            .collect()
    }

    #[test]
    fn plain_draw_uploads_once() {
        let mut s = surface();
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        assert_eq!(kinds(&batch.take()), ["upload", "draw"]);
        render_gpu(&mut s, &mut batch);
        assert_eq!(kinds(&batch.take()), ["draw"]);
    }

    #[test]
    fn mask_and_filters_restart_batch_once() {
        let mut s = surface();
        s.mask = Some(Rect::new(0.0, 0.0, 10.0, 10.0));
        s.filters = vec![FilterId(1), FilterId(2)];
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        assert_eq!(
            kinds(&batch.commands),
            [
                "stop",
                "push_mask",
                "start",
                "flush",
                "push_filters",
                "upload",
                "draw",
                "stop",
                "pop_filters",
                "pop_mask",
                "start"
            ]
        );
    }

    #[test]
    fn mask_only_restarts_after_pop() {
        let mut s = surface();
        s.mask = Some(Rect::new(0.0, 0.0, 10.0, 10.0));
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        assert_eq!(
            kinds(&batch.commands),
            ["stop", "push_mask", "start", "upload", "draw", "stop", "pop_mask", "start"]
        );
    }

    #[test]
    fn unloaded_source_still_pops_mask_and_filters() {
        let mut table = FrameTable::new();
        let late = table.add_image("late", SourceImage::pending("late", 8, 8));
        let mut s = TileSurface::new(late, 0.0, 0.0, 16.0, 16.0);
        s.mask = Some(Rect::new(0.0, 0.0, 4.0, 4.0));
        s.filters = vec![FilterId(7)];
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        let kinds = kinds(&batch.commands);
        assert!(!kinds.contains(&"draw"));
        assert_eq!(kinds.iter().filter(|k| **k == "start").count(), 2);
        assert!(kinds.ends_with(&["stop", "pop_filters", "pop_mask", "start"]));
    }

    #[test]
    fn quad_carries_padding_correction() {
        let mut s = surface();
        s.set_tint(Tint(0x336699));
        s.set_tile_offset(3.0, -2.0);
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        let quad = batch.draws().next().copied().unwrap();
        assert_eq!(quad.texture_size, Vec2::splat(32.0));
        assert_eq!(quad.scale_correction, Vec2::splat(30.0 / 32.0));
        assert_eq!(quad.size, Vec2::new(100.0, 50.0));
        assert_eq!(quad.tile_offset, Vec2::new(3.0, -2.0));
        assert_eq!(quad.tint, Tint(0x336699));
    }

    #[test]
    fn upload_uses_source_atlas_index() {
        let mut table = FrameTable::new();
        let f = table.add_image(
            "sheet",
            SourceImage::loaded("sheet", Pixmap::new(16, 16).unwrap()).with_index(3),
        );
        let mut s = TileSurface::new(f, 0.0, 0.0, 16.0, 16.0);
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        assert!(matches!(
            batch.commands[0],
            BatchCommand::Upload {
                width: 16,
                height: 16,
                atlas_index: 3,
                ..
            }
        ));
        assert_eq!(s.cache().unwrap().gpu().atlas_index(), 3);
        assert!(!s.cache().unwrap().gpu().is_dirty());
    }

    #[test]
    fn texture_swap_reuploads_same_id() {
        let mut s = surface();
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        let first = batch.draws().next().unwrap().texture;
        s.set_texture(frame(64, 8));
        batch.take();
        render_gpu(&mut s, &mut batch);
        match &batch.commands[0] {
            BatchCommand::Upload {
                texture,
                width,
                height,
                ..
            } => assert_eq!((*texture, *width, *height), (first, 64, 8)),
            other => panic!("expected upload, got {other:?}"),
        }
    }

    #[test]
    fn children_follow_parent() {
        let mut parent = surface();
        parent.add_child(TileSurface::new(frame(8, 8), 5.0, 5.0, 8.0, 8.0));
        let mut batch = RecordingBatch::new();
        render_gpu(&mut parent, &mut batch);
        let sizes: Vec<Vec2> = batch.draws().map(|q| q.size).collect();
        assert_eq!(sizes, [Vec2::new(100.0, 50.0), Vec2::new(8.0, 8.0)]);
    }

    #[test]
    fn zero_alpha_is_skipped() {
        let mut s = surface();
        s.set_alpha(0.0);
        let mut batch = RecordingBatch::new();
        render_gpu(&mut s, &mut batch);
        assert!(batch.commands.is_empty());
    }
}
