use glam::{Affine2, Vec2};
use tilesurface_common::{BlendMode, FilterId, Rect, TextureId, Tint};
use tiny_skia::Pixmap;

/// One repeating-texture quad as submitted to a GPU batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingQuad {
    pub texture: TextureId,
    /// Padded size of the uploaded texture in pixels.
    pub texture_size: Vec2,
    pub transform: Affine2,
    /// Quad size in local units.
    pub size: Vec2,
    pub anchor: Vec2,
    pub tile_offset: Vec2,
    pub tile_scale: Vec2,
    pub scale_correction: Vec2,
    pub alpha: f32,
    pub tint: Tint,
    pub blend_mode: BlendMode,
}

impl TilingQuad {
    /// Quad corners in world space, clockwise from the anchor-adjusted top left.
    pub fn corners(&self) -> [Vec2; 4] {
        let min = -self.anchor * self.size;
        let max = min + self.size;
        [
            Vec2::new(min.x, min.y),
            Vec2::new(max.x, min.y),
            Vec2::new(max.x, max.y),
            Vec2::new(min.x, max.y),
        ]
        .map(|c| self.transform.transform_point2(c))
    }
}

/// Batched GPU renderer driven by the GPU render path.
///
/// `stop` flushes pending geometry and pauses batching; `start` resumes it.
/// `flush` submits pending geometry without pausing.
pub trait GpuBatch {
    fn start(&mut self);
    fn stop(&mut self);
    fn flush(&mut self);
    fn push_mask(&mut self, mask: &Rect);
    fn pop_mask(&mut self);
    fn push_filters(&mut self, filters: &[FilterId]);
    fn pop_filters(&mut self);
    /// Upload the cache surface as `texture`, tagged with the source's atlas slot.
    fn upload_texture(&mut self, texture: TextureId, pixels: &Pixmap, atlas_index: u32);
    fn draw_tiling_quad(&mut self, quad: &TilingQuad);
    fn release_texture(&mut self, texture: TextureId);
}

/// Call recorded by [`RecordingBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    Start,
    Stop,
    Flush,
    PushMask(Rect),
    PopMask,
    PushFilters(Vec<FilterId>),
    PopFilters,
    Upload {
        texture: TextureId,
        width: u32,
        height: u32,
        atlas_index: u32,
    },
    Draw(TilingQuad),
    Release(TextureId),
}

/// Batch that records every call, for inspecting the command stream
/// without a device.
#[derive(Debug, Default)]
pub struct RecordingBatch {
    pub commands: Vec<BatchCommand>,
}

impl RecordingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<BatchCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draws(&self) -> impl Iterator<Item = &TilingQuad> {
        self.commands.iter().filter_map(|c| match c {
            BatchCommand::Draw(quad) => Some(quad),
            _ => None,
        })
    }
}

impl GpuBatch for RecordingBatch {
    fn start(&mut self) {
        self.commands.push(BatchCommand::Start);
    }

    fn stop(&mut self) {
        self.commands.push(BatchCommand::Stop);
    }

    fn flush(&mut self) {
        self.commands.push(BatchCommand::Flush);
    }

    fn push_mask(&mut self, mask: &Rect) {
        self.commands.push(BatchCommand::PushMask(*mask));
    }

    fn pop_mask(&mut self) {
        self.commands.push(BatchCommand::PopMask);
    }

    fn push_filters(&mut self, filters: &[FilterId]) {
        self.commands.push(BatchCommand::PushFilters(filters.to_vec()));
    }

    fn pop_filters(&mut self) {
        self.commands.push(BatchCommand::PopFilters);
    }

    fn upload_texture(&mut self, texture: TextureId, pixels: &Pixmap, atlas_index: u32) {
        self.commands.push(BatchCommand::Upload {
            texture,
            width: pixels.width(),
            height: pixels.height(),
            atlas_index,
        });
    }

    fn draw_tiling_quad(&mut self, quad: &TilingQuad) {
        self.commands.push(BatchCommand::Draw(*quad));
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.commands.push(BatchCommand::Release(texture));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TilingQuad {
        TilingQuad {
            texture: TextureId(1),
            texture_size: Vec2::splat(32.0),
            transform: Affine2::from_translation(Vec2::new(10.0, 20.0)),
            size: Vec2::new(100.0, 50.0),
            anchor: Vec2::splat(0.5),
            tile_offset: Vec2::ZERO,
            tile_scale: Vec2::ONE,
            scale_correction: Vec2::ONE,
            alpha: 1.0,
            tint: Tint::WHITE,
            blend_mode: BlendMode::Normal,
        }
    }

    #[test]
    fn corners_follow_anchor_and_transform() {
        let c = quad().corners();
        assert_eq!(c[0], Vec2::new(-40.0, -5.0));
        assert_eq!(c[2], Vec2::new(60.0, 45.0));
    }

    #[test]
    fn recording_batch_keeps_call_order() {
        let mut batch = RecordingBatch::new();
        batch.start();
        batch.draw_tiling_quad(&quad());
        batch.release_texture(TextureId(9));
        assert_eq!(batch.draws().count(), 1);
        assert_eq!(
            batch.take(),
            vec![
                BatchCommand::Start,
                BatchCommand::Draw(quad()),
                BatchCommand::Release(TextureId(9)),
            ]
        );
        assert!(batch.commands.is_empty());
    }
}
