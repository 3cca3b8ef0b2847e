use glam::{Mat4, Vec2, Vec3};

/// Orthographic screen projection: world units to clip space, y down,
/// origin at the top left of the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenProjection {
    pub width: u32,
    pub height: u32,
    /// Device pixels per world unit.
    pub resolution: f32,
}

impl ScreenProjection {
    pub fn new(width: u32, height: u32, resolution: f32) -> Self {
        Self {
            width,
            height,
            resolution,
        }
    }

    /// Visible world extent.
    pub fn world_size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32) / self.resolution
    }

    pub fn view_projection(&self) -> Mat4 {
        let size = self.world_size();
        Mat4::orthographic_rh(0.0, size.x, size.y, 0.0, -1.0, 1.0)
    }

    /// Map a world rectangle to a scissor rectangle in device pixels, clamped
    /// to the target. `None` when nothing of it is visible.
    pub fn scissor(&self, x: f32, y: f32, width: f32, height: f32) -> Option<[u32; 4]> {
        let r = self.resolution;
        let x0 = (x * r).floor().clamp(0.0, self.width as f32);
        let y0 = (y * r).floor().clamp(0.0, self.height as f32);
        let x1 = ((x + width) * r).ceil().clamp(0.0, self.width as f32);
        let y1 = ((y + height) * r).ceil().clamp(0.0, self.height as f32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some([x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32])
    }

    pub fn to_clip(&self, world: Vec2) -> Vec3 {
        self.view_projection().project_point3(world.extend(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_map_to_clip_extremes() {
        let p = ScreenProjection::new(800, 600, 1.0);
        let tl = p.to_clip(Vec2::ZERO);
        let br = p.to_clip(Vec2::new(800.0, 600.0));
        assert!((tl.x + 1.0).abs() < 1e-5 && (tl.y - 1.0).abs() < 1e-5);
        assert!((br.x - 1.0).abs() < 1e-5 && (br.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn resolution_shrinks_world_extent() {
        let p = ScreenProjection::new(800, 600, 2.0);
        assert_eq!(p.world_size(), Vec2::new(400.0, 300.0));
    }

    #[test]
    fn scissor_is_clamped() {
        let p = ScreenProjection::new(100, 100, 2.0);
        assert_eq!(p.scissor(10.0, 10.0, 20.0, 5.0), Some([20, 20, 40, 10]));
        assert_eq!(p.scissor(40.0, 40.0, 100.0, 100.0), Some([80, 80, 20, 20]));
        assert_eq!(p.scissor(200.0, 0.0, 10.0, 10.0), None);
    }
}
