use glam::{Affine2, Vec2};
use tilesurface_common::Rect;

/// Axis-aligned bounds of a `width` x `height` quad anchored at `anchor`
/// (fraction of the size) after applying `transform`.
///
/// The four corners are transformed individually, so rotated and skewed
/// transforms yield the tightest enclosing box.
pub fn compute_bounds(width: f32, height: f32, anchor: Vec2, transform: &Affine2) -> Rect {
    let left = width * -anchor.x;
    let right = width * (1.0 - anchor.x);
    let top = height * -anchor.y;
    let bottom = height * (1.0 - anchor.y);

    let corners = [
        Vec2::new(left, top),
        Vec2::new(right, top),
        Vec2::new(right, bottom),
        Vec2::new(left, bottom),
    ]
    .map(|c| transform.transform_point2(c));

    Rect::enclosing(&corners)
}
