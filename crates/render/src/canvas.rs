use crate::session::CanvasSession;
use glam::Vec2;
use tilesurface_kernel::{SynthesisMode, TileSurface};
use tiny_skia::Transform;

/// Draw `surface` and its children into the raster session.
///
/// The session's transform, alpha, blend mode and mask depth are the same on
/// return as on entry, including when the draw is skipped because the source
/// image has not loaded.
pub fn render_canvas(surface: &mut TileSurface, session: &mut CanvasSession) {
    if !surface.is_drawable() {
        return;
    }
    let _span = tracing::trace_span!("render_canvas", width = surface.width(), height = surface.height())
        .entered();

    let masked = match surface.mask {
        Some(rect) => {
            session.push_mask(&rect);
            true
        }
        None => false,
    };
    session.with_saved_state(|session| draw(surface, session));
    if masked {
        session.pop_mask();
    }
}

fn draw(surface: &mut TileSurface, session: &mut CanvasSession) {
    session.set_alpha(surface.world_alpha());
    let device = session.device_transform(surface.world_transform());
    session.set_transform(device);

    surface.resolve_tint();
    if surface.prepare_texture(SynthesisMode::Canvas).is_none() {
        tracing::trace!("tiling texture unavailable, skipping draw");
        return;
    }
    session.set_blend_mode(surface.blend_mode);

    let offset = surface.wrap_tile_offset();
    let scale = surface.tile_scale();
    let size = Vec2::new(surface.width(), surface.height());
    let anchor_offset = -surface.anchor * size;
    let round = session.config().round_pixels;

    if let Some(cache) = surface.cache() {
        session.with_saved_state(|session| {
            session.pre_concat(Transform::from_scale(scale.x, scale.y));
            let shift = offset + anchor_offset / scale;
            session.pre_concat(Transform::from_translate(shift.x, shift.y));

            let mut origin = -offset;
            let mut extent = size / scale;
            if round {
                origin = origin.trunc();
                extent = extent.trunc();
            }
            if let Some(rect) = tiny_skia::Rect::from_xywh(origin.x, origin.y, extent.x, extent.y) {
                session.fill_pattern(rect, cache.surface());
            }
        });
    }

    for child in surface.children_mut() {
        render_canvas(child, session);
    }
}
