/// WGSL shader for instanced tiling quads.
///
/// Each instance carries its world matrix, size, anchor, tiling parameters
/// and color; the six vertices of the quad are generated from the vertex
/// index. The texture repeats through the sampler's address mode.
pub const TILING_SHADER: &str = r#"
struct Uniforms {
    view_proj: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> uniforms: Uniforms;

@group(1) @binding(0)
var t_tile: texture_2d<f32>;
@group(1) @binding(1)
var s_tile: sampler;

struct InstanceInput {
    // Columns of the 2x2 world matrix.
    @location(0) xform: vec4<f32>,
    // Translation, then quad size.
    @location(1) translation_size: vec4<f32>,
    // Anchor, then tile offset in scaled pixels.
    @location(2) anchor_offset: vec4<f32>,
    // Effective tile scale (scale * correction), then texture size.
    @location(3) tiling: vec4<f32>,
    // Tint rgb and world alpha.
    @location(4) color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32, instance: InstanceInput) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 1.0),
    );
    let corner = corners[vertex_index];
    let size = instance.translation_size.zw;
    let local_pos = (corner - instance.anchor_offset.xy) * size;
    let m = mat2x2<f32>(instance.xform.xy, instance.xform.zw);
    let world_pos = m * local_pos + instance.translation_size.xy;

    let period = instance.tiling.xy * instance.tiling.zw;
    var out: VertexOutput;
    out.clip_position = uniforms.view_proj * vec4<f32>(world_pos, 0.0, 1.0);
    out.uv = (corner * size - instance.anchor_offset.zw) / period;
    out.color = instance.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureSample(t_tile, s_tile, in.uv);
    // Texels are premultiplied; tint scales color only.
    return vec4<f32>(texel.rgb * in.color.rgb, texel.a) * in.color.a;
}
"#;
