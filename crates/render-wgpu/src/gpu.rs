use crate::projection::ScreenProjection;
use crate::shaders;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::collections::BTreeMap;
use std::ops::Range;
use tilesurface_common::{BlendMode, FilterId, Rect, TextureId};
use tilesurface_render::{GpuBatch, TilingQuad};
use tiny_skia::Pixmap;
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Uniforms {
    view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct QuadInstance {
    xform: [f32; 4],
    translation_size: [f32; 4],
    anchor_offset: [f32; 4],
    tiling: [f32; 4],
    color: [f32; 4],
}

impl QuadInstance {
    fn from_quad(quad: &TilingQuad) -> Self {
        let m = quad.transform.matrix2;
        let t = quad.transform.translation;
        let scroll = quad.tile_offset * quad.tile_scale;
        let effective = quad.tile_scale * quad.scale_correction;
        let [r, g, b] = quad.tint.to_f32();
        Self {
            xform: [m.x_axis.x, m.x_axis.y, m.y_axis.x, m.y_axis.y],
            translation_size: [t.x, t.y, quad.size.x, quad.size.y],
            anchor_offset: [quad.anchor.x, quad.anchor.y, scroll.x, scroll.y],
            tiling: [
                effective.x,
                effective.y,
                quad.texture_size.x,
                quad.texture_size.y,
            ],
            color: [r, g, b, quad.alpha],
        }
    }
}

/// Blend equation for premultiplied output.
fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    use wgpu::{BlendComponent, BlendFactor, BlendOperation};
    let over_alpha = BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
        operation: BlendOperation::Add,
    };
    match mode {
        BlendMode::Normal => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        BlendMode::Add => wgpu::BlendState {
            color: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::One,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::One,
                operation: BlendOperation::Add,
            },
        },
        BlendMode::Multiply => wgpu::BlendState {
            color: BlendComponent {
                src_factor: BlendFactor::Dst,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
            alpha: over_alpha,
        },
        BlendMode::Screen => wgpu::BlendState {
            color: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrc,
                operation: BlendOperation::Add,
            },
            alpha: over_alpha,
        },
    }
}

const BLEND_MODES: [BlendMode; 4] = [
    BlendMode::Normal,
    BlendMode::Add,
    BlendMode::Multiply,
    BlendMode::Screen,
];

/// Intersection of two scissor rects `[x, y, w, h]`; empty when disjoint.
fn intersect_scissor(a: [u32; 4], b: [u32; 4]) -> [u32; 4] {
    let x0 = a[0].max(b[0]);
    let y0 = a[1].max(b[1]);
    let x1 = (a[0] + a[2]).min(b[0] + b[2]);
    let y1 = (a[1] + a[3]).min(b[1] + b[3]);
    [x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)]
}

struct GpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
    atlas_index: u32,
}

/// wgpu-based renderer for tiling quads.
///
/// Owns one pipeline per blend mode, the uploaded tiling textures keyed by
/// [`TextureId`] and a shared instance buffer. Frames are drawn through a
/// [`WgpuBatch`] obtained from [`WgpuTilingRenderer::begin_frame`].
pub struct WgpuTilingRenderer {
    pipelines: BTreeMap<BlendMode, wgpu::RenderPipeline>,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    textures: BTreeMap<TextureId, GpuTexture>,
    instance_buffer: wgpu::Buffer,
    max_instances: u32,
    target_format: wgpu::TextureFormat,
}

impl WgpuTilingRenderer {
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("uniform_buffer"),
            contents: bytemuck::bytes_of(&Uniforms {
                view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform_bind_group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tiling_texture_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        // Power-of-two textures repeat in hardware.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tiling_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tiling_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tiling_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::TILING_SHADER.into()),
        });

        let pipelines = BLEND_MODES
            .into_iter()
            .map(|mode| {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("tiling_pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some("vs_main"),
                        compilation_options: Default::default(),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<QuadInstance>() as u64,
                            step_mode: wgpu::VertexStepMode::Instance,
                            attributes: &wgpu::vertex_attr_array![
                                0 => Float32x4,
                                1 => Float32x4,
                                2 => Float32x4,
                                3 => Float32x4,
                                4 => Float32x4,
                            ],
                        }],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some("fs_main"),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: target_format,
                            blend: Some(blend_state(mode)),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: Default::default(),
                    multiview: None,
                    cache: None,
                });
                (mode, pipeline)
            })
            .collect();

        let max_instances = 10_000u32;
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("instance_buffer"),
            size: (max_instances as u64) * std::mem::size_of::<QuadInstance>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipelines,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            sampler,
            textures: BTreeMap::new(),
            instance_buffer,
            max_instances,
            target_format,
        }
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Atlas slot the texture was last uploaded with.
    pub fn atlas_index(&self, texture: TextureId) -> Option<u32> {
        self.textures.get(&texture).map(|t| t.atlas_index)
    }

    /// Upload `pixels` as `id`, reusing the device texture when the size matches.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        id: TextureId,
        pixels: &Pixmap,
        atlas_index: u32,
    ) {
        let (width, height) = (pixels.width(), pixels.height());
        let reusable = self
            .textures
            .get(&id)
            .is_some_and(|t| t.width == width && t.height == height);
        if !reusable {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("tiling_texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&Default::default());
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("tiling_texture_bind_group"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            self.textures.insert(
                id,
                GpuTexture {
                    texture,
                    bind_group,
                    width,
                    height,
                    atlas_index,
                },
            );
        }
        let Some(entry) = self.textures.get_mut(&id) else {
            return;
        };
        entry.atlas_index = atlas_index;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        tracing::debug!(texture = id.0, width, height, atlas_index, reused = reusable, "uploaded tiling texture");
    }

    /// Free the device texture. Returns false for unknown ids.
    pub fn release(&mut self, id: TextureId) -> bool {
        let released = self.textures.remove(&id).is_some();
        if released {
            tracing::debug!(texture = id.0, "released tiling texture");
        }
        released
    }

    /// Start a frame drawing into `view`. `clear` clears the target on the
    /// first flush. Call [`WgpuBatch::finish`] to submit the last run.
    pub fn begin_frame<'a>(
        &'a mut self,
        device: &'a wgpu::Device,
        queue: &'a wgpu::Queue,
        view: &'a wgpu::TextureView,
        projection: ScreenProjection,
        clear: Option<[u8; 4]>,
    ) -> WgpuBatch<'a> {
        queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&Uniforms {
                view_proj: projection.view_projection().to_cols_array_2d(),
            }),
        );
        let clear = clear.map(|[r, g, b, a]| wgpu::Color {
            r: f64::from(r) / 255.0,
            g: f64::from(g) / 255.0,
            b: f64::from(b) / 255.0,
            a: f64::from(a) / 255.0,
        });
        WgpuBatch {
            renderer: self,
            device,
            queue,
            view,
            projection,
            clear,
            instances: Vec::new(),
            runs: Vec::new(),
            scissors: Vec::new(),
            filter_depth: 0,
            active: false,
            stats: FrameStats::default(),
        }
    }
}

/// Counters for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub quads: u32,
    /// Quads dropped because their texture was never uploaded.
    pub dropped: u32,
    pub flushes: u32,
}

/// Consecutive instances sharing texture, blend mode and scissor.
#[derive(Debug, Clone, PartialEq)]
struct Run {
    texture: TextureId,
    blend: BlendMode,
    scissor: [u32; 4],
    instances: Range<u32>,
}

/// [`GpuBatch`] over a [`WgpuTilingRenderer`] for one frame.
///
/// Masks become scissor rectangles; filters are not supported by this
/// backend and are ignored.
pub struct WgpuBatch<'a> {
    renderer: &'a mut WgpuTilingRenderer,
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    view: &'a wgpu::TextureView,
    projection: ScreenProjection,
    clear: Option<wgpu::Color>,
    instances: Vec<QuadInstance>,
    runs: Vec<Run>,
    scissors: Vec<[u32; 4]>,
    filter_depth: usize,
    active: bool,
    stats: FrameStats,
}

impl WgpuBatch<'_> {
    fn current_scissor(&self) -> [u32; 4] {
        self.scissors
            .last()
            .copied()
            .unwrap_or([0, 0, self.projection.width, self.projection.height])
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Submit pending geometry (and the clear, if nothing was drawn) and
    /// return the frame counters.
    pub fn finish(mut self) -> FrameStats {
        self.flush();
        if self.filter_depth > 0 || !self.scissors.is_empty() {
            tracing::warn!(
                filters = self.filter_depth,
                masks = self.scissors.len(),
                "frame finished with unbalanced mask or filter pushes"
            );
        }
        self.stats
    }
}

impl GpuBatch for WgpuBatch<'_> {
    fn start(&mut self) {
        self.active = true;
    }

    fn stop(&mut self) {
        self.flush();
        self.active = false;
    }

    fn flush(&mut self) {
        if self.runs.is_empty() && self.clear.is_none() {
            return;
        }
        if !self.instances.is_empty() {
            self.queue.write_buffer(
                &self.renderer.instance_buffer,
                0,
                bytemuck::cast_slice(&self.instances),
            );
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tiling_encoder"),
            });
        {
            let load = match self.clear.take() {
                Some(color) => wgpu::LoadOp::Clear(color),
                None => wgpu::LoadOp::Load,
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tiling_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });

            pass.set_bind_group(0, &self.renderer.uniform_bind_group, &[]);
            pass.set_vertex_buffer(0, self.renderer.instance_buffer.slice(..));
            for run in &self.runs {
                let (Some(pipeline), Some(texture)) = (
                    self.renderer.pipelines.get(&run.blend),
                    self.renderer.textures.get(&run.texture),
                ) else {
                    continue;
                };
                let [x, y, w, h] = run.scissor;
                pass.set_pipeline(pipeline);
                pass.set_bind_group(1, &texture.bind_group, &[]);
                pass.set_scissor_rect(x, y, w, h);
                pass.draw(0..6, run.instances.clone());
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        tracing::debug!(
            instances = self.instances.len(),
            runs = self.runs.len(),
            "batch flush"
        );
        self.instances.clear();
        self.runs.clear();
        self.stats.flushes += 1;
    }

    fn push_mask(&mut self, mask: &Rect) {
        let clip = self
            .projection
            .scissor(mask.x, mask.y, mask.width, mask.height)
            .unwrap_or([0, 0, 0, 0]);
        let clip = intersect_scissor(clip, self.current_scissor());
        self.scissors.push(clip);
    }

    fn pop_mask(&mut self) {
        self.scissors.pop();
    }

    fn push_filters(&mut self, filters: &[FilterId]) {
        tracing::debug!(count = filters.len(), "filters ignored by the wgpu backend");
        self.filter_depth += 1;
    }

    fn pop_filters(&mut self) {
        self.filter_depth = self.filter_depth.saturating_sub(1);
    }

    fn upload_texture(&mut self, texture: TextureId, pixels: &Pixmap, atlas_index: u32) {
        self.renderer
            .upload(self.device, self.queue, texture, pixels, atlas_index);
    }

    fn draw_tiling_quad(&mut self, quad: &TilingQuad) {
        if !self.active {
            tracing::warn!(texture = quad.texture.0, "draw outside start/stop");
        }
        let scissor = self.current_scissor();
        if scissor[2] == 0 || scissor[3] == 0 {
            return;
        }
        if !self.renderer.textures.contains_key(&quad.texture) {
            tracing::warn!(texture = quad.texture.0, "texture not uploaded, dropping quad");
            self.stats.dropped += 1;
            return;
        }
        if self.instances.len() as u32 >= self.renderer.max_instances {
            tracing::debug!("instance buffer full, flushing early");
            self.flush();
        }

        let index = self.instances.len() as u32;
        self.instances.push(QuadInstance::from_quad(quad));
        self.stats.quads += 1;
        let extends_run = self.runs.last().is_some_and(|run| {
            run.texture == quad.texture && run.blend == quad.blend_mode && run.scissor == scissor
        });
        match self.runs.last_mut() {
            Some(run) if extends_run => run.instances.end = index + 1,
            _ => self.runs.push(Run {
                texture: quad.texture,
                blend: quad.blend_mode,
                scissor,
                instances: index..index + 1,
            }),
        }
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.renderer.release(texture);
    }
}
