//! wgpu implementation of [`RenderBackend`].
//!
//! Every draw is queued as a textured, tinted quad. Quads queued between
//! `begin_pass`/`end_pass` land in the off-screen target; anything queued
//! outside a pass is drawn by [`WgpuBackend::present`].

use std::{num::NonZeroU32, rc::Rc};

use wgpu::{util::DeviceExt, RenderPassColorAttachment};

use crate::{backend::RenderBackend, pack::Rect, Error};

/// Format of the off-screen target and of the finished atlas.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub const WHITE: [f32; 4] = [1.0; 4];

/// Textures hold premultiplied alpha, so the atlas can be drawn into and
/// sampled from with the same blend.
pub const BLEND: wgpu::BlendState = wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RectVertex {
    position: glam::Vec2,
    uv: glam::Vec2,
    color: [f32; 4],
}

pub struct RectRenderer {
    pipelines: Vec<(wgpu::TextureFormat, wgpu::RenderPipeline)>,
    uniform_buffer: CpuBuffer<glam::Mat4>,
    uniform_bg: wgpu::BindGroup,
    vertex_buffer: CpuBuffer<Vec<RectVertex>>,
    index_buffer: CpuBuffer<[u32; 6]>,
    texture_layout: wgpu::BindGroupLayout,
    default_sampler: wgpu::Sampler,
}

impl RectRenderer {
    /// Builds one pipeline per entry of `formats`.
    pub fn new(device: &wgpu::Device, formats: &[wgpu::TextureFormat]) -> Self {
        let uniform_buffer = CpuBuffer::new(
            device,
            glam::Mat4::IDENTITY,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CameraBinder"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: std::num::NonZeroU64::new(
                        std::mem::size_of::<glam::Mat4>() as _
                    ),
                },
                count: None,
            }],
        });
        let uniform_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.buffer.as_entire_binding(),
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: None,
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
        let default_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let module = device.create_shader_module(wgpu::include_wgsl!("shaders/rect.wgsl"));

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let pipelines = formats
            .iter()
            .map(|&format| {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: None,
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: "vs_main",
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<RectVertex>() as _,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &wgpu::vertex_attr_array![
                                0 => Float32x2,
                                1 => Float32x2,
                                2 => Float32x4,
                            ],
                        }],
                    },
                    primitive: Default::default(),
                    depth_stencil: None,
                    multisample: Default::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: "fs_main",
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(BLEND),
                            write_mask: wgpu::ColorWrites::all(),
                        })],
                    }),
                    multiview: None,
                });
                (format, pipeline)
            })
            .collect();

        let vertex_buffer = CpuBuffer::new(
            device,
            Vec::with_capacity(4 * 256),
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::VERTEX,
        );
        let index_buffer = CpuBuffer::new(device, [0u32, 1, 2, 0, 2, 3], wgpu::BufferUsages::INDEX);

        Self {
            pipelines,
            uniform_buffer,
            uniform_bg,
            vertex_buffer,
            index_buffer,
            texture_layout,
            default_sampler,
        }
    }

    pub fn bind_texture(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.default_sampler),
                },
            ],
        })
    }

    pub fn create_render_pass<'a: 'b, 'b>(
        encoder: &'a mut wgpu::CommandEncoder,
        view: &'a wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> wgpu::RenderPass<'b> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: None,
            color_attachments: &[Some(RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations { load, store: true },
            })],
            depth_stencil_attachment: None,
        })
    }

    /// Records `quads` into `view`. Buffers are rewritten through the queue,
    /// so call this at most once per submitted encoder.
    #[allow(clippy::too_many_arguments)]
    pub fn render<C: Camera>(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        load: wgpu::LoadOp<wgpu::Color>,
        camera: &C,
        quads: &[Quad],
    ) {
        self.uniform_buffer
            .update(device, queue, |data| *data = camera.view_matrix());
        self.vertex_buffer.update(device, queue, |data| {
            data.clear();
            data.extend(quads.iter().flat_map(|q| q.vertices));
        });

        let pipeline = self
            .pipelines
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, p)| p);
        let mut pass = Self::create_render_pass(encoder, view, load);
        let pipeline = match pipeline {
            Some(pipeline) => pipeline,
            None => {
                log::error!("no pipeline for {:?}", format);
                return;
            }
        };
        if !quads.is_empty() {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.uniform_bg, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.buffer.slice(..));
            pass.set_index_buffer(
                self.index_buffer.buffer.slice(..),
                wgpu::IndexFormat::Uint32,
            );
            for (i, quad) in quads.iter().enumerate() {
                pass.set_bind_group(1, &quad.bind_group, &[]);
                pass.draw_indexed(0..6, i as i32 * 4, 0..1);
            }
        }
    }
}

/// One queued textured rect.
pub struct Quad {
    bind_group: Rc<wgpu::BindGroup>,
    vertices: [RectVertex; 4],
}

impl Quad {
    pub fn new(texture: &Texture, src: Rect, dst: Rect, color: [f32; 4]) -> Self {
        let size = texture.size();
        let uv_min = src.position() / size;
        let uv_max = (src.position() + src.size()) / size;
        let min = dst.position();
        let max = min + dst.size();
        let vertex = |position: glam::Vec2, uv: glam::Vec2| RectVertex {
            position,
            uv,
            color,
        };
        Self {
            bind_group: texture.bind_group.clone(),
            vertices: [
                vertex(min, uv_min),
                vertex(glam::vec2(min.x, max.y), glam::vec2(uv_min.x, uv_max.y)),
                vertex(max, uv_max),
                vertex(glam::vec2(max.x, min.y), glam::vec2(uv_max.x, uv_min.y)),
            ],
        }
    }
}

pub trait Camera {
    fn view_matrix(&self) -> glam::Mat4;
}

/// Pixel space with the origin at the top-left corner.
#[derive(Debug)]
pub struct Camera2d {
    position: glam::Vec2,
    size: glam::Vec2,
}

impl Camera2d {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            position: glam::Vec2::ZERO,
            size: glam::vec2(width, height),
        }
    }
}

impl Camera for Camera2d {
    fn view_matrix(&self) -> glam::Mat4 {
        let min = self.position;
        let max = min + self.size;
        glam::Mat4::orthographic_rh(min.x, max.x, max.y, min.y, 0.0, 1.0)
    }
}

pub trait BufferData {
    fn as_bytes(&self) -> &[u8];
    fn from_bytes(&mut self, data: &[u8]);
    fn size_in_bytes(&self) -> u64;
    fn capacity_in_bytes(&self) -> u64;
}

impl<T: bytemuck::Pod + bytemuck::Zeroable> BufferData for Vec<T> {
    #[inline(always)]
    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self)
    }

    #[inline(always)]
    fn from_bytes(&mut self, data: &[u8]) {
        self.clear();
        self.extend_from_slice(bytemuck::cast_slice(data));
    }

    #[inline(always)]
    fn size_in_bytes(&self) -> u64 {
        (self.len() * std::mem::size_of::<T>()) as _
    }

    #[inline(always)]
    fn capacity_in_bytes(&self) -> u64 {
        (self.capacity() * std::mem::size_of::<T>()) as _
    }
}

impl<T: bytemuck::Pod + bytemuck::Zeroable, const S: usize> BufferData for [T; S] {
    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self)
    }

    fn from_bytes(&mut self, data: &[u8]) {
        let data_t: &[T] = bytemuck::cast_slice(data);
        for (i, t) in data_t.iter().cloned().enumerate() {
            self[i] = t;
        }
    }

    fn size_in_bytes(&self) -> u64 {
        std::mem::size_of::<Self>() as _
    }

    fn capacity_in_bytes(&self) -> u64 {
        self.size_in_bytes()
    }
}

impl BufferData for glam::Mat4 {
    #[inline(always)]
    fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    #[inline(always)]
    fn from_bytes(&mut self, data: &[u8]) {
        *self = *bytemuck::from_bytes(data);
    }

    #[inline(always)]
    fn size_in_bytes(&self) -> u64 {
        std::mem::size_of::<Self>() as _
    }

    #[inline(always)]
    fn capacity_in_bytes(&self) -> u64 {
        self.size_in_bytes()
    }
}

pub struct CpuBuffer<T: BufferData> {
    data: T,
    buffer: wgpu::Buffer,
    buffer_size: u64,
    usage: wgpu::BufferUsages,
}

impl<T: BufferData> CpuBuffer<T> {
    pub fn new(device: &wgpu::Device, data: T, usage: wgpu::BufferUsages) -> Self {
        let contents = data.as_bytes();
        let (buffer, buffer_size) = if contents.is_empty() {
            (
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: None,
                    size: data.capacity_in_bytes(),
                    usage,
                    mapped_at_creation: false,
                }),
                data.capacity_in_bytes(),
            )
        } else {
            (
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: None,
                    contents,
                    usage,
                }),
                contents.len() as _,
            )
        };
        Self {
            data,
            buffer,
            buffer_size,
            usage,
        }
    }

    #[inline(always)]
    fn flush(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        debug_assert!(self.data.capacity_in_bytes() >= self.data.size_in_bytes());
        if self.buffer_size < self.data.size_in_bytes() {
            self.buffer_size = self.data.capacity_in_bytes();
            self.buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: self.buffer_size,
                usage: self.usage,
                mapped_at_creation: false,
            });
        }
        queue.write_buffer(&self.buffer, 0, self.data.as_bytes());
    }

    /// Blocks until the GPU copy of the buffer is mapped and copies it back.
    fn pull(&mut self, device: &wgpu::Device) -> Result<(), Error> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| Error::Readback(e.to_string()))?
            .map_err(|e| Error::Readback(format!("{:?}", e)))?;
        {
            let view = slice.get_mapped_range();
            self.data.from_bytes(&view);
        }
        self.buffer.unmap();
        Ok(())
    }

    #[inline(always)]
    fn update(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, mut f: impl FnMut(&mut T)) {
        f(&mut self.data);
        self.flush(device, queue);
    }

    #[inline(always)]
    fn get(&self) -> &T {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.size_in_bytes()
    }
}

pub struct Texture {
    inner: wgpu::Texture,
    desc: wgpu::TextureDescriptor<'static>,
    view: wgpu::TextureView,
    bind_group: Rc<wgpu::BindGroup>,
}

impl Texture {
    pub fn new(
        device: &wgpu::Device,
        renderer: &RectRenderer,
        width: u32,
        height: u32,
        mip_level_count: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Texture {
        let desc = wgpu::TextureDescriptor {
            label: None,
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
        };
        let inner = device.create_texture(&desc);
        let view = inner.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = Rc::new(renderer.bind_texture(device, &view));
        Self {
            inner,
            desc,
            view,
            bind_group,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.desc.format
    }

    pub fn mip_level_count(&self) -> u32 {
        self.desc.mip_level_count
    }

    pub fn size(&self) -> glam::Vec2 {
        glam::vec2(self.desc.size.width as _, self.desc.size.height as _)
    }
}

/// Largest useful mip chain for a `width` x `height` texture.
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Rows of a texture copy are padded to [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`].
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (unpadded + align - 1) / align * align
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    renderer: RectRenderer,
    white: Texture,
    quads: Vec<Quad>,
    pass_clear: Option<bool>,
}

impl WgpuBackend {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let renderer = RectRenderer::new(&device, &[surface_format, TARGET_FORMAT]);
        let white = Texture::new(
            &device,
            &renderer,
            1,
            1,
            1,
            TARGET_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &white.inner,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0xff; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: NonZeroU32::new(4),
                rows_per_image: NonZeroU32::new(1),
            },
            white.desc.size,
        );
        Self {
            device,
            queue,
            surface_format,
            renderer,
            white,
            quads: Vec::new(),
            pass_clear: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn fill_rect(&mut self, dst: Rect, color: [f32; 4]) {
        let src = Rect::new(0.0, 0.0, 1.0, 1.0);
        self.quads.push(Quad::new(&self.white, src, dst, color));
    }

    /// Draws everything queued outside of a pass into `view`.
    pub fn present(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        width: u32,
        height: u32,
        clear: Option<wgpu::Color>,
    ) {
        let load = match clear {
            Some(color) => wgpu::LoadOp::Clear(color),
            None => wgpu::LoadOp::Load,
        };
        let camera = Camera2d::new(width as _, height as _);
        let quads = std::mem::take(&mut self.quads);
        self.renderer.render(
            &self.device,
            &self.queue,
            encoder,
            view,
            self.surface_format,
            load,
            &camera,
            &quads,
        );
    }
}

impl RenderBackend for WgpuBackend {
    type Target = Texture;
    type Texture = Texture;

    fn create_target(&mut self, width: u32, height: u32) -> Result<Texture, Error> {
        Ok(Texture::new(
            &self.device,
            &self.renderer,
            width,
            height,
            1,
            TARGET_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
        ))
    }

    fn begin_pass(&mut self, _: &mut Texture, clear: bool) -> Result<(), Error> {
        if !self.quads.is_empty() {
            log::warn!("dropping {} quads queued outside a pass", self.quads.len());
            self.quads.clear();
        }
        self.pass_clear = Some(clear);
        Ok(())
    }

    fn end_pass(&mut self, target: &mut Texture) -> Result<(), Error> {
        let load = match self.pass_clear.take() {
            Some(true) => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            _ => wgpu::LoadOp::Load,
        };
        let size = target.size();
        let camera = Camera2d::new(size.x, size.y);
        let quads = std::mem::take(&mut self.quads);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        self.renderer.render(
            &self.device,
            &self.queue,
            &mut encoder,
            &target.view,
            target.format(),
            load,
            &camera,
            &quads,
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, target: Texture) -> Result<Vec<u8>, Error> {
        let width = target.desc.size.width;
        let height = target.desc.size.height;
        let padded = padded_bytes_per_row(width);
        let mut readback = CpuBuffer::new(
            &self.device,
            vec![0u8; (padded * height) as usize],
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.inner,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: NonZeroU32::new(padded),
                    rows_per_image: NonZeroU32::new(height),
                },
            },
            target.desc.size,
        );
        self.queue.submit(Some(encoder.finish()));
        readback.pull(&self.device)?;

        let row = (width * 4) as usize;
        Ok(readback
            .get()
            .chunks(padded as usize)
            .flat_map(|r| &r[..row])
            .copied()
            .collect())
    }

    fn inverted_y(&self) -> bool {
        false
    }

    fn create_texture(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<Texture, Error> {
        let levels = mip_levels.clamp(1, max_mip_levels(width, height));
        let texture = Texture::new(
            &self.device,
            &self.renderer,
            width,
            height,
            levels,
            TARGET_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );

        let mut level = image::RgbaImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| {
                Error::Readback(format!("{} bytes is not {}x{}", pixels.len(), width, height))
            })?;
        for mip_level in 0..levels {
            if mip_level > 0 {
                let w = (level.width() / 2).max(1);
                let h = (level.height() / 2).max(1);
                level = image::imageops::resize(&level, w, h, image::imageops::FilterType::Triangle);
            }
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture.inner,
                    mip_level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                level.as_raw(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: NonZeroU32::new(level.width() * 4),
                    rows_per_image: NonZeroU32::new(level.height()),
                },
                wgpu::Extent3d {
                    width: level.width(),
                    height: level.height(),
                    depth_or_array_layers: 1,
                },
            );
        }
        Ok(texture)
    }

    fn draw_sub_image(&mut self, texture: &Texture, src: Rect, dst: Rect) {
        self.quads.push(Quad::new(texture, src, dst, WHITE));
    }
}
