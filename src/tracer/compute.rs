//! Compute pipeline for BVH ray tracing.
//!
//! Owns the wgpu compute pipeline, the per-frame uniform, the output storage
//! texture and the bind group tying them to the scene's storage buffers.
//!
//! ## Usage
//! ```ignore
//! let mut trace = TraceCompute::new(&device, &scene_buffers, width, height)?;
//! trace.update_frame(&queue, &frame_uniform);
//! trace.dispatch(&mut encoder); // writes the output texture
//! // composite trace.output_view() to screen
//! ```

use super::composite::Framebuffer;
use super::gpu_data::FrameUniform;
use crate::device::SceneBuffers;
use crate::util::{Error, Result};

/// WGSL source embedded at compile time.
const TRACE_WGSL: &str = include_str!("shaders/trace.wgsl");

/// Workgroup size (must match @workgroup_size in WGSL).
const WG_SIZE: u32 = 8;

/// Output format. Filterable without extra features, unlike Rgba32Float.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Ray trace compute pipeline state.
pub struct TraceCompute {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,

    // Scene storage, owned by the active scene; kept here to rebind on resize
    nodes: wgpu::Buffer,
    triangles: wgpu::Buffer,
    materials: wgpu::Buffer,

    frame_buffer: wgpu::Buffer,

    output_texture: wgpu::Texture,
    output_view: wgpu::TextureView,

    width: u32,
    height: u32,
}

impl TraceCompute {
    /// Compile the trace shader and bind it to the uploaded scene.
    ///
    /// Shader and pipeline validation errors are returned as
    /// [`Error::PipelineCompile`].
    pub fn new(device: &wgpu::Device, scene: &SceneBuffers<'_, wgpu::Buffer>, width: u32, height: u32) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("trace_shader"),
            source: wgpu::ShaderSource::Wgsl(TRACE_WGSL.into()),
        });

        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("trace_bind_group_layout"),
            entries: &[
                // @binding(0..=2) nodes, triangles, materials
                storage(0),
                storage(1),
                storage(2),
                // @binding(3) Frame uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(4) Output storage texture
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: OUTPUT_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("trace_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("trace_compute_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::PipelineCompile(err.to_string()));
        }

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("trace_frame_buffer"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (output_texture, output_view) = Self::create_output(device, width, height);

        let bind_group = Self::create_bind_group(
            device,
            &bind_group_layout,
            [scene.nodes, scene.triangles, scene.materials],
            &frame_buffer,
            &output_view,
        );

        tracing::debug!(
            nodes = scene.node_count,
            triangles = scene.triangle_count,
            width,
            height,
            "trace pipeline created"
        );

        Ok(Self {
            pipeline,
            bind_group_layout,
            bind_group,
            nodes: scene.nodes.clone(),
            triangles: scene.triangles.clone(),
            materials: scene.materials.clone(),
            frame_buffer,
            output_texture,
            output_view,
            width,
            height,
        })
    }

    /// Create output storage texture.
    fn create_output(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let tex = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("trace_output"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());
        (tex, view)
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        storage: [&wgpu::Buffer; 3],
        frame: &wgpu::Buffer,
        output: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        let [nodes, triangles, materials] = storage;
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trace_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: nodes.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: triangles.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: materials.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: frame.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(output),
                },
            ],
        })
    }

    /// Resize output texture if dimensions changed. Returns true when the
    /// output view was replaced (dependent bind groups must be rebuilt).
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        let (tex, view) = Self::create_output(device, width, height);
        self.output_texture = tex;
        self.output_view = view;
        self.bind_group = Self::create_bind_group(
            device,
            &self.bind_group_layout,
            [&self.nodes, &self.triangles, &self.materials],
            &self.frame_buffer,
            &self.output_view,
        );
        true
    }

    /// Update the per-frame uniform.
    pub fn update_frame(&self, queue: &wgpu::Queue, frame: &FrameUniform) {
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(frame));
    }

    /// Record the compute pass: one invocation per output pixel.
    pub fn dispatch(&self, encoder: &mut wgpu::CommandEncoder) {
        let wg_x = self.width.div_ceil(WG_SIZE);
        let wg_y = self.height.div_ceil(WG_SIZE);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("trace_compute_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(wg_x, wg_y, 1);
    }

    /// Get the output texture view (for compositing to screen).
    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.output_view
    }

    /// Current output dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy the traced image back to host memory. Blocks until the GPU is
    /// done with all submitted work.
    pub fn read_output(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Framebuffer> {
        // bytes_per_row must be aligned to COPY_BYTES_PER_ROW_ALIGNMENT
        let bytes_per_pixel = 8u32; // 4 x f16
        let unpadded = self.width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("trace_readback"),
            size: (padded * self.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("trace_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.output_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::device(format!("poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| Error::device("readback callback dropped"))?
            .map_err(|e| Error::device(format!("map failed: {e}")))?;

        let mut image = Framebuffer::new(self.width, self.height);
        {
            let mapped = slice.get_mapped_range();
            for (y, row) in mapped.chunks_exact(padded as usize).enumerate() {
                let texels = row[..unpadded as usize].chunks_exact(bytes_per_pixel as usize);
                for (x, texel) in texels.enumerate() {
                    let mut rgba = [0.0f32; 4];
                    for (c, bytes) in rgba.iter_mut().zip(texel.chunks_exact(2)) {
                        *c = half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f32();
                    }
                    image.set(x as u32, y as u32, rgba);
                }
            }
        }
        staging.unmap();

        Ok(image)
    }
}
