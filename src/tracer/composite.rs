//! Presenting the traced image.
//!
//! [`Framebuffer`] is the host-side RGBA image used by the software device
//! and by readback. With the `gpu` feature, [`Compositor`] draws the trace
//! output texture onto a presentable target through a full-screen quad.

/// Row-major RGBA32F image. Row 0 is the top of the picture.
#[derive(Debug, Clone, PartialEq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl Framebuffer {
    /// Transparent black image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    /// Mutable pixel storage, for writers that fill rows in parallel.
    pub fn pixels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let i = self.index(x, y);
        self.pixels[i] = rgba;
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Reallocate to a new size. Contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    /// Pixels written with a traversal overflow flag (alpha below 1).
    pub fn overflowed_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| p[3] < 1.0).count()
    }

    /// Linear sample with clamp-to-edge; texel centers sit at `(i + 0.5) / size`.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> [f32; 4] {
        if self.pixels.is_empty() {
            return [0.0; 4];
        }
        let axis = |coord: f32, size: u32| {
            let x = (coord * size as f32 - 0.5).clamp(0.0, (size - 1) as f32);
            let i0 = x.floor() as u32;
            let i1 = (i0 + 1).min(size - 1);
            (i0, i1, x - i0 as f32)
        };
        let (x0, x1, fx) = axis(u, self.width);
        let (y0, y1, fy) = axis(v, self.height);

        let lerp = |a: [f32; 4], b: [f32; 4], t: f32| -> [f32; 4] { std::array::from_fn(|c| a[c] + (b[c] - a[c]) * t) };
        let top = lerp(self.get(x0, y0), self.get(x1, y0), fx);
        let bottom = lerp(self.get(x0, y1), self.get(x1, y1), fx);
        lerp(top, bottom, fy)
    }
}

/// Software full-screen blit: resample `src` over all of `dst`, alpha 1.
pub fn composite_into(src: &Framebuffer, dst: &mut Framebuffer) {
    let opaque = |p: [f32; 4]| [p[0], p[1], p[2], 1.0];

    if src.dimensions() == dst.dimensions() {
        for (d, s) in dst.pixels.iter_mut().zip(&src.pixels) {
            *d = opaque(*s);
        }
        return;
    }

    let (w, h) = dst.dimensions();
    for y in 0..h {
        for x in 0..w {
            let u = (x as f32 + 0.5) / w as f32;
            let v = (y as f32 + 0.5) / h as f32;
            dst.set(x, y, opaque(src.sample_bilinear(u, v)));
        }
    }
}

#[cfg(feature = "gpu")]
pub use gpu::Compositor;

#[cfg(feature = "gpu")]
mod gpu {
    use crate::util::{Error, Result};

    const COMPOSITE_WGSL: &str = include_str!("shaders/composite.wgsl");

    /// Full-screen quad pipeline sampling the trace output.
    pub struct Compositor {
        pipeline: wgpu::RenderPipeline,
        bind_group_layout: wgpu::BindGroupLayout,
        bind_group: wgpu::BindGroup,
        sampler: wgpu::Sampler,
    }

    impl Compositor {
        pub fn new(device: &wgpu::Device, source: &wgpu::TextureView, target_format: wgpu::TextureFormat) -> Result<Self> {
            device.push_error_scope(wgpu::ErrorFilter::Validation);

            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("composite_shader"),
                source: wgpu::ShaderSource::Wgsl(COMPOSITE_WGSL.into()),
            });

            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("composite_bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
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

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("composite_pl"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("composite_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

            if let Some(err) = pollster::block_on(device.pop_error_scope()) {
                return Err(Error::PipelineCompile(err.to_string()));
            }

            let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("composite_sampler"),
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            });

            let bind_group = Self::create_bind_group(device, &bind_group_layout, source, &sampler);

            Ok(Self {
                pipeline,
                bind_group_layout,
                bind_group,
                sampler,
            })
        }

        fn create_bind_group(
            device: &wgpu::Device,
            layout: &wgpu::BindGroupLayout,
            source: &wgpu::TextureView,
            sampler: &wgpu::Sampler,
        ) -> wgpu::BindGroup {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("composite_bg"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            })
        }

        /// Point at a new source view (after the trace output was resized).
        pub fn rebind(&mut self, device: &wgpu::Device, source: &wgpu::TextureView) {
            self.bind_group = Self::create_bind_group(device, &self.bind_group_layout, source, &self.sampler);
        }

        /// Record the full-screen draw into `target`.
        pub fn draw(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..6, 0..1); // two triangles
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_and_overflow_count() {
        let mut fb = Framebuffer::new(3, 2);
        assert_eq!(fb.pixels().len(), 6);
        fb.set(2, 1, [0.1, 0.2, 0.3, 1.0]);
        fb.set(0, 0, [1.0, 1.0, 1.0, 0.5]);
        assert_eq!(fb.get(2, 1), [0.1, 0.2, 0.3, 1.0]);
        // Untouched pixels are alpha 0 and count too
        assert_eq!(fb.overflowed_pixels(), 5);
        fb.pixels_mut()[3] = [0.0, 0.0, 0.0, 1.0];
        assert_eq!(fb.get(0, 1), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_bilinear_interpolates_between_centers() {
        let mut fb = Framebuffer::new(2, 1);
        fb.set(0, 0, [0.0, 0.0, 0.0, 1.0]);
        fb.set(1, 0, [1.0, 2.0, 4.0, 1.0]);

        assert_eq!(fb.sample_bilinear(0.25, 0.5), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(fb.sample_bilinear(0.75, 0.5), [1.0, 2.0, 4.0, 1.0]);
        let mid = fb.sample_bilinear(0.5, 0.5);
        assert!((mid[0] - 0.5).abs() < 1e-6 && (mid[2] - 2.0).abs() < 1e-6);
        // Clamp to edge
        assert_eq!(fb.sample_bilinear(-1.0, 0.5), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(fb.sample_bilinear(2.0, 0.5), [1.0, 2.0, 4.0, 1.0]);
    }

    #[test]
    fn test_composite_same_size_is_exact_and_opaque() {
        let mut src = Framebuffer::new(4, 3);
        src.set(1, 2, [0.3, 0.6, 0.9, 0.5]);
        let mut dst = Framebuffer::new(4, 3);
        composite_into(&src, &mut dst);
        assert_eq!(dst.get(1, 2), [0.3, 0.6, 0.9, 1.0]);
        assert_eq!(dst.overflowed_pixels(), 0);
    }

    #[test]
    fn test_composite_upscales_uniform_image() {
        let mut src = Framebuffer::new(2, 2);
        for y in 0..2 {
            for x in 0..2 {
                src.set(x, y, [0.25, 0.5, 0.75, 1.0]);
            }
        }
        let mut dst = Framebuffer::new(5, 7);
        composite_into(&src, &mut dst);
        for p in dst.pixels() {
            assert!((p[0] - 0.25).abs() < 1e-6 && (p[2] - 0.75).abs() < 1e-6);
            assert_eq!(p[3], 1.0);
        }
    }
}
