//! wgpu compute device.
//!
//! Either creates its own headless device or borrows the host viewport's
//! device and queue, so the composite stage can draw straight into the
//! host's swapchain view.

use wgpu::util::DeviceExt;

use super::{Backend, ComputeDevice, DeviceInfo, SceneBuffers};
use crate::tracer::composite::{Compositor, Framebuffer};
use crate::settings::Settings;
use crate::tracer::{FrameUniform, TraceCompute};
use crate::util::{Error, Result};

/// Format of the composite target for headless devices.
pub const DEFAULT_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

enum Source {
    Headless {
        power_preference: wgpu::PowerPreference,
    },
    Shared {
        device: wgpu::Device,
        queue: wgpu::Queue,
        name: String,
    },
}

pub struct WgpuBackend {
    source: Source,
    target_format: wgpu::TextureFormat,
}

impl WgpuBackend {
    /// Create a private device on the first suitable adapter.
    pub fn headless(power_preference: wgpu::PowerPreference) -> Self {
        Self {
            source: Source::Headless { power_preference },
            target_format: DEFAULT_TARGET_FORMAT,
        }
    }

    /// Headless backend with the adapter preference from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::headless(settings.power_preference())
    }

    /// Adapter preference, `None` for a host-shared device.
    pub fn power_preference(&self) -> Option<wgpu::PowerPreference> {
        match &self.source {
            Source::Headless { power_preference } => Some(*power_preference),
            Source::Shared { .. } => None,
        }
    }

    /// Reuse the host's device and queue; `target_format` is the format of
    /// the views passed to `render`.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, target_format: wgpu::TextureFormat) -> Self {
        Self {
            source: Source::Shared {
                device,
                queue,
                name: "host device".into(),
            },
            target_format,
        }
    }

    /// Format of the composite target.
    pub fn with_target_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.target_format = format;
        self
    }
}

impl Backend for WgpuBackend {
    type Device = WgpuDevice;

    fn acquire_compute_device(&self) -> Result<WgpuDevice> {
        let (device, queue, info) = match &self.source {
            Source::Headless { power_preference } => request_headless(*power_preference)?,
            Source::Shared { device, queue, name } => (
                device.clone(),
                queue.clone(),
                DeviceInfo {
                    name: name.clone(),
                    backend: "wgpu".into(),
                },
            ),
        };

        Ok(WgpuDevice {
            device,
            queue,
            target_format: self.target_format,
            info,
        })
    }
}

fn request_headless(power_preference: wgpu::PowerPreference) -> Result<(wgpu::Device, wgpu::Queue, DeviceInfo)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .map_err(|e| Error::PlatformUnsupported(format!("no suitable adapter: {e}")))?;

    let adapter_info = adapter.get_info();
    if !adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
    {
        return Err(Error::PlatformUnsupported(format!(
            "adapter {} has no compute shader support",
            adapter_info.name
        )));
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("raymode device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::downlevel_defaults(),
        memory_hints: wgpu::MemoryHints::Performance,
        experimental_features: Default::default(),
        trace: wgpu::Trace::Off,
    }))
    .map_err(|e| Error::PlatformUnsupported(format!("device request failed: {e}")))?;

    let info = DeviceInfo {
        name: adapter_info.name,
        backend: format!("{:?}", adapter_info.backend),
    };
    Ok((device, queue, info))
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target_format: wgpu::TextureFormat,
    info: DeviceInfo,
}

impl WgpuDevice {
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }

    /// Read the last traced image back to host memory.
    pub fn read_trace_output(&self, trace: &TraceCompute) -> Result<Framebuffer> {
        trace.read_output(&self.device, &self.queue)
    }
}

impl ComputeDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type TracePipeline = TraceCompute;
    type CompositePipeline = Compositor;
    type Target = wgpu::TextureView;

    fn describe(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn create_buffer(&mut self, label: &str, contents: &[u8]) -> Result<wgpu::Buffer> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::device(format!("{label}: {err}")));
        }
        Ok(buffer)
    }

    fn create_trace_pipeline(
        &mut self,
        scene: &SceneBuffers<'_, wgpu::Buffer>,
        width: u32,
        height: u32,
    ) -> Result<TraceCompute> {
        TraceCompute::new(&self.device, scene, width, height)
    }

    fn create_composite_pipeline(&mut self, trace: &TraceCompute) -> Result<Compositor> {
        Compositor::new(&self.device, trace.output_view(), self.target_format)
    }

    fn resize_output(
        &mut self,
        trace: &mut TraceCompute,
        composite: &mut Compositor,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if trace.resize(&self.device, width, height) {
            composite.rebind(&self.device, trace.output_view());
        }
        Ok(())
    }

    fn submit_trace(&mut self, trace: &mut TraceCompute, frame: &FrameUniform) -> Result<()> {
        trace.update_frame(&self.queue, frame);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("trace_encoder"),
        });
        trace.dispatch(&mut encoder);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn submit_composite(&mut self, composite: &Compositor, target: &mut wgpu::TextureView) -> Result<()> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("composite_encoder"),
        });
        composite.draw(&mut encoder, target);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| Error::device(format!("poll failed: {e}")))
    }
}
