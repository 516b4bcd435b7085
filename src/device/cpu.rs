//! Software compute device.
//!
//! Buffers are plain byte vectors; the trace stage decodes them back into
//! records and runs [`SceneView::shade_pixel`] per pixel, rows in parallel.
//! Useful without a GPU, and as the reference the WGSL kernel is tested
//! against.

use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;

use super::{Backend, ComputeDevice, DeviceInfo, SceneBuffers};
use crate::tracer::composite::{composite_into, Framebuffer};
use crate::tracer::{FrameUniform, GpuSceneData, SceneView};
use crate::util::Result;

/// Backend handing out [`CpuDevice`]s. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Device = CpuDevice;

    fn acquire_compute_device(&self) -> Result<CpuDevice> {
        Ok(CpuDevice {
            threads: rayon::current_num_threads(),
        })
    }
}

#[derive(Debug)]
pub struct CpuDevice {
    threads: usize,
}

/// Host-memory storage buffer.
#[derive(Debug, Clone)]
pub struct CpuBuffer {
    label: String,
    bytes: Vec<u8>,
}

impl CpuBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Trace stage: decoded scene plus the shared output image.
#[derive(Debug)]
pub struct CpuTrace {
    scene: GpuSceneData,
    output: Arc<RwLock<Framebuffer>>,
    overflowed_pixels: usize,
}

impl CpuTrace {
    /// Copy of the last traced image.
    pub fn image(&self) -> Framebuffer {
        self.output.read().clone()
    }

    /// Pixels of the last trace whose traversal ran out of stack.
    pub fn overflowed_pixels(&self) -> usize {
        self.overflowed_pixels
    }

    pub fn scene(&self) -> &GpuSceneData {
        &self.scene
    }
}

/// Composite stage: reads the trace output.
#[derive(Debug)]
pub struct CpuComposite {
    source: Arc<RwLock<Framebuffer>>,
}

impl ComputeDevice for CpuDevice {
    type Buffer = CpuBuffer;
    type TracePipeline = CpuTrace;
    type CompositePipeline = CpuComposite;
    type Target = Framebuffer;

    fn describe(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("software ({} threads)", self.threads),
            backend: "cpu".into(),
        }
    }

    fn create_buffer(&mut self, label: &str, contents: &[u8]) -> Result<CpuBuffer> {
        Ok(CpuBuffer {
            label: label.to_string(),
            bytes: contents.to_vec(),
        })
    }

    fn create_trace_pipeline(
        &mut self,
        scene: &SceneBuffers<'_, CpuBuffer>,
        width: u32,
        height: u32,
    ) -> Result<CpuTrace> {
        let scene = GpuSceneData::unpack(&scene.nodes.bytes, &scene.triangles.bytes, &scene.materials.bytes)?;
        Ok(CpuTrace {
            scene,
            output: Arc::new(RwLock::new(Framebuffer::new(width, height))),
            overflowed_pixels: 0,
        })
    }

    fn create_composite_pipeline(&mut self, trace: &CpuTrace) -> Result<CpuComposite> {
        Ok(CpuComposite {
            source: Arc::clone(&trace.output),
        })
    }

    fn resize_output(
        &mut self,
        trace: &mut CpuTrace,
        _composite: &mut CpuComposite,
        width: u32,
        height: u32,
    ) -> Result<()> {
        // The composite stage shares the image, so resizing in place is enough
        trace.output.write().resize(width, height);
        trace.overflowed_pixels = 0;
        Ok(())
    }

    #[tracing::instrument(skip_all, name = "cpu_trace")]
    fn submit_trace(&mut self, trace: &mut CpuTrace, frame: &FrameUniform) -> Result<()> {
        let view = SceneView::from(&trace.scene);
        let mut image = trace.output.write();
        let width = image.width() as usize;
        if width == 0 {
            return Ok(());
        }

        let overflowed: usize = image
            .pixels_mut()
            .par_chunks_mut(width)
            .enumerate()
            .map(|(y, row)| {
                let mut count = 0;
                for (x, px) in row.iter_mut().enumerate() {
                    let shaded = view.shade_pixel(frame, x as u32, y as u32);
                    count += shaded.overflowed as usize;
                    let alpha = if shaded.overflowed { 0.5 } else { 1.0 };
                    *px = shaded.color.extend(alpha).to_array();
                }
                count
            })
            .sum();

        if overflowed > 0 {
            tracing::warn!(pixels = overflowed, "traversal stack overflow, partial hits used");
        }
        trace.overflowed_pixels = overflowed;
        Ok(())
    }

    fn submit_composite(&mut self, composite: &CpuComposite, target: &mut Framebuffer) -> Result<()> {
        composite_into(&composite.source.read(), target);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        // Submissions run to completion before returning
        Ok(())
    }
}
