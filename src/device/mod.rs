//! Compute device abstraction.
//!
//! The orchestrator only talks to a [`Backend`] (how to obtain a device) and
//! a [`ComputeDevice`] (what a device can do). Two implementations ship:
//!
//! - [`cpu::CpuBackend`]: software device, always available, runs the
//!   tracer's CPU mirror over rayon.
//! - [`wgpu_backend::WgpuBackend`] (feature `gpu`): WGSL compute + render
//!   pipelines on any wgpu adapter.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub use cpu::{CpuBackend, CpuDevice};
#[cfg(feature = "gpu")]
pub use wgpu_backend::{WgpuBackend, WgpuDevice};

use crate::tracer::FrameUniform;
use crate::util::Result;

/// Source of compute devices.
pub trait Backend {
    type Device: ComputeDevice;

    /// Obtain a compute-capable device.
    ///
    /// Fails with [`crate::Error::PlatformUnsupported`] when none exists.
    fn acquire_compute_device(&self) -> Result<Self::Device>;
}

/// Identification of an acquired device, for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: String,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.backend)
    }
}

/// The three uploaded scene buffers, borrowed for pipeline creation.
#[derive(Debug)]
pub struct SceneBuffers<'a, B> {
    pub nodes: &'a B,
    pub triangles: &'a B,
    pub materials: &'a B,
    pub node_count: usize,
    pub triangle_count: usize,
}

/// Operations the ray-traced mode needs from a device.
///
/// Trace is always submitted before composite on the same queue, so the
/// composite stage sees the finished image without explicit fences.
pub trait ComputeDevice {
    /// Device-resident, read-only storage buffer.
    type Buffer;
    /// Trace stage: compiled kernel plus its output image.
    type TracePipeline;
    /// Composite stage reading the trace output.
    type CompositePipeline;
    /// Presentable target the composite stage draws into.
    type Target: ?Sized;

    fn describe(&self) -> DeviceInfo;

    /// Upload `contents` into a new storage buffer.
    fn create_buffer(&mut self, label: &str, contents: &[u8]) -> Result<Self::Buffer>;

    /// Compile the trace kernel against the scene buffers with a
    /// `width x height` output image.
    ///
    /// Fails with [`crate::Error::PipelineCompile`] when the kernel is rejected.
    fn create_trace_pipeline(
        &mut self,
        scene: &SceneBuffers<'_, Self::Buffer>,
        width: u32,
        height: u32,
    ) -> Result<Self::TracePipeline>;

    fn create_composite_pipeline(&mut self, trace: &Self::TracePipeline) -> Result<Self::CompositePipeline>;

    /// Reallocate the trace output and rebind the composite stage to it.
    fn resize_output(
        &mut self,
        trace: &mut Self::TracePipeline,
        composite: &mut Self::CompositePipeline,
        width: u32,
        height: u32,
    ) -> Result<()>;

    /// Enqueue one full trace of the output image.
    fn submit_trace(&mut self, trace: &mut Self::TracePipeline, frame: &FrameUniform) -> Result<()>;

    /// Enqueue the composite of the trace output into `target`.
    fn submit_composite(&mut self, composite: &Self::CompositePipeline, target: &mut Self::Target) -> Result<()>;

    /// Block until all submitted work has finished.
    fn wait_idle(&mut self) -> Result<()>;
}
