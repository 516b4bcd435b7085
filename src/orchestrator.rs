//! Ray-traced mode lifecycle.
//!
//! ```text
//! Uninitialized ──initialize──► Initializing ──ok──► Ready ──render──► Rendering
//!       ▲                            │                 │                  │
//!       └──────────── error ─────────┘                 └──── destroy ─────┴──► Destroyed
//!                                                                               │
//!                                     initialize (re-entry after a scene change)┘
//! ```
//!
//! Activation is synchronous: flatten the snapshot, build the BVH, pack and
//! upload it, compile both pipelines. Nothing is kept from a failed attempt.

use crate::device::{Backend, ComputeDevice, SceneBuffers};
use crate::logging::{LogSink, Severity, TracingSink};
use crate::scene::{CameraState, SceneSnapshot};
use crate::settings::Settings;
use crate::tracer::gpu_data::pack;
use crate::tracer::{build_bvh, flatten_scene, BvhStats, FrameUniform, GpuSceneData, ShadingParams};
use crate::util::{Error, Result};

/// Presentable target type of a backend's device.
pub type TargetOf<B> = <<B as Backend>::Device as ComputeDevice>::Target;

/// Trace pipeline type of a backend's device.
pub type TraceOf<B> = <<B as Backend>::Device as ComputeDevice>::TracePipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Uninitialized,
    Initializing,
    Ready,
    Rendering,
    Destroyed,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Rendering => "rendering",
            Self::Destroyed => "destroyed",
        }
    }

    /// Whether device resources exist.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Ready | Self::Rendering)
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything owned while the mode is active.
///
/// Field order is drop order: pipelines go before the buffers they bind.
struct ActiveScene<D: ComputeDevice> {
    trace: D::TracePipeline,
    composite: D::CompositePipeline,
    _buffers: [D::Buffer; 3],
    stats: BvhStats,
    placeholder: bool,
    width: u32,
    height: u32,
}

/// Drives one ray-traced viewport from activation to teardown.
pub struct Orchestrator<B: Backend> {
    backend: B,
    shading: ShadingParams,
    default_size: (u32, u32),
    sink: Box<dyn LogSink>,
    state: OrchestratorState,
    // Declared before `device` so it drops first
    active: Option<ActiveScene<B::Device>>,
    device: Option<B::Device>,
}

impl<B: Backend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        let defaults = Settings::default();
        Self {
            backend,
            shading: ShadingParams::default(),
            default_size: (defaults.output_width, defaults.output_height),
            sink: Box::new(TracingSink),
            state: OrchestratorState::Uninitialized,
            active: None,
            device: None,
        }
    }

    /// Route host-facing messages to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_shading(mut self, shading: ShadingParams) -> Self {
        self.shading = shading;
        self
    }

    /// Shading constants and default output size from persisted settings.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.shading = settings.shading();
        self.default_size = (settings.output_width, settings.output_height);
        self
    }

    /// Takes effect on the next `render`.
    pub fn set_shading(&mut self, shading: ShadingParams) {
        self.shading = shading;
    }

    pub fn shading(&self) -> &ShadingParams {
        &self.shading
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// BVH statistics of the active scene.
    pub fn stats(&self) -> Option<&BvhStats> {
        self.active.as_ref().map(|a| &a.stats)
    }

    /// Whether the active scene had no traceable geometry.
    pub fn is_placeholder_scene(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.placeholder)
    }

    /// Trace output size.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.active.as_ref().map(|a| (a.width, a.height))
    }

    pub fn device(&self) -> Option<&B::Device> {
        self.device.as_ref()
    }

    pub fn trace_pipeline(&self) -> Option<&TraceOf<B>> {
        self.active.as_ref().map(|a| &a.trace)
    }

    fn reject(&self, op: &'static str) -> Error {
        Error::InvalidState {
            op,
            state: self.state.as_str(),
        }
    }

    /// Activate the mode for `scene` with a `width x height` output.
    ///
    /// Valid from `Uninitialized` and `Destroyed`. On failure the state
    /// returns to `Uninitialized` and the error is also sent to the sink.
    pub fn initialize(&mut self, scene: &SceneSnapshot, width: u32, height: u32) -> Result<()> {
        if !matches!(
            self.state,
            OrchestratorState::Uninitialized | OrchestratorState::Destroyed
        ) {
            return Err(self.reject("initialize"));
        }

        self.state = OrchestratorState::Initializing;
        match self.activate(scene, width.max(1), height.max(1)) {
            Ok((device, active)) => {
                let msg = if active.placeholder {
                    "ray-traced mode active: scene has no traceable geometry, showing sky".to_string()
                } else {
                    format!(
                        "ray-traced mode active: {} triangles, {} BVH nodes on {}",
                        active.stats.tri_count,
                        active.stats.node_count,
                        device.describe()
                    )
                };
                self.sink.log(&msg, Severity::Info);
                self.device = Some(device);
                self.active = Some(active);
                self.state = OrchestratorState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = OrchestratorState::Uninitialized;
                self.sink.log(&format!("ray-traced mode unavailable: {e}"), Severity::Error);
                Err(e)
            }
        }
    }

    /// [`initialize`](Self::initialize) at the configured output size.
    pub fn initialize_default_size(&mut self, scene: &SceneSnapshot) -> Result<()> {
        let (width, height) = self.default_size;
        self.initialize(scene, width, height)
    }

    #[tracing::instrument(skip_all, fields(objects = scene.objects.len(), width = width, height = height))]
    fn activate(
        &self,
        scene: &SceneSnapshot,
        width: u32,
        height: u32,
    ) -> Result<(B::Device, ActiveScene<B::Device>)> {
        let mut device = self.backend.acquire_compute_device()?;
        tracing::info!(device = %device.describe(), build = %crate::build_info(), "compute device acquired");

        let flat = flatten_scene(scene);
        let bvh = build_bvh(&flat.triangles);
        #[cfg(debug_assertions)]
        bvh.validate(&flat.triangles)?;
        let stats = bvh.stats();
        let data = pack(&bvh, &flat.triangles, &flat.materials);
        tracing::debug!(?stats, "scene packed");

        // Host copies go out of scope with `data` once uploaded
        let buffers = upload(&mut device, &data)?;
        let scene_buffers = SceneBuffers {
            nodes: &buffers[0],
            triangles: &buffers[1],
            materials: &buffers[2],
            node_count: data.nodes.len(),
            triangle_count: data.triangles.len(),
        };
        let trace = device.create_trace_pipeline(&scene_buffers, width, height)?;
        let composite = device.create_composite_pipeline(&trace)?;

        let active = ActiveScene {
            trace,
            composite,
            _buffers: buffers,
            stats,
            placeholder: flat.placeholder,
            width,
            height,
        };
        Ok((device, active))
    }

    /// Trace one frame from `camera` and composite it into `target`.
    pub fn render(&mut self, camera: &CameraState, target: &mut TargetOf<B>) -> Result<()> {
        let state = self.state;
        let (Some(device), Some(active)) = (self.device.as_mut(), self.active.as_mut()) else {
            return Err(Error::InvalidState { op: "render", state: state.as_str() });
        };

        let frame = FrameUniform::new(camera, &self.shading, active.width, active.height);
        let submitted = device
            .submit_trace(&mut active.trace, &frame)
            .and_then(|()| device.submit_composite(&active.composite, target));

        if let Err(e) = submitted {
            self.sink.log(&format!("frame failed: {e}"), Severity::Error);
            return Err(e);
        }
        self.state = OrchestratorState::Rendering;
        Ok(())
    }

    /// Reallocate the trace output. No-op when the size is unchanged.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let state = self.state;
        let (Some(device), Some(active)) = (self.device.as_mut(), self.active.as_mut()) else {
            return Err(Error::InvalidState { op: "resize", state: state.as_str() });
        };

        let (width, height) = (width.max(1), height.max(1));
        if (active.width, active.height) == (width, height) {
            return Ok(());
        }
        device.resize_output(&mut active.trace, &mut active.composite, width, height)?;
        active.width = width;
        active.height = height;
        tracing::debug!(width, height, "trace output resized");
        Ok(())
    }

    /// Wait for in-flight work, then release pipelines, buffers and device.
    pub fn destroy(&mut self) {
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.wait_idle() {
                self.sink.log(&format!("teardown: {e}"), Severity::Warn);
            }
        }
        let was_active = self.active.take().is_some();
        self.device = None;
        self.state = OrchestratorState::Destroyed;
        if was_active {
            self.sink.log("ray-traced mode deactivated", Severity::Info);
        }
    }
}

#[tracing::instrument(skip_all, fields(bytes = data.nodes_bytes().len() + data.triangles_bytes().len() + data.materials_bytes().len()))]
fn upload<D: ComputeDevice>(device: &mut D, data: &GpuSceneData) -> Result<[D::Buffer; 3]> {
    Ok([
        device.create_buffer("raymode_nodes", data.nodes_bytes())?,
        device.create_buffer("raymode_triangles", data.triangles_bytes())?,
        device.create_buffer("raymode_materials", data.materials_bytes())?,
    ])
}

impl<B: Backend> Drop for Orchestrator<B> {
    fn drop(&mut self) {
        if self.active.is_some() || self.device.is_some() {
            self.destroy();
        }
    }
}
