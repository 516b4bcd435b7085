//! # raymode
//!
//! Ray-traced viewport mode: an alternative to a rasterizing viewport that
//! renders each frame by shooting one primary ray per pixel through a BVH,
//! with Lambert shading, one hard shadow ray and a single mirror bounce.
//!
//! ## Modules
//!
//! - [`scene`] - Read-only scene snapshot, materials, camera
//! - [`tracer`] - BVH build, record packing, traversal/shading, trace + composite stages
//! - [`device`] - Compute device abstraction (wgpu and software backends)
//! - [`orchestrator`] - Mode lifecycle: initialize, render, resize, destroy
//! - [`settings`] - Persistent shading settings
//! - [`logging`] - Subscriber setup and the host-facing log sink
//! - [`util`] - Errors
//!
//! ## Example
//!
//! ```ignore
//! use raymode::prelude::*;
//!
//! let mut mode = Orchestrator::new(CpuBackend);
//! mode.initialize(&snapshot, 640, 480)?;
//! let mut target = Framebuffer::new(640, 480);
//! mode.render(&camera, &mut target)?;
//! mode.destroy();
//! ```

pub mod device;
pub mod logging;
pub mod orchestrator;
pub mod scene;
pub mod settings;
pub mod tracer;
pub mod util;

// Re-export commonly used types
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use util::{Error, Result};

/// Version, build date/time and enabled features stamped by `build.rs`.
pub fn build_info() -> String {
    format!(
        "{} built {} {} [{}]",
        env!("CARGO_PKG_VERSION"),
        env!("RAYMODE_BUILD_DATE"),
        env!("RAYMODE_BUILD_TIME"),
        env!("RAYMODE_BUILD_FEATURES")
    )
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::device::{Backend, ComputeDevice, CpuBackend};
    #[cfg(feature = "gpu")]
    pub use crate::device::WgpuBackend;
    pub use crate::logging::{LogSink, Severity};
    pub use crate::orchestrator::{Orchestrator, OrchestratorState};
    pub use crate::scene::{CameraState, Material, SceneObject, SceneSnapshot};
    pub use crate::settings::Settings;
    pub use crate::tracer::{Framebuffer, ShadingParams};
    pub use crate::util::{Error, Result};
}
