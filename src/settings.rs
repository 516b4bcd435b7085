//! Persistent ray-traced mode settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tracer::ShadingParams;
use crate::util::Result;

/// Settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Lighting
    pub light_direction: [f32; 3],
    pub shadow_factor: f32,
    pub shadow_bias: f32,

    // Materials
    pub metallic_threshold: f32,

    // Sky
    pub sky_horizon: [f32; 3],
    pub sky_zenith: [f32; 3],

    // Output size used when the host does not pass one
    pub output_width: u32,
    pub output_height: u32,

    // Adapter selection for the headless GPU backend
    pub high_performance_gpu: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let shading = ShadingParams::default();
        Self {
            light_direction: shading.light_dir.to_array(),
            shadow_factor: shading.shadow_factor,
            shadow_bias: shading.shadow_bias,
            metallic_threshold: shading.metallic_threshold,
            sky_horizon: shading.sky_horizon.to_array(),
            sky_zenith: shading.sky_zenith.to_array(),
            output_width: 1280,
            output_height: 720,
            high_performance_gpu: true,
        }
    }
}

impl Settings {
    /// Get settings file path
    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("raymode");
            std::fs::create_dir_all(&p).ok();
            p.push("settings.json");
            p
        })
    }

    /// Load settings from the user config dir, falling back to defaults
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default()
    }

    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&text)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Save settings to the user config dir
    pub fn save(&self) {
        if let Some(path) = Self::path() {
            if let Err(e) = self.save_to(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to save settings");
            }
        }
    }

    /// Save settings to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Replace out-of-range values with defaults
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        let light = glam::Vec3::from(self.light_direction);
        if !light.is_finite() || light.length_squared() < 1e-12 {
            self.light_direction = defaults.light_direction;
        }
        if !(0.0..=1.0).contains(&self.shadow_factor) {
            self.shadow_factor = defaults.shadow_factor;
        }
        if !(self.shadow_bias.is_finite() && self.shadow_bias > 0.0) {
            self.shadow_bias = defaults.shadow_bias;
        }
        if !(0.0..=1.0).contains(&self.metallic_threshold) {
            self.metallic_threshold = defaults.metallic_threshold;
        }
        if !self.sky_horizon.iter().all(|c| c.is_finite()) {
            self.sky_horizon = defaults.sky_horizon;
        }
        if !self.sky_zenith.iter().all(|c| c.is_finite()) {
            self.sky_zenith = defaults.sky_zenith;
        }
        self.output_width = self.output_width.clamp(1, 16384);
        self.output_height = self.output_height.clamp(1, 16384);
    }

    /// Shading constants for the per-frame uniform (light normalized there)
    pub fn shading(&self) -> ShadingParams {
        ShadingParams {
            light_dir: self.light_direction.into(),
            shadow_factor: self.shadow_factor,
            metallic_threshold: self.metallic_threshold,
            sky_horizon: self.sky_horizon.into(),
            sky_zenith: self.sky_zenith.into(),
            shadow_bias: self.shadow_bias,
        }
    }

    #[cfg(feature = "gpu")]
    pub fn power_preference(&self) -> wgpu::PowerPreference {
        if self.high_performance_gpu {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        }
    }
}
