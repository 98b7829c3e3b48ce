//! Runtime configuration for a reconstruction run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::{CameraIntrinsics, Vec3};

/// Configuration surface consumed by the frame driver and the controller.
///
/// Defaults mirror the reference KinectFusion parameterisation: full-rate
/// tracking, integration every second frame, a 2 m³ volume at 256³ voxels,
/// and a three-level ICP pyramid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Integer downscale factor between input and computation resolution.
    pub compute_size_ratio: u32,
    /// Cadence (in frames) of the volumetric integration stage.
    pub integration_rate: u32,
    /// Cadence of the expensive ICP tracking path.
    pub tracking_rate: u32,
    /// Cadence of the volume raycast render.
    pub rendering_rate: u32,
    /// Physical volume extent in metres.
    pub volume_size: Vec3,
    /// Voxel grid resolution.
    pub volume_resolution: [u32; 3],
    /// Initial camera position as a fraction of the volume extent.
    pub initial_pos_factor: Vec3,
    /// ICP iterations per pyramid level, coarse to fine.
    pub pyramid: Vec<u32>,
    /// TSDF truncation distance in metres.
    pub mu: f32,
    /// ICP convergence threshold.
    pub icp_threshold: f32,
    /// Camera intrinsics override; when set it replaces the source's
    /// calibration (and is divided by `compute_size_ratio` the same way).
    pub camera_override: Option<CameraIntrinsics>,
    /// Disable the interactive display.
    pub no_gui: bool,
    /// Telemetry log destination.  When absent in a headless run, per-frame
    /// rows go to stdout instead.
    pub log_file: Option<PathBuf>,
    /// Reconstructed-volume dump destination.
    pub dump_volume_file: Option<PathBuf>,
    /// Render the volume at full input resolution instead of the computation
    /// resolution.  Not implemented by any current backend; the controller
    /// forces it off and warns when requested.
    pub render_volume_fullsize: bool,
    /// Target playback rate for file sources in frames per second
    /// (0 = free-run).
    pub fps: u32,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            compute_size_ratio: 1,
            integration_rate: 2,
            tracking_rate: 1,
            rendering_rate: 4,
            volume_size: Vec3::new(2.0, 2.0, 2.0),
            volume_resolution: [256, 256, 256],
            initial_pos_factor: Vec3::new(0.5, 0.5, 0.0),
            pyramid: vec![10, 5, 4],
            mu: 0.1,
            icp_threshold: 1e-5,
            camera_override: None,
            no_gui: false,
            log_file: None,
            dump_volume_file: None,
            render_volume_fullsize: false,
            fps: 0,
        }
    }
}

impl ReconstructionConfig {
    /// Reject parameter combinations no stage can honor.
    pub fn validate(&self) -> Result<()> {
        if self.compute_size_ratio == 0 {
            return Err(PipelineError::Config(
                "compute_size_ratio must be at least 1".into(),
            ));
        }
        if self.integration_rate == 0 || self.tracking_rate == 0 || self.rendering_rate == 0 {
            return Err(PipelineError::Config(
                "integration, tracking, and rendering rates must be at least 1".into(),
            ));
        }
        if self.pyramid.is_empty() {
            return Err(PipelineError::Config(
                "pyramid must have at least one level".into(),
            ));
        }
        if self.volume_resolution.iter().any(|&v| v == 0) {
            return Err(PipelineError::Config(
                "volume_resolution components must be nonzero".into(),
            ));
        }
        if !(self.mu > 0.0) {
            return Err(PipelineError::Config("mu must be positive".into()));
        }
        Ok(())
    }

    /// Initial camera pose: `initial_pos_factor * volume_size`.
    pub fn initial_pose(&self) -> Vec3 {
        self.initial_pos_factor.component_mul(self.volume_size)
    }
}
