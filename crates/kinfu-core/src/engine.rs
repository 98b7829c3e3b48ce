//! Reconstruction engine contract, plus the kernel-free stub backend.
//!
//! The engine owns all reconstruction state (TSDF volume, pose history,
//! pyramids) and every stage kernel.  The driver only sequences, times, and
//! records stage invocations — it never looks inside.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::{CameraIntrinsics, Resolution, Rgb8, Vec3};

/// Dense reconstruction backend: preprocessing, pose tracking, volumetric
/// integration, raycasting, and the render kernels.
///
/// The tracking, integration, and raycasting stages report per-frame success
/// as booleans.  A failed stage is recorded in telemetry and never aborts
/// the run; recovery, if any, is the engine's own business.
pub trait ReconstructionEngine {
    /// Current estimated camera position.
    fn position(&self) -> Vec3;

    /// Filter and downsample the raw depth frame into the engine's
    /// computation-resolution working buffers.
    fn preprocess(&mut self, depth: &[u16], input_size: Resolution);

    /// Run ICP pose tracking.  The expensive path executes only every
    /// `tracking_rate`-th frame.
    fn track(
        &mut self,
        camera: CameraIntrinsics,
        icp_threshold: f32,
        tracking_rate: u32,
        frame: u32,
    ) -> bool;

    /// Fuse the current frame into the volume.  Gated by `integration_rate`.
    fn integrate(
        &mut self,
        camera: CameraIntrinsics,
        integration_rate: u32,
        mu: f32,
        frame: u32,
    ) -> bool;

    /// Raycast the volume to refresh the model-side vertex/normal maps.
    fn raycast(&mut self, camera: CameraIntrinsics, mu: f32, frame: u32) -> bool;

    /// Render the filtered depth map.
    fn render_depth(&mut self, out: &mut [Rgb8], size: Resolution);

    /// Render the per-pixel tracking result.
    fn render_track(&mut self, out: &mut [Rgb8], size: Resolution);

    /// Raycast-render the volume from the current pose.  Gated by
    /// `rendering_rate`; `large_step` is the empty-space skip distance.
    #[allow(clippy::too_many_arguments)]
    fn render_volume(
        &mut self,
        out: &mut [Rgb8],
        size: Resolution,
        frame: u32,
        rendering_rate: u32,
        camera: CameraIntrinsics,
        large_step: f32,
    );

    /// Resolution all stage kernels operate at.
    fn computation_resolution(&self) -> Resolution;

    /// Persist the reconstructed volume.
    fn dump_volume(&mut self, path: &Path) -> Result<()>;
}

// ─── Stub backend ────────────────────────────────────────────────────────────

/// Kernel-free stand-in for a reconstruction backend.
///
/// Exercises the full driver contract — cadence gating, pose reporting,
/// deterministic renders, volume dumps — without GPU kernels, so the driver,
/// CLI, and tests run on any machine.  Stage gating mirrors the reference
/// engine: tracking runs every `tracking_rate`-th frame, integration every
/// `integration_rate`-th frame plus the first few frames unconditionally,
/// raycasting once enough frames exist to raycast against.
pub struct StubEngine {
    computation_size: Resolution,
    volume_resolution: [u32; 3],
    pose: Vec3,
    depth: Vec<u16>,
    depth_size: Resolution,
}

impl StubEngine {
    pub fn new(
        computation_size: Resolution,
        volume_resolution: [u32; 3],
        _volume_size: Vec3,
        initial_pose: Vec3,
        _pyramid: &[u32],
    ) -> Self {
        Self {
            computation_size,
            volume_resolution,
            pose: initial_pose,
            depth: Vec::new(),
            depth_size: Resolution::new(0, 0),
        }
    }

    /// Nearest stored depth sample for a computation-resolution pixel.
    fn depth_at(&self, x: u32, y: u32, size: Resolution) -> u16 {
        if self.depth.is_empty() || size.width == 0 || size.height == 0 {
            return 0;
        }
        let sx = (x as u64 * self.depth_size.width as u64 / size.width as u64) as u32;
        let sy = (y as u64 * self.depth_size.height as u64 / size.height as u64) as u32;
        let idx = (sy * self.depth_size.width + sx) as usize;
        self.depth.get(idx).copied().unwrap_or(0)
    }

    fn shade(&self, out: &mut [Rgb8], size: Resolution, tint: [u8; 3]) {
        for y in 0..size.height {
            for x in 0..size.width {
                let d = self.depth_at(x, y, size);
                // 8 m range compressed into 8 bits.
                let v = (d / 32).min(255) as u8;
                out[(y * size.width + x) as usize] = Rgb8::new(
                    v.saturating_add(tint[0]),
                    v.saturating_add(tint[1]),
                    v.saturating_add(tint[2]),
                );
            }
        }
    }
}

impl ReconstructionEngine for StubEngine {
    fn position(&self) -> Vec3 {
        self.pose
    }

    fn preprocess(&mut self, depth: &[u16], input_size: Resolution) {
        let n = input_size.pixels();
        self.depth.clear();
        self.depth.extend_from_slice(&depth[..n]);
        self.depth_size = input_size;
    }

    fn track(
        &mut self,
        _camera: CameraIntrinsics,
        _icp_threshold: f32,
        tracking_rate: u32,
        frame: u32,
    ) -> bool {
        frame % tracking_rate == 0
    }

    fn integrate(
        &mut self,
        _camera: CameraIntrinsics,
        integration_rate: u32,
        _mu: f32,
        frame: u32,
    ) -> bool {
        frame % integration_rate == 0 || frame <= 3
    }

    fn raycast(&mut self, _camera: CameraIntrinsics, _mu: f32, frame: u32) -> bool {
        frame > 2
    }

    fn render_depth(&mut self, out: &mut [Rgb8], size: Resolution) {
        self.shade(out, size, [0, 0, 0]);
    }

    fn render_track(&mut self, out: &mut [Rgb8], size: Resolution) {
        self.shade(out, size, [0, 48, 0]);
    }

    fn render_volume(
        &mut self,
        out: &mut [Rgb8],
        size: Resolution,
        frame: u32,
        rendering_rate: u32,
        _camera: CameraIntrinsics,
        _large_step: f32,
    ) {
        // Off-cadence frames keep the previous render; the buffer is
        // persistent, so repainting only on cadence matches the real
        // raycaster's behavior.
        if frame % rendering_rate != 0 {
            return;
        }
        self.shade(out, size, [24, 24, 48]);
    }

    fn computation_resolution(&self) -> Resolution {
        self.computation_size
    }

    fn dump_volume(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| PipelineError::Dump(format!("{}: {e}", path.display())))?;
        let mut out = BufWriter::new(file);
        let map_err = |e: std::io::Error| PipelineError::Dump(format!("{}: {e}", path.display()));
        for d in self.volume_resolution {
            out.write_all(&d.to_le_bytes()).map_err(map_err)?;
        }
        // Empty volume: one (tsdf, weight) i16 pair per voxel.
        let voxels = self.volume_resolution.iter().map(|&d| d as usize).product::<usize>();
        let zeros = [0u8; 4096];
        let mut remaining = voxels * 4;
        while remaining > 0 {
            let n = remaining.min(zeros.len());
            out.write_all(&zeros[..n]).map_err(map_err)?;
            remaining -= n;
        }
        out.flush().map_err(map_err)
    }
}
