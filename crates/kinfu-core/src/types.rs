//! Shared value types: resolutions, vectors, pixels, camera intrinsics, and
//! the fixed-capacity frame buffers that live for the whole run.

use serde::{Deserialize, Serialize};

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count.
    pub const fn pixels(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Integer downscale by `ratio` (computation resolution).
    pub const fn scaled_down(self, ratio: u32) -> Self {
        Self {
            width: self.width / ratio,
            height: self.height / ratio,
        }
    }
}

// ─── Vectors ─────────────────────────────────────────────────────────────────

/// Three-component vector — volume extents, poses, position factors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise product.
    pub fn component_mul(self, other: Self) -> Self {
        Self {
            x: self.x * other.x,
            y: self.y * other.y,
            z: self.z * other.z,
        }
    }
}

// ─── Pixels ──────────────────────────────────────────────────────────────────

/// Packed 8-bit RGB pixel — the render-buffer element type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Uniform gray pixel.
    pub const fn gray(v: u8) -> Self {
        Self { r: v, g: v, b: v }
    }
}

// ─── Camera intrinsics ───────────────────────────────────────────────────────

/// Pinhole camera intrinsics: focal lengths and principal point, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub const ZERO: Self = Self {
        fx: 0.0,
        fy: 0.0,
        cx: 0.0,
        cy: 0.0,
    };

    pub const fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics for the computation resolution: every component divided by
    /// the integer downscale ratio.
    pub fn scaled_down(self, ratio: u32) -> Self {
        let r = ratio as f32;
        Self {
            fx: self.fx / r,
            fy: self.fy / r,
            cx: self.cx / r,
            cy: self.cy / r,
        }
    }
}

// ─── Frame buffers ───────────────────────────────────────────────────────────

/// Input and render buffers for one run.
///
/// Allocated once at the maximum supported input resolution and reused for
/// every frame regardless of the (possibly downscaled) computation
/// resolution — switching stream resolution mid-run never requires a
/// reallocation.  Owned by the controller; dropped exactly once on every
/// exit path.
pub struct FrameBuffers {
    /// Raw depth input in millimetres, as delivered by the source.
    pub input_depth: Vec<u16>,
    /// Raw color input.
    pub input_rgb: Vec<Rgb8>,
    /// Depth-map render output.
    pub depth_render: Vec<Rgb8>,
    /// Tracking-result render output.
    pub track_render: Vec<Rgb8>,
    /// Volume raycast render output.
    pub volume_render: Vec<Rgb8>,
    capacity: Resolution,
}

impl FrameBuffers {
    /// Allocate all buffers at `capacity`.
    pub fn new(capacity: Resolution) -> Self {
        let n = capacity.pixels();
        Self {
            input_depth: vec![0; n],
            input_rgb: vec![Rgb8::default(); n],
            depth_render: vec![Rgb8::default(); n],
            track_render: vec![Rgb8::default(); n],
            volume_render: vec![Rgb8::default(); n],
            capacity,
        }
    }

    /// The fixed allocation resolution.
    pub fn capacity(&self) -> Resolution {
        self.capacity
    }

    /// Whether frames at `size` fit without reallocation.
    pub fn fits(&self, size: Resolution) -> bool {
        size.pixels() <= self.capacity.pixels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_scaling() {
        let full = Resolution::new(640, 480);
        assert_eq!(full.pixels(), 307_200);
        assert_eq!(full.scaled_down(2), Resolution::new(320, 240));
        assert_eq!(full.scaled_down(1), full);
    }

    #[test]
    fn intrinsics_scaling_divides_all_components() {
        let k = CameraIntrinsics::new(520.0, 521.0, 320.0, 240.0);
        let half = k.scaled_down(2);
        assert_eq!(half, CameraIntrinsics::new(260.0, 260.5, 160.0, 120.0));
    }

    #[test]
    fn buffers_sized_to_capacity() {
        let bufs = FrameBuffers::new(Resolution::new(64, 48));
        assert_eq!(bufs.input_depth.len(), 64 * 48);
        assert_eq!(bufs.volume_render.len(), 64 * 48);
        assert!(bufs.fits(Resolution::new(32, 24)));
        assert!(!bufs.fits(Resolution::new(65, 48)));
    }

    #[test]
    fn vec3_component_mul() {
        let pose = Vec3::new(0.5, 0.5, 0.0).component_mul(Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(pose, Vec3::new(1.0, 1.0, 0.0));
    }
}
