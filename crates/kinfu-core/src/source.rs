//! Depth-stream sources — the acquisition seam of the pipeline.
//!
//! [`DepthSource`] is the neutral contract between the frame driver and
//! whatever supplies depth+color frames: the raw scene-recording reader
//! below, or a live camera backend plugged in behind the same trait.
//! Stream exhaustion is normal termination, never an error.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::types::{CameraIntrinsics, Resolution, Rgb8};

/// Reference focal length of the depth camera at 640×480, in pixels.
const BASE_FOCAL: f32 = 531.15;
const BASE_WIDTH: f32 = 640.0;

/// Supplies depth+color frames and camera calibration to the driver.
pub trait DepthSource {
    /// Native resolution of the incoming frames.
    fn input_size(&self) -> Resolution;

    /// Camera intrinsics at the native resolution.
    fn intrinsics(&self) -> CameraIntrinsics;

    /// Raw index of the next frame `read_next` will deliver — equivalently,
    /// the number of frames consumed so far.
    fn frame_number(&self) -> u32;

    /// Read the next frame into the caller's buffers.  Both slices must hold
    /// at least [`input_size`](Self::input_size) pixels; only that prefix is
    /// written.  Returns `false` once the stream is exhausted.
    fn read_next(&mut self, rgb: &mut [Rgb8], depth: &mut [u16]) -> bool;

    /// Whether the underlying camera or recording is usable and streaming.
    fn camera_active(&self) -> bool;
}

// ─── Raw scene recordings ────────────────────────────────────────────────────

/// Reader for raw scene recordings.
///
/// Per frame the stream holds: depth resolution as two little-endian `u32`,
/// `width*height` little-endian `u16` depth samples in millimetres, color
/// resolution as two `u32`, then `width*height` RGB byte triples.  A
/// truncated trailing frame ends the stream quietly.
#[derive(Debug)]
pub struct RawSceneSource {
    reader: BufReader<File>,
    path: PathBuf,
    input_size: Resolution,
    frames_read: u32,
    exhausted: bool,
    scratch: Vec<u8>,
    /// Pacing slot for FPS-limited playback; `None` free-runs.
    frame_interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl RawSceneSource {
    /// Open a recording and learn its resolution from the first frame
    /// header.  `fps` > 0 paces playback at that rate.
    pub fn open(path: &Path, fps: u32) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PipelineError::NoSource(format!("{}: {e}", path.display()))
        })?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|e| {
            PipelineError::Stream(format!("{}: empty or headerless stream: {e}", path.display()))
        })?;
        let width = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let height = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if width == 0 || height == 0 || width > 4096 || height > 4096 {
            return Err(PipelineError::Stream(format!(
                "{}: implausible frame size {width}x{height}",
                path.display()
            )));
        }
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| PipelineError::Stream(format!("{}: {e}", path.display())))?;

        let input_size = Resolution::new(width, height);
        debug!(
            path = %path.display(),
            width,
            height,
            fps,
            "opened raw scene stream"
        );

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            input_size,
            frames_read: 0,
            exhausted: false,
            scratch: vec![0u8; input_size.pixels() * 3],
            frame_interval: (fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(fps))),
            next_due: None,
        })
    }

    /// Block until the next pacing slot, if a target rate is set.
    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        match self.next_due {
            Some(due) => {
                if due > now {
                    std::thread::sleep(due - now);
                }
                self.next_due = Some(due.max(now) + interval);
            }
            None => self.next_due = Some(now + interval),
        }
    }

    /// Read one frame section: a `u32×2` size header followed by
    /// `pixels * bytes_per_pixel` payload bytes into `scratch`.
    /// Returns `false` on a clean end-of-stream before the header.
    fn read_section(&mut self, bytes_per_pixel: usize, first: bool) -> std::io::Result<bool> {
        let mut header = [0u8; 8];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if first && e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        let width = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let height = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if Resolution::new(width, height) != self.input_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "frame size changed mid-stream: {width}x{height} != {}x{}",
                    self.input_size.width, self.input_size.height
                ),
            ));
        }
        let len = self.input_size.pixels() * bytes_per_pixel;
        self.reader.read_exact(&mut self.scratch[..len])?;
        Ok(true)
    }
}

impl DepthSource for RawSceneSource {
    fn input_size(&self) -> Resolution {
        self.input_size
    }

    fn intrinsics(&self) -> CameraIntrinsics {
        // Focal length scales linearly with resolution; principal point is
        // the image centre.
        let scale = self.input_size.width as f32 / BASE_WIDTH;
        CameraIntrinsics::new(
            BASE_FOCAL * scale,
            BASE_FOCAL * scale,
            self.input_size.width as f32 / 2.0,
            self.input_size.height as f32 / 2.0,
        )
    }

    fn frame_number(&self) -> u32 {
        self.frames_read
    }

    fn read_next(&mut self, rgb: &mut [Rgb8], depth: &mut [u16]) -> bool {
        if self.exhausted {
            return false;
        }
        let n = self.input_size.pixels();
        assert!(rgb.len() >= n && depth.len() >= n, "undersized frame buffers");

        self.pace();

        // Depth section.
        match self.read_section(2, true) {
            Ok(true) => {}
            Ok(false) => {
                debug!(frames = self.frames_read, "scene stream exhausted");
                self.exhausted = true;
                return false;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "truncated depth section; ending stream");
                self.exhausted = true;
                return false;
            }
        }
        for (i, out) in depth[..n].iter_mut().enumerate() {
            *out = u16::from_le_bytes([self.scratch[2 * i], self.scratch[2 * i + 1]]);
        }

        // Color section.
        match self.read_section(3, false) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                warn!(path = %self.path.display(), "truncated color section; ending stream");
                self.exhausted = true;
                return false;
            }
        }
        for (i, out) in rgb[..n].iter_mut().enumerate() {
            *out = Rgb8::new(self.scratch[3 * i], self.scratch[3 * i + 1], self.scratch[3 * i + 2]);
        }

        self.frames_read += 1;
        true
    }

    fn camera_active(&self) -> bool {
        !self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_path(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "kinfu_src_{label}_{}_{}.raw",
            std::process::id(),
            nanos
        ))
    }

    fn write_frame(out: &mut impl Write, width: u32, height: u32, seed: u16) {
        let n = (width * height) as usize;
        out.write_all(&width.to_le_bytes()).unwrap();
        out.write_all(&height.to_le_bytes()).unwrap();
        for i in 0..n {
            out.write_all(&seed.wrapping_add(i as u16).to_le_bytes()).unwrap();
        }
        out.write_all(&width.to_le_bytes()).unwrap();
        out.write_all(&height.to_le_bytes()).unwrap();
        for i in 0..n {
            let v = (i % 251) as u8;
            out.write_all(&[v, v, v]).unwrap();
        }
    }

    fn write_scene(path: &Path, frames: u16, width: u32, height: u32) {
        let mut file = File::create(path).unwrap();
        for f in 0..frames {
            write_frame(&mut file, width, height, 500 + f * 10);
        }
    }

    #[test]
    fn reads_frames_and_counts() {
        let path = unique_temp_path("basic");
        write_scene(&path, 3, 8, 6);

        let mut src = RawSceneSource::open(&path, 0).expect("open");
        assert_eq!(src.input_size(), Resolution::new(8, 6));
        assert_eq!(src.frame_number(), 0);
        assert!(src.camera_active());

        let mut rgb = vec![Rgb8::default(); 48];
        let mut depth = vec![0u16; 48];
        assert!(src.read_next(&mut rgb, &mut depth));
        assert_eq!(src.frame_number(), 1);
        assert_eq!(depth[0], 500);
        assert_eq!(depth[47], 547);

        assert!(src.read_next(&mut rgb, &mut depth));
        assert_eq!(depth[0], 510);
        assert!(src.read_next(&mut rgb, &mut depth));
        assert_eq!(src.frame_number(), 3);

        assert!(!src.read_next(&mut rgb, &mut depth));
        assert!(!src.camera_active());
        // Exhaustion is sticky.
        assert!(!src.read_next(&mut rgb, &mut depth));
        assert_eq!(src.frame_number(), 3);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_trailing_frame_ends_stream() {
        let path = unique_temp_path("trunc");
        {
            let mut file = File::create(&path).unwrap();
            write_frame(&mut file, 4, 4, 100);
            // Second frame: header plus half the depth payload.
            file.write_all(&4u32.to_le_bytes()).unwrap();
            file.write_all(&4u32.to_le_bytes()).unwrap();
            file.write_all(&[0u8; 16]).unwrap();
        }

        let mut src = RawSceneSource::open(&path, 0).expect("open");
        let mut rgb = vec![Rgb8::default(); 16];
        let mut depth = vec![0u16; 16];
        assert!(src.read_next(&mut rgb, &mut depth));
        assert!(!src.read_next(&mut rgb, &mut depth));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_no_source() {
        let err = RawSceneSource::open(Path::new("/nonexistent/scene.raw"), 0).unwrap_err();
        assert_eq!(err.error_code(), 200);
    }

    #[test]
    fn intrinsics_scale_with_resolution() {
        let path = unique_temp_path("intr");
        write_scene(&path, 1, 320, 240);
        let src = RawSceneSource::open(&path, 0).expect("open");
        let k = src.intrinsics();
        assert!((k.fx - BASE_FOCAL / 2.0).abs() < 1e-3);
        assert_eq!(k.cx, 160.0);
        assert_eq!(k.cy, 120.0);
        std::fs::remove_file(&path).ok();
    }
}
