//! Optional power-rail sampling aligned to frame boundaries.
//!
//! Boards that expose an instantaneous power rail through sysfs get one
//! sample per processed frame, attributed to the measurement window opened
//! at the start of that frame.  Machines without a readable rail simply run
//! without a monitor — absence is never an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, warn};

use kinfu_core::error::{PipelineError, Result};

use crate::telemetry::{SampleKind, TelemetrySink};

/// Samples an instantaneous system power rail once per frame.
pub struct PowerMonitor {
    rail: PathBuf,
    origin: Instant,
    window_start: Option<Instant>,
    stats: TelemetrySink,
    samples: usize,
}

impl PowerMonitor {
    /// Probe the host for a readable power rail.  Returns `None` when the
    /// machine exposes none; callers treat the monitor as absent.
    pub fn probe() -> Option<Self> {
        for rail in candidate_rails() {
            if read_microwatts(&rail).is_some() {
                debug!(rail = %rail.display(), "power rail found");
                return Some(Self::with_rail(rail));
            }
        }
        debug!("no readable power rail; power telemetry disabled");
        None
    }

    /// Monitor an explicit rail path (boards with known sensor locations,
    /// and tests).
    pub fn with_rail(rail: PathBuf) -> Self {
        Self {
            rail,
            origin: Instant::now(),
            window_start: None,
            stats: TelemetrySink::new(),
            samples: 0,
        }
    }

    /// Open a measurement window at a frame boundary.
    pub fn start(&mut self) {
        self.window_start = Some(Instant::now());
    }

    /// Record one power sample attributed to the just-completed frame.
    pub fn sample(&mut self) {
        let Some(window_start) = self.window_start.take() else {
            return;
        };
        let Some(microwatts) = read_microwatts(&self.rail) else {
            warn!(rail = %self.rail.display(), "power rail went away; sample skipped");
            return;
        };
        self.stats.sample(
            "time",
            self.origin.elapsed().as_secs_f64(),
            SampleKind::Time,
        );
        self.stats.sample(
            "window",
            window_start.elapsed().as_secs_f64(),
            SampleKind::Time,
        );
        self.stats
            .sample("power", microwatts / 1e6, SampleKind::Power);
        self.samples += 1;
    }

    /// Number of samples recorded so far.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Write the accumulated power history.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let mut out = Vec::new();
        self.stats
            .write_history(&mut out)
            .map_err(|e| PipelineError::Report(format!("{}: {e}", path.display())))?;
        fs::write(path, out).map_err(|e| PipelineError::Report(format!("{}: {e}", path.display())))
    }
}

/// Sysfs locations worth probing, in preference order: dedicated hwmon
/// power rails first, then battery/supply rails.
fn candidate_rails() -> Vec<PathBuf> {
    let mut rails = Vec::new();
    if let Ok(entries) = fs::read_dir("/sys/class/hwmon") {
        for entry in entries.flatten() {
            rails.push(entry.path().join("power1_input"));
        }
    }
    if let Ok(entries) = fs::read_dir("/sys/class/power_supply") {
        for entry in entries.flatten() {
            rails.push(entry.path().join("power_now"));
        }
    }
    rails
}

fn read_microwatts(path: &Path) -> Option<f64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
}
