//! Per-frame performance telemetry.
//!
//! A run accumulates named, typed samples — one group per processed frame,
//! insertion order preserved.  The sink is an append-only time series: rows
//! are never edited after the fact.  Two read operations exist: a
//! human-readable per-frame row (header printed once) and a full-history
//! export for the log file.

use std::collections::HashMap;
use std::io::{self, Write};

use serde::Serialize;

use kinfu_core::types::Vec3;

/// Classification of a telemetry sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Frame index.
    Frame,
    /// Elapsed seconds.
    Time,
    /// Metres.
    Distance,
    /// Boolean or counter.
    Count,
    /// Watts.
    Power,
}

/// One named series of per-frame values.
#[derive(Clone, Debug)]
pub struct Series {
    name: String,
    kind: SampleKind,
    values: Vec<f64>,
}

impl Series {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Everything needed to derive one frame's telemetry group.
///
/// `stamps` are the seven boundary timestamps `t0..=t6` from the driver:
/// acquisition start, acquisition end, preprocessing end, tracking end,
/// integration end, raycasting end, rendering end.
#[derive(Clone, Copy, Debug)]
pub struct FrameRecord {
    pub frame: u32,
    pub stamps: [f64; 7],
    pub pose: Vec3,
    pub tracked: bool,
    pub integrated: bool,
}

/// Append-only, insertion-ordered collection of per-frame samples.
#[derive(Default)]
pub struct TelemetrySink {
    series: Vec<Series>,
    index: HashMap<String, usize>,
    frames: usize,
    header_printed: bool,
}

impl TelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample to the named series, creating it on first use.
    pub fn sample(&mut self, name: &str, value: f64, kind: SampleKind) {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                let idx = self.series.len();
                self.series.push(Series {
                    name: name.to_string(),
                    kind,
                    values: Vec::new(),
                });
                self.index.insert(name.to_string(), idx);
                idx
            }
        };
        self.series[idx].values.push(value);
    }

    /// Emit the full per-frame group, in the fixed order every consumer of
    /// the log relies on.
    pub fn record(&mut self, rec: &FrameRecord) {
        let t = &rec.stamps;
        self.sample("frame", f64::from(rec.frame), SampleKind::Frame);
        self.sample("acquisition", t[1] - t[0], SampleKind::Time);
        self.sample("preprocessing", t[2] - t[1], SampleKind::Time);
        self.sample("tracking", t[3] - t[2], SampleKind::Time);
        self.sample("integration", t[4] - t[3], SampleKind::Time);
        self.sample("raycasting", t[5] - t[4], SampleKind::Time);
        self.sample("rendering", t[6] - t[5], SampleKind::Time);
        self.sample("computation", t[5] - t[1], SampleKind::Time);
        self.sample("total", t[6] - t[0], SampleKind::Time);
        self.sample("X", f64::from(rec.pose.x), SampleKind::Distance);
        self.sample("Y", f64::from(rec.pose.y), SampleKind::Distance);
        self.sample("Z", f64::from(rec.pose.z), SampleKind::Distance);
        self.sample("tracked", f64::from(u8::from(rec.tracked)), SampleKind::Count);
        self.sample("integrated", f64::from(u8::from(rec.integrated)), SampleKind::Count);
        self.frames += 1;
    }

    /// Number of frame groups recorded.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    fn write_header(&self, out: &mut impl Write) -> io::Result<()> {
        let names: Vec<&str> = self.series.iter().map(|s| s.name.as_str()).collect();
        writeln!(out, "{}", names.join("\t"))
    }

    fn write_row(&self, row: usize, out: &mut impl Write) -> io::Result<()> {
        let mut first = true;
        for s in &self.series {
            if !first {
                write!(out, "\t")?;
            }
            first = false;
            let v = s.values.get(row).copied().unwrap_or(0.0);
            match s.kind {
                SampleKind::Frame | SampleKind::Count => write!(out, "{}", v as i64)?,
                SampleKind::Time | SampleKind::Distance | SampleKind::Power => {
                    write!(out, "{v:.6}")?
                }
            }
        }
        writeln!(out)
    }

    /// Print the most recent row, emitting the header first on the first
    /// call.
    pub fn print_last(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.frames == 0 {
            return Ok(());
        }
        if !self.header_printed {
            self.write_header(out)?;
            self.header_printed = true;
        }
        self.write_row(self.frames - 1, out)
    }

    /// Export the full history: header plus one row per sample group.
    pub fn write_history(&self, out: &mut impl Write) -> io::Result<()> {
        self.write_header(out)?;
        let rows = self
            .series
            .iter()
            .map(|s| s.values.len())
            .max()
            .unwrap_or(0);
        for row in 0..rows {
            self.write_row(row, out)?;
        }
        Ok(())
    }

    /// Aggregate run summary for structured output.
    pub fn summary(&self) -> RunStats {
        let mean = |name: &str| -> f64 {
            self.index
                .get(name)
                .map(|&i| &self.series[i].values)
                .filter(|v| !v.is_empty())
                .map(|v| v.iter().sum::<f64>() / v.len() as f64)
                .unwrap_or(0.0)
        };
        let count = |name: &str| -> u64 {
            self.index
                .get(name)
                .map(|&i| self.series[i].values.iter().map(|&v| v as u64).sum())
                .unwrap_or(0)
        };
        RunStats {
            frames: self.frames as u64,
            mean_computation_s: mean("computation"),
            mean_total_s: mean("total"),
            tracked_frames: count("tracked"),
            integrated_frames: count("integrated"),
        }
    }
}

/// Aggregates over a finished run.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RunStats {
    pub frames: u64,
    pub mean_computation_s: f64,
    pub mean_total_s: f64,
    pub tracked_frames: u64,
    pub integrated_frames: u64,
}
