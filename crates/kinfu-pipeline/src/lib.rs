//! Frame-by-frame orchestration for the kinfu reconstruction pipeline.
//!
//! The driver sequences the reconstruction stages, times them against a
//! device-synchronised clock, and feeds the telemetry sink and the optional
//! power monitor.  Rendering is decoupled from processing so interactive
//! callers can repaint the last valid frame without consuming input, and
//! headless runs can skip rendering entirely.

pub mod driver;
pub mod power;
pub mod sink;
pub mod telemetry;

pub use driver::{FusionPipeline, PipelineState, FALLBACK_INPUT_SIZE};
pub use power::PowerMonitor;
pub use sink::{FrameSink, HeadlessSink};
pub use telemetry::{FrameRecord, RunStats, SampleKind, TelemetrySink};

#[cfg(feature = "gui")]
pub use sink::WindowSink;
