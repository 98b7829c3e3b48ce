//! Core types and capability traits for the kinfu reconstruction pipeline.
//!
//! This crate is the neutral home for everything the frame driver, the
//! controller, and reconstruction backends share: value types, the runtime
//! configuration surface, the typed error hierarchy, the depth-source and
//! engine contracts, and the device-synchronised clock.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod source;
pub mod types;

pub use clock::{BarrierClock, DeviceSync, HostSync};
pub use config::ReconstructionConfig;
pub use engine::{ReconstructionEngine, StubEngine};
pub use error::{PipelineError, Result};
pub use source::{DepthSource, RawSceneSource};
pub use types::{CameraIntrinsics, FrameBuffers, Resolution, Rgb8, Vec3};
