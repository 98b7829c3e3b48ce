//! The frame driver — sequences, times, and records the reconstruction
//! stages.
//!
//! # Stage order
//!
//! One `advance` call acquires at most one frame and pushes it through the
//! fixed stage sequence: acquisition → preprocessing → tracking →
//! integration → raycasting, then (independently) the three renders.  Stage
//! execution and rendering are decoupled so a caller can repaint the last
//! valid frame without consuming input, and headless runs can skip
//! rendering entirely.
//!
//! # Timing
//!
//! Every stage boundary is stamped through the [`BarrierClock`], which
//! drains the device first — timings reflect completion, not dispatch.
//! Within a call the seven stamps are totally ordered, and the next call's
//! `t0` is never earlier than this call's `t6`.
//!
//! # Reset
//!
//! A reset re-bases the logical frame counter to zero at the next processed
//! frame without touching reconstruction state; restarting the
//! reconstruction itself is the engine's business, not the driver's.

use std::io;

use tracing::debug;

use kinfu_core::clock::{BarrierClock, DeviceSync};
use kinfu_core::config::ReconstructionConfig;
use kinfu_core::engine::ReconstructionEngine;
use kinfu_core::source::DepthSource;
use kinfu_core::types::{CameraIntrinsics, FrameBuffers, Resolution, Vec3};

use crate::power::PowerMonitor;
use crate::telemetry::{FrameRecord, TelemetrySink};

/// Fallback input resolution assumed when no source exists.  Used only for
/// pre-allocation sizing — an absent source never produces a frame.
pub const FALLBACK_INPUT_SIZE: Resolution = Resolution::new(640, 480);

/// State that survives across `advance` calls for the lifetime of a run.
#[derive(Clone, Copy, Debug)]
pub struct PipelineState {
    /// Raw index of the first frame after the most recent reset.
    /// Monotonically non-decreasing; changes only on an explicit reset.
    pub frame_offset: u32,
    /// True until one frame has been processed.
    pub first_frame: bool,
    /// Run start on the barrier clock's timeline, in seconds.
    pub run_start: f64,
}

/// Transient results of one acquired frame.
#[derive(Clone, Copy, Debug)]
struct FrameContext {
    frame: u32,
    pose: Vec3,
    tracked: bool,
    integrated: bool,
    raycasted: bool,
}

/// The per-frame orchestrator.
///
/// Owns the engine, the barrier clock, the telemetry sink, the optional
/// power monitor, and the state that persists between invocations.  Single
/// writer, single thread: `advance` is the only mutating entry point.
pub struct FusionPipeline<E, S> {
    engine: E,
    clock: BarrierClock<S>,
    telemetry: TelemetrySink,
    power: Option<PowerMonitor>,
    state: PipelineState,
}

impl<E: ReconstructionEngine, S: DeviceSync> FusionPipeline<E, S> {
    pub fn new(engine: E, sync: S, power: Option<PowerMonitor>) -> Self {
        let clock = BarrierClock::new(sync);
        let run_start = clock.now();
        Self {
            engine,
            clock,
            telemetry: TelemetrySink::new(),
            power,
            state: PipelineState {
                frame_offset: 0,
                first_frame: true,
                run_start,
            },
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn telemetry(&self) -> &TelemetrySink {
        &self.telemetry
    }

    pub fn power(&self) -> Option<&PowerMonitor> {
        self.power.as_ref()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Advance the pipeline by at most one frame.
    ///
    /// `process_frame` gates acquisition and the reconstruction stages;
    /// `render_images` gates the render kernels; `reset` re-bases the
    /// logical frame counter before anything else.  Returns `true` once the
    /// input stream is exhausted (or when processing is requested with no
    /// source at all) — stream exhaustion is normal termination, not an
    /// error.
    pub fn advance(
        &mut self,
        source: Option<&mut dyn DepthSource>,
        buffers: &mut FrameBuffers,
        config: &ReconstructionConfig,
        process_frame: bool,
        render_images: bool,
        reset: bool,
    ) -> bool {
        let input_size = source
            .as_deref()
            .map(|s| s.input_size())
            .unwrap_or(FALLBACK_INPUT_SIZE);
        let native_camera = match config.camera_override {
            Some(k) => k,
            None => source
                .as_deref()
                .map(|s| s.intrinsics())
                .unwrap_or(CameraIntrinsics::ZERO),
        };
        let camera = native_camera.scaled_down(config.compute_size_ratio);

        if reset {
            if let Some(src) = source.as_deref() {
                self.state.frame_offset = src.frame_number();
                debug!(
                    frame_offset = self.state.frame_offset,
                    "logical frame counter re-based"
                );
            }
        }

        let mut finished = false;
        let mut stamps = [0.0f64; 7];
        let mut ctx: Option<FrameContext> = None;

        stamps[0] = self.clock.now();

        if process_frame {
            match source {
                Some(src) => {
                    let raw = src.frame_number();
                    if src.read_next(&mut buffers.input_rgb, &mut buffers.input_depth) {
                        debug_assert!(
                            raw >= self.state.frame_offset,
                            "frame offset {} ahead of raw index {raw}",
                            self.state.frame_offset,
                        );
                        let frame = raw - self.state.frame_offset;

                        if !self.state.first_frame {
                            if let Some(power) = self.power.as_mut() {
                                power.start();
                            }
                        }
                        let pose = self.engine.position();
                        stamps[1] = self.clock.now();

                        self.engine.preprocess(&buffers.input_depth, input_size);
                        stamps[2] = self.clock.now();

                        let tracked = self.engine.track(
                            camera,
                            config.icp_threshold,
                            config.tracking_rate,
                            frame,
                        );
                        stamps[3] = self.clock.now();

                        let integrated = self.engine.integrate(
                            camera,
                            config.integration_rate,
                            config.mu,
                            frame,
                        );
                        stamps[4] = self.clock.now();

                        let raycasted = self.engine.raycast(camera, config.mu, frame);
                        stamps[5] = self.clock.now();

                        ctx = Some(FrameContext {
                            frame,
                            pose,
                            tracked,
                            integrated,
                            raycasted,
                        });
                    } else {
                        finished = true;
                    }
                }
                // No source: acquisition can never succeed.
                None => finished = true,
            }
        }

        if render_images {
            let size = self.engine.computation_resolution();
            self.engine.render_depth(&mut buffers.depth_render, size);
            self.engine.render_track(&mut buffers.track_render, size);
            let frame = ctx.map(|c| c.frame).unwrap_or(0);
            self.engine.render_volume(
                &mut buffers.volume_render,
                size,
                frame,
                config.rendering_rate,
                camera,
                0.75 * config.mu,
            );
            stamps[6] = self.clock.now();
        } else {
            // Keep the stamp vector totally ordered when rendering is
            // skipped.
            stamps[6] = stamps[5];
        }

        if let Some(ctx) = ctx {
            if !self.state.first_frame {
                if let Some(power) = self.power.as_mut() {
                    power.sample();
                }
            }
            self.telemetry.record(&FrameRecord {
                frame: ctx.frame,
                stamps,
                pose: ctx.pose,
                tracked: ctx.tracked,
                integrated: ctx.integrated,
            });
            if config.no_gui && config.log_file.is_none() {
                let stdout = io::stdout();
                let _ = self.telemetry.print_last(&mut stdout.lock());
            }
            debug!(
                frame = ctx.frame,
                tracked = ctx.tracked,
                integrated = ctx.integrated,
                raycasted = ctx.raycasted,
                "frame advanced"
            );
            self.state.first_frame = false;
        }

        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinfu_core::clock::HostSync;
    use kinfu_core::engine::StubEngine;
    use kinfu_core::types::Rgb8;
    use std::path::{Path, PathBuf};

    const SIZE: Resolution = Resolution::new(16, 12);

    // ── Test doubles ─────────────────────────────────────────────────

    struct TestSource {
        total: u32,
        next: u32,
        reads: u32,
    }

    impl TestSource {
        fn with_frames(total: u32) -> Self {
            Self {
                total,
                next: 0,
                reads: 0,
            }
        }
    }

    impl DepthSource for TestSource {
        fn input_size(&self) -> Resolution {
            SIZE
        }

        fn intrinsics(&self) -> CameraIntrinsics {
            CameraIntrinsics::new(520.0, 520.0, 8.0, 6.0)
        }

        fn frame_number(&self) -> u32 {
            self.next
        }

        fn read_next(&mut self, _rgb: &mut [Rgb8], depth: &mut [u16]) -> bool {
            self.reads += 1;
            if self.next >= self.total {
                return false;
            }
            let n = SIZE.pixels();
            for d in depth[..n].iter_mut() {
                *d = 1000 + self.next as u16;
            }
            self.next += 1;
            true
        }

        fn camera_active(&self) -> bool {
            self.next < self.total
        }
    }

    /// Engine double that records stage-call order and returns scripted
    /// stage results.
    struct ScriptedEngine {
        calls: Vec<&'static str>,
        track_ok: bool,
        integrate_ok: bool,
        last_volume_frame: Option<u32>,
        last_camera: Option<CameraIntrinsics>,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                track_ok: true,
                integrate_ok: true,
                last_volume_frame: None,
                last_camera: None,
            }
        }
    }

    impl ReconstructionEngine for ScriptedEngine {
        fn position(&self) -> Vec3 {
            Vec3::new(1.0, 1.0, 0.0)
        }

        fn preprocess(&mut self, _depth: &[u16], _input_size: Resolution) {
            self.calls.push("preprocess");
        }

        fn track(&mut self, camera: CameraIntrinsics, _t: f32, _rate: u32, _frame: u32) -> bool {
            self.calls.push("track");
            self.last_camera = Some(camera);
            self.track_ok
        }

        fn integrate(&mut self, _c: CameraIntrinsics, _rate: u32, _mu: f32, _frame: u32) -> bool {
            self.calls.push("integrate");
            self.integrate_ok
        }

        fn raycast(&mut self, _c: CameraIntrinsics, _mu: f32, _frame: u32) -> bool {
            self.calls.push("raycast");
            true
        }

        fn render_depth(&mut self, _out: &mut [Rgb8], _size: Resolution) {
            self.calls.push("render_depth");
        }

        fn render_track(&mut self, _out: &mut [Rgb8], _size: Resolution) {
            self.calls.push("render_track");
        }

        fn render_volume(
            &mut self,
            _out: &mut [Rgb8],
            _size: Resolution,
            frame: u32,
            _rate: u32,
            _camera: CameraIntrinsics,
            _large_step: f32,
        ) {
            self.calls.push("render_volume");
            self.last_volume_frame = Some(frame);
        }

        fn computation_resolution(&self) -> Resolution {
            SIZE
        }

        fn dump_volume(&mut self, _path: &Path) -> kinfu_core::error::Result<()> {
            Ok(())
        }
    }

    fn stub_engine() -> StubEngine {
        StubEngine::new(SIZE, [8, 8, 8], Vec3::new(2.0, 2.0, 2.0), Vec3::new(1.0, 1.0, 0.0), &[10, 5, 4])
    }

    fn config() -> ReconstructionConfig {
        ReconstructionConfig::default()
    }

    fn series_values<'a>(sink: &'a TelemetrySink, name: &str) -> &'a [f64] {
        sink.series()
            .iter()
            .find(|s| s.name() == name)
            .expect("series")
            .values()
    }

    fn fake_rail() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "kinfu_drv_rail_{}_{}",
            std::process::id(),
            nanos
        ));
        std::fs::write(&path, "2500000").expect("rail");
        path
    }

    // ── Tests ────────────────────────────────────────────────────────

    #[test]
    fn ten_frame_stream_finishes_on_eleventh_call() {
        let mut source = TestSource::with_frames(10);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(stub_engine(), HostSync, None);
        let cfg = config();

        for _ in 0..10 {
            let finished =
                pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);
            assert!(!finished);
        }
        let finished = pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);
        assert!(finished);

        assert_eq!(pipeline.telemetry().frames(), 10);
        let frames = series_values(pipeline.telemetry(), "frame");
        let expected: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(frames, expected.as_slice());
    }

    #[test]
    fn stamps_are_ordered_within_each_frame() {
        let mut source = TestSource::with_frames(3);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(stub_engine(), HostSync, None);
        let cfg = config();

        for _ in 0..3 {
            pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, true, false);
        }

        for name in [
            "acquisition",
            "preprocessing",
            "tracking",
            "integration",
            "raycasting",
            "rendering",
            "computation",
            "total",
        ] {
            for &v in series_values(pipeline.telemetry(), name) {
                assert!(v >= 0.0, "{name} went negative: {v}");
            }
        }
        // total spans everything computation spans.
        let totals = series_values(pipeline.telemetry(), "total");
        let computations = series_values(pipeline.telemetry(), "computation");
        for (t, c) in totals.iter().zip(computations) {
            assert!(t >= c);
        }
    }

    #[test]
    fn reset_rebases_logical_frame_counter() {
        let mut source = TestSource::with_frames(8);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(stub_engine(), HostSync, None);
        let cfg = config();

        for _ in 0..3 {
            pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);
        }
        // Reset at raw index 3: that frame becomes logical 0.
        pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, true);
        pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);

        let frames = series_values(pipeline.telemetry(), "frame");
        assert_eq!(frames, &[0.0, 1.0, 2.0, 0.0, 1.0]);
        assert_eq!(pipeline.state().frame_offset, 3);
    }

    #[test]
    fn power_session_skips_the_first_frame() {
        let rail = fake_rail();
        let mut source = TestSource::with_frames(4);
        let mut buffers = FrameBuffers::new(SIZE);
        let monitor = PowerMonitor::with_rail(rail.clone());
        let mut pipeline = FusionPipeline::new(stub_engine(), HostSync, Some(monitor));
        let cfg = config();

        for _ in 0..4 {
            pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);
        }
        assert_eq!(pipeline.power().expect("monitor").samples(), 3);
        std::fs::remove_file(rail).ok();
    }

    #[test]
    fn render_only_never_acquires_or_records() {
        let mut source = TestSource::with_frames(5);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(ScriptedEngine::new(), HostSync, None);
        let cfg = config();

        let finished = pipeline.advance(Some(&mut source), &mut buffers, &cfg, false, true, false);

        assert!(!finished);
        assert_eq!(source.reads, 0);
        assert_eq!(pipeline.telemetry().frames(), 0);
        assert_eq!(pipeline.engine().last_volume_frame, Some(0));
        assert_eq!(
            pipeline.engine().calls,
            vec!["render_depth", "render_track", "render_volume"]
        );
        assert!(pipeline.state().first_frame);
    }

    #[test]
    fn absent_source_finishes_immediately() {
        let mut buffers = FrameBuffers::new(FALLBACK_INPUT_SIZE);
        let mut pipeline = FusionPipeline::new(ScriptedEngine::new(), HostSync, None);
        let cfg = config();

        let finished = pipeline.advance(None, &mut buffers, &cfg, true, false, false);

        assert!(finished);
        assert_eq!(pipeline.telemetry().frames(), 0);
        assert!(pipeline.engine().calls.is_empty());
    }

    #[test]
    fn exhausted_stream_emits_no_group() {
        let mut source = TestSource::with_frames(1);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(stub_engine(), HostSync, None);
        let cfg = config();

        assert!(!pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, true, false));
        assert!(pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, true, false));
        assert_eq!(pipeline.telemetry().frames(), 1);
    }

    #[test]
    fn stage_failure_is_recorded_not_fatal() {
        let mut engine = ScriptedEngine::new();
        engine.track_ok = false;
        engine.integrate_ok = false;

        let mut source = TestSource::with_frames(2);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(engine, HostSync, None);
        let cfg = config();

        let finished = pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);

        assert!(!finished);
        assert_eq!(series_values(pipeline.telemetry(), "tracked"), &[0.0]);
        assert_eq!(series_values(pipeline.telemetry(), "integrated"), &[0.0]);
    }

    #[test]
    fn stage_call_order_is_fixed() {
        let mut source = TestSource::with_frames(1);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(ScriptedEngine::new(), HostSync, None);
        let cfg = config();

        pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, true, false);

        assert_eq!(
            pipeline.engine().calls,
            vec![
                "preprocess",
                "track",
                "integrate",
                "raycast",
                "render_depth",
                "render_track",
                "render_volume"
            ]
        );
    }

    #[test]
    fn headless_runs_pin_rendering_time_to_zero() {
        let mut source = TestSource::with_frames(2);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(stub_engine(), HostSync, None);
        let cfg = config();

        pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);

        assert_eq!(series_values(pipeline.telemetry(), "rendering"), &[0.0]);
    }

    #[test]
    fn camera_override_reaches_the_engine_scaled() {
        let mut source = TestSource::with_frames(1);
        let mut buffers = FrameBuffers::new(SIZE);
        let mut pipeline = FusionPipeline::new(ScriptedEngine::new(), HostSync, None);
        let cfg = ReconstructionConfig {
            compute_size_ratio: 2,
            camera_override: Some(CameraIntrinsics::new(600.0, 600.0, 8.0, 6.0)),
            ..ReconstructionConfig::default()
        };

        pipeline.advance(Some(&mut source), &mut buffers, &cfg, true, false, false);

        assert_eq!(
            pipeline.engine().last_camera,
            Some(CameraIntrinsics::new(300.0, 300.0, 4.0, 3.0))
        );
    }
}
