//! kinfu CLI entrypoint — the top-level controller.
//!
//! ```bash
//! kinfu --input scene.raw --no-gui --log-file stats.log
//! kinfu --input scene.raw --no-gui --dump-volume scene.vol --json-summary
//! kinfu --input scene.raw --compute-size-ratio 2 --fps 30
//! ```
//!
//! Validates that a usable, actively streaming input source exists before
//! any processing, allocates the fixed frame buffers once, constructs the
//! engine, selects interactive or headless execution from configuration,
//! loops the frame driver to exhaustion, then flushes the volume dump, the
//! telemetry log, and the power report.

use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{info, warn};

use kinfu_core::clock::HostSync;
use kinfu_core::config::ReconstructionConfig;
use kinfu_core::engine::{ReconstructionEngine, StubEngine};
use kinfu_core::error::{PipelineError, Result};
use kinfu_core::source::{DepthSource, RawSceneSource};
use kinfu_core::types::{CameraIntrinsics, FrameBuffers, Resolution, Vec3};
use kinfu_pipeline::driver::{FusionPipeline, FALLBACK_INPUT_SIZE};
use kinfu_pipeline::power::PowerMonitor;
use kinfu_pipeline::sink::{FrameSink, HeadlessSink};

#[derive(Parser, Debug)]
#[command(
    name = "kinfu",
    version,
    about = "Dense depth-camera 3D reconstruction pipeline driver",
    after_help = "Examples:\n  kinfu --input scene.raw --no-gui --log-file stats.log\n  kinfu --input scene.raw --no-gui --dump-volume scene.vol --json-summary\n  kinfu --input scene.raw --compute-size-ratio 2 --fps 30"
)]
struct Cli {
    /// Input scene stream (.raw depth+color recording).
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Telemetry log destination.  Headless runs without one stream
    /// per-frame rows to stdout instead.
    #[arg(short = 'o', long = "log-file")]
    log_file: Option<PathBuf>,

    /// Reconstructed-volume dump destination.
    #[arg(short = 'd', long = "dump-volume")]
    dump_volume: Option<PathBuf>,

    /// Integer downscale factor between input and computation resolution.
    #[arg(short = 'c', long = "compute-size-ratio", default_value_t = 1)]
    compute_size_ratio: u32,

    /// Volumetric integration cadence in frames.
    #[arg(short = 'r', long = "integration-rate", default_value_t = 2)]
    integration_rate: u32,

    /// ICP tracking cadence in frames.
    #[arg(long = "tracking-rate", default_value_t = 1)]
    tracking_rate: u32,

    /// Volume raycast render cadence in frames.
    #[arg(short = 'z', long = "rendering-rate", default_value_t = 4)]
    rendering_rate: u32,

    /// Physical volume extent in metres, "x,y,z".
    #[arg(short = 's', long = "volume-size", default_value = "2,2,2", value_parser = parse_vec3)]
    volume_size: Vec3,

    /// Voxel grid resolution, "x,y,z".
    #[arg(short = 'v', long = "volume-resolution", default_value = "256,256,256", value_parser = parse_dims)]
    volume_resolution: [u32; 3],

    /// Initial camera position as a fraction of the volume, "x,y,z".
    #[arg(short = 'p', long = "init-pose-factor", default_value = "0.5,0.5,0", value_parser = parse_vec3)]
    init_pose_factor: Vec3,

    /// ICP iterations per pyramid level, coarse to fine.
    #[arg(short = 'y', long = "pyramid", default_value = "10,5,4", value_parser = parse_pyramid)]
    pyramid: PyramidArg,

    /// TSDF truncation distance in metres.
    #[arg(short = 'm', long = "mu", default_value_t = 0.1)]
    mu: f32,

    /// ICP convergence threshold.
    #[arg(short = 't', long = "icp-threshold", default_value_t = 1e-5)]
    icp_threshold: f32,

    /// Camera intrinsics override, "fx,fy,cx,cy".  Replaces the source's
    /// calibration.
    #[arg(short = 'k', long = "camera", value_parser = parse_camera)]
    camera: Option<CameraIntrinsics>,

    /// Run without the interactive display.
    #[arg(long = "no-gui", default_value_t = false)]
    no_gui: bool,

    /// Target source frame rate, frames per second (0 = free-run).
    #[arg(short = 'f', long = "fps", default_value_t = 0)]
    fps: u32,

    /// Render the volume at full input resolution (unimplemented).
    #[arg(long = "render-volume-fullsize", default_value_t = false)]
    render_volume_fullsize: bool,

    /// Emit a JSON run summary to stdout after the loop.
    #[arg(long = "json-summary", default_value_t = false)]
    json_summary: bool,
}

#[derive(Clone, Debug)]
struct PyramidArg(Vec<u32>);

impl Cli {
    fn to_config(&self) -> Result<ReconstructionConfig> {
        if self.render_volume_fullsize {
            // Accepted for compatibility, but no backend implements it.
            warn!("--render-volume-fullsize is not implemented; rendering at computation resolution");
        }
        let config = ReconstructionConfig {
            compute_size_ratio: self.compute_size_ratio,
            integration_rate: self.integration_rate,
            tracking_rate: self.tracking_rate,
            rendering_rate: self.rendering_rate,
            volume_size: self.volume_size,
            volume_resolution: self.volume_resolution,
            initial_pos_factor: self.init_pose_factor,
            pyramid: self.pyramid.0.clone(),
            mu: self.mu,
            icp_threshold: self.icp_threshold,
            camera_override: self.camera,
            no_gui: self.no_gui,
            log_file: self.log_file.clone(),
            dump_volume_file: self.dump_volume.clone(),
            render_volume_fullsize: false,
            fps: self.fps,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        tracing::error!(error = %err, code = err.error_code(), "run failed");
        std::process::exit(err.error_code() as i32);
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.to_config()?;

    let mut source = match &cli.input {
        Some(path) => Some(RawSceneSource::open(path, config.fps)?),
        None => None,
    };

    // A usable, actively streaming source must exist before the engine's
    // processing path is entered.
    let input_size = match source.as_ref() {
        Some(src) if src.camera_active() => src.input_size(),
        Some(_) => {
            return Err(PipelineError::NoSource("input stream is not active".into()));
        }
        None => {
            return Err(PipelineError::NoSource(
                "no input scene specified (--input)".into(),
            ));
        }
    };

    let mut buffers = FrameBuffers::new(FALLBACK_INPUT_SIZE);
    if !buffers.fits(input_size) {
        return Err(PipelineError::Config(format!(
            "input {}x{} exceeds the supported maximum {}x{}",
            input_size.width,
            input_size.height,
            FALLBACK_INPUT_SIZE.width,
            FALLBACK_INPUT_SIZE.height
        )));
    }

    let computation_size = input_size.scaled_down(config.compute_size_ratio);
    let engine = StubEngine::new(
        computation_size,
        config.volume_resolution,
        config.volume_size,
        config.initial_pose(),
        &config.pyramid,
    );
    let power = PowerMonitor::probe();
    let mut pipeline = FusionPipeline::new(engine, HostSync, power);
    let mut sink = build_sink(&config, input_size);

    info!(
        input = %cli.input.as_deref().unwrap_or(Path::new("-")).display(),
        width = input_size.width,
        height = input_size.height,
        compute_width = computation_size.width,
        compute_height = computation_size.height,
        gui = !config.no_gui,
        "reconstruction starting"
    );

    loop {
        let finished = pipeline.advance(
            source.as_mut().map(|s| s as &mut dyn DepthSource),
            &mut buffers,
            &config,
            true,
            sink.wants_render(),
            false,
        );
        if finished {
            break;
        }
        if !sink.present(&buffers, pipeline.engine().computation_resolution(), input_size)? {
            info!("display closed; stopping");
            break;
        }
    }

    // Post-run flushes: volume first, then telemetry, then power.
    if let Some(path) = &config.dump_volume_file {
        pipeline.engine_mut().dump_volume(path)?;
        info!(path = %path.display(), "volume dumped");
    }
    if let Some(path) = &config.log_file {
        let file = File::create(path)
            .map_err(|e| PipelineError::Report(format!("{}: {e}", path.display())))?;
        let mut out = BufWriter::new(file);
        pipeline
            .telemetry()
            .write_history(&mut out)
            .and_then(|()| out.flush())
            .map_err(|e| PipelineError::Report(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "telemetry log written");
    }
    if let Some(power) = pipeline.power() {
        if power.samples() > 0 {
            power.write_report(Path::new("power.rpt"))?;
            info!("power report written to power.rpt");
        }
    }

    let stats = pipeline.telemetry().summary();
    if cli.json_summary {
        let line = serde_json::to_string(&stats)
            .map_err(|e| PipelineError::Report(e.to_string()))?;
        println!("{line}");
    }
    info!(
        frames = stats.frames,
        tracked = stats.tracked_frames,
        integrated = stats.integrated_frames,
        mean_total_ms = format!("{:.3}", stats.mean_total_s * 1000.0),
        "reconstruction finished"
    );

    Ok(())
}

/// Resolve the frame-sink strategy once at startup.  The window backend is
/// an optional build feature; a display request without it falls back to
/// headless with a warning.
fn build_sink(config: &ReconstructionConfig, input_size: Resolution) -> Box<dyn FrameSink> {
    if config.no_gui {
        return Box::new(HeadlessSink);
    }
    #[cfg(feature = "gui")]
    {
        match kinfu_pipeline::sink::WindowSink::new(input_size) {
            Ok(sink) => return Box::new(sink),
            Err(e) => warn!(error = %e, "display unavailable; running headless"),
        }
    }
    #[cfg(not(feature = "gui"))]
    {
        let _ = input_size;
        warn!("built without the `gui` feature; running headless");
    }
    Box::new(HeadlessSink)
}

// ─── Argument parsers ────────────────────────────────────────────────────────

fn parse_components(s: &str, expected: usize) -> std::result::Result<Vec<f32>, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != expected {
        return Err(format!("expected {expected} comma-separated values, got '{s}'"));
    }
    parts
        .iter()
        .map(|p| {
            p.trim()
                .parse::<f32>()
                .map_err(|e| format!("'{}': {e}", p.trim()))
        })
        .collect()
}

fn parse_vec3(s: &str) -> std::result::Result<Vec3, String> {
    let v = parse_components(s, 3)?;
    Ok(Vec3::new(v[0], v[1], v[2]))
}

fn parse_camera(s: &str) -> std::result::Result<CameraIntrinsics, String> {
    let v = parse_components(s, 4)?;
    Ok(CameraIntrinsics::new(v[0], v[1], v[2], v[3]))
}

fn parse_dims(s: &str) -> std::result::Result<[u32; 3], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z voxel counts, got '{s}'"));
    }
    let mut dims = [0u32; 3];
    for (slot, part) in dims.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("'{}': {e}", part.trim()))?;
    }
    Ok(dims)
}

fn parse_pyramid(s: &str) -> std::result::Result<PyramidArg, String> {
    let levels: std::result::Result<Vec<u32>, String> = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<u32>()
                .map_err(|e| format!("'{}': {e}", p.trim()))
        })
        .collect();
    let levels = levels?;
    if levels.is_empty() {
        return Err("pyramid needs at least one level".into());
    }
    Ok(PyramidArg(levels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_parser_accepts_spaces() {
        let v = parse_vec3("1.0, 2.5,0").expect("parse");
        assert_eq!(v, Vec3::new(1.0, 2.5, 0.0));
        assert!(parse_vec3("1,2").is_err());
    }

    #[test]
    fn camera_parser_needs_four_components() {
        assert!(parse_camera("520,520,320,240").is_ok());
        assert!(parse_camera("520,520,320").is_err());
    }

    #[test]
    fn dims_parser_rejects_junk() {
        assert_eq!(parse_dims("8, 8,8").expect("parse"), [8, 8, 8]);
        assert!(parse_dims("8,8,banana").is_err());
    }

    #[test]
    fn pyramid_parser_takes_any_depth() {
        assert_eq!(parse_pyramid("10,5,4").expect("parse").0, vec![10, 5, 4]);
        assert_eq!(parse_pyramid("6").expect("parse").0, vec![6]);
    }

    #[test]
    fn zero_ratio_fails_config_validation() {
        let cli = Cli::parse_from(["kinfu", "--compute-size-ratio", "0"]);
        assert!(cli.to_config().is_err());
    }
}
