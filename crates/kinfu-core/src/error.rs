//! Typed error hierarchy for the pipeline.
//!
//! Uses `thiserror` for library-grade errors.  Each variant maps to a stable
//! integer code via [`PipelineError::error_code`]; the CLI uses the code as
//! its process exit status, so telemetry consumers never parse strings.

/// All errors originating from the reconstruction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Input source ─────────────────────────────────────────────────
    #[error("no valid input source: {0}")]
    NoSource(String),

    #[error("scene stream error: {0}")]
    Stream(String),

    // ── Engine ───────────────────────────────────────────────────────
    #[error("engine failure: {0}")]
    Engine(String),

    // ── Output sinks ─────────────────────────────────────────────────
    #[error("report write error: {0}")]
    Report(String),

    #[error("volume dump error: {0}")]
    Dump(String),

    #[error("display error: {0}")]
    Display(String),
}

impl PipelineError {
    /// Stable integer error code for structured telemetry and exit status.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration
    /// - 2xx: input source
    /// - 3xx: engine
    /// - 4xx: output sinks / display
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::NoSource(_) => 200,
            Self::Stream(_) => 201,
            Self::Engine(_) => 300,
            Self::Report(_) => 400,
            Self::Dump(_) => 401,
            Self::Display(_) => 402,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PipelineError>;
