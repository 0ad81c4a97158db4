// THEORY:
// Failures in the core fall into three families, and only two of them are ever
// represented as `Err` values:
// 1.  **Transient absence** (a frame that did not decode, a marker that is not in
//     view this cycle) is normal input. It shows up as empty results and empty
//     sets, never as an error type.
// 2.  **Configuration errors** are fatal at startup. `TutorPipeline::new` refuses
//     to build a core from an inconsistent configuration.
// 3.  **Resource failures** (the frame source is gone for good) stop the
//     processing loop and are handed back to whoever spawned it.

use thiserror::Error;

/// Raised while validating and freezing a `TutorConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("marker id {marker_id} is bound to both '{first}' and '{second}'")]
    DuplicateMarkerId {
        marker_id: u32,
        first: String,
        second: String,
    },
    #[error("component key '{0}' is declared more than once")]
    DuplicateComponentKey(String),
    #[error("no components are configured")]
    NoComponents,
    #[error("step {step} ('{title}') requires unknown component '{key}'")]
    UnknownComponent {
        step: usize,
        title: String,
        key: String,
    },
    #[error("step {step} ('{title}') uses the reserved phase 'complete'")]
    ReservedPhase { step: usize, title: String },
    #[error("the tutorial has no assembly steps")]
    EmptyStepSequence,
    #[error("the quality level table is empty")]
    EmptyLevelTable,
    #[error("quality level {level} is invalid: {reason}")]
    InvalidLevel { level: usize, reason: String },
    #[error("quality level bounds [{min}, {max}] with initial level {initial} do not fit a table of {len} levels")]
    InvalidLevelBounds {
        min: u8,
        max: u8,
        initial: u8,
        len: usize,
    },
    #[error("invalid controller setting: {0}")]
    InvalidController(String),
    #[error("invalid marker dictionary: {0}")]
    InvalidDictionary(String),
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Raised by a `FrameSource` implementation.
#[derive(Error, Debug)]
pub enum FrameSourceError {
    /// The source will never produce another frame.
    #[error("frame source disconnected: {0}")]
    Disconnected(String),
    /// A single frame could not be decoded. The loop treats this as "no frame".
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Terminal conditions of the core.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(#[from] FrameSourceError),
    #[error("processing worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),
}
