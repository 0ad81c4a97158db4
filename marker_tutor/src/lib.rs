// THEORY:
// This file is the main entry point for the `marker_tutor` library crate. It defines
// the public API exposed to external collaborators (a camera front end, a UI, the
// `tutor_tester` binary).
//
// Two levels of API are offered:
// 1.  `TutorPipeline`: the synchronous core. One call per frame returns a
//     `Snapshot` with the effective detection, the tutorial state and the step
//     report. Useful for tests and for callers with their own scheduling.
// 2.  `processing_loop::spawn`: the same core on a dedicated tokio task, paced at
//     the target frame rate, publishing snapshots through a latest-wins slot and
//     taking `Command`s from the UI.
//
// All internal modules (`core_modules`) stay available for inspection, but the
// re-exports below are the intended surface.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod processing_loop;

pub use config::TutorConfig;
pub use core_modules::component_resolver::{ComponentId, ComponentInfo, ComponentRegistry};
pub use core_modules::dictionary::MarkerDictionary;
pub use core_modules::frame::Frame;
pub use core_modules::observation::{DetectionResult, MarkerId, MarkerObservation};
pub use core_modules::quality::QualityProfile;
pub use core_modules::tutorial::{Progress, StepReport, TutorialPhase, TutorialState};
pub use error::{ConfigError, FrameSourceError, PipelineError};
pub use pipeline::{Snapshot, TutorPipeline};
pub use processing_loop::{Command, FrameSource, LoopExit, LoopHandle, LoopSettings};
