#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from marker_tutor for tests
pub use marker_tutor::{
    ComponentId, DetectionResult, Frame, MarkerObservation, Progress, Snapshot, TutorConfig,
    TutorPipeline,
};
