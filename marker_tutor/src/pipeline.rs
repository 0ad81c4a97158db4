// THEORY:
// The `pipeline` module is the top-level, synchronous API of the engine. It
// encapsulates the full stack behind one call per frame:
//
//   Frame -> MarkerDetector (profile from QualityController) -> DetectionCache
//         -> ComponentRegistry::resolve -> TutorialEngine -> Snapshot
//
// `TutorPipeline` owns every stateful part of the core. It has no threads and no
// channels; the processing loop drives it from a single worker, and tests drive it
// directly, frame by frame or with ready-made detections.
//
// Commands are latched, not applied mid-cycle. `restart` only raises a flag; the
// next cycle consumes it, resets the tutorial and the cache, and publishes the
// validation gate with nothing validated, whatever that frame contains.

use crate::config::TutorConfig;
use crate::core_modules::component_resolver::ComponentRegistry;
use crate::core_modules::detection_cache::DetectionCache;
use crate::core_modules::dictionary::MarkerDictionary;
use crate::core_modules::frame::Frame;
use crate::core_modules::marker_detector::MarkerDetector;
use crate::core_modules::observation::DetectionResult;
use crate::core_modules::quality::{QualityController, QualityProfile};
use crate::core_modules::tutorial::{StepReport, TutorialEngine, TutorialState};
use crate::error::ConfigError;
use std::sync::Arc;
use tracing::debug;

/// Everything the presentation side needs about one processed cycle. Read-only.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Number of cycles processed so far, starting at 1.
    pub cycle: u64,
    /// The effective detection, after cache substitution.
    pub detection: DetectionResult,
    pub tutorial: TutorialState,
    pub report: StepReport,
    /// Quality level that will be used for the next frame.
    pub quality_level: u8,
    /// True while a manual quality override is active.
    pub manual_quality: bool,
    /// Frozen component table, for turning ids into names.
    pub components: Arc<ComponentRegistry>,
}

impl Snapshot {
    /// Display names of the components visible this cycle.
    pub fn validated_names(&self) -> Vec<&str> {
        self.components.names(&self.tutorial.validated_components)
    }

    /// Display names of the components the current step still waits for.
    pub fn missing_names(&self) -> Vec<&str> {
        self.components.names(&self.report.missing)
    }
}

/// The main, top-level struct for the tutorial engine.
pub struct TutorPipeline {
    detector: MarkerDetector,
    quality: QualityController,
    cache: DetectionCache,
    registry: Arc<ComponentRegistry>,
    tutorial: TutorialEngine,
    cycle: u64,
    restart_pending: bool,
}

impl TutorPipeline {
    /// Validates and freezes a configuration. The core refuses to start on any
    /// inconsistency.
    pub fn new(config: TutorConfig) -> Result<Self, ConfigError> {
        let registry = ComponentRegistry::new(&config.components)?;
        let tutorial = TutorialEngine::new(&config.validation, &config.steps, &registry)?;
        let dictionary = MarkerDictionary::new(&config.dictionary)?;
        let quality = QualityController::new(config.quality.levels, config.quality.controller)?;
        Ok(Self {
            detector: MarkerDetector::new(dictionary),
            quality,
            cache: DetectionCache::new(config.cache),
            registry: Arc::new(registry),
            tutorial,
            cycle: 0,
            restart_pending: false,
        })
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn profile(&self) -> &QualityProfile {
        self.quality.profile()
    }

    pub fn tutorial_state(&self) -> &TutorialState {
        self.tutorial.state()
    }

    /// Runs one full cycle on a frame.
    pub fn process_frame(&mut self, frame: &Frame) -> Snapshot {
        let detection = self.detector.detect(frame, self.quality.profile());
        self.process_detection(detection)
    }

    /// Runs the post-detection half of a cycle: quality feedback, cache,
    /// resolver, tutorial.
    pub fn process_detection(&mut self, detection: DetectionResult) -> Snapshot {
        self.cycle += 1;
        self.quality.record(detection.frame_time);

        if self.restart_pending {
            self.restart_pending = false;
            self.tutorial.restart();
            self.cache.clear();
            let report = self.tutorial.report(None);
            let blank = DetectionResult::empty(detection.frame_id, detection.timestamp);
            return self.snapshot(blank, report);
        }

        let effective = self.cache.apply(detection);
        if effective.is_empty() {
            debug!(frame_id = effective.frame_id, "no markers this cycle");
        }
        let validated = self.registry.resolve(&effective);
        let report = self.tutorial.update(validated);
        self.snapshot(effective, report)
    }

    /// Requests a restart at the next cycle boundary.
    pub fn restart(&mut self) {
        self.restart_pending = true;
    }

    /// Pins the quality level. Returns the level in effect after clamping.
    pub fn set_quality_level(&mut self, level: u8) -> u8 {
        self.quality.set_manual_level(level)
    }

    pub fn clear_quality_override(&mut self) {
        self.quality.clear_manual();
    }

    fn snapshot(&self, detection: DetectionResult, report: StepReport) -> Snapshot {
        Snapshot {
            cycle: self.cycle,
            detection,
            tutorial: self.tutorial.state().clone(),
            report,
            quality_level: self.quality.level(),
            manual_quality: self.quality.is_manual(),
            components: Arc::clone(&self.registry),
        }
    }
}
