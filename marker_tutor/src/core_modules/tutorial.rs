// THEORY:
// The `TutorialEngine` is the decision layer. It turns "which components are on
// the bench right now" into "where the learner is in the assembly".
//
// Key architectural principles:
// 1.  **Sequential state machine**: states are step indices plus a terminal
//     `Complete`. Each processed cycle evaluates exactly one rule: if the current
//     step's required components are a subset of the visible ones, move to the next
//     index. A step is never skipped, even when a later step is already satisfied.
// 2.  **Validation gate**: step 0 is synthesized from the registry and requires
//     every component at once, held for `hold_cycles` consecutive cycles. The
//     assembly steps only start once the whole kit has been shown.
// 3.  **Single owner**: `TutorialState` is the only mutable state of the tutorial
//     and lives inside the engine. Callers get clones, never references into it.
// 4.  **Report, not callback**: the per-cycle output is a `StepReport` value. The
//     engine knows nothing about how, or whether, it gets displayed.

use crate::core_modules::component_resolver::{ComponentId, ComponentRegistry};
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::info;

/// Category of a tutorial step, used to group steps in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TutorialPhase {
    Validation,
    Preparation,
    PowerSetup,
    Components,
    Connections,
    AnalogInput,
    Verification,
    /// Reached after the last step. Not allowed in configuration.
    Complete,
}

impl TutorialPhase {
    pub fn label(&self) -> &'static str {
        match self {
            TutorialPhase::Validation => "Component check",
            TutorialPhase::Preparation => "Preparation",
            TutorialPhase::PowerSetup => "Power setup",
            TutorialPhase::Components => "Components",
            TutorialPhase::Connections => "Connections",
            TutorialPhase::AnalogInput => "Analog input",
            TutorialPhase::Verification => "Verification",
            TutorialPhase::Complete => "Complete",
        }
    }
}

/// An assembly step as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub instruction: String,
    #[serde(default)]
    pub success_message: String,
    pub phase: TutorialPhase,
    /// Component keys that must be visible together.
    pub required: Vec<String>,
}

/// Texts and timing of the validation gate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationSpec {
    pub title: String,
    pub description: String,
    pub instruction: String,
    pub success_message: String,
    /// Consecutive cycles the full kit must stay visible. 0 behaves like 1.
    pub hold_cycles: u32,
}

impl Default for ValidationSpec {
    fn default() -> Self {
        Self {
            title: "Check your components".to_string(),
            description: "Every part of the kit has to be recognized before assembly starts."
                .to_string(),
            instruction: "Place all components with their markers in front of the camera."
                .to_string(),
            success_message: "All components recognized. Let's start building!".to_string(),
            hold_cycles: 1,
        }
    }
}

/// A frozen step.
#[derive(Debug, Clone, PartialEq)]
pub struct TutorialStep {
    pub index: usize,
    pub title: String,
    pub description: String,
    pub instruction: String,
    pub success_message: String,
    pub phase: TutorialPhase,
    pub required: BTreeSet<ComponentId>,
}

/// Where the learner is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Step(usize),
    Complete,
}

/// The tutorial's only mutable state, handed out as a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct TutorialState {
    pub progress: Progress,
    /// Components resolved in the latest processed cycle.
    pub validated_components: BTreeSet<ComponentId>,
    pub phase: TutorialPhase,
}

impl TutorialState {
    /// Index of the active step, `None` once complete.
    pub fn current_step_index(&self) -> Option<usize> {
        match self.progress {
            Progress::Step(index) => Some(index),
            Progress::Complete => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress == Progress::Complete
    }
}

/// A transition that happened in this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub from: usize,
    pub success_message: String,
}

/// What the UI should show after one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step_index: Option<usize>,
    pub title: String,
    pub instruction: String,
    pub phase: TutorialPhase,
    pub phase_label: &'static str,
    /// Required components of the active step that are visible.
    pub satisfied: BTreeSet<ComponentId>,
    /// Required components of the active step that are not visible.
    pub missing: BTreeSet<ComponentId>,
    pub advanced: Option<Advance>,
    pub complete: bool,
    /// Completed assembly steps over all assembly steps, in [0, 1]. The gate
    /// does not count.
    pub progress: f64,
    /// At the gate: consecutive cycles the full kit has been visible, and the
    /// number needed.
    pub gate_hold: Option<(u32, u32)>,
}

pub struct TutorialEngine {
    steps: Vec<TutorialStep>,
    hold_cycles: u32,
    /// Consecutive cycles the gate has been satisfied.
    gate_streak: u32,
    state: TutorialState,
}

impl TutorialEngine {
    /// Freezes the gate plus the configured assembly steps against a registry.
    pub fn new(
        validation: &ValidationSpec,
        specs: &[StepSpec],
        registry: &ComponentRegistry,
    ) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::EmptyStepSequence);
        }

        let mut steps = Vec::with_capacity(specs.len() + 1);
        steps.push(TutorialStep {
            index: 0,
            title: validation.title.clone(),
            description: validation.description.clone(),
            instruction: validation.instruction.clone(),
            success_message: validation.success_message.clone(),
            phase: TutorialPhase::Validation,
            required: registry.all(),
        });

        for (offset, spec) in specs.iter().enumerate() {
            let index = offset + 1;
            if spec.phase == TutorialPhase::Complete {
                return Err(ConfigError::ReservedPhase {
                    step: index,
                    title: spec.title.clone(),
                });
            }
            let required = spec
                .required
                .iter()
                .map(|key| {
                    registry.by_key(key).ok_or_else(|| ConfigError::UnknownComponent {
                        step: index,
                        title: spec.title.clone(),
                        key: key.clone(),
                    })
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            steps.push(TutorialStep {
                index,
                title: spec.title.clone(),
                description: spec.description.clone(),
                instruction: spec.instruction.clone(),
                success_message: spec.success_message.clone(),
                phase: spec.phase,
                required,
            });
        }

        Ok(Self {
            steps,
            hold_cycles: validation.hold_cycles.max(1),
            gate_streak: 0,
            state: TutorialState {
                progress: Progress::Step(0),
                validated_components: BTreeSet::new(),
                phase: TutorialPhase::Validation,
            },
        })
    }

    pub fn steps(&self) -> &[TutorialStep] {
        &self.steps
    }

    pub fn state(&self) -> &TutorialState {
        &self.state
    }

    /// Evaluates the transition rule once for this cycle's visible components.
    pub fn update(&mut self, validated: BTreeSet<ComponentId>) -> StepReport {
        self.state.validated_components = validated;

        let mut advanced = None;
        if let Progress::Step(index) = self.state.progress {
            let step = &self.steps[index];
            let mut satisfied = step.required.is_subset(&self.state.validated_components);
            if index == 0 {
                self.gate_streak = if satisfied { self.gate_streak + 1 } else { 0 };
                satisfied = self.gate_streak >= self.hold_cycles;
            }
            if satisfied {
                advanced = Some(Advance {
                    from: index,
                    success_message: step.success_message.clone(),
                });
                let next = index + 1;
                if next < self.steps.len() {
                    self.state.progress = Progress::Step(next);
                    self.state.phase = self.steps[next].phase;
                    info!(from = index, to = next, title = %self.steps[next].title, "tutorial step advanced");
                } else {
                    self.state.progress = Progress::Complete;
                    self.state.phase = TutorialPhase::Complete;
                    info!(from = index, "tutorial complete");
                }
            }
        }
        self.report(advanced)
    }

    /// Returns to the validation gate from any state.
    pub fn restart(&mut self) {
        self.state = TutorialState {
            progress: Progress::Step(0),
            validated_components: BTreeSet::new(),
            phase: TutorialPhase::Validation,
        };
        self.gate_streak = 0;
        info!("tutorial restarted");
    }

    /// Describes the current state without evaluating the transition rule.
    pub fn report(&self, advanced: Option<Advance>) -> StepReport {
        let assembly_steps = (self.steps.len() - 1).max(1);
        match self.state.progress {
            Progress::Step(index) => {
                let step = &self.steps[index];
                let satisfied: BTreeSet<ComponentId> = step
                    .required
                    .intersection(&self.state.validated_components)
                    .copied()
                    .collect();
                let missing = step.required.difference(&satisfied).copied().collect();
                StepReport {
                    step_index: Some(index),
                    title: step.title.clone(),
                    instruction: step.instruction.clone(),
                    phase: step.phase,
                    phase_label: step.phase.label(),
                    satisfied,
                    missing,
                    advanced,
                    complete: false,
                    progress: index.saturating_sub(1) as f64 / assembly_steps as f64,
                    gate_hold: (index == 0)
                        .then(|| (self.gate_streak.min(self.hold_cycles), self.hold_cycles)),
                }
            }
            Progress::Complete => StepReport {
                step_index: None,
                title: "Tutorial complete".to_string(),
                instruction: "Restart to build the circuit again.".to_string(),
                phase: TutorialPhase::Complete,
                phase_label: TutorialPhase::Complete.label(),
                satisfied: BTreeSet::new(),
                missing: BTreeSet::new(),
                advanced,
                complete: true,
                progress: 1.0,
                gate_hold: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::component_resolver::ComponentSpec;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn registry() -> ComponentRegistry {
        ComponentRegistry::new(&[
            ComponentSpec::new("arduino", "Arduino Leonardo", "Arduino", 0),
            ComponentSpec::new("breadboard", "Breadboard", "Breadboard", 1),
            ComponentSpec::new("led", "LED", "LED", 2),
            ComponentSpec::new("wires", "Jumper Wires", "Jumper", 5),
        ])
        .expect("valid registry")
    }

    fn step(title: &str, phase: TutorialPhase, required: &[&str]) -> StepSpec {
        StepSpec {
            title: title.to_string(),
            description: String::new(),
            instruction: format!("Do {title}"),
            success_message: format!("{title} done"),
            phase,
            required: required.iter().map(|key| key.to_string()).collect(),
        }
    }

    fn engine() -> TutorialEngine {
        TutorialEngine::new(
            &ValidationSpec::default(),
            &[
                step("prepare", TutorialPhase::Preparation, &["arduino", "breadboard"]),
                step("ground", TutorialPhase::PowerSetup, &["arduino", "breadboard", "wires"]),
                step("led", TutorialPhase::Components, &["breadboard", "led"]),
            ],
            &registry(),
        )
        .expect("valid steps")
    }

    fn ids(raw: &[usize]) -> BTreeSet<ComponentId> {
        raw.iter().copied().map(ComponentId).collect()
    }

    #[test]
    fn gate_requires_every_component() {
        let mut engine = engine();
        let report = engine.update(ids(&[0, 1, 2]));
        assert_eq!(report.step_index, Some(0));
        assert_eq!(report.missing, ids(&[3]));
        assert_eq!(report.phase_label, "Component check");

        let report = engine.update(ids(&[0, 1, 2, 3]));
        assert_eq!(report.step_index, Some(1));
        assert_eq!(report.advanced.map(|a| a.from), Some(0));
        assert_eq!(engine.state().phase, TutorialPhase::Preparation);
    }

    #[test]
    fn gate_hold_needs_consecutive_cycles() {
        let validation = ValidationSpec {
            hold_cycles: 3,
            ..ValidationSpec::default()
        };
        let mut engine = TutorialEngine::new(
            &validation,
            &[step("prepare", TutorialPhase::Preparation, &["arduino"])],
            &registry(),
        )
        .expect("valid steps");
        let all = ids(&[0, 1, 2, 3]);
        engine.update(all.clone());
        engine.update(all.clone());
        engine.update(ids(&[0]));
        engine.update(all.clone());
        engine.update(all.clone());
        assert_eq!(engine.state().current_step_index(), Some(0));
        engine.update(all);
        assert_eq!(engine.state().current_step_index(), Some(1));
    }

    #[test]
    fn gate_reports_hold_progress() {
        let validation = ValidationSpec {
            hold_cycles: 3,
            ..ValidationSpec::default()
        };
        let mut engine = TutorialEngine::new(
            &validation,
            &[step("prepare", TutorialPhase::Preparation, &["arduino"])],
            &registry(),
        )
        .expect("valid steps");
        assert_eq!(engine.report(None).gate_hold, Some((0, 3)));
        let all = ids(&[0, 1, 2, 3]);
        assert_eq!(engine.update(all.clone()).gate_hold, Some((1, 3)));
        assert_eq!(engine.update(all.clone()).gate_hold, Some((2, 3)));
        assert_eq!(engine.update(ids(&[0, 1])).gate_hold, Some((0, 3)));
        engine.update(all.clone());
        engine.update(all.clone());
        let report = engine.update(all);
        assert_eq!(report.step_index, Some(1));
        assert_eq!(report.gate_hold, None);
    }

    #[test]
    fn progress_counts_assembly_steps_only() {
        let mut engine = engine();
        assert_eq!(engine.report(None).progress, 0.0);
        let everything = ids(&[0, 1, 2, 3]);
        // Passing the gate alone completes no assembly step.
        assert_eq!(engine.update(everything.clone()).progress, 0.0);
        assert!((engine.update(everything.clone()).progress - 1.0 / 3.0).abs() < 1e-9);
        assert!((engine.update(everything).progress - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn never_skips_even_when_later_steps_are_satisfied() {
        let mut engine = engine();
        let everything = ids(&[0, 1, 2, 3]);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(engine.update(everything.clone()).step_index);
        }
        assert_eq!(seen, vec![Some(1), Some(2), Some(3), None, None, None]);
        assert!(engine.state().is_complete());
    }

    #[test]
    fn extra_components_do_not_block() {
        let mut engine = engine();
        engine.update(ids(&[0, 1, 2, 3]));
        let report = engine.update(ids(&[0, 1, 2]));
        assert_eq!(report.step_index, Some(2));
        assert_eq!(report.advanced.map(|a| a.success_message), Some("prepare done".to_string()));
    }

    #[test]
    fn completion_reports_full_progress() {
        let mut engine = engine();
        let everything = ids(&[0, 1, 2, 3]);
        for _ in 0..3 {
            engine.update(everything.clone());
        }
        let report = engine.update(everything);
        assert!(report.complete);
        assert_eq!(report.progress, 1.0);
        assert_eq!(report.advanced.map(|a| a.from), Some(3));
        assert_eq!(engine.state().phase, TutorialPhase::Complete);
    }

    #[test]
    fn restart_from_complete_returns_to_gate() {
        let mut engine = engine();
        for _ in 0..4 {
            engine.update(ids(&[0, 1, 2, 3]));
        }
        assert!(engine.state().is_complete());
        engine.restart();
        assert_eq!(engine.state().current_step_index(), Some(0));
        assert!(engine.state().validated_components.is_empty());
        assert_eq!(engine.report(None).progress, 0.0);
    }

    #[test]
    fn configuration_errors() {
        let registry = registry();
        let validation = ValidationSpec::default();
        assert!(matches!(
            TutorialEngine::new(&validation, &[], &registry),
            Err(ConfigError::EmptyStepSequence)
        ));
        assert!(matches!(
            TutorialEngine::new(
                &validation,
                &[step("x", TutorialPhase::Preparation, &["resistor"])],
                &registry
            ),
            Err(ConfigError::UnknownComponent { step: 1, .. })
        ));
        assert!(matches!(
            TutorialEngine::new(&validation, &[step("x", TutorialPhase::Complete, &[])], &registry),
            Err(ConfigError::ReservedPhase { step: 1, .. })
        ));
    }

    #[test]
    fn index_is_monotonic_over_random_input() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut engine = engine();
        let mut last = 0usize;
        let terminal = engine.steps().len();
        for _ in 0..2_000 {
            if rng.random_range(0..100) == 0 {
                engine.restart();
                last = 0;
                continue;
            }
            let visible: BTreeSet<ComponentId> = (0..4)
                .filter(|_| rng.random_bool(0.75))
                .map(ComponentId)
                .collect();
            engine.update(visible);
            let now = engine.state().current_step_index().unwrap_or(terminal);
            assert!(now == last || now == last + 1, "{last} -> {now}");
            last = now;
        }
    }
}
