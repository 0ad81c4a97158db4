// THEORY:
// `TutorConfig` is the whole static configuration of the core: which components
// exist, which marker identifies each, the tutorial text, the quality level table
// and the cache window. It is loaded once, validated once by `TutorPipeline::new`,
// and never touched again.
//
// Sources are layered with the `config` crate: built-in defaults (the Arduino
// LED + potentiometer tutorial), then an optional file, then environment variables
// prefixed with `MARKER_TUTOR_`. Nested keys use `__`, for example
// `MARKER_TUTOR_CACHE__STALENESS_WINDOW=3`.

use crate::core_modules::component_resolver::ComponentSpec;
use crate::core_modules::detection_cache::CacheSettings;
use crate::core_modules::dictionary::DictionarySettings;
use crate::core_modules::quality::{ControllerSettings, QualityProfile, default_levels};
use crate::core_modules::tutorial::{StepSpec, TutorialPhase, ValidationSpec};
use crate::error::ConfigError;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

pub const ENV_PREFIX: &str = "MARKER_TUTOR";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Level table, fastest first.
    pub levels: Vec<QualityProfile>,
    pub controller: ControllerSettings,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            controller: ControllerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    pub components: Vec<ComponentSpec>,
    pub validation: ValidationSpec,
    pub steps: Vec<StepSpec>,
    pub quality: QualitySettings,
    pub cache: CacheSettings,
    pub dictionary: DictionarySettings,
}

impl TutorConfig {
    /// Defaults, overridden by `path` (any format the `config` crate recognizes by
    /// extension) and then by `MARKER_TUTOR_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

fn step(
    phase: TutorialPhase,
    title: &str,
    description: &str,
    required: &[&str],
    instruction: &str,
    success_message: &str,
) -> StepSpec {
    StepSpec {
        title: title.to_string(),
        description: description.to_string(),
        instruction: instruction.to_string(),
        success_message: success_message.to_string(),
        phase,
        required: required.iter().map(|key| key.to_string()).collect(),
    }
}

/// The six parts of the kit, bound to markers 0 to 5.
pub fn default_components() -> Vec<ComponentSpec> {
    vec![
        ComponentSpec::new("arduino", "Arduino Leonardo", "Arduino", 0),
        ComponentSpec::new("breadboard", "Breadboard", "Breadboard", 1),
        ComponentSpec::new("led", "LED", "LED", 2),
        ComponentSpec::new("resistor", "220 Ohm Resistor", "Resistor", 3),
        ComponentSpec::new("potentiometer", "Potentiometer", "Poti", 4),
        ComponentSpec::new("wires", "Jumper Wires", "Jumper", 5),
    ]
}

/// Eleven assembly steps: an LED on D9 dimmed by a potentiometer on A0.
pub fn default_steps() -> Vec<StepSpec> {
    use TutorialPhase::*;
    const ALL: &[&str] = &["arduino", "breadboard", "led", "resistor", "potentiometer", "wires"];
    vec![
        step(
            Preparation,
            "Prepare the workspace",
            "Position the Arduino and the breadboard",
            &["arduino", "breadboard"],
            "Place the Arduino and the breadboard next to each other on the workspace",
            "Step 1: base components ready!",
        ),
        step(
            PowerSetup,
            "Prepare the power supply",
            "GND connection between Arduino and breadboard",
            &["arduino", "breadboard", "wires"],
            "Take a jumper wire for the GND connection between the Arduino and the breadboard (-) rail",
            "Step 2: jumper wire for GND ready!",
        ),
        step(
            PowerSetup,
            "5V power supply",
            "5V connection from Arduino to breadboard",
            &["arduino", "breadboard", "wires"],
            "Connect Arduino 5V to the breadboard (+) rail with another jumper wire",
            "Step 3: 5V connection made!",
        ),
        step(
            Components,
            "Insert the LED",
            "Place the LED on the breadboard",
            &["arduino", "breadboard", "led"],
            "Push the LED into the breadboard (long leg = anode/+, short leg = cathode/-)",
            "Step 4: LED placed!",
        ),
        step(
            Components,
            "LED protection resistor",
            "Add the 220 Ohm resistor that protects the LED",
            &["arduino", "breadboard", "led", "resistor"],
            "Place the 220 Ohm resistor between the LED cathode (-) and the GND rail",
            "Step 5: protection resistor placed!",
        ),
        step(
            Connections,
            "LED signal connection",
            "Connect the LED anode to an Arduino digital pin",
            &["arduino", "breadboard", "led", "resistor", "wires"],
            "Connect the LED anode (+) to Arduino digital pin D9 with a jumper wire",
            "Step 6: LED connected to Arduino pin D9!",
        ),
        step(
            AnalogInput,
            "Add the potentiometer",
            "Potentiometer for analog input",
            &["arduino", "breadboard", "led", "resistor", "potentiometer"],
            "Place the potentiometer on the breadboard",
            "Step 7: potentiometer added!",
        ),
        step(
            AnalogInput,
            "Potentiometer GND",
            "Potentiometer ground connection",
            ALL,
            "Connect the left potentiometer pin to the GND rail (jumper wire)",
            "Step 8: potentiometer GND connected!",
        ),
        step(
            AnalogInput,
            "Potentiometer 5V",
            "Potentiometer 5V supply",
            ALL,
            "Connect the right potentiometer pin to the 5V rail (jumper wire)",
            "Step 9: potentiometer 5V connected!",
        ),
        step(
            AnalogInput,
            "Potentiometer signal",
            "Potentiometer signal to the Arduino",
            ALL,
            "Connect the middle potentiometer pin to Arduino analog pin A0",
            "Step 10: potentiometer connected to Arduino A0!",
        ),
        step(
            Verification,
            "Complete the circuit",
            "Final check of all connections",
            ALL,
            "Check every connection; the circuit is ready for the code upload",
            "Circuit complete! All components connected correctly!",
        ),
    ]
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            validation: ValidationSpec::default(),
            steps: default_steps(),
            quality: QualitySettings::default(),
            cache: CacheSettings::default(),
            dictionary: DictionarySettings::default(),
        }
    }
}
