// THEORY:
// The component resolver is the bridge between what the camera sees (marker ids)
// and what the tutorial talks about (physical parts). The mapping is fixed at
// startup and frozen into a `ComponentRegistry`.
//
// Key architectural principles:
// 1.  **Injective mapping**: one marker id belongs to at most one component, and
//     component keys are unique. A registry that violates either is never built.
// 2.  **Forward compatible**: ids without a component are dropped quietly, so a
//     new marker set can be printed before the tutorial knows about it.
// 3.  **Set output**: resolution yields a set of `ComponentId`s. Duplicate
//     sightings collapse naturally.

use crate::core_modules::observation::{DetectionResult, MarkerId};
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// A component as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentSpec {
    /// Stable key used by steps to reference the component.
    pub key: String,
    /// Full display name.
    pub name: String,
    /// Short label for compact overlays. Defaults to `name`.
    #[serde(default)]
    pub short_name: Option<String>,
    pub marker_id: MarkerId,
}

impl ComponentSpec {
    pub fn new(key: &str, name: &str, short_name: &str, marker_id: MarkerId) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            short_name: Some(short_name.to_string()),
            marker_id,
        }
    }
}

/// Index of a component in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A frozen component entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub key: String,
    pub name: String,
    pub short_name: String,
    pub marker_id: MarkerId,
}

#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    components: Vec<ComponentInfo>,
    by_marker: HashMap<MarkerId, ComponentId>,
    by_key: HashMap<String, ComponentId>,
}

impl ComponentRegistry {
    pub fn new(specs: &[ComponentSpec]) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::NoComponents);
        }
        let mut components = Vec::with_capacity(specs.len());
        let mut by_marker: HashMap<MarkerId, ComponentId> = HashMap::new();
        let mut by_key = HashMap::new();

        for (index, spec) in specs.iter().enumerate() {
            let id = ComponentId(index);
            if by_key.insert(spec.key.clone(), id).is_some() {
                return Err(ConfigError::DuplicateComponentKey(spec.key.clone()));
            }
            if let Some(first) = by_marker.insert(spec.marker_id, id) {
                return Err(ConfigError::DuplicateMarkerId {
                    marker_id: spec.marker_id,
                    first: specs[first.0].key.clone(),
                    second: spec.key.clone(),
                });
            }
            components.push(ComponentInfo {
                key: spec.key.clone(),
                name: spec.name.clone(),
                short_name: spec.short_name.clone().unwrap_or_else(|| spec.name.clone()),
                marker_id: spec.marker_id,
            });
        }

        Ok(Self {
            components,
            by_marker,
            by_key,
        })
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.components.get(id.0)
    }

    pub fn by_key(&self, key: &str) -> Option<ComponentId> {
        self.by_key.get(key).copied()
    }

    pub fn by_marker(&self, marker_id: MarkerId) -> Option<ComponentId> {
        self.by_marker.get(&marker_id).copied()
    }

    /// Every registered component.
    pub fn all(&self) -> BTreeSet<ComponentId> {
        (0..self.components.len()).map(ComponentId).collect()
    }

    /// Display names of a set of components, in id order.
    pub fn names(&self, ids: &BTreeSet<ComponentId>) -> Vec<&str> {
        ids.iter()
            .filter_map(|id| self.get(*id))
            .map(|info| info.name.as_str())
            .collect()
    }

    /// The components visible in `result`. Unknown marker ids are ignored.
    pub fn resolve(&self, result: &DetectionResult) -> BTreeSet<ComponentId> {
        result
            .observations()
            .iter()
            .filter_map(|observation| {
                let found = self.by_marker(observation.id);
                if found.is_none() {
                    debug!(marker_id = observation.id, "ignoring unknown marker id");
                }
                found
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::observation::{Corner, MarkerObservation};
    use std::time::{Duration, Instant};

    fn specs() -> Vec<ComponentSpec> {
        vec![
            ComponentSpec::new("arduino", "Arduino Leonardo", "Arduino", 0),
            ComponentSpec::new("breadboard", "Breadboard", "Breadboard", 1),
            ComponentSpec::new("wires", "Jumper Wires", "Jumper", 5),
        ]
    }

    fn seen(ids: &[MarkerId]) -> DetectionResult {
        let observations = ids
            .iter()
            .map(|id| {
                MarkerObservation::new(
                    *id,
                    [
                        Corner::new(0.0, 0.0),
                        Corner::new(1.0, 0.0),
                        Corner::new(1.0, 1.0),
                        Corner::new(0.0, 1.0),
                    ],
                    1.0,
                )
            })
            .collect();
        DetectionResult::new(0, observations, Duration::ZERO, Instant::now())
    }

    #[test]
    fn resolves_known_and_drops_unknown_ids() {
        let registry = ComponentRegistry::new(&specs()).expect("valid registry");
        let resolved = registry.resolve(&seen(&[5, 42, 0]));
        assert_eq!(
            resolved,
            BTreeSet::from([ComponentId(0), ComponentId(2)])
        );
        assert_eq!(registry.names(&resolved), vec!["Arduino Leonardo", "Jumper Wires"]);
    }

    #[test]
    fn duplicate_marker_id_is_rejected() {
        let mut specs = specs();
        specs.push(ComponentSpec::new("led", "LED", "LED", 1));
        match ComponentRegistry::new(&specs) {
            Err(ConfigError::DuplicateMarkerId {
                marker_id,
                first,
                second,
            }) => {
                assert_eq!(marker_id, 1);
                assert_eq!(first, "breadboard");
                assert_eq!(second, "led");
            }
            other => panic!("expected duplicate marker id, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_key_and_empty_list_are_rejected() {
        let mut specs = specs();
        specs.push(ComponentSpec::new("wires", "More Wires", "Wires", 9));
        assert!(matches!(
            ComponentRegistry::new(&specs),
            Err(ConfigError::DuplicateComponentKey(key)) if key == "wires"
        ));
        assert!(matches!(
            ComponentRegistry::new(&[]),
            Err(ConfigError::NoComponents)
        ));
    }

    #[test]
    fn short_name_falls_back_to_name() {
        let spec = ComponentSpec {
            key: "poti".to_string(),
            name: "Potentiometer".to_string(),
            short_name: None,
            marker_id: 4,
        };
        let registry = ComponentRegistry::new(&[spec]).expect("valid registry");
        let id = registry.by_key("poti").expect("registered");
        assert_eq!(registry.get(id).map(|c| c.short_name.as_str()), Some("Potentiometer"));
        assert_eq!(registry.by_marker(4), Some(id));
        assert_eq!(registry.all().len(), 1);
    }
}
