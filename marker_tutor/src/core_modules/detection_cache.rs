// THEORY:
// The `DetectionCache` adds a very short memory on top of the stateless detector.
// Markers flicker: a hand passes over one, motion blur smears another for a single
// frame. Without help, the tutorial would see components vanish and reappear.
//
// Key architectural principles:
// 1.  **Correlation by id only**: there is no spatial matching. An observation with
//     id 3 replaces whatever the cache held for id 3.
// 2.  **Frame-count staleness**: age is counted in processed cycles, not wall time,
//     so a slow frame rate does not stretch how long a stale marker survives.
// 3.  **Hard bound**: an id absent for `staleness_window` cycles is still reported
//     (with `frames_since_seen` set to its age); one cycle later it is evicted and
//     reported absent. The cache never invents observations beyond that bound.
// 4.  **Lifecycle**: like a tracked object, a cached entry is refreshed when seen,
//     ages while unseen, and dies when too old.

use crate::core_modules::observation::{DetectionResult, MarkerId, MarkerObservation};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum age, in cycles, at which a missing marker is still substituted.
    /// 0 disables substitution.
    pub staleness_window: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            staleness_window: 2,
        }
    }
}

/// The last real sighting of one marker id.
#[derive(Debug, Clone)]
struct CachedObservation {
    observation: MarkerObservation,
    /// Cycle in which the marker was really seen.
    seen_at: u64,
}

pub struct DetectionCache {
    settings: CacheSettings,
    entries: BTreeMap<MarkerId, CachedObservation>,
    cycle: u64,
    previous: Option<DetectionResult>,
}

impl DetectionCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: BTreeMap::new(),
            cycle: 0,
            previous: None,
        }
    }

    pub fn staleness_window(&self) -> u32 {
        self.settings.staleness_window
    }

    /// The effective result handed out by the previous `apply`.
    pub fn previous(&self) -> Option<&DetectionResult> {
        self.previous.as_ref()
    }

    /// Merges a fresh detection with recent sightings and returns the effective
    /// result for this cycle.
    pub fn apply(&mut self, current: DetectionResult) -> DetectionResult {
        self.cycle += 1;
        let cycle = self.cycle;

        // --- 1. Refresh ---
        for observation in current.observations() {
            self.entries.insert(
                observation.id,
                CachedObservation {
                    observation: observation.clone(),
                    seen_at: cycle,
                },
            );
        }

        // --- 2. Ageing & Eviction ---
        let window = u64::from(self.settings.staleness_window);
        self.entries.retain(|id, entry| {
            let keep = cycle - entry.seen_at <= window;
            if !keep {
                debug!(marker_id = id, "cached marker expired");
            }
            keep
        });

        // --- 3. Substitution ---
        let substitutes: Vec<MarkerObservation> = self
            .entries
            .values()
            .filter(|entry| entry.seen_at < cycle)
            .map(|entry| {
                let mut stale = entry.observation.clone();
                stale.frames_since_seen = (cycle - entry.seen_at) as u32;
                stale
            })
            .collect();
        let effective = if substitutes.is_empty() {
            current
        } else {
            debug!(
                count = substitutes.len(),
                frame_id = current.frame_id,
                "substituting recently seen markers"
            );
            let (frame_id, frame_time, timestamp) =
                (current.frame_id, current.frame_time, current.timestamp);
            let mut observations = current.into_observations();
            observations.extend(substitutes);
            DetectionResult::new(frame_id, observations, frame_time, timestamp)
        };
        self.previous = Some(effective.clone());
        effective
    }

    /// Forgets every sighting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::observation::Corner;
    use std::time::{Duration, Instant};

    fn observation(id: MarkerId) -> MarkerObservation {
        MarkerObservation::new(
            id,
            [
                Corner::new(0.0, 0.0),
                Corner::new(10.0, 0.0),
                Corner::new(10.0, 10.0),
                Corner::new(0.0, 10.0),
            ],
            0.9,
        )
    }

    fn result(frame_id: u64, ids: &[MarkerId]) -> DetectionResult {
        DetectionResult::new(
            frame_id,
            ids.iter().copied().map(observation).collect(),
            Duration::from_millis(5),
            Instant::now(),
        )
    }

    #[test]
    fn absent_for_exactly_window_cycles_is_still_present() {
        let mut cache = DetectionCache::new(CacheSettings::default());
        cache.apply(result(0, &[1, 2]));
        let one = cache.apply(result(1, &[2]));
        assert_eq!(one.get(1).map(|o| o.frames_since_seen), Some(1));
        let two = cache.apply(result(2, &[2]));
        assert_eq!(two.get(1).map(|o| o.frames_since_seen), Some(2));
        assert!(two.get(2).is_some_and(|o| o.is_fresh()));
    }

    #[test]
    fn absent_for_window_plus_one_cycles_is_absent() {
        let mut cache = DetectionCache::new(CacheSettings { staleness_window: 2 });
        cache.apply(result(0, &[1]));
        cache.apply(result(1, &[]));
        cache.apply(result(2, &[]));
        let third = cache.apply(result(3, &[]));
        assert!(third.is_empty());
        // Evicted for good; it does not come back on later empty frames.
        assert!(cache.apply(result(4, &[])).is_empty());
    }

    #[test]
    fn reappearing_marker_resets_its_age() {
        let mut cache = DetectionCache::new(CacheSettings { staleness_window: 1 });
        cache.apply(result(0, &[5]));
        cache.apply(result(1, &[]));
        cache.apply(result(2, &[5]));
        let after = cache.apply(result(3, &[]));
        assert_eq!(after.get(5).map(|o| o.frames_since_seen), Some(1));
    }

    #[test]
    fn zero_window_never_substitutes() {
        let mut cache = DetectionCache::new(CacheSettings { staleness_window: 0 });
        cache.apply(result(0, &[1]));
        assert!(cache.apply(result(1, &[])).is_empty());
    }

    #[test]
    fn clear_forgets_sightings() {
        let mut cache = DetectionCache::new(CacheSettings::default());
        cache.apply(result(0, &[0, 1, 2]));
        cache.clear();
        assert!(cache.previous().is_none());
        assert!(cache.apply(result(1, &[])).is_empty());
    }

    #[test]
    fn substitution_keeps_frame_metadata() {
        let mut cache = DetectionCache::new(CacheSettings::default());
        cache.apply(result(10, &[3]));
        let next = cache.apply(result(11, &[4]));
        assert_eq!(next.frame_id, 11);
        assert_eq!(next.frame_time, Duration::from_millis(5));
        assert_eq!(next.ids().into_iter().collect::<Vec<_>>(), vec![3, 4]);
    }
}
