// THEORY:
// `MarkerObservation` and `DetectionResult` are the stateless data containers that
// flow out of the detector. An observation is a snapshot of one marker in one frame;
// it has no identity across frames beyond its marker id.
//
// Key architectural principles:
// 1.  **Uniqueness by construction**: a `DetectionResult` can only be built through
//     `DetectionResult::new`, which collapses duplicate ids. Downstream code never
//     sees two observations with the same id.
// 2.  **Total tie-break**: the winner among duplicates is decided by confidence,
//     then Hamming distance, then corner position. Two runs over the same input
//     always keep the same observation.
// 3.  **Stable order**: observations are kept sorted by id.

use nalgebra::Point2;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Integer identity encoded by a fiducial marker.
pub type MarkerId = u32;

/// A corner in full-frame pixel coordinates (pixel centers at integer positions).
pub type Corner = Point2<f64>;

/// Axis-aligned bounds of a marker in full-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// One marker seen in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    /// The decoded dictionary id.
    pub id: MarkerId,
    /// Corners in clockwise order starting at the marker's own top-left corner.
    pub corners: [Corner; 4],
    /// Geometric confidence in [0, 1] (squareness times edge-fit quality).
    pub confidence: f64,
    /// Bit errors corrected while decoding.
    pub hamming: u32,
    /// 0 for an observation made in the current frame; the number of frames since
    /// the marker was really seen when the cache substituted it.
    pub frames_since_seen: u32,
}

impl MarkerObservation {
    pub fn new(id: MarkerId, corners: [Corner; 4], confidence: f64) -> Self {
        Self {
            id,
            corners,
            confidence,
            hamming: 0,
            frames_since_seen: 0,
        }
    }

    pub fn center(&self) -> Corner {
        let (sum_x, sum_y) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
        Corner::new(sum_x / 4.0, sum_y / 4.0)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bounds = BoundingBox {
            min_x: f64::MAX,
            min_y: f64::MAX,
            max_x: f64::MIN,
            max_y: f64::MIN,
        };
        for corner in &self.corners {
            bounds.min_x = bounds.min_x.min(corner.x);
            bounds.min_y = bounds.min_y.min(corner.y);
            bounds.max_x = bounds.max_x.max(corner.x);
            bounds.max_y = bounds.max_y.max(corner.y);
        }
        bounds
    }

    pub fn perimeter(&self) -> f64 {
        (0..4)
            .map(|i| nalgebra::distance(&self.corners[i], &self.corners[(i + 1) % 4]))
            .sum()
    }

    pub fn is_fresh(&self) -> bool {
        self.frames_since_seen == 0
    }
}

/// Orders duplicates of one id so that the preferred observation comes first.
fn preference(a: &MarkerObservation, b: &MarkerObservation) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.hamming.cmp(&b.hamming))
        .then(a.corners[0].x.total_cmp(&b.corners[0].x))
        .then(a.corners[0].y.total_cmp(&b.corners[0].y))
}

/// Collapses duplicate ids, keeping the preferred observation of each, and sorts
/// the survivors by id.
pub fn dedup_by_identity(mut observations: Vec<MarkerObservation>) -> Vec<MarkerObservation> {
    observations.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| preference(a, b)));
    observations.dedup_by_key(|observation| observation.id);
    observations
}

/// The detector output for one frame. Immutable once built.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Id of the frame the observations came from.
    pub frame_id: u64,
    observations: Vec<MarkerObservation>,
    /// Wall time spent producing this result.
    pub frame_time: Duration,
    /// Capture time of the source frame.
    pub timestamp: Instant,
}

impl DetectionResult {
    pub fn new(
        frame_id: u64,
        observations: Vec<MarkerObservation>,
        frame_time: Duration,
        timestamp: Instant,
    ) -> Self {
        Self {
            frame_id,
            observations: dedup_by_identity(observations),
            frame_time,
            timestamp,
        }
    }

    pub fn empty(frame_id: u64, timestamp: Instant) -> Self {
        Self::new(frame_id, Vec::new(), Duration::ZERO, timestamp)
    }

    pub fn observations(&self) -> &[MarkerObservation] {
        &self.observations
    }

    pub fn into_observations(self) -> Vec<MarkerObservation> {
        self.observations
    }

    pub fn get(&self, id: MarkerId) -> Option<&MarkerObservation> {
        self.observations
            .binary_search_by_key(&id, |observation| observation.id)
            .ok()
            .map(|index| &self.observations[index])
    }

    pub fn ids(&self) -> BTreeSet<MarkerId> {
        self.observations.iter().map(|o| o.id).collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
