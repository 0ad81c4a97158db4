// THEORY:
// The `MarkerDetector` is the recognition layer. It turns one `Frame` into a
// `DetectionResult`: the ids and corner geometry of every dictionary marker in view.
//
// Key architectural principles & algorithm steps:
// 1.  **Scale first**: the luminance image is resized by the profile's
//     `resolution_scale` before any other work. Every later stage runs on the
//     scaled image; corners are mapped back to full-frame coordinates at the very
//     end, with pixel centers as the fixed points of the mapping.
// 2.  **Local darkness**: an adaptive threshold (local mean from an integral image)
//     marks pixels that are darker than their surroundings. Uneven lighting across
//     the workbench therefore does not hide markers.
// 3.  **Region labelling**: dark pixels are grouped into 4-connected regions by
//     connected-component labelling. Only the outer extreme points of a region
//     are kept; they describe the black border ring of a marker regardless of the
//     bits inside.
// 4.  **Geometry gate**: a quad is fitted to the outline and judged against the
//     profile's strictness thresholds. Anything that is not a clean, simple,
//     large-enough quadrilateral is dropped silently.
// 5.  **Pattern decode**: the bit grid is sampled through a homography from the
//     marker's cell grid to the quad, for all four corner rolls. The roll with the
//     best dictionary match fixes both the id and the corner order.
// 6.  **Stateless**: the detector has no memory between calls. Identical
//     (frame, profile) input produces identical observations.

use crate::core_modules::dictionary::{MarkerDictionary, Match, pack};
use crate::core_modules::frame::Frame;
use crate::core_modules::observation::{DetectionResult, MarkerObservation};
use crate::core_modules::quad::{Point, Quad, fit_quad, project};
use crate::core_modules::quality::QualityProfile;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::integral_image::integral_image;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::time::Instant;
use tracing::debug;

/// Scaled images smaller than this on either side are not searched.
const MIN_SEARCH_DIMENSION: u32 = 8;
/// Sub-cell offsets sampled around each cell center, in cell units.
const CELL_SAMPLE_OFFSETS: [(f64, f64); 5] =
    [(0.0, 0.0), (-0.2, -0.2), (0.2, -0.2), (0.2, 0.2), (-0.2, 0.2)];

/// A connected dark region of the scaled image.
#[derive(Debug, Clone)]
struct Region {
    /// Left/right ends of every row and top/bottom ends of every column, pushed
    /// half a pixel outward onto the region's geometric edge.
    outline: Vec<Point>,
}

/// A quad that passed the geometry gate.
#[derive(Debug, Clone)]
struct Candidate {
    quad: Quad,
    confidence: f64,
}

#[derive(Debug, Clone)]
pub struct MarkerDetector {
    dictionary: MarkerDictionary,
}

impl MarkerDetector {
    pub fn new(dictionary: MarkerDictionary) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &MarkerDictionary {
        &self.dictionary
    }

    /// Runs detection on one frame. Never fails: malformed frames and frames
    /// without markers both produce an empty result.
    pub fn detect(&self, frame: &Frame, profile: &QualityProfile) -> DetectionResult {
        let started = Instant::now();
        let observations = match frame.to_gray() {
            Some(gray) => self.detect_gray(&gray, profile),
            None => {
                debug!(
                    frame_id = frame.frame_id,
                    width = frame.width,
                    height = frame.height,
                    "malformed frame, reporting no markers"
                );
                Vec::new()
            }
        };
        DetectionResult::new(
            frame.frame_id,
            observations,
            started.elapsed(),
            frame.timestamp,
        )
    }

    fn detect_gray(&self, gray: &GrayImage, profile: &QualityProfile) -> Vec<MarkerObservation> {
        let (width, height) = gray.dimensions();

        // --- 1. Scaling ---
        let scaled_width = ((width as f64 * profile.resolution_scale).round() as u32).max(1);
        let scaled_height = ((height as f64 * profile.resolution_scale).round() as u32).max(1);
        if scaled_width < MIN_SEARCH_DIMENSION || scaled_height < MIN_SEARCH_DIMENSION {
            return Vec::new();
        }
        let resized;
        let scaled: &GrayImage = if (scaled_width, scaled_height) == (width, height) {
            gray
        } else {
            resized = imageops::resize(gray, scaled_width, scaled_height, FilterType::Triangle);
            &resized
        };
        let scale_x = scaled_width as f64 / width as f64;
        let scale_y = scaled_height as f64 / height as f64;

        // --- 2. Adaptive Threshold ---
        let dark = adaptive_threshold(
            scaled,
            profile.threshold_window_radius,
            profile.threshold_offset,
        );

        // --- 3. Region Labelling ---
        let longest = scaled_width.max(scaled_height) as f64;
        let min_perimeter = profile.min_perimeter_rate * longest;
        let max_perimeter = profile.max_perimeter_rate * longest;
        let regions = find_regions(&dark, min_perimeter);

        // --- 4. Geometry Gate & 5. Decode ---
        let mut observations = Vec::new();
        for region in regions {
            let Some(candidate) = check_geometry(
                &region,
                profile,
                (scaled_width, scaled_height),
                (min_perimeter, max_perimeter),
            ) else {
                continue;
            };
            let Some((quad, best)) = self.decode(scaled, &candidate.quad, profile) else {
                continue;
            };

            // --- 6. Rescale ---
            let full = quad.rescaled(scale_x, scale_y);
            let mut observation =
                MarkerObservation::new(best.id, full.corners, candidate.confidence);
            observation.hamming = best.hamming;
            observations.push(observation);
        }
        observations
    }

    /// Reads the bit pattern inside `quad`. Returns the quad rolled so that corner
    /// 0 is the marker's own top-left corner, together with the match.
    fn decode(
        &self,
        image: &GrayImage,
        quad: &Quad,
        profile: &QualityProfile,
    ) -> Option<(Quad, Match)> {
        let bits = self.dictionary.marker_bits();
        let grid = bits + 2;

        // Contrast and border are independent of the roll, so they are judged once.
        let cells = sample_cells(image, quad, grid)?;
        let (low, high) = cells
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if high - low < profile.min_contrast {
            return None;
        }
        let threshold = (high + low) / 2.0;
        let border_errors = (0..grid)
            .flat_map(|r| (0..grid).map(move |c| (r, c)))
            .filter(|(r, c)| *r == 0 || *c == 0 || *r == grid - 1 || *c == grid - 1)
            .filter(|(r, c)| cells[(r * grid + c) as usize] > threshold)
            .count();
        if border_errors > profile.max_border_errors as usize {
            return None;
        }

        let mut best: Option<(Match, usize)> = None;
        for roll in 0..4 {
            let rolled = quad.rolled(roll);
            let rolled_cells = if roll == 0 {
                cells.clone()
            } else {
                sample_cells(image, &rolled, grid)?
            };
            let inner: Vec<bool> = (1..=bits)
                .flat_map(|r| (1..=bits).map(move |c| (r, c)))
                .map(|(r, c)| rolled_cells[(r * grid + c) as usize] > threshold)
                .collect();
            let Some(found) = self.dictionary.identify(pack(&inner, bits)) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, _)) => (found.hamming, found.id) < (current.hamming, current.id),
            };
            if better {
                best = Some((found, roll));
            }
        }
        best.map(|(found, roll)| (quad.rolled(roll), found))
    }
}

/// Marks every pixel darker than its local mean by more than `offset`. Dark pixels
/// are 255 in the returned mask, everything else 0.
fn adaptive_threshold(image: &GrayImage, radius: u32, offset: f64) -> GrayImage {
    let (width, height) = image.dimensions();
    // One extra leading row and column: entry (x, y) sums every pixel above and
    // to the left of it.
    let integral = integral_image::<_, u64>(image);
    let at = |x: u32, y: u32| integral.get_pixel(x, y).0[0];

    GrayImage::from_fn(width, height, |x, y| {
        let (x0, y0) = (x.saturating_sub(radius), y.saturating_sub(radius));
        let (x1, y1) = ((x + radius + 1).min(width), (y + radius + 1).min(height));
        let sum = at(x1, y1) + at(x0, y0) - at(x1, y0) - at(x0, y1);
        let mean = sum as f64 / ((x1 - x0) * (y1 - y0)) as f64;
        let value = image.get_pixel(x, y).0[0] as f64;
        Luma([if value < mean - offset { 255 } else { 0 }])
    })
}

/// Row and column extremes of one labelled region.
struct Extent {
    min_x: u32,
    min_y: u32,
    row_ends: Vec<(u32, u32)>,
    column_ends: Vec<(u32, u32)>,
}

/// Groups dark pixels into 4-connected regions and keeps those whose bounding
/// box could hold a quad of at least `min_perimeter`.
fn find_regions(dark: &GrayImage, min_perimeter: f64) -> Vec<Region> {
    let labels = connected_components(dark, Connectivity::Four, Luma([0u8]));

    // --- Bounding Boxes ---
    let mut boxes: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if label >= boxes.len() {
            boxes.resize(label + 1, None);
        }
        boxes[label] = Some(match boxes[label] {
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
            None => (x, y, x, y),
        });
    }

    // A convex quad inside a box is never longer around than the box itself.
    let mut extents: Vec<Option<Extent>> = boxes
        .into_iter()
        .map(|bounds| {
            let (min_x, min_y, max_x, max_y) = bounds?;
            let (columns, rows) = (max_x - min_x + 1, max_y - min_y + 1);
            (2.0 * (columns + rows) as f64 >= min_perimeter).then(|| Extent {
                min_x,
                min_y,
                row_ends: vec![(u32::MAX, 0); rows as usize],
                column_ends: vec![(u32::MAX, 0); columns as usize],
            })
        })
        .collect();

    // --- Outline Extraction ---
    for (x, y, label) in labels.enumerate_pixels() {
        let Some(extent) = extents.get_mut(label.0[0] as usize).and_then(Option::as_mut) else {
            continue;
        };
        let row = &mut extent.row_ends[(y - extent.min_y) as usize];
        row.0 = row.0.min(x);
        row.1 = row.1.max(x);
        let column = &mut extent.column_ends[(x - extent.min_x) as usize];
        column.0 = column.0.min(y);
        column.1 = column.1.max(y);
    }

    extents
        .into_iter()
        .flatten()
        .map(|extent| {
            let mut outline =
                Vec::with_capacity(2 * (extent.row_ends.len() + extent.column_ends.len()));
            for (offset, (left, right)) in extent.row_ends.into_iter().enumerate() {
                let y = (extent.min_y as usize + offset) as f64;
                outline.push(Point::new(left as f64 - 0.5, y));
                outline.push(Point::new(right as f64 + 0.5, y));
            }
            for (offset, (top, bottom)) in extent.column_ends.into_iter().enumerate() {
                let x = (extent.min_x as usize + offset) as f64;
                outline.push(Point::new(x, top as f64 - 0.5));
                outline.push(Point::new(x, bottom as f64 + 0.5));
            }
            Region { outline }
        })
        .collect()
}

/// Fits a quad to the region outline and applies the profile's geometry checks.
fn check_geometry(
    region: &Region,
    profile: &QualityProfile,
    (width, height): (u32, u32),
    (min_perimeter, max_perimeter): (f64, f64),
) -> Option<Candidate> {
    let quad = fit_quad(&region.outline)?;

    let perimeter = quad.perimeter();
    if perimeter < min_perimeter || perimeter > max_perimeter {
        return None;
    }
    if !quad.is_convex() || !quad.is_simple() {
        return None;
    }
    if quad.shortest_side() < profile.min_corner_distance_rate * perimeter {
        return None;
    }
    let tolerance = profile.polygon_accuracy_rate * perimeter / 4.0;
    let fit_error = quad.fit_error(&region.outline);
    if fit_error > tolerance {
        return None;
    }
    let border = profile.min_border_distance;
    let inside = quad.corners.iter().all(|c| {
        c.x >= border
            && c.y >= border
            && c.x <= width as f64 - 1.0 - border
            && c.y <= height as f64 - 1.0 - border
    });
    if !inside {
        return None;
    }

    let squareness = quad.shortest_side() / quad.longest_side();
    let fit_quality = (1.0 - fit_error / tolerance).clamp(0.0, 1.0);
    Some(Candidate {
        quad,
        confidence: (squareness * fit_quality).clamp(0.0, 1.0),
    })
}

/// Mean intensity of every cell of a `grid x grid` lattice laid over `quad`,
/// row-major with row 0 along corners 0 to 1.
fn sample_cells(image: &GrayImage, quad: &Quad, grid: u32) -> Option<Vec<f64>> {
    let homography = quad.grid_homography(grid as f64)?;
    let mut cells = Vec::with_capacity((grid * grid) as usize);
    for row in 0..grid {
        for col in 0..grid {
            let mut total = 0.0;
            for (dx, dy) in CELL_SAMPLE_OFFSETS {
                let p = project(&homography, col as f64 + 0.5 + dx, row as f64 + 0.5 + dy)?;
                total += bilinear(image, p.x, p.y);
            }
            cells.push(total / CELL_SAMPLE_OFFSETS.len() as f64);
        }
    }
    Some(cells)
}

/// Bilinear intensity lookup with pixel centers at integer coordinates.
fn bilinear(image: &GrayImage, x: f64, y: f64) -> f64 {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);
    let at = |px: u32, py: u32| image.get_pixel(px, py).0[0] as f64;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}
