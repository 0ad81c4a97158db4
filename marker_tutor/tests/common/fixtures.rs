use marker_tutor::core_modules::dictionary::{DictionarySettings, MarkerDictionary, bit_at};
use marker_tutor::core_modules::quad::{Point, homography_from_four, project};
use marker_tutor::{ComponentId, DetectionResult, Frame, MarkerObservation, TutorConfig, TutorPipeline};
use image::{Rgba, RgbaImage};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Outer corners of a marker's black ring, clockwise from the marker's own
/// top-left, in pixel-center coordinates.
pub type Placement = [(f64, f64); 4];

pub fn default_dictionary() -> MarkerDictionary {
    MarkerDictionary::new(&DictionarySettings::default()).expect("default dictionary is valid")
}

pub fn default_pipeline() -> TutorPipeline {
    TutorPipeline::new(TutorConfig::default()).expect("default configuration is valid")
}

/// An axis-aligned marker whose ring covers pixels `x..x + side` and `y..y + side`.
pub fn axis_square(x: u32, y: u32, side: u32) -> Placement {
    let (x0, y0) = (x as f64 - 0.5, y as f64 - 0.5);
    let s = side as f64;
    [(x0, y0), (x0 + s, y0), (x0 + s, y0 + s), (x0, y0 + s)]
}

/// A square of `side` pixels centered at (`cx`, `cy`), turned clockwise by
/// `degrees`.
pub fn rotated_square(cx: f64, cy: f64, side: f64, degrees: f64) -> Placement {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let half = side / 2.0;
    [(-half, -half), (half, -half), (half, half), (-half, half)].map(|(x, y)| {
        (cx + x * cos - y * sin, cy + x * sin + y * cos)
    })
}

/// Paints one marker by inverse mapping every pixel center into the marker grid.
pub fn paint_marker(
    canvas: &mut RgbaImage,
    dictionary: &MarkerDictionary,
    id: u32,
    placement: &Placement,
) {
    let bits = dictionary.marker_bits();
    let grid = (bits + 2) as f64;
    let code = dictionary.code(id).expect("id is in the dictionary");
    let image_corners = placement.map(|(x, y)| Point::new(x, y));
    let grid_corners = [
        Point::new(0.0, 0.0),
        Point::new(grid, 0.0),
        Point::new(grid, grid),
        Point::new(0.0, grid),
    ];
    let to_grid = homography_from_four(&image_corners, &grid_corners).expect("non-degenerate");

    let xs = placement.iter().map(|p| p.0);
    let ys = placement.iter().map(|p| p.1);
    let min_x = xs.clone().fold(f64::MAX, f64::min).floor().max(0.0) as u32;
    let max_x = xs.fold(f64::MIN, f64::max).ceil().min(canvas.width() as f64 - 1.0) as u32;
    let min_y = ys.clone().fold(f64::MAX, f64::min).floor().max(0.0) as u32;
    let max_y = ys.fold(f64::MIN, f64::max).ceil().min(canvas.height() as f64 - 1.0) as u32;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let Some(g) = project(&to_grid, x as f64, y as f64) else {
                continue;
            };
            if g.x < 0.0 || g.y < 0.0 || g.x >= grid || g.y >= grid {
                continue;
            }
            let (col, row) = (g.x as u32, g.y as u32);
            let border = row == 0 || col == 0 || row == bits + 1 || col == bits + 1;
            let white = !border && bit_at(code, bits, row - 1, col - 1);
            let value = if white { 255 } else { 0 };
            canvas.put_pixel(x, y, Rgba([value, value, value, 255]));
        }
    }
}

/// A white frame with the given markers painted in.
pub fn frame_with_markers(width: u32, height: u32, markers: &[(u32, Placement)]) -> Frame {
    let dictionary = default_dictionary();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    for (id, placement) in markers {
        paint_marker(&mut canvas, &dictionary, *id, placement);
    }
    Frame::from_rgba(width, height, canvas.into_raw())
}

/// All six kit markers laid out in a 3x2 grid on a 640x480 bench.
pub fn full_kit_frame() -> Frame {
    let markers: Vec<(u32, Placement)> = (0..6)
        .map(|id| {
            let (col, row) = (id % 3, id / 3);
            (id, axis_square(40 + col * 200, 60 + row * 220, 120))
        })
        .collect();
    frame_with_markers(640, 480, &markers)
}

/// A detection containing the given ids at arbitrary, well-formed geometry.
pub fn detection_of(ids: &[u32]) -> DetectionResult {
    let observations = ids
        .iter()
        .map(|id| {
            let x = *id as f64 * 100.0;
            MarkerObservation::new(
                *id,
                [(x, 0.0), (x + 50.0, 0.0), (x + 50.0, 50.0), (x, 50.0)]
                    .map(|(px, py)| marker_tutor::core_modules::observation::Corner::new(px, py)),
                0.9,
            )
        })
        .collect();
    DetectionResult::new(0, observations, Duration::from_millis(10), Instant::now())
}

pub fn components(raw: &[usize]) -> BTreeSet<ComponentId> {
    raw.iter().copied().map(ComponentId).collect()
}

/// Largest corner distance between an observation and the expected placement.
pub fn corner_error(observation: &MarkerObservation, expected: &Placement) -> f64 {
    observation
        .corners
        .iter()
        .zip(expected)
        .map(|(c, (x, y))| ((c.x - x).powi(2) + (c.y - y).powi(2)).sqrt())
        .fold(0.0, f64::max)
}
