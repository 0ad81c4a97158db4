mod common;

use common::*;
use marker_tutor::core_modules::marker_detector::MarkerDetector;
use marker_tutor::core_modules::quality::default_levels;

fn detector() -> MarkerDetector {
    MarkerDetector::new(default_dictionary())
}

#[test]
fn corners_rescale_to_full_frame_at_every_level() {
    let straight = axis_square(100, 80, 150);
    let turned = rotated_square(470.0, 250.0, 160.0, 25.0);
    let frame = frame_with_markers(640, 480, &[(1, straight), (3, turned)]);

    for profile in default_levels() {
        let result = detector().detect(&frame, &profile);
        let tolerance = 1.5 / profile.resolution_scale + 1.0;
        for (id, expected) in [(1, &straight), (3, &turned)] {
            let observation = result
                .get(id)
                .unwrap_or_else(|| panic!("marker {id} missing at level {}", profile.level));
            let error = corner_error(observation, expected);
            assert!(
                error <= tolerance,
                "level {} (scale {}): marker {id} corner error {error:.2} > {tolerance:.2}",
                profile.level,
                profile.resolution_scale
            );
        }
    }
}

#[test]
fn full_kit_is_detected_at_initial_level() {
    let pipeline = default_pipeline();
    let result = detector().detect(&full_kit_frame(), pipeline.profile());
    assert_eq!(result.ids().into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    assert!(result.observations().iter().all(|o| o.confidence > 0.0 && o.is_fresh()));
}

#[test]
fn unknown_pattern_and_clutter_are_ignored() {
    // A plain black square has the right shape but no valid code.
    let mut frame = frame_with_markers(320, 240, &[(2, axis_square(180, 60, 100))]);
    for y in 80..160u32 {
        for x in 40..120u32 {
            let offset = ((y * 320 + x) * 4) as usize;
            frame.data[offset..offset + 3].copy_from_slice(&[0, 0, 0]);
        }
    }
    let result = detector().detect(&frame, &default_levels()[4]);
    assert_eq!(result.ids().into_iter().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn malformed_frames_yield_empty_results() {
    let mut short = full_kit_frame();
    short.data.truncate(100);
    for profile in default_levels() {
        assert!(detector().detect(&short, &profile).is_empty());
        assert!(detector().detect(&Frame::from_rgba(0, 0, Vec::new()), &profile).is_empty());
    }
}
