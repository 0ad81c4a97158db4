mod common;

use common::*;
use marker_tutor::processing_loop::{self, LoopExit, LoopSettings};
use marker_tutor::{FrameSource, FrameSourceError};
use std::time::Duration;

/// Shows the whole kit on every tick.
struct BenchCamera {
    frame: Frame,
    next_id: u64,
}

impl FrameSource for BenchCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        self.next_id += 1;
        Ok(Some(self.frame.clone().with_id(self.next_id)))
    }
}

#[tokio::test(start_paused = true)]
async fn restart_while_complete_resets_on_next_cycle() {
    let camera = BenchCamera {
        frame: full_kit_frame(),
        next_id: 0,
    };
    let handle = processing_loop::spawn(default_pipeline(), camera, LoopSettings { target_fps: 20.0 });
    let mut updates = handle.subscribe();

    loop {
        updates.changed().await.expect("loop alive");
        let done = updates
            .borrow_and_update()
            .as_ref()
            .is_some_and(|snapshot| snapshot.tutorial.is_complete());
        if done {
            break;
        }
    }

    assert!(handle.restart());
    updates.changed().await.expect("loop alive");
    let snapshot = updates.borrow_and_update().clone().expect("snapshot");
    assert_eq!(snapshot.tutorial.progress, Progress::Step(0));
    assert!(snapshot.tutorial.validated_components.is_empty());

    updates.changed().await.expect("loop alive");
    let snapshot = updates.borrow_and_update().clone().expect("snapshot");
    assert_eq!(snapshot.tutorial.progress, Progress::Step(1));

    assert!(handle.quit());
    assert_eq!(handle.join().await.expect("clean exit"), LoopExit::Quit);
}

#[tokio::test(start_paused = true)]
async fn slow_reader_only_sees_the_latest_snapshot() {
    let camera = BenchCamera {
        frame: Frame::from_rgba(0, 0, Vec::new()),
        next_id: 0,
    };
    let handle = processing_loop::spawn(default_pipeline(), camera, LoopSettings { target_fps: 20.0 });
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let latest = handle.latest().expect("published");
    assert!(latest.cycle >= 20);
    assert_eq!(latest.detection.frame_id, latest.cycle);
    handle.quit();
    assert!(handle.join().await.is_ok());
}
