// THEORY:
// The processing loop decouples the pipeline from whoever displays its results.
// One tokio task owns the `TutorPipeline` and the `FrameSource` outright and runs
// the cycle at the target rate. Nothing else can touch either of them.
//
// Key architectural principles:
// 1.  **Latest wins**: results leave through a `watch` channel. Each cycle replaces
//     the previous snapshot; a slow reader skips intermediate cycles instead of
//     building a backlog, and the worker never waits for a reader.
// 2.  **Commands at the boundary**: commands arrive on an unbounded channel and are
//     drained at the top of each cycle, before the next frame is fetched. A restart
//     therefore never lands in the middle of a detection.
// 3.  **Absence is not failure**: a source with no new frame, or one frame that did
//     not decode, simply means no cycle this tick. Only a disconnected source stops
//     the loop with an error.
// 4.  **Off the async threads**: frame reads and detection are blocking work. Each
//     cycle moves the pipeline and the source onto tokio's blocking pool and takes
//     them back when it is done, so the presentation side keeps running even on a
//     single-threaded runtime.

use crate::core_modules::frame::Frame;
use crate::error::{FrameSourceError, PipelineError};
use crate::pipeline::{Snapshot, TutorPipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Anything that can hand out frames: a camera, a directory of stills, a test
/// script. Owned by the loop for its whole lifetime.
pub trait FrameSource: Send {
    /// `Ok(None)` means no new frame is ready yet. Must not block indefinitely.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        (**self).next_frame()
    }
}

/// Discrete requests from the presentation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restart,
    Quit,
    SetQualityLevel(u8),
    ClearQualityOverride,
}

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A `Command::Quit` was received.
    Quit,
    /// Every command sender was dropped.
    CommandsClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Upper bound on cycles per second.
    pub target_fps: f64,
}

impl LoopSettings {
    pub fn cycle_interval(&self) -> Duration {
        if self.target_fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.target_fps)
        } else {
            Duration::from_millis(50)
        }
    }
}

/// The presentation side's end of a running loop.
pub struct LoopHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    pub worker: JoinHandle<Result<LoopExit, PipelineError>>,
}

impl LoopHandle {
    /// Queues a command for the next cycle. Returns false once the loop is gone.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn restart(&self) -> bool {
        self.send(Command::Restart)
    }

    pub fn quit(&self) -> bool {
        self.send(Command::Quit)
    }

    pub fn set_quality_level(&self, level: u8) -> bool {
        self.send(Command::SetQualityLevel(level))
    }

    pub fn clear_quality_override(&self) -> bool {
        self.send(Command::ClearQualityOverride)
    }

    /// A fresh reader of the snapshot slot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshots.clone()
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Waits for the loop to stop.
    pub async fn join(self) -> Result<LoopExit, PipelineError> {
        let LoopHandle {
            commands, worker, ..
        } = self;
        let outcome = worker
            .await
            .map_err(|error| PipelineError::WorkerPanicked(error.to_string()))?;
        drop(commands);
        outcome
    }
}

/// Spawns the processing worker on the current tokio runtime.
pub fn spawn<S>(pipeline: TutorPipeline, source: S, settings: LoopSettings) -> LoopHandle
where
    S: FrameSource + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let worker = tokio::spawn(run(pipeline, source, settings, command_rx, snapshot_tx));
    LoopHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        worker,
    }
}

/// The state a cycle needs, moved onto the blocking pool for each cycle.
struct Worker<S> {
    pipeline: TutorPipeline,
    source: S,
}

impl<S: FrameSource> Worker<S> {
    /// Fetches one frame and runs it through the pipeline. `Ok(None)` means no
    /// cycle happened.
    fn cycle(&mut self) -> Result<Option<Snapshot>, FrameSourceError> {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("no new frame");
                return Ok(None);
            }
            Err(FrameSourceError::Decode(reason)) => {
                debug!(%reason, "frame dropped");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };
        Ok(Some(self.pipeline.process_frame(&frame)))
    }
}

async fn run<S: FrameSource + 'static>(
    pipeline: TutorPipeline,
    source: S,
    settings: LoopSettings,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<Option<Arc<Snapshot>>>,
) -> Result<LoopExit, PipelineError> {
    let mut ticker = interval(settings.cycle_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval = ?settings.cycle_interval(), "processing loop started");
    let mut worker = Worker { pipeline, source };

    loop {
        ticker.tick().await;

        // --- 1. Commands ---
        loop {
            match commands.try_recv() {
                Ok(Command::Quit) => {
                    info!("processing loop stopped by quit command");
                    return Ok(LoopExit::Quit);
                }
                Ok(Command::Restart) => worker.pipeline.restart(),
                Ok(Command::SetQualityLevel(level)) => {
                    worker.pipeline.set_quality_level(level);
                }
                Ok(Command::ClearQualityOverride) => worker.pipeline.clear_quality_override(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("processing loop stopped, command channel closed");
                    return Ok(LoopExit::CommandsClosed);
                }
            }
        }

        // --- 2. Frame Acquisition & Processing ---
        // Camera reads and detection block, so they run off the async threads.
        let (returned, outcome) = task::spawn_blocking(move || {
            let outcome = worker.cycle();
            (worker, outcome)
        })
        .await
        .map_err(|error| PipelineError::WorkerPanicked(error.to_string()))?;
        worker = returned;

        // --- 3. Publishing ---
        match outcome {
            Ok(Some(snapshot)) => {
                snapshots.send_replace(Some(Arc::new(snapshot)));
            }
            Ok(None) => {}
            Err(error) => {
                warn!(%error, "frame source failed, stopping processing loop");
                return Err(PipelineError::SourceUnavailable(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TutorConfig;
    use crate::core_modules::tutorial::Progress;
    use std::collections::VecDeque;

    /// Plays back a fixed script of source responses, then reports no frame.
    struct ScriptedSource {
        script: VecDeque<Result<Option<Frame>, FrameSourceError>>,
    }

    impl ScriptedSource {
        fn blank_frames(count: u64) -> Self {
            Self {
                script: (0..count)
                    .map(|id| Ok(Some(Frame::from_rgba(0, 0, Vec::new()).with_id(id))))
                    .collect(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn pipeline() -> TutorPipeline {
        TutorPipeline::new(TutorConfig::default()).expect("defaults are valid")
    }

    fn settings() -> LoopSettings {
        LoopSettings { target_fps: 20.0 }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_latest_snapshot_and_quits() {
        let handle = spawn(pipeline(), ScriptedSource::blank_frames(5), settings());
        tokio::time::sleep(Duration::from_secs(1)).await;
        let latest = handle.latest().expect("snapshot published");
        assert_eq!(latest.cycle, 5);
        assert_eq!(latest.detection.frame_id, 4);
        assert!(handle.quit());
        assert_eq!(handle.join().await.expect("clean exit"), LoopExit::Quit);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_errors_and_gaps_are_not_cycles() {
        let source = ScriptedSource {
            script: VecDeque::from([
                Err(FrameSourceError::Decode("bad jpeg".to_string())),
                Ok(None),
                Ok(Some(Frame::from_rgba(0, 0, Vec::new()).with_id(9))),
            ]),
        };
        let handle = spawn(pipeline(), source, settings());
        tokio::time::sleep(Duration::from_secs(1)).await;
        let latest = handle.latest().expect("one snapshot");
        assert_eq!(latest.cycle, 1);
        assert_eq!(latest.detection.frame_id, 9);
        handle.quit();
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_source_stops_with_error() {
        let source = ScriptedSource {
            script: VecDeque::from([Err(FrameSourceError::Disconnected("unplugged".to_string()))]),
        };
        let handle = spawn(pipeline(), source, settings());
        assert!(matches!(
            handle.join().await,
            Err(PipelineError::SourceUnavailable(FrameSourceError::Disconnected(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_sender_closes_the_loop() {
        let LoopHandle {
            commands, worker, ..
        } = spawn(pipeline(), ScriptedSource::blank_frames(0), settings());
        drop(commands);
        let exit = worker.await.expect("worker ran");
        assert_eq!(exit.expect("clean exit"), LoopExit::CommandsClosed);
    }

    /// Takes a long time for every frame, like a camera waiting for exposure.
    struct SlowSource;

    impl FrameSource for SlowSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(None)
        }
    }

    #[tokio::test]
    async fn blocking_source_does_not_stall_a_current_thread_runtime() {
        let handle = spawn(pipeline(), SlowSource, LoopSettings { target_fps: 100.0 });
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        handle.quit();
        assert_eq!(handle.join().await.expect("clean exit"), LoopExit::Quit);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_apply_at_next_cycle() {
        let handle = spawn(pipeline(), ScriptedSource::blank_frames(100), settings());
        let mut updates = handle.subscribe();
        handle.set_quality_level(4);
        handle.restart();
        updates.changed().await.expect("loop alive");
        let snapshot = updates.borrow_and_update().clone().expect("snapshot");
        assert_eq!(snapshot.quality_level, 4);
        assert!(snapshot.manual_quality);
        assert_eq!(snapshot.tutorial.progress, Progress::Step(0));
        handle.clear_quality_override();
        updates.changed().await.expect("loop alive");
        assert!(!updates.borrow().as_ref().is_some_and(|s| s.manual_quality));
        handle.quit();
        assert_eq!(handle.join().await.expect("clean exit"), LoopExit::Quit);
    }
}
