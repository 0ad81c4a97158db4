// THEORY:
// `tutor_tester` is a console stand-in for the real AR front end. It plays the
// roles the core leaves to external collaborators:
// - a frame source (a directory of still images, or a live camera with the
//   `camera` feature),
// - a presentation layer that reads snapshots and logs step changes,
// - a command source that turns single keys on stdin into `Command`s.
// It also prints the marker set so the tutorial can be tried on a real bench.

mod sources;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use marker_tutor::processing_loop::{self, Command, LoopSettings};
use marker_tutor::{
    ComponentRegistry, FrameSource, MarkerDictionary, PipelineError, Snapshot, TutorConfig,
    TutorPipeline,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{Level, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tutor_tester", about = "Drive the marker tutorial from the console")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file layered over the built-in tutorial.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tutorial on a frame source.
    Run(RunArgs),
    /// Write every dictionary marker as a PNG.
    RenderMarkers {
        /// Output directory (created if missing).
        dir: PathBuf,
        /// Side of one marker cell in pixels.
        #[arg(long, default_value_t = 40)]
        cell_px: u32,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory of still images, played back in file name order.
    #[arg(long, conflicts_with = "camera")]
    frames: Option<PathBuf>,

    /// Camera index (requires the `camera` feature).
    #[arg(long)]
    camera: Option<i32>,

    /// Start over at the first image when the directory is exhausted.
    #[arg(long)]
    repeat: bool,

    /// Cycle rate; defaults to the configured target frame rate.
    #[arg(long)]
    fps: Option<f64>,

    /// Decode OpenCV's DICT_6X6_250 markers (requires the `camera` feature).
    #[arg(long)]
    aruco: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = TutorConfig::load(cli.config.as_deref()).context("loading configuration")?;
    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::RenderMarkers { dir, cell_px } => render_markers(&config, &dir, cell_px),
    }
}

async fn run(mut config: TutorConfig, args: RunArgs) -> Result<()> {
    // --- 1. Core Initialization ---
    if args.aruco {
        use_aruco_codes(&mut config)?;
    }
    let target_fps = args.fps.unwrap_or(config.quality.controller.target_fps);
    let pipeline = TutorPipeline::new(config).context("invalid tutorial configuration")?;

    // --- 2. Frame Source ---
    let source = open_source(&args)?;

    // --- 3. Processing Loop ---
    let handle = processing_loop::spawn(pipeline, source, LoopSettings { target_fps });
    let mut updates = handle.subscribe();
    spawn_key_reader(handle.commands.clone());
    info!("keys: r = restart, 0-4 = quality level, a = automatic quality, q = quit");

    // --- 4. Presentation ---
    let mut shown: Option<Shown> = None;
    while updates.changed().await.is_ok() {
        let latest = updates.borrow_and_update().clone();
        if let Some(snapshot) = latest {
            shown = Some(present(&snapshot, shown.as_ref()));
        }
    }

    match handle.join().await {
        Ok(exit) => {
            info!(?exit, "tutorial stopped");
            Ok(())
        }
        Err(PipelineError::SourceUnavailable(error)) => {
            warn!(%error, "frame source ended");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

fn open_source(args: &RunArgs) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &args.frames {
        let source = sources::DirectorySource::open(dir, args.repeat)?;
        info!(dir = %dir.display(), frames = source.len(), "playing back still images");
        return Ok(Box::new(source));
    }
    if let Some(index) = args.camera {
        return open_camera(index);
    }
    anyhow::bail!("pass either --frames <dir> or --camera <index>")
}

#[cfg(feature = "camera")]
fn open_camera(index: i32) -> Result<Box<dyn FrameSource>> {
    let camera = sources::CameraSource::open(index)?;
    info!(index, "camera opened");
    Ok(Box::new(camera))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_index: i32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("camera support is not compiled in; rebuild with --features camera")
}

#[cfg(feature = "camera")]
fn use_aruco_codes(config: &mut TutorConfig) -> Result<()> {
    let count = config
        .components
        .iter()
        .map(|component| component.marker_id as usize + 1)
        .max()
        .unwrap_or(0);
    config.dictionary.marker_bits = 6;
    config.dictionary.codes = sources::aruco_6x6_250_codes(count)?;
    info!(count, "decoding OpenCV DICT_6X6_250 markers");
    Ok(())
}

#[cfg(not(feature = "camera"))]
fn use_aruco_codes(_config: &mut TutorConfig) -> Result<()> {
    anyhow::bail!("the ArUco code table comes from OpenCV; rebuild with --features camera")
}

/// Reads single-key commands from stdin on a plain thread. The thread ends with
/// stdin or once the loop stops taking commands.
fn spawn_key_reader(commands: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "r" => Command::Restart,
                "q" => Command::Quit,
                "a" => Command::ClearQualityOverride,
                key => match key.parse::<u8>() {
                    Ok(level) => Command::SetQualityLevel(level),
                    Err(_) => continue,
                },
            };
            if commands.send(command).is_err() {
                break;
            }
        }
    });
}

/// What the console last showed, to log only changes.
struct Shown {
    step: Option<usize>,
    gate_hold: Option<(u32, u32)>,
    missing: Vec<String>,
    quality_level: u8,
}

fn present(snapshot: &Snapshot, previous: Option<&Shown>) -> Shown {
    let report = &snapshot.report;
    if let Some(advance) = &report.advanced {
        info!(from = advance.from, "{}", advance.success_message);
    }

    let missing: Vec<String> = snapshot.missing_names().into_iter().map(String::from).collect();
    let step_changed = previous.is_none_or(|p| p.step != report.step_index);
    if step_changed {
        if report.complete {
            info!("tutorial complete, press r to start over");
        } else {
            info!(
                step = ?report.step_index,
                phase = report.phase_label,
                progress = %format!("{:.0}%", report.progress * 100.0),
                "{}: {}",
                report.title,
                report.instruction
            );
        }
    }
    let hold_changed = previous.is_none_or(|p| p.gate_hold != report.gate_hold);
    match report.gate_hold {
        Some((held, needed)) if held > 0 && hold_changed => {
            info!(held, needed, "keep the whole kit in view");
        }
        _ => {}
    }
    let missing_changed = step_changed || previous.is_some_and(|p| p.missing != missing);
    if missing_changed && !missing.is_empty() {
        info!(missing = ?missing, seen = ?snapshot.validated_names(), "waiting for components");
    }
    if previous.is_some_and(|p| p.quality_level != snapshot.quality_level) {
        info!(
            level = snapshot.quality_level,
            manual = snapshot.manual_quality,
            "detection quality changed"
        );
    }

    Shown {
        step: report.step_index,
        gate_hold: report.gate_hold,
        missing,
        quality_level: snapshot.quality_level,
    }
}

fn render_markers(config: &TutorConfig, dir: &Path, cell_px: u32) -> Result<()> {
    let dictionary = MarkerDictionary::new(&config.dictionary)?;
    let registry = ComponentRegistry::new(&config.components)?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    for id in 0..dictionary.len() as u32 {
        let Some(image) = dictionary.render(id, cell_px) else {
            continue;
        };
        let path = dir.join(format!("marker_{id}.png"));
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        let component = registry
            .by_marker(id)
            .and_then(|component| registry.get(component))
            .map(|info| info.name.as_str())
            .unwrap_or("unassigned");
        info!(id, component, path = %path.display(), "marker written");
    }
    Ok(())
}
