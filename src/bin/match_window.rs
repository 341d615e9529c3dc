//! match_window - detect the match window in a recorded broadcast
//!
//! 1. Optionally extracts sampled frames from a video with ffmpeg
//! 2. Fixes the minimap region on the first frame it is found in
//! 3. Tracks overlay presence and detections frame by frame
//! 4. Writes results.json and the reference minimap crop
//!
//! A cancelled or failed run writes nothing.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use minimap_window::annotate::Annotator;
use minimap_window::ingest::{
    clear_extracted_frames, extract_frames, has_extracted_frames, ExtractConfig,
};
use minimap_window::{
    ArtifactStore, ContourLocalizer, DetectorKind, DirectoryFrameStore, FilesystemArtifactStore,
    FrameStore, PipelineConfig, RunError, Termination, WindowTracker,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "match_window",
    about = "Detect the match window and minimap entities in sampled broadcast frames"
)]
struct Args {
    /// Config file (JSON, or TOML by extension)
    #[arg(long, env = "MINIMAP_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory of sampled frames
    #[arg(long, value_name = "DIR")]
    frames: Option<PathBuf>,

    /// Video to extract frames from before tracking
    #[arg(long, value_name = "PATH")]
    video: Option<PathBuf>,

    /// Output directory for results.json and the reference crop
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Detector backend (replay|tract)
    #[arg(long, value_name = "NAME")]
    backend: Option<DetectorKind>,

    /// Recorded predictions for the replay backend
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// ONNX model for the tract backend
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Class labels, one per line
    #[arg(long, value_name = "PATH")]
    labels: Option<PathBuf>,

    /// Sampling rate of the frames in frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Visit every Nth frame
    #[arg(long)]
    stride: Option<u64>,

    /// Minimum detection confidence
    #[arg(long)]
    confidence: Option<f32>,

    /// Extract again even when a finished extraction is already present
    #[arg(long)]
    reextract: bool,

    /// Write annotated crops for every emitted frame into DIR
    #[arg(long, value_name = "DIR")]
    annotate: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load config");
        let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args);
        cfg.validate()?;
        cfg.detector.validate()?;
        cfg
    };

    if let Some(video) = &cfg.video_path {
        let _stage = ui.stage("Extract frames");
        let extract = ExtractConfig::new(video, &cfg.frames_dir, cfg.tracker.sampling_rate);
        if !args.reextract && has_extracted_frames(&extract) {
            log::info!(
                "frames already extracted in {}; skipping extraction",
                cfg.frames_dir.display()
            );
        } else {
            let removed = clear_extracted_frames(&cfg.frames_dir)?;
            if removed > 0 {
                log::info!(
                    "removed {} stale frames from {}",
                    removed,
                    cfg.frames_dir.display()
                );
            }
            extract_frames(&extract)?;
        }
    }

    let store = DirectoryFrameStore::open(&cfg.frames_dir)?;
    let total = store.entries()?.len() as u64;

    let detector = {
        let _stage = ui.stage("Load detector");
        let detector = cfg.detector.build()?;
        detector.warm_up()?;
        detector
    };
    let localizer = Arc::new(ContourLocalizer::new(cfg.locator.clone())?);
    let tracker = WindowTracker::new(cfg.tracker.clone(), localizer, detector)?;

    let cancel = tracker.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut annotator = args.annotate.as_ref().map(Annotator::create).transpose()?;
    let mut progress = ui.frames(total);
    let outcome = {
        let _stage = ui.stage("Track match window");
        tracker.run_with(&store, |frame, crop| {
            progress.emitted(&frame.frame_id);
            if let Some(annotator) = annotator.as_mut() {
                if let Err(err) = annotator.write(&frame.frame_id, crop, &frame.predictions) {
                    log::warn!("annotation skipped for {}: {:#}", frame.frame_id, err);
                }
            }
        })
    };
    progress.finish();

    let run = match outcome {
        Ok(run) => run,
        Err(RunError::Cancelled) => {
            return Err(anyhow!("run cancelled; no results written"));
        }
        Err(err) => return Err(err.into()),
    };

    let mut artifacts = FilesystemArtifactStore::new(&cfg.output_dir);
    {
        let _stage = ui.stage("Write results");
        artifacts.persist(&run)?;
    }

    println!("match_window: {}", store.name());
    println!("  region:       {}", run.region);
    println!(
        "  start_frame:  {}",
        run.result.meta.start_frame.as_deref().unwrap_or("-")
    );
    println!(
        "  end_frame:    {}",
        run.result.meta.end_frame.as_deref().unwrap_or("-")
    );
    match &run.termination {
        Termination::Ended { at_frame } => {
            println!("  termination:  ended (rule met at {})", at_frame)
        }
        Termination::Exhausted => println!("  termination:  frames exhausted"),
    }
    println!("  frames:       {}", run.result.frames.len());
    println!("  window:       {}", run.result.window().len());
    println!("  results:      {}", artifacts.results_path().display());
    println!("  reference:    {}", artifacts.reference_path().display());
    if let Some(annotator) = &annotator {
        println!(
            "  annotated:    {} crops in {}",
            annotator.written(),
            annotator.dir().display()
        );
    }
    println!("  digest:       {}", run.result.digest()?);
    Ok(())
}

fn apply_args(cfg: &mut PipelineConfig, args: &Args) {
    if let Some(frames) = &args.frames {
        cfg.frames_dir = frames.clone();
    }
    if let Some(video) = &args.video {
        cfg.video_path = Some(video.clone());
    }
    if let Some(out) = &args.out {
        cfg.output_dir = out.clone();
    }
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend;
    }
    if let Some(replay) = &args.replay {
        cfg.detector.replay_path = Some(replay.clone());
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
    }
    if let Some(labels) = &args.labels {
        cfg.detector.labels_path = Some(labels.clone());
    }
    if let Some(fps) = args.fps {
        cfg.tracker.sampling_rate = fps;
    }
    if let Some(stride) = args.stride {
        cfg.tracker.stride = stride;
    }
    if let Some(confidence) = args.confidence {
        cfg.tracker.confidence_threshold = confidence;
    }
}
