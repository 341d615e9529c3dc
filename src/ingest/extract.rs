//! Frame extraction through the external `ffmpeg` tool.
//!
//! Extraction writes `frame_%04d.png` files at a fixed sampling rate into a
//! directory that `DirectoryFrameStore` then reads. Decoding stays outside
//! this process.
//!
//! A successful run leaves a marker naming the video and sampling rate. A
//! directory without a matching marker holds no usable extraction, even if
//! some `frame_*` files are present from an interrupted run.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const FRAME_PATTERN: &str = "frame_%04d.png";
pub const COMPLETE_MARKER: &str = ".extract_complete";
const FRAME_PREFIX: &str = "frame_";

/// Settings for one extraction run.
#[derive(Clone, Debug)]
pub struct ExtractConfig {
    pub video_path: PathBuf,
    pub output_dir: PathBuf,
    /// Frames per second to sample.
    pub sampling_rate: f64,
    /// Tool to invoke. Defaults to `ffmpeg` on PATH.
    pub program: String,
}

impl ExtractConfig {
    pub fn new(video_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            video_path: video_path.into(),
            output_dir: output_dir.into(),
            sampling_rate: fps,
            program: "ffmpeg".to_string(),
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            self.video_path.display().to_string(),
            "-vf".to_string(),
            format!("fps={}", self.sampling_rate),
            self.output_dir.join(FRAME_PATTERN).display().to_string(),
        ]
    }

    fn marker_path(&self) -> PathBuf {
        self.output_dir.join(COMPLETE_MARKER)
    }

    fn marker_contents(&self) -> String {
        format!("{}\n{}\n", self.video_path.display(), self.sampling_rate)
    }
}

/// Run the extraction tool and wait for it to finish.
pub fn extract_frames(config: &ExtractConfig) -> Result<()> {
    if !config.video_path.is_file() {
        return Err(anyhow!(
            "video file not found at {}",
            config.video_path.display()
        ));
    }
    if !(config.sampling_rate > 0.0) {
        return Err(anyhow!("sampling rate must be > 0"));
    }
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    let marker = config.marker_path();
    if marker.exists() {
        fs::remove_file(&marker)
            .with_context(|| format!("failed to remove {}", marker.display()))?;
    }

    log::info!(
        "extracting frames from {} at {} fps into {}",
        config.video_path.display(),
        config.sampling_rate,
        config.output_dir.display()
    );

    let status = Command::new(&config.program)
        .args(config.args())
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("failed to launch {}", config.program))?;

    if !status.success() {
        return Err(anyhow!("{} exited with {}", config.program, status));
    }
    fs::write(&marker, config.marker_contents())
        .with_context(|| format!("failed to write {}", marker.display()))?;
    Ok(())
}

/// Returns true when a finished extraction of the same video at the same
/// sampling rate is already in the output directory.
pub fn has_extracted_frames(config: &ExtractConfig) -> bool {
    let complete = fs::read_to_string(config.marker_path())
        .map(|contents| contents == config.marker_contents())
        .unwrap_or(false);
    complete && !frame_files(&config.output_dir).is_empty()
}

/// Remove extracted frames and the completion marker. Returns the number of
/// frames removed. Other files in the directory are left alone.
pub fn clear_extracted_frames(dir: &Path) -> Result<usize> {
    let frames = frame_files(dir);
    for path in &frames {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    let marker = dir.join(COMPLETE_MARKER);
    if marker.exists() {
        fs::remove_file(&marker)
            .with_context(|| format!("failed to remove {}", marker.display()))?;
    }
    Ok(frames.len())
}

fn frame_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(FRAME_PREFIX))
        .map(|e| e.path())
        .collect()
}
