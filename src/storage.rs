use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::aggregate::MatchResult;
use crate::tracker::MatchRun;

pub const RESULTS_FILE: &str = "results.json";
pub const REFERENCE_DIR: &str = "minimap_position";
pub const REFERENCE_FILE: &str = "minimap.png";

/// Destination for the artifacts of a completed run.
///
/// Only completed runs are persisted; a failed or cancelled run never reaches
/// the store.
pub trait ArtifactStore {
    fn persist(&mut self, run: &MatchRun) -> Result<()>;

    fn load_result(&self) -> Result<MatchResult>;
}

/// Writes `results.json` and `minimap_position/minimap.png` under one
/// output directory.
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    pub fn reference_path(&self) -> PathBuf {
        self.root.join(REFERENCE_DIR).join(REFERENCE_FILE)
    }
}

impl ArtifactStore for FilesystemArtifactStore {
    fn persist(&mut self, run: &MatchRun) -> Result<()> {
        let reference_path = self.reference_path();
        if let Some(parent) = reference_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        write_atomic(&reference_path, &encode_png(&run.reference)?)
            .with_context(|| format!("failed to write {}", reference_path.display()))?;

        let json = run.result.to_json_pretty()?;
        let results_path = self.results_path();
        write_atomic(&results_path, json.as_bytes())
            .with_context(|| format!("failed to write {}", results_path.display()))?;
        log::info!(
            "saved {} frame results to {} and reference crop to {}",
            run.result.frames.len(),
            results_path.display(),
            reference_path.display()
        );
        Ok(())
    }

    fn load_result(&self) -> Result<MatchResult> {
        load_result_file(&self.results_path())
    }
}

/// Keeps the last persisted run in memory.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    result: Option<MatchResult>,
    reference_png: Option<Vec<u8>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference_png(&self) -> Option<&[u8]> {
        self.reference_png.as_deref()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn persist(&mut self, run: &MatchRun) -> Result<()> {
        self.reference_png = Some(encode_png(&run.reference)?);
        self.result = Some(run.result.clone());
        Ok(())
    }

    fn load_result(&self) -> Result<MatchResult> {
        self.result
            .clone()
            .ok_or_else(|| anyhow!("no result persisted"))
    }
}

pub fn load_result_file(path: &Path) -> Result<MatchResult> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    MatchResult::from_json(&raw).with_context(|| format!("invalid result file {}", path.display()))
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .context("failed to encode reference crop")?;
    Ok(buf.into_inner())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
