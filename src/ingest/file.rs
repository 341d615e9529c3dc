//! Local directory frame store.
//!
//! Frames are image files produced by the extraction step (or any external
//! tool) in a single directory. The store is responsible for:
//! - Listing frame files in file-name order
//! - Using the file name as the frame identifier
//! - Decoding a frame only when the tracker asks for it
//!
//! The store never writes to the directory.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

use crate::frame::{FrameEntry, FrameStore};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Configuration for a directory frame store.
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Directory holding the sampled frames.
    pub path: PathBuf,
}

/// Frame store backed by a directory of image files.
pub struct DirectoryFrameStore {
    config: DirectoryConfig,
}

impl DirectoryFrameStore {
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        if !config.path.is_dir() {
            return Err(anyhow!(
                "frame directory {} does not exist",
                config.path.display()
            ));
        }
        Ok(Self { config })
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DirectoryConfig { path: path.into() })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

impl FrameStore for DirectoryFrameStore {
    fn name(&self) -> String {
        format!("dir:{}", self.config.path.display())
    }

    fn entries(&self) -> Result<Vec<FrameEntry>> {
        let read_dir = fs::read_dir(&self.config.path)
            .with_context(|| format!("failed to list {}", self.config.path.display()))?;

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_frame_file(&name) {
                names.push(name);
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| FrameEntry::new(i as u64, name))
            .collect())
    }

    fn load(&self, entry: &FrameEntry) -> Result<RgbImage> {
        let path = self.config.path.join(&entry.id);
        let image = image::open(&path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?;
        Ok(image.to_rgb8())
    }
}

fn is_frame_file(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    FRAME_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_frame_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_0002.png", "frame_0001.png", "notes.txt", "frame_0003.JPG"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let store = DirectoryFrameStore::open(dir.path()).unwrap();
        let ids: Vec<String> = store.entries().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["frame_0001.png", "frame_0002.png", "frame_0003.JPG"]);
    }

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectoryFrameStore::open(dir.path().join("absent")).is_err());
    }

    #[test]
    fn undecodable_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0001.png"), b"not a png").unwrap();
        let store = DirectoryFrameStore::open(dir.path()).unwrap();
        let entries = store.entries().unwrap();
        assert!(store.load(&entries[0]).is_err());
    }
}
