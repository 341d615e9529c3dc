//! Sampled frame model.
//!
//! - `FrameEntry`: position + identifier of one sampled frame, cheap to list.
//! - `Frame`: an entry with its decoded image, shared read-only across probes.
//! - `FrameStore`: ordered, finite, restartable source of frames.
//!
//! Stores list entries up front and decode images lazily, so frames skipped
//! by the tracker stride are never decoded.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::Arc;

/// One sampled frame position in a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameEntry {
    /// Position in the full sorted sequence (0-based).
    pub index: u64,
    /// Stable identifier used as the result key (e.g. "frame_0001.png").
    pub id: String,
}

impl FrameEntry {
    pub fn new(index: u64, id: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
        }
    }
}

/// A decoded frame. The image is behind an `Arc` so concurrent probes can
/// hold it without copying pixels.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub id: String,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(entry: &FrameEntry, image: RgbImage) -> Self {
        Self {
            index: entry.index,
            id: entry.id.clone(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Ordered source of sampled frames.
///
/// `entries()` must return frames sorted by index and may be called more than
/// once; each call restarts the sequence.
pub trait FrameStore: Send + Sync {
    /// Store identifier for logs.
    fn name(&self) -> String;

    /// List all frames in order.
    fn entries(&self) -> Result<Vec<FrameEntry>>;

    /// Decode the image for one entry.
    fn load(&self, entry: &FrameEntry) -> Result<RgbImage>;
}

/// In-memory store, used for replays and tests.
#[derive(Default)]
pub struct MemoryFrameStore {
    frames: Vec<(String, Arc<RgbImage>)>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. Its index is its position.
    pub fn push(&mut self, id: impl Into<String>, image: RgbImage) {
        self.frames.push((id.into(), Arc::new(image)));
    }

    pub fn with_frame(mut self, id: impl Into<String>, image: RgbImage) -> Self {
        self.push(id, image);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameStore for MemoryFrameStore {
    fn name(&self) -> String {
        format!("memory:{}", self.frames.len())
    }

    fn entries(&self) -> Result<Vec<FrameEntry>> {
        Ok(self
            .frames
            .iter()
            .enumerate()
            .map(|(i, (id, _))| FrameEntry::new(i as u64, id.clone()))
            .collect())
    }

    fn load(&self, entry: &FrameEntry) -> Result<RgbImage> {
        let (id, image) = self
            .frames
            .get(entry.index as usize)
            .ok_or_else(|| anyhow!("frame index {} out of range", entry.index))?;
        if id != &entry.id {
            return Err(anyhow!(
                "frame id mismatch at index {}: expected {}, found {}",
                entry.index,
                entry.id,
                id
            ));
        }
        Ok(image.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_lists_in_push_order() {
        let store = MemoryFrameStore::new()
            .with_frame("a", RgbImage::new(2, 2))
            .with_frame("b", RgbImage::new(2, 2));

        let entries = store.entries().unwrap();
        assert_eq!(entries, vec![FrameEntry::new(0, "a"), FrameEntry::new(1, "b")]);

        // Restartable: a second listing yields the same sequence.
        assert_eq!(store.entries().unwrap(), entries);
    }

    #[test]
    fn memory_store_rejects_mismatched_entry() {
        let store = MemoryFrameStore::new().with_frame("a", RgbImage::new(1, 1));
        assert!(store.load(&FrameEntry::new(0, "b")).is_err());
        assert!(store.load(&FrameEntry::new(3, "a")).is_err());
        assert_eq!(store.load(&FrameEntry::new(0, "a")).unwrap().dimensions(), (1, 1));
    }
}
