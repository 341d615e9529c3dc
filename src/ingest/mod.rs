//! Frame ingestion.
//!
//! - `file`: directory of sampled frame images (the default store)
//! - `extract`: produces that directory from a video via the external `ffmpeg` tool
//!
//! Frame sources never write frames themselves; extraction is delegated to
//! the external tool and the core only reads the files it produced.

pub mod extract;
pub mod file;

pub use extract::{clear_extracted_frames, extract_frames, has_extracted_frames, ExtractConfig};
pub use file::{DirectoryConfig, DirectoryFrameStore};
