//! Minimap match-window tracker
//!
//! Turns a sampled sequence of broadcast frames into a time-aligned record of
//! entities detected inside the minimap overlay, bounded to the part of the
//! recording where a match is actually being played.
//!
//! # Pipeline
//!
//! 1. **Locate**: the first frame whose bottom-right corner holds a large
//!    near-square outline fixes the crop region and the match start.
//! 2. **Track**: every visited frame afterwards is checked twice, overlay
//!    presence on the full frame and entity detection on the fixed crop.
//! 3. **End**: the match ends once the overlay has been missing *and* the
//!    detector has seen nothing for enough consecutive frames. Running out of
//!    frames ends the window at the last available frame.
//! 4. **Aggregate**: per-frame results keyed by frame id plus `__meta__`
//!    window bounds, persisted as one JSON document with a reference crop.
//!
//! # Module Structure
//!
//! - `frame`: frame entries, decoded frames, the `FrameStore` trait
//! - `ingest`: image-directory store and ffmpeg frame extraction
//! - `locate`: contour-based minimap localization
//! - `detect`: detector backends (recorded replay, ONNX via tract)
//! - `tracker`: hysteresis state machine and the run driver
//! - `timestamp`, `aggregate`, `storage`, `verify`, `annotate`, `config`

pub mod aggregate;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod locate;
pub mod storage;
pub mod timestamp;
pub mod tracker;
pub mod verify;

pub use aggregate::{AggregateError, FrameResult, MatchResult, ResultAggregator, WindowMetadata, META_KEY};
pub use config::{DetectorKind, DetectorSettings, PipelineConfig};
pub use detect::{Detection, DetectorBackend, ReplayBackend};
pub use frame::{Frame, FrameEntry, FrameStore, MemoryFrameStore};
pub use ingest::{DirectoryConfig, DirectoryFrameStore};
pub use locate::{ContourLocalizer, LocateError, Localizer, LocatorSettings, Region};
pub use storage::{ArtifactStore, FilesystemArtifactStore, InMemoryArtifactStore};
pub use tracker::{MatchRun, RunError, Termination, TrackerConfig, WindowTracker};
