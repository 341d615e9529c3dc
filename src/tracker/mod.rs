//! Match-window tracker.
//!
//! One pass over a frame store: the localizer fixes the crop region on the
//! first frame it succeeds on, then every visited frame is checked twice
//! (overlay presence on the full frame, entity detection on the fixed crop)
//! and both signals feed the hysteresis counters in [`TrackerState`]. The
//! match ends when both counters reach their limits.

mod probe;
mod state;

pub use probe::{Presence, Prediction, Probe, ProbeGate, ProbeOutcome};
pub use state::{Phase, TrackerState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::RgbImage;
use thiserror::Error;

use crate::aggregate::{AggregateError, FrameResult, MatchResult, ResultAggregator, WindowMetadata};
use crate::detect::DetectorBackend;
use crate::frame::{Frame, FrameStore};
use crate::locate::{Localizer, Region};
use crate::timestamp;

pub const DEFAULT_SAMPLING_RATE: f64 = 2.0;
pub const DEFAULT_STRIDE: u64 = 2;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.65;
pub const DEFAULT_MAX_REGION_MISSES: u32 = 5;
pub const DEFAULT_MAX_EMPTY_PREDICTIONS: u32 = 5;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracker thresholds, passed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Frames per second of the sampled sequence.
    pub sampling_rate: f64,
    /// Visit every Nth frame by index.
    pub stride: u64,
    pub confidence_threshold: f32,
    pub max_region_misses: u32,
    pub max_empty_predictions: u32,
    /// Deadline for each localizer or detector call.
    pub call_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sampling_rate: DEFAULT_SAMPLING_RATE,
            stride: DEFAULT_STRIDE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_region_misses: DEFAULT_MAX_REGION_MISSES,
            max_empty_predictions: DEFAULT_MAX_EMPTY_PREDICTIONS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_rate.is_finite() && self.sampling_rate > 0.0) {
            return Err(anyhow!("sampling_rate must be a positive number of frames per second"));
        }
        if self.stride == 0 {
            return Err(anyhow!("stride must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if self.max_region_misses == 0 || self.max_empty_predictions == 0 {
            return Err(anyhow!("miss limits must be greater than zero"));
        }
        if self.call_timeout.is_zero() {
            return Err(anyhow!("call_timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no frames available in {0}")]
    NoFramesAvailable(String),
    #[error("minimap region never found in {examined} examined frames")]
    RegionNeverFound { examined: usize },
    #[error("frame store failed: {0:#}")]
    FrameStore(anyhow::Error),
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// How the window end was decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Both hysteresis counters reached their limits at `at_frame`.
    Ended { at_frame: String },
    /// The sequence ran out while tracking.
    Exhausted,
}

/// Completed run.
#[derive(Debug)]
pub struct MatchRun {
    pub result: MatchResult,
    pub region: Region,
    /// Crop of the fixed region from the frame that fixed it.
    pub reference: RgbImage,
    pub termination: Termination,
}

/// Drives one pass over a frame store.
pub struct WindowTracker {
    config: TrackerConfig,
    localizer: Arc<dyn Localizer>,
    detector: Arc<dyn DetectorBackend>,
    cancel: Arc<AtomicBool>,
    gate: ProbeGate,
}

impl WindowTracker {
    pub fn new(
        config: TrackerConfig,
        localizer: Arc<dyn Localizer>,
        detector: Arc<dyn DetectorBackend>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            localizer,
            detector,
            cancel: Arc::new(AtomicBool::new(false)),
            gate: ProbeGate::default(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Flag that stops the run before the next frame when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&self, store: &dyn FrameStore) -> Result<MatchRun, RunError> {
        self.run_with(store, |_, _| {})
    }

    /// Run and hand every emitted result, with its crop, to `on_frame`.
    pub fn run_with<F>(&self, store: &dyn FrameStore, mut on_frame: F) -> Result<MatchRun, RunError>
    where
        F: FnMut(&FrameResult, &RgbImage),
    {
        let entries = store.entries().map_err(RunError::FrameStore)?;
        let Some(last) = entries.last() else {
            return Err(RunError::NoFramesAvailable(store.name()));
        };
        let last_id = last.id.clone();

        let mut state = TrackerState::new(
            self.config.max_region_misses,
            self.config.max_empty_predictions,
        );
        let mut aggregator = ResultAggregator::new();
        let mut reference: Option<RgbImage> = None;
        let mut start_index = 0u64;
        let mut examined = 0usize;
        let mut ended_at: Option<String> = None;

        for entry in &entries {
            if self.cancel.load(Ordering::SeqCst) {
                log::info!("run cancelled before frame {}", entry.id);
                return Err(RunError::Cancelled);
            }
            if entry.index % self.config.stride != 0 {
                continue;
            }
            let image = match store.load(entry) {
                Ok(image) => image,
                Err(err) => {
                    log::warn!("skipping unreadable frame {}: {:#}", entry.id, err);
                    continue;
                }
            };
            let frame = Frame::new(entry, image);
            examined += 1;

            let (region, check_presence) = match state.region() {
                None => {
                    let deadline = Instant::now() + self.config.call_timeout;
                    match probe::presence(probe::spawn_locate(&self.gate, &self.localizer, &frame).wait(deadline)) {
                        Presence::Visible(region) => {
                            state.fix_region(&frame.id, region);
                            start_index = frame.index;
                            reference = Some(region.crop(&frame.image));
                            log::info!("minimap fixed in frame {} at {}", frame.id, region);
                            (region, false)
                        }
                        other => {
                            log::debug!("searching: skipping frame {}: {}", frame.id, describe(&other));
                            continue;
                        }
                    }
                }
                Some(region) => (region, true),
            };

            let crop = region.crop(&frame.image);
            let deadline = Instant::now() + self.config.call_timeout;
            let detect = probe::spawn_detect(&self.gate, &self.detector, &frame.id, crop.clone());
            let presence = check_presence
                .then(|| probe::presence(probe::spawn_locate(&self.gate, &self.localizer, &frame).wait(deadline)));
            let prediction = probe::prediction(detect.wait(deadline), self.config.confidence_threshold);

            let visible = presence.as_ref().map(Presence::is_visible);
            if let Some(p) = presence.as_ref().filter(|p| !p.is_visible()) {
                log::info!(
                    "frame {}: minimap not visible ({}/{}): {}",
                    frame.id,
                    state.region_misses() + 1,
                    self.config.max_region_misses,
                    describe(p)
                );
            }
            match &prediction {
                Prediction::DetectorFailure(msg) => {
                    log::warn!("frame {}: detector failed: {}", frame.id, msg)
                }
                Prediction::TimedOut => log::warn!(
                    "frame {}: detector timed out after {:?}",
                    frame.id,
                    self.config.call_timeout
                ),
                Prediction::Detections(_) => {}
            }

            let detections = prediction.into_detections();
            if detections.is_empty() {
                log::info!(
                    "frame {}: no predictions ({}/{})",
                    frame.id,
                    state.empty_predictions() + 1,
                    self.config.max_empty_predictions
                );
            }
            let end = state.observe(&frame.id, visible, !detections.is_empty());

            let result = FrameResult::new(
                frame.id.clone(),
                timestamp::normalize(frame.index, start_index, self.config.sampling_rate),
                detections,
            );
            on_frame(&result, &crop);
            aggregator.record(result)?;

            if let Some(end) = end {
                log::info!(
                    "match ended at frame {} (minimap and predictions both missing as of {})",
                    end,
                    frame.id
                );
                ended_at = Some(frame.id.clone());
                break;
            }
        }

        let (Some(region), Some(start), Some(reference)) =
            (state.region(), state.start_frame().map(str::to_string), reference)
        else {
            return Err(RunError::RegionNeverFound { examined });
        };

        let (end, termination) = match (state.end_frame(), ended_at) {
            (Some(end), Some(at_frame)) => (end.to_string(), Termination::Ended { at_frame }),
            _ => {
                log::info!("frames exhausted while tracking; window ends at {}", last_id);
                (last_id.clone(), Termination::Exhausted)
            }
        };

        let result = aggregator.finish(WindowMetadata::new(start, end), Some(last_id.as_str()))?;
        Ok(MatchRun {
            result,
            region,
            reference,
            termination,
        })
    }
}

fn describe(presence: &Presence) -> String {
    match presence {
        Presence::Visible(region) => format!("visible at {}", region),
        Presence::Missing(err) => err.to_string(),
        Presence::TimedOut => "localizer timed out".to_string(),
        Presence::Failed(msg) => msg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = TrackerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.stride, 2);
        assert_eq!(cfg.max_region_misses, 5);
        assert_eq!(cfg.max_empty_predictions, 5);
    }

    #[test]
    fn rejects_degenerate_config() {
        let bad = [
            TrackerConfig {
                sampling_rate: 0.0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                stride: 0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                confidence_threshold: 1.5,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                max_empty_predictions: 0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                call_timeout: Duration::ZERO,
                ..TrackerConfig::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{:?}", cfg);
        }
    }
}
