use anyhow::{anyhow, Result};

use crate::aggregate::MatchResult;
use crate::timestamp::parse_timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub frames: usize,
    pub detections: usize,
    /// Frames between the window bounds, inclusive.
    pub window_len: usize,
    /// False when `end_frame` names the last available frame rather than an
    /// emitted one.
    pub end_emitted: bool,
    pub digest: String,
}

/// Check the structural invariants of a persisted result.
pub fn verify_result(result: &MatchResult) -> Result<VerifyReport> {
    let end_emitted = verify_window_metadata(result)?;
    verify_timestamps(result)?;
    let detections = verify_predictions(result)?;
    Ok(VerifyReport {
        frames: result.frames.len(),
        detections,
        window_len: result.window().len(),
        end_emitted,
        digest: result.digest()?,
    })
}

/// Returns whether `end_frame` is one of the emitted frames.
pub fn verify_window_metadata(result: &MatchResult) -> Result<bool> {
    let position = |id: &str| result.frames.iter().position(|f| f.frame_id == id);
    match (&result.meta.start_frame, &result.meta.end_frame) {
        (None, None) => {
            if result.frames.is_empty() {
                Ok(false)
            } else {
                Err(anyhow!("frames were emitted but the window has no bounds"))
            }
        }
        (Some(start), Some(end)) => {
            let start_pos = position(start)
                .ok_or_else(|| anyhow!("start_frame {} is not an emitted frame", start))?;
            if start_pos != 0 {
                return Err(anyhow!("frames were emitted before start_frame {}", start));
            }
            match position(end) {
                Some(end_pos) if end_pos < start_pos => {
                    Err(anyhow!("end_frame {} precedes start_frame {}", end, start))
                }
                Some(_) => Ok(true),
                None => Ok(false),
            }
        }
        _ => Err(anyhow!(
            "window metadata is partially populated; start_frame and end_frame must be set together"
        )),
    }
}

pub fn verify_timestamps(result: &MatchResult) -> Result<()> {
    let mut previous = None;
    for (i, frame) in result.frames.iter().enumerate() {
        let seconds = parse_timestamp(&frame.timestamp)
            .map_err(|e| anyhow!("frame {}: {}", frame.frame_id, e))?;
        if i == 0 && seconds != 0 {
            return Err(anyhow!(
                "frame {}: first timestamp must be 00:00:00, found {}",
                frame.frame_id,
                frame.timestamp
            ));
        }
        if let Some(prev) = previous {
            if seconds < prev {
                return Err(anyhow!(
                    "frame {}: timestamp {} goes backwards",
                    frame.frame_id,
                    frame.timestamp
                ));
            }
        }
        previous = Some(seconds);
    }
    Ok(())
}

/// Returns the total number of detections.
pub fn verify_predictions(result: &MatchResult) -> Result<usize> {
    let mut total = 0;
    for frame in &result.frames {
        for d in &frame.predictions {
            if !(0.0..=1.0).contains(&d.confidence) {
                return Err(anyhow!(
                    "frame {}: confidence {} out of range for {}",
                    frame.frame_id,
                    d.confidence,
                    d.label
                ));
            }
            if d.x2 < d.x1 || d.y2 < d.y1 {
                return Err(anyhow!(
                    "frame {}: inverted box for {}",
                    frame.frame_id,
                    d.label
                ));
            }
            if d.label.is_empty() {
                return Err(anyhow!("frame {}: detection without a label", frame.frame_id));
            }
        }
        total += frame.predictions.len();
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{FrameResult, WindowMetadata};
    use crate::detect::Detection;

    fn result(meta: WindowMetadata, stamps: &[(&str, &str)]) -> MatchResult {
        MatchResult {
            frames: stamps
                .iter()
                .map(|(id, ts)| FrameResult::new(*id, *ts, vec![Detection::new(0, 0, 5, 5, "a", 0.8)]))
                .collect(),
            meta,
        }
    }

    #[test]
    fn accepts_well_formed_result() {
        let r = result(
            WindowMetadata::new("f0", "f9"),
            &[("f0", "00:00:00"), ("f2", "00:00:01"), ("f4", "00:00:02")],
        );
        let report = verify_result(&r).unwrap();
        assert_eq!(report.frames, 3);
        assert_eq!(report.detections, 3);
        assert!(!report.end_emitted);
        assert_eq!(report.window_len, 3);
    }

    #[test]
    fn rejects_partial_metadata_and_backwards_time() {
        let partial = WindowMetadata {
            start_frame: Some("f0".into()),
            end_frame: None,
        };
        assert!(verify_result(&result(partial, &[("f0", "00:00:00")])).is_err());

        let backwards = result(
            WindowMetadata::new("f0", "f2"),
            &[("f0", "00:00:00"), ("f1", "00:00:02"), ("f2", "00:00:01")],
        );
        assert!(verify_timestamps(&backwards).is_err());
    }

    #[test]
    fn rejects_timestamp_past_representable_range() {
        let huge = result(
            WindowMetadata::new("f0", "f1"),
            &[("f0", "00:00:00"), ("f1", "9999999999999999:00:00")],
        );
        assert!(verify_result(&huge).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut r = result(WindowMetadata::new("f0", "f0"), &[("f0", "00:00:00")]);
        r.frames[0].predictions[0].confidence = 1.2;
        assert!(verify_predictions(&r).is_err());
    }
}
