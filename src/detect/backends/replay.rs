use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::aggregate::META_KEY;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Replays recorded predictions keyed by frame id.
///
/// Accepts either a persisted `results.json` (entries with a `predictions`
/// list, `__meta__` ignored) or a bare `{ frame_id: [[x1,y1,x2,y2,label,conf], ...] }`
/// map. Frames without a recording yield no detections.
#[derive(Debug, Default)]
pub struct ReplayBackend {
    recorded: HashMap<String, Vec<Detection>>,
}

impl ReplayBackend {
    pub fn new(recorded: HashMap<String, Vec<Detection>>) -> Self {
        Self { recorded }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recorded predictions {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid recorded predictions {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(entries) = value else {
            return Err(anyhow!("expected a JSON object keyed by frame id"));
        };

        let mut recorded = HashMap::with_capacity(entries.len());
        for (frame_id, entry) in entries {
            if frame_id == META_KEY {
                continue;
            }
            let predictions = match entry {
                Value::Object(mut fields) => fields
                    .remove("predictions")
                    .ok_or_else(|| anyhow!("frame {} has no predictions field", frame_id))?,
                list @ Value::Array(_) => list,
                _ => return Err(anyhow!("frame {} has an unsupported entry", frame_id)),
            };
            let detections: Vec<Detection> = serde_json::from_value(predictions)
                .with_context(|| format!("frame {} predictions", frame_id))?;
            recorded.insert(frame_id, detections);
        }
        Ok(Self { recorded })
    }

    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&self, frame_id: &str, _crop: &RgbImage) -> Result<Vec<Detection>> {
        Ok(self.recorded.get(frame_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_results_file_entries() {
        let raw = r#"{
            "frame_0001.png": {"timestamp": "00:00:00", "predictions": [[1, 2, 3, 4, "ahri", 0.9]]},
            "frame_0003.png": {"timestamp": "00:00:01", "predictions": []},
            "__meta__": {"start_frame": "frame_0001.png", "end_frame": "frame_0003.png"}
        }"#;
        let backend = ReplayBackend::from_json(raw).unwrap();
        assert_eq!(backend.len(), 2);

        let crop = RgbImage::new(1, 1);
        let hits = backend.detect("frame_0001.png", &crop).unwrap();
        assert_eq!(hits, vec![Detection::new(1, 2, 3, 4, "ahri", 0.9)]);
        assert!(backend.detect("frame_0003.png", &crop).unwrap().is_empty());
        assert!(backend.detect("frame_0099.png", &crop).unwrap().is_empty());
    }

    #[test]
    fn replays_bare_prediction_map() {
        let raw = r#"{"f1": [[0, 0, 5, 5, "ping", 0.7]]}"#;
        let backend = ReplayBackend::from_json(raw).unwrap();
        let hits = backend.detect("f1", &RgbImage::new(1, 1)).unwrap();
        assert_eq!(hits[0].label, "ping");
    }

    #[test]
    fn rejects_non_object_input() {
        assert!(ReplayBackend::from_json("[1, 2]").is_err());
        assert!(ReplayBackend::from_json(r#"{"f1": 3}"#).is_err());
        assert!(ReplayBackend::from_json(r#"{"f1": {"timestamp": "00:00:00"}}"#).is_err());
    }
}
