//! Assembly of per-frame results and window metadata into one result.
//!
//! The persisted form is a single JSON object keyed by frame id, in frame
//! order, followed by the reserved [`META_KEY`] entry:
//!
//! ```json
//! {
//!   "frame_0001.png": { "timestamp": "00:00:00", "predictions": [[1, 2, 30, 40, "ahri", 0.87]] },
//!   "__meta__": { "start_frame": "frame_0001.png", "end_frame": "frame_0001.png" }
//! }
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::detect::Detection;

/// Reserved key holding [`WindowMetadata`].
pub const META_KEY: &str = "__meta__";

/// Output record for one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Carried by the map key when persisted.
    #[serde(skip)]
    pub frame_id: String,
    pub timestamp: String,
    pub predictions: Vec<Detection>,
}

impl FrameResult {
    pub fn new(frame_id: impl Into<String>, timestamp: impl Into<String>, predictions: Vec<Detection>) -> Self {
        Self {
            frame_id: frame_id.into(),
            timestamp: timestamp.into(),
            predictions,
        }
    }
}

/// Match window bounds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMetadata {
    pub start_frame: Option<String>,
    pub end_frame: Option<String>,
}

impl WindowMetadata {
    pub fn new(start_frame: impl Into<String>, end_frame: impl Into<String>) -> Self {
        Self {
            start_frame: Some(start_frame.into()),
            end_frame: Some(end_frame.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("frame {0} was recorded twice")]
    DuplicateFrame(String),
    #[error("window metadata must set both start_frame and end_frame or neither")]
    PartialWindow,
    #[error("start_frame {0} is not an emitted frame")]
    UnknownStartFrame(String),
    #[error("end_frame {0} is neither an emitted frame nor the last available frame")]
    UnknownEndFrame(String),
}

/// Collects frame results for one run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    frames: Vec<FrameResult>,
    seen: HashSet<String>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: FrameResult) -> Result<(), AggregateError> {
        if !self.seen.insert(result.frame_id.clone()) {
            return Err(AggregateError::DuplicateFrame(result.frame_id));
        }
        self.frames.push(result);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Close the result with its window bounds.
    ///
    /// `last_available` is the id of the final frame in the source sequence,
    /// which may legitimately be the end bound without having been emitted.
    pub fn finish(
        self,
        meta: WindowMetadata,
        last_available: Option<&str>,
    ) -> Result<MatchResult, AggregateError> {
        match (&meta.start_frame, &meta.end_frame) {
            (None, None) => {}
            (Some(start), Some(end)) => {
                if !self.seen.contains(start) {
                    return Err(AggregateError::UnknownStartFrame(start.clone()));
                }
                if !self.seen.contains(end) && last_available != Some(end.as_str()) {
                    return Err(AggregateError::UnknownEndFrame(end.clone()));
                }
            }
            _ => return Err(AggregateError::PartialWindow),
        }
        Ok(MatchResult {
            frames: self.frames,
            meta,
        })
    }
}

/// Finished result of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchResult {
    pub frames: Vec<FrameResult>,
    pub meta: WindowMetadata,
}

impl MatchResult {
    pub fn get(&self, frame_id: &str) -> Option<&FrameResult> {
        self.frames.iter().find(|f| f.frame_id == frame_id)
    }

    pub fn frame_ids(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().map(|f| f.frame_id.as_str())
    }

    /// Frames between `start_frame` and `end_frame`, inclusive.
    ///
    /// Falls back to every frame when either bound is not an emitted key.
    pub fn window(&self) -> &[FrameResult] {
        let position = |id: &Option<String>| {
            id.as_deref()
                .and_then(|id| self.frames.iter().position(|f| f.frame_id == id))
        };
        match (position(&self.meta.start_frame), position(&self.meta.end_frame)) {
            (Some(start), Some(end)) if start <= end => &self.frames[start..=end],
            _ => &self.frames,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// SHA-256 hex digest of the compact JSON encoding.
    pub fn digest(&self) -> serde_json::Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

impl Serialize for MatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.frames.len() + 1))?;
        for frame in &self.frames {
            map.serialize_entry(&frame.frame_id, frame)?;
        }
        map.serialize_entry(META_KEY, &self.meta)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for MatchResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MatchResultVisitor)
    }
}

struct MatchResultVisitor;

impl<'de> Visitor<'de> for MatchResultVisitor {
    type Value = MatchResult;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of frame ids to frame results with a __meta__ entry")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MatchResult, A::Error> {
        let mut frames: Vec<FrameResult> = Vec::new();
        let mut seen = HashSet::new();
        let mut meta = None;
        while let Some(key) = access.next_key::<String>()? {
            if key == META_KEY {
                if meta.is_some() {
                    return Err(de::Error::duplicate_field(META_KEY));
                }
                meta = Some(access.next_value::<WindowMetadata>()?);
                continue;
            }
            if !seen.insert(key.clone()) {
                return Err(de::Error::custom(format!("duplicate frame id {}", key)));
            }
            let mut frame: FrameResult = access.next_value()?;
            frame.frame_id = key;
            frames.push(frame);
        }
        let meta = meta.ok_or_else(|| de::Error::missing_field(META_KEY))?;
        Ok(MatchResult { frames, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, ts: &str) -> FrameResult {
        FrameResult::new(id, ts, vec![Detection::new(1, 2, 3, 4, "ahri", 0.9)])
    }

    fn sample() -> MatchResult {
        let mut agg = ResultAggregator::new();
        agg.record(frame("f02", "00:00:00")).unwrap();
        agg.record(frame("f01", "00:00:01")).unwrap();
        agg.finish(WindowMetadata::new("f02", "f01"), Some("f09"))
            .unwrap()
    }

    #[test]
    fn meta_entry_is_serialized_last_and_frames_keep_order() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(
            json,
            concat!(
                r#"{"f02":{"timestamp":"00:00:00","predictions":[[1,2,3,4,"ahri",0.9]]},"#,
                r#""f01":{"timestamp":"00:00:01","predictions":[[1,2,3,4,"ahri",0.9]]},"#,
                r#""__meta__":{"start_frame":"f02","end_frame":"f01"}}"#
            )
        );
        let back = MatchResult::from_json(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn aborted_window_serializes_nulls() {
        let result = ResultAggregator::new()
            .finish(WindowMetadata::default(), None)
            .unwrap();
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"__meta__":{"start_frame":null,"end_frame":null}}"#
        );
    }

    #[test]
    fn rejects_duplicates_and_inconsistent_metadata() {
        let mut agg = ResultAggregator::new();
        agg.record(frame("a", "00:00:00")).unwrap();
        assert_eq!(
            agg.record(frame("a", "00:00:00")),
            Err(AggregateError::DuplicateFrame("a".into()))
        );

        let partial = WindowMetadata {
            start_frame: Some("a".into()),
            end_frame: None,
        };
        let mut agg = ResultAggregator::new();
        agg.record(frame("a", "00:00:00")).unwrap();
        assert_eq!(agg.finish(partial, None), Err(AggregateError::PartialWindow));

        let mut agg = ResultAggregator::new();
        agg.record(frame("a", "00:00:00")).unwrap();
        assert_eq!(
            agg.finish(WindowMetadata::new("zz", "a"), None),
            Err(AggregateError::UnknownStartFrame("zz".into()))
        );

        let mut agg = ResultAggregator::new();
        agg.record(frame("a", "00:00:00")).unwrap();
        assert_eq!(
            agg.finish(WindowMetadata::new("a", "b"), Some("c")),
            Err(AggregateError::UnknownEndFrame("b".into()))
        );
    }

    #[test]
    fn missing_meta_fails_to_parse() {
        assert!(MatchResult::from_json(r#"{"a":{"timestamp":"00:00:00","predictions":[]}}"#).is_err());
    }

    #[test]
    fn window_trims_to_bounds() {
        let mut agg = ResultAggregator::new();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            agg.record(frame(id, &format!("00:00:0{}", i))).unwrap();
        }
        let mut result = agg.finish(WindowMetadata::new("a", "c"), None).unwrap();
        let ids: Vec<&str> = result.window().iter().map(|f| f.frame_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        result.meta.end_frame = Some("last".into());
        assert_eq!(result.window().len(), 4);
    }

    #[test]
    fn digest_is_stable() {
        let a = sample().digest().unwrap();
        assert_eq!(a, sample().digest().unwrap());
        assert_eq!(a.len(), 64);
    }
}
