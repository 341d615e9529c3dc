use serde::{Deserialize, Serialize};

/// One labeled box in region-local pixel coordinates.
///
/// Serialized as a row `[x1, y1, x2, y2, label, confidence]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "DetectionRow", into = "DetectionRow")]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: String,
    /// 0..=1
    pub confidence: f32,
}

type DetectionRow = (i32, i32, i32, i32, String, f32);

impl From<DetectionRow> for Detection {
    fn from((x1, y1, x2, y2, label, confidence): DetectionRow) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            label,
            confidence,
        }
    }
}

impl From<Detection> for DetectionRow {
    fn from(d: Detection) -> Self {
        (d.x1, d.y1, d.x2, d.y2, d.label, d.confidence)
    }
}

impl Detection {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            label: label.into(),
            confidence,
        }
    }

    /// Box center, floored.
    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2).div_euclid(2), (self.y1 + self.y2).div_euclid(2))
    }

    /// Center mapped onto a canvas with the given scale factors.
    pub fn scaled_center(&self, scale: (f32, f32)) -> (i32, i32) {
        let (cx, cy) = self.center();
        ((cx as f32 * scale.0) as i32, (cy as f32 * scale.1) as i32)
    }

    fn rounded(mut self) -> Self {
        self.confidence = (self.confidence * 100.0).round() / 100.0;
        self
    }
}

/// Keep detections at or above `threshold`, with confidence rounded to two
/// decimals. Order is preserved.
pub fn filter_by_confidence(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence >= threshold)
        .map(Detection::rounded)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_row() {
        let d = Detection::new(1, 2, 30, 40, "ahri", 0.87);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"[1,2,30,40,"ahri",0.87]"#);
        let back: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn filter_drops_low_confidence_and_rounds() {
        let kept = filter_by_confidence(
            vec![
                Detection::new(0, 0, 4, 4, "a", 0.649),
                Detection::new(0, 0, 4, 4, "b", 0.65),
                Detection::new(0, 0, 4, 4, "c", 0.9172),
            ],
            0.65,
        );
        let labels: Vec<&str> = kept.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c"]);
        assert_eq!(kept[1].confidence, 0.92);
    }

    #[test]
    fn center_scales_onto_canvas() {
        let d = Detection::new(10, 20, 21, 40, "x", 0.9);
        assert_eq!(d.center(), (15, 30));
        assert_eq!(d.scaled_center((2.0, 0.5)), (30, 15));
    }
}
