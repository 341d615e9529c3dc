//! Minimap region localization.
//!
//! The localizer searches the bottom-right corner of a frame for the largest
//! near-square closed outline. Geometry is used instead of a template so the
//! overlay can move or change skin between broadcasts. The call is
//! deterministic and keeps no state; presence hysteresis lives in the tracker.

use image::{imageops, GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::Frame;

/// Rectangle in full-frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Crop this region out of a frame. Clamped to the image bounds.
    pub fn crop(&self, image: &RgbImage) -> RgbImage {
        imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image()
    }

    /// Scale factors mapping region-local coordinates onto a canvas of the
    /// given size.
    pub fn scale_to(&self, canvas_width: u32, canvas_height: u32) -> (f32, f32) {
        let sx = if self.width == 0 {
            0.0
        } else {
            canvas_width as f32 / self.width as f32
        };
        let sy = if self.height == 0 {
            0.0
        } else {
            canvas_height as f32 / self.height as f32
        };
        (sx, sy)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x={} y={} w={} h={}",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocateError {
    #[error("minimap not found via contour detection")]
    NotFound,
    #[error("minimap score too low ({score} < {threshold})")]
    ScoreTooLow { score: u64, threshold: u64 },
    #[error("search area is empty for a {width}x{height} frame")]
    EmptySearchArea { width: u32, height: u32 },
}

/// Finds the minimap region in a frame.
pub trait Localizer: Send + Sync {
    fn locate(&self, frame: &Frame) -> Result<Region, LocateError>;
}

/// Tunables for `ContourLocalizer`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    /// Fraction of width and height searched, anchored at the bottom-right.
    pub search_fraction: f32,
    pub aspect_min: f32,
    pub aspect_max: f32,
    /// Candidates at or below this area are ignored.
    pub min_area: u64,
    /// Best candidate must reach this area to count as found.
    pub min_score: u64,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Radius of the morphological close applied to the edge map; 0 disables.
    pub edge_close_radius: u8,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            search_fraction: 0.3,
            aspect_min: 0.85,
            aspect_max: 1.15,
            min_area: 500,
            min_score: 40_000,
            blur_sigma: 1.1,
            canny_low: 30.0,
            canny_high: 150.0,
            edge_close_radius: 1,
        }
    }
}

impl LocatorSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.search_fraction > 0.0 && self.search_fraction <= 1.0) {
            anyhow::bail!("locator search_fraction must be in (0, 1]");
        }
        if !(self.aspect_min > 0.0 && self.aspect_min <= self.aspect_max) {
            anyhow::bail!("locator aspect band must satisfy 0 < aspect_min <= aspect_max");
        }
        if !(self.blur_sigma > 0.0) {
            anyhow::bail!("locator blur_sigma must be > 0");
        }
        if self.canny_low > self.canny_high {
            anyhow::bail!("locator canny_low must not exceed canny_high");
        }
        Ok(())
    }
}

/// Contour-geometry localizer.
#[derive(Clone, Debug, Default)]
pub struct ContourLocalizer {
    settings: LocatorSettings,
}

impl ContourLocalizer {
    /// Fails when `settings` do not pass [`LocatorSettings::validate`].
    pub fn new(settings: LocatorSettings) -> anyhow::Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &LocatorSettings {
        &self.settings
    }

    /// Locate the minimap in a full frame image.
    pub fn locate_image(&self, image: &RgbImage) -> Result<Region, LocateError> {
        let (width, height) = image.dimensions();
        let roi_w = (width as f32 * self.settings.search_fraction) as u32;
        let roi_h = (height as f32 * self.settings.search_fraction) as u32;
        if roi_w == 0 || roi_h == 0 {
            return Err(LocateError::EmptySearchArea { width, height });
        }
        let roi_x = width.saturating_sub(roi_w);
        let roi_y = height.saturating_sub(roi_h);

        let roi = imageops::crop_imm(image, roi_x, roi_y, roi_w, roi_h).to_image();
        let edges = self.edge_map(&imageops::grayscale(&roi));

        let mut best: Option<Region> = None;
        let mut best_score = 0u64;
        for contour in find_contours::<u32>(&edges) {
            if contour.parent.is_some() || contour.border_type != BorderType::Outer {
                continue;
            }
            let Some(rect) = bounding_rect(&contour.points) else {
                continue;
            };
            let area = rect.area();
            let aspect = rect.width as f32 / rect.height as f32;
            if aspect < self.settings.aspect_min || aspect > self.settings.aspect_max {
                continue;
            }
            if area <= self.settings.min_area {
                continue;
            }
            if area > best_score {
                best_score = area;
                best = Some(Region::new(
                    rect.x + roi_x,
                    rect.y + roi_y,
                    rect.width,
                    rect.height,
                ));
            }
        }

        let Some(region) = best else {
            return Err(LocateError::NotFound);
        };
        if best_score < self.settings.min_score {
            return Err(LocateError::ScoreTooLow {
                score: best_score,
                threshold: self.settings.min_score,
            });
        }
        Ok(region)
    }

    fn edge_map(&self, gray: &GrayImage) -> GrayImage {
        let blurred = imageproc::filter::gaussian_blur_f32(gray, self.settings.blur_sigma);
        let edges =
            imageproc::edges::canny(&blurred, self.settings.canny_low, self.settings.canny_high);
        if self.settings.edge_close_radius == 0 {
            edges
        } else {
            imageproc::morphology::close(&edges, Norm::LInf, self.settings.edge_close_radius)
        }
    }
}

impl Localizer for ContourLocalizer {
    fn locate(&self, frame: &Frame) -> Result<Region, LocateError> {
        self.locate_image(&frame.image)
    }
}

fn bounding_rect(points: &[imageproc::point::Point<u32>]) -> Option<Region> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Region::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn frame_with_square(x: i32, y: i32, w: u32, h: u32) -> RgbImage {
        let mut img = RgbImage::new(1600, 900);
        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), Rgb([200, 200, 200]));
        img
    }

    fn close(a: u32, b: u32, tol: u32) -> bool {
        a.abs_diff(b) <= tol
    }

    #[test]
    fn finds_square_overlay_in_corner() {
        let img = frame_with_square(1200, 650, 210, 210);
        let region = ContourLocalizer::default().locate_image(&img).unwrap();

        assert!(close(region.x, 1200, 4), "x={}", region.x);
        assert!(close(region.y, 650, 4), "y={}", region.y);
        assert!(close(region.width, 210, 6), "w={}", region.width);
        assert!(close(region.height, 210, 6), "h={}", region.height);
    }

    #[test]
    fn blank_frame_is_not_found() {
        let img = RgbImage::new(1600, 900);
        assert_eq!(
            ContourLocalizer::default().locate_image(&img),
            Err(LocateError::NotFound)
        );
    }

    #[test]
    fn small_square_scores_too_low() {
        let img = frame_with_square(1300, 700, 60, 60);
        match ContourLocalizer::default().locate_image(&img) {
            Err(LocateError::ScoreTooLow { score, threshold }) => {
                assert!(score < threshold);
                assert!(score > 500);
            }
            other => panic!("expected ScoreTooLow, got {:?}", other),
        }
    }

    #[test]
    fn elongated_box_is_rejected() {
        let img = frame_with_square(1150, 700, 320, 110);
        assert_eq!(
            ContourLocalizer::default().locate_image(&img),
            Err(LocateError::NotFound)
        );
    }

    #[test]
    fn overlay_outside_corner_is_ignored() {
        let img = frame_with_square(100, 100, 210, 210);
        assert_eq!(
            ContourLocalizer::default().locate_image(&img),
            Err(LocateError::NotFound)
        );
    }

    #[test]
    fn tiny_frame_has_empty_search_area() {
        let img = RgbImage::new(2, 2);
        assert!(matches!(
            ContourLocalizer::default().locate_image(&img),
            Err(LocateError::EmptySearchArea { .. })
        ));
    }

    #[test]
    fn constructor_rejects_invalid_settings() {
        let oversized = LocatorSettings {
            search_fraction: 1.5,
            ..LocatorSettings::default()
        };
        assert!(ContourLocalizer::new(oversized).is_err());

        let no_blur = LocatorSettings {
            blur_sigma: 0.0,
            ..LocatorSettings::default()
        };
        assert!(ContourLocalizer::new(no_blur).is_err());

        let localizer = ContourLocalizer::new(LocatorSettings::default()).unwrap();
        assert_eq!(
            localizer.locate_image(&RgbImage::new(1600, 900)),
            Err(LocateError::NotFound)
        );
    }

    #[test]
    fn region_scales_onto_canvas() {
        let region = Region::new(10, 10, 320, 160);
        assert_eq!(region.scale_to(640, 640), (2.0, 4.0));
        assert_eq!(Region::new(0, 0, 0, 0).scale_to(640, 640), (0.0, 0.0));
    }
}
