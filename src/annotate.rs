//! Review crops with detection boxes drawn on them.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

use crate::detect::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 64, 64]);

/// Draw every detection as a hollow rectangle. Boxes are clipped to the crop;
/// degenerate boxes are skipped.
pub fn draw_detections(crop: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = crop.clone();
    for d in detections {
        let x1 = d.x1.max(0);
        let y1 = d.y1.max(0);
        let x2 = d.x2.min(canvas.width() as i32 - 1);
        let y2 = d.y2.min(canvas.height() as i32 - 1);
        if x2 < x1 || y2 < y1 {
            continue;
        }
        let rect = Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32);
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
    }
    canvas
}

/// Writes annotated crops into one directory, named after the frame id.
pub struct Annotator {
    dir: PathBuf,
    written: usize,
}

impl Annotator {
    pub fn create<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create annotation dir {}", dir.display()))?;
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write(&mut self, frame_id: &str, crop: &RgbImage, detections: &[Detection]) -> Result<PathBuf> {
        let stem = Path::new(frame_id)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(frame_id);
        let path = self.dir.join(format!("{}.png", stem));
        draw_detections(crop, detections)
            .save(&path)
            .with_context(|| format!("failed to write annotated crop {}", path.display()))?;
        self.written += 1;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_box_outline_only() {
        let crop = RgbImage::new(20, 20);
        let out = draw_detections(&crop, &[Detection::new(2, 2, 10, 10, "a", 0.9)]);
        assert_eq!(*out.get_pixel(2, 2), BOX_COLOR);
        assert_eq!(*out.get_pixel(10, 6), BOX_COLOR);
        assert_eq!(*out.get_pixel(6, 6), Rgb([0, 0, 0]));
    }

    #[test]
    fn clips_and_skips_out_of_bounds_boxes() {
        let crop = RgbImage::new(8, 8);
        let out = draw_detections(
            &crop,
            &[
                Detection::new(-5, -5, 3, 3, "a", 0.9),
                Detection::new(20, 20, 30, 30, "b", 0.9),
            ],
        );
        assert_eq!(*out.get_pixel(0, 0), BOX_COLOR);
        assert_eq!(*out.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn writes_png_named_after_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut annotator = Annotator::create(dir.path().join("review")).unwrap();
        let path = annotator
            .write("frame_0003.png", &RgbImage::new(4, 4), &[])
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "frame_0003.png");
        assert!(path.exists());
        assert_eq!(annotator.written(), 1);
    }
}
