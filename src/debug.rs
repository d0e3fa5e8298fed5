use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::models::{Detection, DetectionClass, LabelVocabulary};

/// Per-request debug dumps, written under `<output_dir>/<request_id>/`.
#[derive(Clone, Debug)]
pub struct DebugConfig {
    pub output_dir: PathBuf,
}

impl DebugConfig {
    /// The directory must be empty or non-existent.
    pub fn new(output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        Ok(Self { output_dir })
    }

    fn request_dir(&self, request_id: &str) -> Result<PathBuf> {
        let dir = self.output_dir.join(request_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Save the input image with every detection outlined, colored by class.
    pub fn save_detections(
        &self,
        request_id: &str,
        image: &DynamicImage,
        detections: &[Detection],
        vocabulary: &LabelVocabulary,
    ) -> Result<PathBuf> {
        let mut canvas = image.to_rgb8();
        for det in detections {
            let color = match vocabulary.classify(&det.label) {
                DetectionClass::WithHelmet => Rgb([0u8, 200, 0]),
                DetectionClass::WithoutHelmet => Rgb([230u8, 0, 0]),
                DetectionClass::NumberPlate => Rgb([255u8, 200, 0]),
                DetectionClass::Other => Rgb([128u8, 128, 128]),
            };
            let rect = Rect::at(det.bbox.x1() as i32, det.bbox.y1() as i32)
                .of_size(det.bbox.width(), det.bbox.height());
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        let path = self.request_dir(request_id)?.join("input.png");
        save(&DynamicImage::ImageRgb8(canvas), &path)?;
        Ok(path)
    }

    pub fn save_plate(&self, request_id: &str, crop: &DynamicImage) -> Result<PathBuf> {
        let path = self.request_dir(request_id)?.join("plate.png");
        save(crop, &path)?;
        Ok(path)
    }
}

fn save(image: &DynamicImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))
}
