use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-image pixels. Always satisfies `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl BoundingBox {
    /// Returns `None` for degenerate boxes.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Self> {
        if x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    /// Build from float model coordinates, clamped to an image of the given size.
    pub fn from_f32_clamped(coords: [f32; 4], img_width: u32, img_height: u32) -> Option<Self> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v.round() as u32).min(max)
            }
        };
        Self::new(
            clamp(coords[0], img_width),
            clamp(coords[1], img_height),
            clamp(coords[2], img_width),
            clamp(coords[3], img_height),
        )
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Cut this region out of `img`, clipped to the image bounds.
    pub fn crop(&self, img: &DynamicImage) -> Option<DynamicImage> {
        if self.x1 >= img.width() || self.y1 >= img.height() {
            return None;
        }
        let width = self.width().min(img.width() - self.x1);
        let height = self.height().min(img.height() - self.y1);

        if width == 0 || height == 0 {
            return None;
        }

        Some(img.crop_imm(self.x1, self.y1, width, height))
    }
}

/// One labeled, confidence-scored box from the object detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Class name as reported by the detector
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Semantic class of a detection after vocabulary lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionClass {
    WithHelmet,
    WithoutHelmet,
    NumberPlate,
    Other,
}

/// Maps raw detector class names onto [`DetectionClass`].
///
/// Matching ignores case and treats `-`, `_` and spaces as the same separator,
/// so `"Without Helmet"`, `"without_helmet"` and `"without-helmet"` are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    pub with_helmet: String,
    pub without_helmet: String,
    pub number_plate: String,
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self {
            with_helmet: "with-helmet".to_string(),
            without_helmet: "without-helmet".to_string(),
            number_plate: "number-plate".to_string(),
        }
    }
}

fn canonical_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

impl LabelVocabulary {
    pub fn classify(&self, label: &str) -> DetectionClass {
        let label = canonical_label(label);
        if label == canonical_label(&self.without_helmet) {
            DetectionClass::WithoutHelmet
        } else if label == canonical_label(&self.with_helmet) {
            DetectionClass::WithHelmet
        } else if label == canonical_label(&self.number_plate) {
            DetectionClass::NumberPlate
        } else {
            DetectionClass::Other
        }
    }
}

/// The plate region chosen by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateCandidate {
    pub bbox: BoundingBox,
    /// Detector confidence of the plate box
    pub confidence: f32,
}

/// Interpreted decision state for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    pub helmet_present: bool,
    pub no_helmet_present: bool,
    pub best_plate: Option<PlateCandidate>,
}

impl Verdict {
    /// No helmet and a usable plate region.
    pub fn is_violation_candidate(&self) -> bool {
        self.no_helmet_present && self.best_plate.is_some()
    }

    pub fn best_plate_confidence(&self) -> f32 {
        self.best_plate.map(|p| p.confidence).unwrap_or(0.0)
    }
}

/// Output of the text recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_degenerate_boxes_rejected() {
        assert!(BoundingBox::new(10, 10, 10, 20).is_none());
        assert!(BoundingBox::new(10, 20, 30, 5).is_none());
        assert!(BoundingBox::new(0, 0, 1, 1).is_some());
    }

    #[test]
    fn test_from_f32_clamps_to_image() {
        let bbox = BoundingBox::from_f32_clamped([-5.0, 3.4, 120.0, 40.6], 100, 50).unwrap();
        assert_eq!((bbox.x1(), bbox.y1(), bbox.x2(), bbox.y2()), (0, 3, 100, 41));
        assert!(BoundingBox::from_f32_clamped([150.0, 0.0, 200.0, 10.0], 100, 50).is_none());
    }

    #[test]
    fn test_crop_clips_to_bounds() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(40, 30, |_, _| Rgb([0u8, 0, 0])));
        let crop = BoundingBox::new(30, 20, 60, 50).unwrap().crop(&img).unwrap();
        assert_eq!((crop.width(), crop.height()), (10, 10));
        assert!(BoundingBox::new(40, 0, 45, 5).unwrap().crop(&img).is_none());
    }

    #[test]
    fn test_vocabulary_normalizes_separators() {
        let vocab = LabelVocabulary::default();
        assert_eq!(vocab.classify("Without Helmet"), DetectionClass::WithoutHelmet);
        assert_eq!(vocab.classify("with_helmet"), DetectionClass::WithHelmet);
        assert_eq!(vocab.classify("NUMBER-PLATE"), DetectionClass::NumberPlate);
        assert_eq!(vocab.classify("rider"), DetectionClass::Other);
    }
}
