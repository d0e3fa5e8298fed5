use std::path::Path;

use image::DynamicImage;
use image::imageops::FilterType;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use tracing::{debug, info};

use crate::error::InferenceError;
use crate::models::{BoundingBox, Detection};

/// Black-box object detection capability.
///
/// Implementations must be stateless per call so one instance can serve
/// concurrent requests.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError>;
}

/// Parameters for [`YoloDetector`]
#[derive(Debug, Clone)]
pub struct YoloParams {
    /// Square model input size in pixels
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Class names in model output order
    pub labels: Vec<String>,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            labels: vec![
                "with-helmet".to_string(),
                "without-helmet".to_string(),
                "rider".to_string(),
                "number-plate".to_string(),
            ],
        }
    }
}

/// YOLOv8-style detector (single output of `4 + classes` rows per anchor) run with rten.
pub struct YoloDetector {
    model: Model,
    params: YoloParams,
}

struct Candidate {
    class_id: usize,
    score: f32,
    bbox: BoundingBox,
}

impl YoloDetector {
    pub fn load<P: AsRef<Path>>(model_path: P, params: YoloParams) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        if params.labels.is_empty() {
            anyhow::bail!("Detector needs at least one class label");
        }
        if !model_path.exists() {
            anyhow::bail!("Detector model not found: {}", model_path.display());
        }

        let model = Model::load_file(model_path)?;
        info!(
            path = %model_path.display(),
            classes = params.labels.len(),
            input_size = params.input_size,
            "Detector model loaded"
        );

        Ok(Self { model, params })
    }

    /// Resize to the model input and lay out as normalized NCHW.
    fn preprocess(&self, image: &DynamicImage) -> NdTensor<f32, 4> {
        let size = self.params.input_size;
        let resized = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        NdTensor::from_fn([1, 3, size as usize, size as usize], |[_, c, y, x]| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }

    fn decode(
        &self,
        output: &NdTensor<f32, 3>,
        img_width: u32,
        img_height: u32,
    ) -> Result<Vec<Candidate>, InferenceError> {
        let num_classes = self.params.labels.len();
        let attrs = 4 + num_classes;
        let [_, d1, d2] = output.shape();

        // Exports differ on whether anchors are the last or middle axis
        let (anchors, transposed) = if d1 == attrs {
            (d2, false)
        } else if d2 == attrs {
            (d1, true)
        } else {
            return Err(InferenceError::new(format!(
                "Detector output shape {:?} does not match {} classes",
                output.shape(),
                num_classes
            )));
        };
        let at = |anchor: usize, attr: usize| {
            if transposed {
                output[[0, anchor, attr]]
            } else {
                output[[0, attr, anchor]]
            }
        };

        let scale_x = img_width as f32 / self.params.input_size as f32;
        let scale_y = img_height as f32 / self.params.input_size as f32;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, at(anchor, 4 + c)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            if score < self.params.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
            let coords = [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ];
            if let Some(bbox) = BoundingBox::from_f32_clamped(coords, img_width, img_height) {
                candidates.push(Candidate {
                    class_id,
                    score,
                    bbox,
                });
            }
        }

        Ok(candidates)
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        let input = self.preprocess(image);

        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| InferenceError::new(format!("Detector inference failed: {}", e)))?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|e| InferenceError::new(format!("Unexpected detector output: {:?}", e)))?;

        let candidates = self.decode(&output, image.width(), image.height())?;
        let raw = candidates.len();
        let kept = nms(candidates, self.params.nms_threshold);
        debug!(raw, kept = kept.len(), "Detector post-processing done");

        Ok(kept
            .into_iter()
            .map(|c| Detection::new(self.params.labels[c.class_id].clone(), c.score, c.bbox))
            .collect())
    }
}

/// Class-wise non-maximum suppression. Output is ordered by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(&k.bbox, &cand.bbox) >= iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1().max(b.x1());
    let y1 = a.y1().max(b.y1());
    let x2 = a.x2().min(b.x2());
    let y2 = a.y2().min(b.y2());

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) as f32 * (y2 - y1) as f32
    } else {
        0.0
    };
    let union = a.area() as f32 + b.area() as f32 - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}
