use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::InferenceError;
use crate::models::RecognizedText;

/// Black-box text recognition capability, run on a cropped plate region.
pub trait TextRecognizer: Send + Sync {
    /// `Ok(None)` means nothing legible was found.
    fn recognize(&self, crop: &DynamicImage) -> Result<Option<RecognizedText>, InferenceError>;
}

/// Standard ocrs model cache location (`~/.cache/ocrs`).
pub fn default_model_dir() -> anyhow::Result<PathBuf> {
    let home_dir = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
    Ok(Path::new(&home_dir).join(".cache/ocrs"))
}

/// Initialize the OCR engine from `text-detection.rten` and `text-recognition.rten` in `model_dir`.
pub fn init_ocr_engine(model_dir: &Path) -> anyhow::Result<OcrEngine> {
    let detection_model_path = model_dir.join("text-detection.rten");
    let recognition_model_path = model_dir.join("text-recognition.rten");

    if !detection_model_path.exists() || !recognition_model_path.exists() {
        anyhow::bail!(
            "OCR models not found. Please run: ocrs-cli --help (or download models manually)\n\
             Expected locations:\n  - {}\n  - {}",
            detection_model_path.display(),
            recognition_model_path.display()
        );
    }

    let detection_model = Model::load_file(&detection_model_path)?;
    let recognition_model = Model::load_file(&recognition_model_path)?;

    let engine = OcrEngine::new(OcrEngineParams {
        detection_model: Some(detection_model),
        recognition_model: Some(recognition_model),
        ..Default::default()
    })?;

    info!(dir = %model_dir.display(), "OCR engine initialized");
    Ok(engine)
}

/// Reduce raw OCR output to a single-line plate string: uppercase ASCII alphanumerics only.
pub fn normalize_plate_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Share of non-whitespace characters that survive plate normalization.
///
/// ocrs does not report per-character probabilities, so this measures how well
/// the read conforms to the plate alphabet instead.
pub fn plate_conformance(raw: &str) -> f32 {
    let total = raw.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let kept = raw.chars().filter(|c| c.is_ascii_alphanumeric()).count();
    kept as f32 / total as f32
}

/// [`TextRecognizer`] backed by ocrs.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    pub fn new(engine: OcrEngine) -> Self {
        Self { engine }
    }

    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(init_ocr_engine(model_dir)?))
    }
}

impl TextRecognizer for OcrsRecognizer {
    fn recognize(&self, crop: &DynamicImage) -> Result<Option<RecognizedText>, InferenceError> {
        let img = crop.to_rgb8();

        let img_source = ImageSource::from_bytes(img.as_raw(), img.dimensions())
            .map_err(|e| InferenceError::new(format!("Invalid OCR input: {}", e)))?;
        let ocr_input = self
            .engine
            .prepare_input(img_source)
            .map_err(|e| InferenceError::new(format!("OCR preparation failed: {}", e)))?;

        let word_rects = self
            .engine
            .detect_words(&ocr_input)
            .map_err(|e| InferenceError::new(format!("OCR word detection failed: {}", e)))?;
        let line_rects = self.engine.find_text_lines(&ocr_input, &word_rects);
        let lines = self
            .engine
            .recognize_text(&ocr_input, &line_rects)
            .map_err(|e| InferenceError::new(format!("OCR recognition failed: {}", e)))?;

        // Plates are read as one line; multi-row plates are joined top to bottom
        let raw: String = lines
            .iter()
            .flatten()
            .map(|line| line.to_string())
            .collect::<Vec<_>>()
            .join("");
        debug!(raw = %raw.trim(), lines = lines.len(), "OCR raw output");

        let text = normalize_plate_text(&raw);
        if text.is_empty() {
            return Ok(None);
        }

        Ok(Some(RecognizedText {
            confidence: plate_conformance(&raw),
            text,
        }))
    }
}
