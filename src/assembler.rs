use image::DynamicImage;
use tracing::{debug, warn};

use crate::core::db::NewViolation;
use crate::detection::TextRecognizer;
use crate::detection::ocr::normalize_plate_text;
use crate::error::{InferenceError, PipelineError};
use crate::models::{RecognizedText, Verdict};

/// What the assembler concluded for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// No helmet and a readable plate; `plate` carries the recognizer's text and confidence
    Violation { plate: RecognizedText },
    Clear(ClearReason),
}

/// Why an image did not produce a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// Nobody without a helmet was detected
    NoViolationCandidate,
    /// A rider without a helmet, but no plate above the acceptance threshold
    NoPlate,
    /// Plate region found but no text could be read from it
    NoPlateText,
}

/// Applies the violation rule to a verdict and reads the plate when it holds.
pub struct ViolationAssembler;

impl ViolationAssembler {
    /// The plate crop for a violation-candidate verdict, if any.
    pub fn plate_crop(verdict: &Verdict, image: &DynamicImage) -> Option<DynamicImage> {
        if !verdict.no_helmet_present {
            return None;
        }
        verdict.best_plate.and_then(|plate| plate.bbox.crop(image))
    }

    /// Decide the outcome for `verdict`. The recognizer is called only when
    /// there is no helmet and a plate crop exists.
    pub fn assess(
        verdict: &Verdict,
        image: &DynamicImage,
        recognizer: &dyn TextRecognizer,
    ) -> Result<Assessment, InferenceError> {
        if !verdict.is_violation_candidate() {
            return Ok(Assessment::Clear(Self::clear_reason(verdict)));
        }
        let Some(crop) = Self::plate_crop(verdict, image) else {
            return Ok(Assessment::Clear(ClearReason::NoPlate));
        };
        Self::read_plate(&crop, recognizer)
    }

    /// Why a verdict that is not a violation candidate is clear. Needs no recognizer.
    pub fn clear_reason(verdict: &Verdict) -> ClearReason {
        if verdict.no_helmet_present {
            ClearReason::NoPlate
        } else {
            ClearReason::NoViolationCandidate
        }
    }

    /// Run the recognizer on an already-cut plate crop.
    pub fn read_plate(crop: &DynamicImage, recognizer: &dyn TextRecognizer) -> Result<Assessment, InferenceError> {
        let recognized = recognizer.recognize(crop)?;
        Ok(Self::from_recognized(recognized))
    }

    /// Map recognizer output to an assessment. Text that normalizes to nothing is a non-finding.
    pub fn from_recognized(recognized: Option<RecognizedText>) -> Assessment {
        let Some(recognized) = recognized else {
            warn!("Plate region found but recognizer returned no text");
            return Assessment::Clear(ClearReason::NoPlateText);
        };

        let text = normalize_plate_text(&recognized.text);
        if text.is_empty() {
            warn!(raw = %recognized.text, "Plate text empty after normalization");
            return Assessment::Clear(ClearReason::NoPlateText);
        }

        debug!(plate = %text, confidence = recognized.confidence, "Plate recognized");
        Assessment::Violation {
            plate: RecognizedText {
                text,
                confidence: recognized.confidence.clamp(0.0, 1.0),
            },
        }
    }

    /// Build the record to persist for a violation assessment.
    pub fn build_record(
        plate: &RecognizedText,
        caller_identity: Option<&str>,
        image_reference: &str,
    ) -> Result<NewViolation, PipelineError> {
        if plate.text.is_empty() {
            return Err(PipelineError::Unexpected(
                "Refusing to build a violation without plate text".to_string(),
            ));
        }
        Ok(NewViolation::no_helmet(
            caller_identity,
            image_reference,
            plate.text.clone(),
            plate.confidence,
        ))
    }
}
