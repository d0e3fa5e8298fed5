use crate::models::{Detection, DetectionClass, LabelVocabulary, PlateCandidate, Verdict};

/// Tunables for [`interpret`].
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterConfig {
    /// Plate detections must score strictly above this to be considered
    pub plate_acceptance_threshold: f32,
    pub vocabulary: LabelVocabulary,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            plate_acceptance_threshold: 0.5,
            vocabulary: LabelVocabulary::default(),
        }
    }
}

/// Fold a detection set into a single [`Verdict`].
///
/// Helmet flags are plain ORs over the set. The plate is the highest-confidence
/// number-plate detection above the threshold; on equal confidence the one seen
/// first is kept.
pub fn interpret(detections: &[Detection], config: &InterpreterConfig) -> Verdict {
    let mut verdict = Verdict::default();

    for det in detections {
        match config.vocabulary.classify(&det.label) {
            DetectionClass::WithHelmet => verdict.helmet_present = true,
            DetectionClass::WithoutHelmet => verdict.no_helmet_present = true,
            DetectionClass::NumberPlate => {
                if det.confidence <= config.plate_acceptance_threshold {
                    continue;
                }
                let better = verdict
                    .best_plate
                    .map(|best| det.confidence > best.confidence)
                    .unwrap_or(true);
                if better {
                    verdict.best_plate = Some(PlateCandidate {
                        bbox: det.bbox,
                        confidence: det.confidence,
                    });
                }
            }
            DetectionClass::Other => {}
        }
    }

    verdict
}
