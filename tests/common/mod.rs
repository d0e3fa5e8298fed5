mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from helmetcheck for tests
#[allow(unused_imports)]
pub use helmetcheck::core::db::{ImageStore, NewViolation, Violation, ViolationDb, ViolationRepository};
#[allow(unused_imports)]
pub use helmetcheck::{
    BoundingBox, ClearReason, Detection, FetchError, ImageInput, InferenceError, ModelContext, Outcome,
    PipelineConfig, PipelineError, RecognizedText, ViolationPipeline, ViolationRequest, ViolationResponse,
};
