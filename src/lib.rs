pub mod assembler;
pub mod core;
pub mod debug;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod source;

pub use assembler::{Assessment, ClearReason, ViolationAssembler};
pub use error::{FetchError, InferenceError, PipelineError};
pub use models::{BoundingBox, Detection, DetectionClass, LabelVocabulary, PlateCandidate, RecognizedText, Verdict};
pub use pipeline::{
    ModelContext, Outcome, PipelineConfig, Stage, ViolationPipeline, ViolationRequest, ViolationResponse,
};
pub use source::{HttpFetcher, ImageFetcher, ImageInput};
