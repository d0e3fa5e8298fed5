use thiserror::Error;

/// Failure of a detector or recognizer call.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InferenceError(pub String);

impl InferenceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Failure while fetching a remote image.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Every way a single violation check can fail.
///
/// The `Display` text carries full detail for logs. Callers outside the
/// crate should only see [`PipelineError::public_message`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image unavailable: {0}")]
    ImageUnavailable(String),

    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Short summary suitable for the response body.
    pub fn public_message(&self) -> &'static str {
        match self {
            PipelineError::ImageUnavailable(_) => "Image could not be retrieved",
            PipelineError::ImageDecode(_) => "Image could not be decoded",
            PipelineError::Inference(_) => "Image analysis failed",
            PipelineError::PersistenceUnavailable(_) => "Violation could not be saved",
            PipelineError::Unexpected(_) => "An unexpected error occurred",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ImageUnavailable(_) => "ImageUnavailable",
            PipelineError::ImageDecode(_) => "ImageDecodeError",
            PipelineError::Inference(_) => "InferenceError",
            PipelineError::PersistenceUnavailable(_) => "PersistenceUnavailable",
            PipelineError::Unexpected(_) => "UnexpectedError",
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        PipelineError::ImageUnavailable(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::ImageDecode(err.to_string())
    }
}
