use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::assembler::{Assessment, ClearReason, ViolationAssembler};
use crate::core::db::{ImageStore, Violation, ViolationRepository};
use crate::debug::DebugConfig;
use crate::detection::{
    InterpreterConfig, ObjectDetector, OcrsRecognizer, TextRecognizer, YoloDetector, YoloParams, interpret,
};
use crate::error::PipelineError;
use crate::models::{Detection, Verdict};
use crate::source::{DEFAULT_FETCH_TIMEOUT, ImageFetcher, ImageInput, ImageOrigin, ResolvedImage, resolve_image};

/// Detector and recognizer, loaded once per process and shared read-only by every request.
#[derive(Clone)]
pub struct ModelContext {
    detector: Arc<dyn ObjectDetector>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl ModelContext {
    pub fn new(detector: Arc<dyn ObjectDetector>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { detector, recognizer }
    }

    /// Load the production models. This is the cold-start cost; do it once at startup.
    pub fn load(detector_model: &Path, params: YoloParams, ocr_model_dir: &Path) -> anyhow::Result<Self> {
        let detector = YoloDetector::load(detector_model, params)?;
        let recognizer = OcrsRecognizer::load(ocr_model_dir)?;
        Ok(Self::new(Arc::new(detector), Arc::new(recognizer)))
    }
}

/// Per-process pipeline settings.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub interpreter: InterpreterConfig,
    pub fetch_timeout: Duration,
    pub debug: Option<DebugConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            debug: None,
        }
    }
}

/// One violation check.
#[derive(Debug, Clone)]
pub struct ViolationRequest {
    pub image: ImageInput,
    /// Authenticated caller; `None` is recorded as "anonymous"
    pub caller_identity: Option<String>,
}

impl ViolationRequest {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            image: ImageInput::Url(url.into()),
            caller_identity: None,
        }
    }

    pub fn inline(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            image: ImageInput::Inline {
                bytes,
                content_type,
                file_name: None,
            },
            caller_identity: None,
        }
    }

    pub fn with_caller(mut self, caller_identity: impl Into<String>) -> Self {
        self.caller_identity = Some(caller_identity.into());
        self
    }

    /// Build from the loose request shape where exactly one of URL or inline image must be present.
    pub fn from_parts(
        image_url: Option<String>,
        inline: Option<(Vec<u8>, Option<String>)>,
        caller_identity: Option<String>,
    ) -> Result<Self, PipelineError> {
        let image_url = image_url.filter(|url| !url.trim().is_empty());
        let mut request = match (image_url, inline) {
            (Some(url), None) => Self::url(url),
            (None, Some((bytes, content_type))) => Self::inline(bytes, content_type),
            (None, None) => return Err(PipelineError::ImageUnavailable("No image provided".to_string())),
            (Some(_), Some(_)) => {
                return Err(PipelineError::ImageUnavailable(
                    "Provide either an image URL or an uploaded image, not both".to_string(),
                ));
            }
        };
        request.caller_identity = caller_identity;
        Ok(request)
    }
}

/// Stages of one run, in order. Recognizing and Persisting are skipped when the verdict does not call for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvingImage,
    Detecting,
    Interpreting,
    Recognizing,
    Persisting,
    Responding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvingImage => "resolving_image",
            Stage::Detecting => "detecting",
            Stage::Interpreting => "interpreting",
            Stage::Recognizing => "recognizing",
            Stage::Persisting => "persisting",
            Stage::Responding => "responding",
        };
        f.write_str(name)
    }
}

/// Successful end of a run.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The violation was durably stored
    Recorded(Violation),
    Clear(ClearReason),
}

/// External response contract. The `violation` flag is implied by the variant
/// and written during serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationResponse {
    Violation {
        plate_text: String,
        confidence: f32,
        message: String,
    },
    Clear {
        message: String,
    },
    Failed {
        error: String,
    },
}

impl Serialize for ViolationResponse {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        match self {
            ViolationResponse::Violation {
                plate_text,
                confidence,
                message,
            } => {
                let mut state = serializer.serialize_struct("ViolationResponse", 4)?;
                state.serialize_field("violation", &true)?;
                state.serialize_field("plateText", plate_text)?;
                state.serialize_field("confidence", confidence)?;
                state.serialize_field("message", message)?;
                state.end()
            }
            ViolationResponse::Clear { message } => {
                let mut state = serializer.serialize_struct("ViolationResponse", 2)?;
                state.serialize_field("violation", &false)?;
                state.serialize_field("message", message)?;
                state.end()
            }
            ViolationResponse::Failed { error } => {
                let mut state = serializer.serialize_struct("ViolationResponse", 2)?;
                state.serialize_field("error", error)?;
                state.serialize_field("violation", &false)?;
                state.end()
            }
        }
    }
}

impl ViolationResponse {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Recorded(violation) => ViolationResponse::Violation {
                plate_text: violation.plate_text.clone(),
                confidence: violation.plate_confidence as f32,
                message: "Violation recorded".to_string(),
            },
            Outcome::Clear(reason) => {
                let message = match reason {
                    ClearReason::NoViolationCandidate => "No violation detected",
                    ClearReason::NoPlate => "No violation recorded: license plate not detected",
                    ClearReason::NoPlateText => "No violation recorded: license plate could not be read",
                };
                ViolationResponse::Clear {
                    message: message.to_string(),
                }
            }
        }
    }

    pub fn from_error(err: &PipelineError) -> Self {
        ViolationResponse::Failed {
            error: err.public_message().to_string(),
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, ViolationResponse::Violation { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ViolationResponse::Failed { .. })
    }
}

/// Request-scoped orchestration of resolve → detect → interpret → recognize → persist.
pub struct ViolationPipeline<'m, F, S> {
    models: &'m ModelContext,
    fetcher: F,
    store: S,
    config: PipelineConfig,
}

fn log_failure(stage: Stage) -> impl Fn(&PipelineError) {
    move |err| error!(%stage, kind = err.kind(), error = %err, "Violation check failed")
}

impl<'m, F, S> ViolationPipeline<'m, F, S>
where
    F: ImageFetcher,
    S: ViolationRepository + ImageStore,
{
    pub fn new(models: &'m ModelContext, fetcher: F, store: S, config: PipelineConfig) -> Self {
        Self {
            models,
            fetcher,
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the pipeline and translate any failure into the uniform error response.
    pub async fn handle(&self, request: ViolationRequest) -> ViolationResponse {
        match self.process(request).await {
            Ok(outcome) => ViolationResponse::from_outcome(&outcome),
            Err(err) => ViolationResponse::from_error(&err),
        }
    }

    /// Run the pipeline for one request. A `Recorded` outcome is only returned once the
    /// record has been written.
    pub async fn process(&self, request: ViolationRequest) -> Result<Outcome, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("violation_check", %request_id);
        self.run(request, &request_id).instrument(span).await
    }

    async fn run(&self, request: ViolationRequest, request_id: &str) -> Result<Outcome, PipelineError> {
        let ViolationRequest {
            image: input,
            caller_identity,
        } = request;
        info!(
            source = if matches!(input, ImageInput::Url(_)) { "url" } else { "upload" },
            "Violation check started"
        );

        debug!(stage = %Stage::ResolvingImage);
        let ResolvedImage {
            image,
            bytes,
            format,
            origin,
        } = resolve_image(input, &self.fetcher, self.config.fetch_timeout)
            .await
            .inspect_err(log_failure(Stage::ResolvingImage))?;
        info!(width = image.width(), height = image.height(), "Image resolved");
        let image = Arc::new(image);

        debug!(stage = %Stage::Detecting);
        let detections = self.detect(Arc::clone(&image)).await.inspect_err(log_failure(Stage::Detecting))?;

        debug!(stage = %Stage::Interpreting);
        let verdict = interpret(&detections, &self.config.interpreter);
        info!(
            detections = detections.len(),
            helmet = verdict.helmet_present,
            no_helmet = verdict.no_helmet_present,
            plate_confidence = verdict.best_plate_confidence(),
            "Detections interpreted"
        );
        self.dump_debug(request_id, &image, &detections, &verdict);

        let assessment = if verdict.is_violation_candidate() {
            debug!(stage = %Stage::Recognizing);
            self.recognize(verdict, Arc::clone(&image))
                .await
                .inspect_err(log_failure(Stage::Recognizing))?
        } else {
            Assessment::Clear(ViolationAssembler::clear_reason(&verdict))
        };

        let plate = match assessment {
            Assessment::Violation { plate } => plate,
            Assessment::Clear(reason) => {
                debug!(stage = %Stage::Responding);
                info!(?reason, "No violation");
                return Ok(Outcome::Clear(reason));
            }
        };

        debug!(stage = %Stage::Persisting);
        let stored = self
            .persist(&plate, caller_identity.as_deref(), origin, &bytes, format)
            .await
            .inspect_err(log_failure(Stage::Persisting))?;

        debug!(stage = %Stage::Responding);
        info!(violation_id = %stored.id, plate = %stored.plate_text, "Violation recorded");
        Ok(Outcome::Recorded(stored))
    }

    async fn detect(&self, image: Arc<DynamicImage>) -> Result<Vec<Detection>, PipelineError> {
        let detector = Arc::clone(&self.models.detector);
        let detections = tokio::task::spawn_blocking(move || detector.detect(&image))
            .await
            .map_err(|e| PipelineError::Unexpected(format!("Detector task failed: {}", e)))??;
        Ok(detections)
    }

    async fn recognize(&self, verdict: Verdict, image: Arc<DynamicImage>) -> Result<Assessment, PipelineError> {
        let recognizer = Arc::clone(&self.models.recognizer);
        let assessment =
            tokio::task::spawn_blocking(move || ViolationAssembler::assess(&verdict, &image, recognizer.as_ref()))
                .await
                .map_err(|e| PipelineError::Unexpected(format!("Recognizer task failed: {}", e)))??;
        Ok(assessment)
    }

    async fn persist(
        &self,
        plate: &crate::models::RecognizedText,
        caller_identity: Option<&str>,
        origin: ImageOrigin,
        bytes: &[u8],
        format: Option<ImageFormat>,
    ) -> Result<Violation, PipelineError> {
        let (image_reference, uploaded) = match origin {
            ImageOrigin::Url(url) => (url, false),
            ImageOrigin::Upload { file_name } => {
                let extension = upload_extension(format, file_name.as_deref());
                let reference = self
                    .store
                    .store_image(bytes, &extension)
                    .await
                    .map_err(|e| PipelineError::PersistenceUnavailable(format!("{:#}", e)))?;
                (reference, true)
            }
        };

        let appended = match ViolationAssembler::build_record(plate, caller_identity, &image_reference) {
            Ok(record) => self
                .store
                .append(&record)
                .await
                .map_err(|e| PipelineError::PersistenceUnavailable(format!("{:#}", e))),
            Err(e) => Err(e),
        };

        // An upload is only kept when a record points at it
        if appended.is_err() && uploaded {
            if let Err(e) = self.store.remove_image(&image_reference).await {
                warn!(image = %image_reference, error = %e, "Failed to remove unrecorded upload");
            }
        }
        appended
    }

    fn dump_debug(&self, request_id: &str, image: &DynamicImage, detections: &[Detection], verdict: &Verdict) {
        let Some(debug_config) = &self.config.debug else {
            return;
        };

        let vocabulary = &self.config.interpreter.vocabulary;
        if let Err(e) = debug_config.save_detections(request_id, image, detections, vocabulary) {
            warn!(error = %e, "Failed to save debug detections");
        }
        if let Some(crop) = ViolationAssembler::plate_crop(verdict, image) {
            if let Err(e) = debug_config.save_plate(request_id, &crop) {
                warn!(error = %e, "Failed to save debug plate crop");
            }
        }
    }
}

/// File extension for a stored upload: decoded format first, then the uploaded name.
fn upload_extension(format: Option<ImageFormat>, file_name: Option<&str>) -> String {
    format
        .and_then(|f| f.extensions_str().first().copied())
        .map(str::to_string)
        .or_else(|| {
            file_name
                .and_then(|name| Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string())
}
