use std::future::Future;

use serde::Serialize;
use time::OffsetDateTime;

pub const ANONYMOUS_USER: &str = "anonymous";
pub const VIOLATION_TYPE_NO_HELMET: &str = "No Helmet";

/// A persisted violation. Only the repository can construct one, and there is
/// no way to change or remove it afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub id: String,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub image_reference: String,
    pub plate_text: String,
    pub plate_confidence: f64,
    pub has_helmet: bool,
    pub violation_type: String,
    #[serde(skip)]
    pub(super) _guard: (),
}

/// A violation ready to be appended. Timestamp and id are assigned at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewViolation {
    pub user_id: String,
    pub image_reference: String,
    pub plate_text: String,
    pub plate_confidence: f64,
    pub has_helmet: bool,
    pub violation_type: String,
}

impl NewViolation {
    /// The single rule this crate records: rider without a helmet, plate read.
    pub fn no_helmet(
        user_id: Option<&str>,
        image_reference: impl Into<String>,
        plate_text: impl Into<String>,
        plate_confidence: f32,
    ) -> Self {
        let user_id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS_USER);
        Self {
            user_id: user_id.to_string(),
            image_reference: image_reference.into(),
            plate_text: plate_text.into(),
            plate_confidence: plate_confidence as f64,
            has_helmet: false,
            violation_type: VIOLATION_TYPE_NO_HELMET.to_string(),
        }
    }
}

/// Append-only violation storage.
pub trait ViolationRepository {
    /// Write one record; every call creates a new one.
    fn append(&self, violation: &NewViolation) -> impl Future<Output = anyhow::Result<Violation>> + Send;
    fn get_violation_by_id(&self, id: &str) -> impl Future<Output = anyhow::Result<Option<Violation>>> + Send;
    fn list_violations(&self) -> impl Future<Output = anyhow::Result<Vec<Violation>>> + Send;
    fn count_violations(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Binary storage for uploaded images.
pub trait ImageStore {
    /// Store `bytes` and return the reference to record, e.g. `violations/<uuid>.jpg`.
    fn store_image(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;

    /// Delete an image written by `store_image` that ended up with no record.
    fn remove_image(&self, reference: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}
