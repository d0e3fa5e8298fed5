#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helmetcheck::core::db::{ImageStore, NewViolation, Violation, ViolationDb, ViolationRepository};
use helmetcheck::detection::{ObjectDetector, TextRecognizer};
use helmetcheck::{
    BoundingBox, Detection, FetchError, ImageFetcher, InferenceError, ModelContext, RecognizedText,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use url::Url;

pub const TEST_IMAGE_WIDTH: u32 = 200;
pub const TEST_IMAGE_HEIGHT: u32 = 100;

/// PNG bytes of a 200x100 grey test image.
pub fn test_image_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(TEST_IMAGE_WIDTH, TEST_IMAGE_HEIGHT, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
    }));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode test image");
    buf.into_inner()
}

pub fn bbox(x1: u32, y1: u32, x2: u32, y2: u32) -> BoundingBox {
    BoundingBox::new(x1, y1, x2, y2).expect("valid test bbox")
}

pub fn det(label: &str, confidence: f32, bbox: BoundingBox) -> Detection {
    Detection::new(label, confidence, bbox)
}

/// Plate box used by most scenarios, inside the test image.
pub fn plate_box() -> BoundingBox {
    bbox(50, 60, 130, 90)
}

/// Detector that always returns the same detections and counts calls.
pub struct StaticDetector {
    result: Result<Vec<Detection>, String>,
    pub calls: AtomicUsize,
}

impl StaticDetector {
    pub fn new(detections: Vec<Detection>) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(detections),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(msg: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(msg.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ObjectDetector for StaticDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(InferenceError::new)
    }
}

/// Recognizer with a canned reply; remembers the size of every crop it was given.
pub struct StaticRecognizer {
    reply: Option<RecognizedText>,
    pub crops: Mutex<Vec<(u32, u32)>>,
}

impl StaticRecognizer {
    pub fn new(text: &str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(RecognizedText {
                text: text.to_string(),
                confidence,
            }),
            crops: Mutex::new(Vec::new()),
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            crops: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.crops.lock().unwrap().len()
    }
}

impl TextRecognizer for StaticRecognizer {
    fn recognize(&self, crop: &DynamicImage) -> Result<Option<RecognizedText>, InferenceError> {
        self.crops.lock().unwrap().push((crop.width(), crop.height()));
        Ok(self.reply.clone())
    }
}

pub fn models(detector: &Arc<StaticDetector>, recognizer: &Arc<StaticRecognizer>) -> ModelContext {
    ModelContext::new(detector.clone(), recognizer.clone())
}

/// Fetcher returning canned bytes or a canned failure.
pub struct StaticFetcher {
    reply: Result<Vec<u8>, FetchError>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn ok(bytes: Vec<u8>) -> Self {
        Self {
            reply: Ok(bytes),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn timing_out() -> Self {
        Self {
            reply: Err(FetchError::Timeout(Duration::from_secs(30))),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Eventually returns `bytes`, ignoring the timeout it is given.
    pub fn stalling(bytes: Vec<u8>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::ok(bytes)
        }
    }

    pub fn unused() -> Self {
        Self::ok(Vec::new())
    }
}

impl ImageFetcher for StaticFetcher {
    async fn get(&self, _url: &Url, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(bytes) => Ok(bytes.clone()),
            Err(FetchError::Timeout(d)) => Err(FetchError::Timeout(*d)),
            Err(FetchError::Status(s)) => Err(FetchError::Status(*s)),
            Err(FetchError::Network(m)) => Err(FetchError::Network(m.clone())),
        }
    }
}

/// Store whose record writes always fail. Image writes succeed and are tracked.
pub struct FailingStore {
    pub append_attempts: AtomicUsize,
    pub images: Mutex<Vec<String>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            append_attempts: AtomicUsize::new(0),
            images: Mutex::new(Vec::new()),
        }
    }
}

impl ViolationRepository for FailingStore {
    async fn append(&self, _violation: &NewViolation) -> anyhow::Result<Violation> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("database is locked")
    }

    async fn get_violation_by_id(&self, _id: &str) -> anyhow::Result<Option<Violation>> {
        Ok(None)
    }

    async fn list_violations(&self) -> anyhow::Result<Vec<Violation>> {
        Ok(Vec::new())
    }

    async fn count_violations(&self) -> anyhow::Result<u64> {
        Ok(0)
    }
}

impl ImageStore for FailingStore {
    async fn store_image(&self, _bytes: &[u8], extension: &str) -> anyhow::Result<String> {
        let reference = format!("violations/{}.{}", uuid::Uuid::new_v4(), extension);
        self.images.lock().unwrap().push(reference.clone());
        Ok(reference)
    }

    async fn remove_image(&self, reference: &str) -> anyhow::Result<()> {
        self.images.lock().unwrap().retain(|r| r != reference);
        Ok(())
    }
}

/// Creates a ViolationDb in a temporary directory.
/// Returns both the store and the temp directory (which must be kept alive).
pub async fn create_test_store() -> (ViolationDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let store = ViolationDb::new(dir.path().join("violations.db"), dir.path().join("images"))
        .await
        .expect("Failed to create test store");
    (store, dir)
}
