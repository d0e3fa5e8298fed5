use std::future::Future;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use tracing::debug;
use url::Url;

use crate::error::{FetchError, PipelineError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("helmetcheck/", env!("CARGO_PKG_VERSION"));

/// Where the image for a request comes from.
#[derive(Debug, Clone)]
pub enum ImageInput {
    Inline {
        bytes: Vec<u8>,
        content_type: Option<String>,
        file_name: Option<String>,
    },
    Url(String),
}

/// Where a resolved image came from; used as the record's image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Remote reference, kept as-is
    Url(String),
    /// Inline upload; must be stored before it can be referenced
    Upload { file_name: Option<String> },
}

/// A decoded image plus the bytes it was decoded from.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub image: DynamicImage,
    pub bytes: Vec<u8>,
    pub format: Option<ImageFormat>,
    pub origin: ImageOrigin,
}

/// Remote image retrieval.
pub trait ImageFetcher {
    fn get(&self, url: &Url, timeout: Duration) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// [`ImageFetcher`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        };

        // The timeout covers the whole exchange including the body
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_err)?;
        debug!(url = %url, bytes = body.len(), "Fetched remote image");
        Ok(body.to_vec())
    }
}

/// Decode image bytes, using the content type as a format hint when it names a known image type.
pub fn decode_image(
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<(DynamicImage, Option<ImageFormat>), PipelineError> {
    let hinted = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
        .and_then(ImageFormat::from_mime_type);

    let format = match hinted {
        Some(format) => Some(format),
        None => image::guess_format(bytes).ok(),
    };

    let image = match format {
        Some(format) => image::load_from_memory_with_format(bytes, format)?,
        None => image::load_from_memory(bytes)?,
    };
    Ok((image, format))
}

/// Obtain a decoded image for `input`. Fetch failures are `ImageUnavailable`,
/// unreadable bytes are `ImageDecode`. Nothing is retried.
pub async fn resolve_image<F: ImageFetcher>(
    input: ImageInput,
    fetcher: &F,
    timeout: Duration,
) -> Result<ResolvedImage, PipelineError> {
    match input {
        ImageInput::Inline {
            bytes,
            content_type,
            file_name,
        } => {
            if bytes.is_empty() {
                return Err(PipelineError::ImageUnavailable("No image provided".to_string()));
            }
            let (image, format) = decode_image(&bytes, content_type.as_deref())?;
            Ok(ResolvedImage {
                image,
                bytes,
                format,
                origin: ImageOrigin::Upload { file_name },
            })
        }
        ImageInput::Url(raw) => {
            let url = Url::parse(raw.trim())
                .map_err(|e| PipelineError::ImageUnavailable(format!("Invalid image URL {:?}: {}", raw, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(PipelineError::ImageUnavailable(format!(
                    "Unsupported URL scheme: {}",
                    url.scheme()
                )));
            }

            // Enforced here whether or not the fetcher honors `timeout`
            let bytes = tokio::time::timeout(timeout, fetcher.get(&url, timeout))
                .await
                .map_err(|_| FetchError::Timeout(timeout))??;
            if bytes.is_empty() {
                return Err(PipelineError::ImageUnavailable(format!("Empty response from {}", url)));
            }
            let (image, format) = decode_image(&bytes, None)?;
            Ok(ResolvedImage {
                image,
                bytes,
                format,
                origin: ImageOrigin::Url(url.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(8, 6, |_, _| Rgb([10u8, 20, 30])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    struct CannedFetcher {
        result: fn() -> Result<Vec<u8>, FetchError>,
        calls: AtomicUsize,
    }

    impl ImageFetcher for CannedFetcher {
        async fn get(&self, _url: &Url, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn canned(result: fn() -> Result<Vec<u8>, FetchError>) -> CannedFetcher {
        CannedFetcher {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_inline_png_decodes() {
        let fetcher = canned(|| Ok(Vec::new()));
        let input = ImageInput::Inline {
            bytes: png_bytes(),
            content_type: Some("image/png".to_string()),
            file_name: Some("a.png".to_string()),
        };
        let resolved = resolve_image(input, &fetcher, DEFAULT_FETCH_TIMEOUT).await.unwrap();
        assert_eq!((resolved.image.width(), resolved.image.height()), (8, 6));
        assert_eq!(resolved.format, Some(ImageFormat::Png));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inline_empty_is_unavailable() {
        let fetcher = canned(|| Ok(Vec::new()));
        let input = ImageInput::Inline {
            bytes: Vec::new(),
            content_type: None,
            file_name: None,
        };
        let err = resolve_image(input, &fetcher, DEFAULT_FETCH_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, PipelineError::ImageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_corrupt_bytes_is_decode_error() {
        let fetcher = canned(|| Ok(Vec::new()));
        let input = ImageInput::Inline {
            bytes: b"definitely not an image".to_vec(),
            content_type: Some("image/jpeg".to_string()),
            file_name: None,
        };
        let err = resolve_image(input, &fetcher, DEFAULT_FETCH_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, PipelineError::ImageDecode(_)));
    }

    #[tokio::test]
    async fn test_wrong_content_type_falls_back_to_guess() {
        let (image, format) = decode_image(&png_bytes(), Some("application/octet-stream")).unwrap();
        assert_eq!(format, Some(ImageFormat::Png));
        assert_eq!(image.width(), 8);
    }

    #[tokio::test]
    async fn test_url_fetch_failures_are_unavailable() {
        let timeout = canned(|| Err(FetchError::Timeout(DEFAULT_FETCH_TIMEOUT)));
        let err = resolve_image(ImageInput::Url("https://example.com/a.jpg".into()), &timeout, DEFAULT_FETCH_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageUnavailable(_)));

        let not_found = canned(|| Err(FetchError::Status(404)));
        let err = resolve_image(ImageInput::Url("https://example.com/a.jpg".into()), &not_found, DEFAULT_FETCH_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageUnavailable(_)));
    }

    struct StallingFetcher;

    impl ImageFetcher for StallingFetcher {
        async fn get(&self, _url: &Url, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(png_bytes())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_bounded_by_timeout() {
        let limit = Duration::from_millis(100);
        let started = tokio::time::Instant::now();
        let err = resolve_image(ImageInput::Url("https://slow.example.com/a.png".into()), &StallingFetcher, limit)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ImageUnavailable(ref msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_bad_url_never_fetched() {
        let fetcher = canned(|| Ok(Vec::new()));
        for raw in ["not a url", "file:///etc/passwd"] {
            let err = resolve_image(ImageInput::Url(raw.into()), &fetcher, DEFAULT_FETCH_TIMEOUT)
                .await
                .unwrap_err();
            assert!(matches!(err, PipelineError::ImageUnavailable(_)));
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_url_origin_kept() {
        let fetcher = canned(|| Ok(png_bytes()));
        let resolved = resolve_image(
            ImageInput::Url("https://cdn.example.com/v/1.png".into()),
            &fetcher,
            DEFAULT_FETCH_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(resolved.origin, ImageOrigin::Url("https://cdn.example.com/v/1.png".to_string()));
    }
}
