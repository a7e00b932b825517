use super::Segmenter;
use crate::{
    error::{Result, StudioError},
    services::ImageIOService,
};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage, RgbaImage};
use reqwest::{header::CONTENT_TYPE, Client};
use std::time::Duration;
use tracing::debug;

/// Background-removal service reached over plain HTTP
///
/// The canvas is POSTed as a PNG body; the service answers with a PNG whose
/// alpha channel carries the foreground confidence.
pub struct HttpSegmenter {
    client: Client,
    url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSegmenter")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpSegmenter {
    /// # Errors
    /// - `InvalidConfig` when `url` is not an http(s) URL
    /// - `Network` when the HTTP client cannot be built
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StudioError::invalid_config(format!(
                "segmentation URL '{}' must start with http:// or https://",
                url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StudioError::network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Segmenter for HttpSegmenter {
    fn name(&self) -> &str {
        "http"
    }

    async fn segment(&self, image: &RgbImage) -> Result<RgbaImage> {
        let body = ImageIOService::encode_png(&DynamicImage::ImageRgb8(image.clone()))?;
        debug!(url = %self.url, bytes = body.len(), "Sending canvas to segmentation service");

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/png")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StudioError::segmentation(format!("segmentation service unreachable: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StudioError::segmentation(format!(
                "segmentation service answered {}",
                status
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StudioError::segmentation(format!("failed reading segmentation result: {}", e)))?;

        let decoded = image::load_from_memory(&bytes).map_err(|e| {
            StudioError::segmentation(format!("segmentation result is not an image: {}", e))
        })?;
        Ok(decoded.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::FakeHttpEndpoint;
    use image::Rgba;

    #[test]
    fn test_rejects_non_http_url() {
        let err = HttpSegmenter::new("ftp://matting", None, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, StudioError::InvalidConfig(_)));
    }

    #[test]
    fn test_blank_token_is_dropped() {
        let segmenter = HttpSegmenter::new(
            "http://localhost:7000/remove",
            Some("  ".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(segmenter.token.is_none());
        assert_eq!(segmenter.url(), "http://localhost:7000/remove");
    }

    #[test]
    fn test_debug_redacts_token() {
        let segmenter = HttpSegmenter::new(
            "https://matting.internal/remove",
            Some("secret-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!format!("{:?}", segmenter).contains("secret-token"));
    }

    #[tokio::test]
    async fn test_alpha_comes_from_service_response() {
        let cutout = RgbaImage::from_fn(4, 4, |x, _| Rgba([9, 9, 9, if x < 2 { 255 } else { 0 }]));
        let png = ImageIOService::encode_png(&DynamicImage::ImageRgba8(cutout)).unwrap();
        let endpoint = FakeHttpEndpoint::start("image/png", vec![(200, png)]).await;

        let segmenter = HttpSegmenter::new(
            &endpoint.url("/api/remove"),
            Some("matting-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let segmented = segmenter.segment(&RgbImage::new(4, 4)).await.unwrap();
        assert_eq!(segmented.get_pixel(0, 0).0[3], 255);
        assert_eq!(segmented.get_pixel(3, 0).0[3], 0);

        let requests = endpoint.requests();
        assert!(requests[0].starts_with("post /api/remove"));
        assert!(requests[0].contains("content-type: image/png"));
        assert!(requests[0].contains("authorization: bearer matting-token"));
    }

    #[tokio::test]
    async fn test_service_errors_are_segmentation_errors() {
        let endpoint = FakeHttpEndpoint::start(
            "text/plain",
            vec![(503, b"overloaded".to_vec()), (200, b"not a png".to_vec())],
        )
        .await;
        let segmenter =
            HttpSegmenter::new(&endpoint.url("/remove"), None, Duration::from_secs(5)).unwrap();

        let err = segmenter.segment(&RgbImage::new(4, 4)).await.unwrap_err();
        assert!(matches!(err, StudioError::Segmentation(_)));
        assert!(err.to_string().contains("503"));

        let err = segmenter.segment(&RgbImage::new(4, 4)).await.unwrap_err();
        assert!(err.to_string().contains("not an image"));
        assert!(!endpoint.requests()[0].contains("authorization"));
    }
}
