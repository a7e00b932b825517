//! Test utilities and mock collaborators for composition tests
//!
//! Mock implementations of [`PredictionTransport`] and [`Segmenter`] let the
//! orchestrator and the pipeline be exercised without network access or a
//! real segmentation model. [`FakeHttpEndpoint`] stands in for a hosted API
//! when the HTTP clients themselves are under test. A few fixture builders
//! cover canvases and masks.

use crate::{
    error::{BackendFailure, FailureKind, Result, StudioError},
    segmentation::Segmenter,
    services::ImageIOService,
    transport::{ModelRef, PredictionTransport},
    types::{BinaryMask, Canvas, ImageReference},
};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Scripted answer for one prediction
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Prediction succeeded with this raw output
    Output(Value),
    /// Prediction failed
    Fail(FailureKind, String),
    /// Wait (tokio time) before answering
    Delayed(Duration, Box<MockResponse>),
}

impl MockResponse {
    #[must_use]
    pub fn url(url: &str) -> Self {
        Self::Output(Value::String(url.to_string()))
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::Fail(FailureKind::Timeout, "read timed out".to_string())
    }
}

/// Mock transport answering from per-model scripts
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    downloads: Mutex<HashMap<String, Vec<u8>>>,
    /// Model references in call order
    call_history: Arc<Mutex<Vec<String>>>,
    /// Inputs in call order
    inputs: Arc<Mutex<Vec<Value>>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call against `model`
    #[must_use]
    pub fn respond(self, model: &ModelRef, response: MockResponse) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(model.to_string())
                .or_default()
                .push_back(response);
        }
        self
    }

    /// Serve `bytes` when `url` is fetched
    #[must_use]
    pub fn with_download(self, url: &str, bytes: Vec<u8>) -> Self {
        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.insert(url.to_string(), bytes);
        }
        self
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Inputs sent to the transport, in call order
    pub fn get_inputs(&self) -> Vec<Value> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn next_response(&self, model: &ModelRef) -> Option<MockResponse> {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(&model.to_string()).and_then(VecDeque::pop_front))
    }
}

#[async_trait]
impl PredictionTransport for MockTransport {
    async fn run(
        &self,
        model: &ModelRef,
        input: Value,
    ) -> std::result::Result<Value, BackendFailure> {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(model.to_string());
        }
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input);
        }

        let mut response = self.next_response(model).ok_or_else(|| {
            BackendFailure::new(
                model.to_string(),
                FailureKind::Transport,
                "no scripted response",
            )
        })?;
        loop {
            match response {
                MockResponse::Output(value) => return Ok(value),
                MockResponse::Fail(kind, message) => {
                    return Err(BackendFailure::new(model.to_string(), kind, message))
                },
                MockResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                },
            }
        }
    }

    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        match reference {
            ImageReference::Bytes(bytes) => Ok(bytes.clone()),
            ImageReference::Url(url) => self
                .downloads
                .lock()
                .ok()
                .and_then(|downloads| downloads.get(url).cloned())
                .ok_or_else(|| StudioError::network(format!("no mock download for {}", url))),
        }
    }
}

/// Mock segmenter returning a fixed alpha channel
#[derive(Debug, Clone)]
pub struct MockSegmenter {
    alpha: Option<GrayImage>,
    failure: Option<String>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockSegmenter {
    /// Segmenter whose output alpha is `alpha`, whatever the input
    #[must_use]
    pub fn with_alpha(alpha: GrayImage) -> Self {
        Self {
            alpha: Some(alpha),
            failure: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Segmenter that always errors
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            alpha: None,
            failure: Some(message.to_string()),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Segmenter for MockSegmenter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn segment(&self, image: &RgbImage) -> Result<RgbaImage> {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(format!("segment {}x{}", image.width(), image.height()));
        }
        if let Some(message) = &self.failure {
            return Err(StudioError::segmentation(message.clone()));
        }
        let alpha = self
            .alpha
            .as_ref()
            .ok_or_else(|| StudioError::segmentation("mock segmenter has no alpha"))?;

        Ok(RgbaImage::from_fn(alpha.width(), alpha.height(), |x, y| {
            let rgb = if x < image.width() && y < image.height() {
                image.get_pixel(x, y).0
            } else {
                [0, 0, 0]
            };
            Rgba([rgb[0], rgb[1], rgb[2], alpha.get_pixel(x, y).0[0]])
        }))
    }
}

/// Square canvas of one color, content spanning the whole canvas
#[must_use]
pub fn solid_canvas(size: u32, color: [u8; 3]) -> Canvas {
    Canvas::new(ImageBuffer::from_pixel(size, size, Rgb(color)), (0, 0, size, size))
}

/// Mask preserving a centered `side` x `side` square, regenerating the rest
#[must_use]
pub fn center_square_mask(size: u32, side: u32) -> BinaryMask {
    let start = (size - side) / 2;
    let end = start + side;
    BinaryMask::new(GrayImage::from_fn(size, size, |x, y| {
        if (start..end).contains(&x) && (start..end).contains(&y) {
            Luma([BinaryMask::PRESERVE])
        } else {
            Luma([BinaryMask::REGENERATE])
        }
    }))
}

/// Alpha field that is fully opaque inside a disc and transparent elsewhere
#[must_use]
pub fn disc_alpha(size: u32, center: (u32, u32), radius: u32) -> GrayImage {
    let r2 = i64::from(radius) * i64::from(radius);
    GrayImage::from_fn(size, size, |x, y| {
        let dx = i64::from(x) - i64::from(center.0);
        let dy = i64::from(y) - i64::from(center.1);
        if dx * dx + dy * dy <= r2 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// PNG bytes of a solid image, for scripted downloads
#[must_use]
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)));
    ImageIOService::encode_png(&image).unwrap_or_default()
}

/// Decode an image sent to a backend as a data URI
///
/// # Panics
/// When `value` is not a decodable image data URI.
#[must_use]
pub fn decode_data_uri_image(value: &Value) -> DynamicImage {
    let uri = value.as_str().expect("data URI string");
    let bytes = ImageIOService::decode_data_uri(uri).expect("base64 data URI");
    image::load_from_memory(&bytes).expect("image payload")
}

/// Local HTTP/1.1 endpoint answering each request with the next canned response
///
/// Every response closes its connection. Recorded requests hold the request
/// line and headers, lowercased.
#[derive(Debug)]
pub struct FakeHttpEndpoint {
    /// `http://127.0.0.1:<port>`
    pub base: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeHttpEndpoint {
    /// Serve raw bodies with the given content type
    ///
    /// # Panics
    /// When no local port can be bound.
    pub async fn start(content_type: &str, responses: Vec<(u16, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local port");
        let base = format!("http://{}", listener.local_addr().expect("local address"));
        Self::serve(listener, base, content_type.to_string(), responses)
    }

    /// Serve JSON bodies; `{base}` in a body becomes the endpoint's address
    ///
    /// # Panics
    /// When no local port can be bound.
    pub async fn json(responses: Vec<(u16, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local port");
        let base = format!("http://{}", listener.local_addr().expect("local address"));
        let responses = responses
            .into_iter()
            .map(|(status, body)| (status, body.replace("{base}", &base).into_bytes()))
            .collect();
        Self::serve(listener, base, "application/json".to_string(), responses)
    }

    fn serve(
        listener: TcpListener,
        base: String,
        content_type: String,
        responses: Vec<(u16, Vec<u8>)>,
    ) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let head = read_request_head(&mut socket).await;
                if let Ok(mut seen) = seen.lock() {
                    seen.push(head);
                }
                let header = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    content_type,
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { base, requests }
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

/// Read the request line and headers, then drain a `Content-Length` body
async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = socket.read(&mut chunk).await.unwrap_or(0);
        if read == 0 {
            return String::from_utf8_lossy(&buffer).to_ascii_lowercase();
        }
        buffer.extend_from_slice(&chunk[..read]);
        let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buffer[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buffer.len() < end + 4 + body_len {
            let read = socket.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }
        return head;
    }
}
