//! Network transport for hosted models
//!
//! The orchestrator and the hosted segmenter never talk HTTP directly; they go
//! through [`PredictionTransport`], which runs one prediction for a model and
//! returns its raw `output` value. [`ReplicateClient`] is the production
//! implementation; tests inject mocks.

use crate::{
    config::TransportConfig,
    error::{BackendFailure, FailureKind, Result, StudioError},
    types::ImageReference,
};
use async_trait::async_trait;
use instant::Instant;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Opaque bearer token for the hosted model provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token, failing fast when it is absent or blank
    ///
    /// # Errors
    /// - `MissingCredential` for empty or whitespace-only tokens
    pub fn new<S: AsRef<str>>(token: S) -> Result<Self> {
        let trimmed = token.as_ref().trim();
        if trimmed.is_empty() {
            return Err(StudioError::missing_credential(
                "an API token is required to call generation backends (set REPLICATE_API_TOKEN or pass --api-token)",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Resolve an optional token, treating `None` like an empty one
    pub fn from_option(token: Option<&str>) -> Result<Self> {
        Self::new(token.unwrap_or_default())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Hosted model identifier: `owner/name` or `owner/name:version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelRef {
    pub owner: String,
    pub name: String,
    pub version: Option<String>,
}

impl ModelRef {
    #[must_use]
    pub fn new(owner: &str, name: &str, version: Option<&str>) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }
}

impl FromStr for ModelRef {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self> {
        let (path, version) = match s.trim().split_once(':') {
            Some((path, version)) if !version.is_empty() => (path, Some(version)),
            Some((path, _)) => (path, None),
            None => (s.trim(), None),
        };
        match path.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name, version))
            },
            _ => Err(StudioError::invalid_config(format!(
                "model reference '{}' must look like owner/name or owner/name:version",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ModelRef {
    type Error = StudioError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ModelRef> for String {
    fn from(model: ModelRef) -> Self {
        model.to_string()
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}:{}", self.owner, self.name, version),
            None => write!(f, "{}/{}", self.owner, self.name),
        }
    }
}

/// Runs predictions against hosted models
#[async_trait]
pub trait PredictionTransport: Send + Sync {
    /// Run one prediction and return its raw `output` value
    ///
    /// Failures carry the model reference as backend name; callers re-attribute
    /// them to the candidate they were running.
    async fn run(
        &self,
        model: &ModelRef,
        input: Value,
    ) -> std::result::Result<Value, BackendFailure>;

    /// Resolve an image reference to encoded image bytes
    ///
    /// # Errors
    /// - `Network` when the image cannot be downloaded
    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>>;
}

/// Replicate predictions API client
pub struct ReplicateClient {
    client: Client,
    api_base: String,
    credential: Credential,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl fmt::Debug for ReplicateClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateClient")
            .field("api_base", &self.api_base)
            .field("credential", &self.credential)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl ReplicateClient {
    /// Create a client with per-request timeouts from `config`
    ///
    /// # Errors
    /// - `Network` when the HTTP client cannot be built
    pub fn new(credential: Credential, config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("backdrop-studio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StudioError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credential,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        })
    }

    fn endpoint_and_payload(&self, model: &ModelRef, input: Value) -> (String, Value) {
        match &model.version {
            Some(version) => (
                format!("{}/predictions", self.api_base),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!(
                    "{}/models/{}/{}/predictions",
                    self.api_base, model.owner, model.name
                ),
                json!({ "input": input }),
            ),
        }
    }

    fn classify(model: &ModelRef, error: &reqwest::Error) -> BackendFailure {
        let kind = if error.is_timeout() {
            FailureKind::Timeout
        } else if let Some(status) = error.status() {
            FailureKind::HttpStatus(status.as_u16())
        } else {
            FailureKind::Transport
        };
        BackendFailure::new(model.to_string(), kind, error.to_string())
    }

    async fn json_or_failure(
        model: &ModelRef,
        response: Response,
    ) -> std::result::Result<Value, BackendFailure> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::new(
                model.to_string(),
                FailureKind::HttpStatus(status.as_u16()),
                truncate(&body, 512),
            ));
        }
        response.json::<Value>().await.map_err(|e| {
            BackendFailure::new(
                model.to_string(),
                FailureKind::MalformedResponse,
                format!("response is not JSON: {}", e),
            )
        })
    }

    fn status_of(prediction: &Value) -> String {
        prediction
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    async fn poll(
        &self,
        model: &ModelRef,
        mut prediction: Value,
    ) -> std::result::Result<Value, BackendFailure> {
        let started = Instant::now();
        loop {
            match Self::status_of(&prediction).as_str() {
                "succeeded" => return Ok(prediction),
                "failed" | "canceled" => {
                    let detail = prediction
                        .get("error")
                        .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
                        .unwrap_or_else(|| "no error detail".to_string());
                    return Err(BackendFailure::new(
                        model.to_string(),
                        FailureKind::PredictionFailed,
                        detail,
                    ));
                },
                "starting" | "processing" => {},
                other => {
                    return Err(BackendFailure::new(
                        model.to_string(),
                        FailureKind::MalformedResponse,
                        format!("unexpected prediction status '{}'", other),
                    ));
                },
            }

            if started.elapsed() >= self.poll_timeout {
                return Err(BackendFailure::new(
                    model.to_string(),
                    FailureKind::Timeout,
                    format!(
                        "prediction still running after {:.1}s",
                        self.poll_timeout.as_secs_f64()
                    ),
                ));
            }

            let poll_url = prediction
                .get("urls")
                .and_then(|urls| urls.get("get"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    BackendFailure::new(
                        model.to_string(),
                        FailureKind::MalformedResponse,
                        "prediction is missing its poll URL",
                    )
                })?;

            tokio::time::sleep(self.poll_interval).await;
            debug!(url = %poll_url, "Polling prediction");
            let response = self
                .client
                .get(&poll_url)
                .bearer_auth(self.credential.expose())
                .send()
                .await
                .map_err(|e| Self::classify(model, &e))?;
            prediction = Self::json_or_failure(model, response).await?;
        }
    }
}

#[async_trait]
impl PredictionTransport for ReplicateClient {
    async fn run(
        &self,
        model: &ModelRef,
        input: Value,
    ) -> std::result::Result<Value, BackendFailure> {
        let (endpoint, payload) = self.endpoint_and_payload(model, input);
        debug!(endpoint = %endpoint, model = %model, "Creating prediction");

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(self.credential.expose())
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::classify(model, &e))?;
        let prediction = Self::json_or_failure(model, response).await?;
        let prediction = self.poll(model, prediction).await?;

        match prediction.get("output") {
            Some(Value::Null) | None => Err(BackendFailure::new(
                model.to_string(),
                FailureKind::EmptyOutput,
                "prediction succeeded without output",
            )),
            Some(output) => Ok(output.clone()),
        }
    }

    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let url = match reference {
            ImageReference::Bytes(bytes) => return Ok(bytes.clone()),
            ImageReference::Url(url) => url,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StudioError::network(format!("failed downloading {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Image download failed");
            return Err(StudioError::network(format!(
                "image download from {} failed with {}",
                url, status
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StudioError::network(format!("failed reading {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

/// Transport for preparation-only runs; predictions always fail
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransport;

#[async_trait]
impl PredictionTransport for OfflineTransport {
    async fn run(
        &self,
        model: &ModelRef,
        _input: Value,
    ) -> std::result::Result<Value, BackendFailure> {
        Err(BackendFailure::new(
            model.to_string(),
            FailureKind::Transport,
            "no generation transport configured",
        ))
    }

    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        match reference {
            ImageReference::Bytes(bytes) => Ok(bytes.clone()),
            ImageReference::Url(url) => Err(StudioError::network(format!(
                "cannot download {} without a transport",
                url
            ))),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_rejects_blank() {
        assert!(matches!(
            Credential::new("   ").unwrap_err(),
            StudioError::MissingCredential(_)
        ));
        assert!(matches!(
            Credential::from_option(None).unwrap_err(),
            StudioError::MissingCredential(_)
        ));
        assert_eq!(Credential::new(" r8_abc ").unwrap().expose(), "r8_abc");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("r8_secret").unwrap();
        assert!(!format!("{:?}", credential).contains("r8_secret"));
    }

    #[test]
    fn test_model_ref_parsing() {
        let pinned: ModelRef = "stability-ai/sdxl:39ed52f2".parse().unwrap();
        assert_eq!(pinned.owner, "stability-ai");
        assert_eq!(pinned.name, "sdxl");
        assert_eq!(pinned.version.as_deref(), Some("39ed52f2"));
        assert_eq!(pinned.to_string(), "stability-ai/sdxl:39ed52f2");

        let unpinned: ModelRef = "black-forest-labs/flux-fill-dev".parse().unwrap();
        assert!(unpinned.version.is_none());

        assert!("sdxl".parse::<ModelRef>().is_err());
        assert!("/sdxl".parse::<ModelRef>().is_err());
        assert!("a/b/c".parse::<ModelRef>().is_err());
    }

    #[test]
    fn test_model_ref_serde_as_string() {
        let model = ModelRef::new("owner", "name", Some("v1"));
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, "\"owner/name:v1\"");
        let back: ModelRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
        assert!(serde_json::from_str::<ModelRef>("\"nonsense\"").is_err());
    }

    #[test]
    fn test_endpoint_selection() {
        let client = ReplicateClient::new(
            Credential::new("token").unwrap(),
            &TransportConfig::default(),
        )
        .unwrap();

        let (endpoint, payload) =
            client.endpoint_and_payload(&ModelRef::new("o", "n", Some("abc")), json!({"a": 1}));
        assert_eq!(endpoint, "https://api.replicate.com/v1/predictions");
        assert_eq!(payload["version"], "abc");
        assert_eq!(payload["input"]["a"], 1);

        let (endpoint, payload) =
            client.endpoint_and_payload(&ModelRef::new("o", "n", None), json!({}));
        assert_eq!(endpoint, "https://api.replicate.com/v1/models/o/n/predictions");
        assert!(payload.get("version").is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }

    #[tokio::test]
    async fn test_offline_transport() {
        let model = ModelRef::new("stability-ai", "sdxl", None);
        let failure = OfflineTransport.run(&model, json!({})).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Transport);

        let inline = ImageReference::Bytes(vec![7]);
        assert_eq!(OfflineTransport.fetch(&inline).await.unwrap(), vec![7]);
        assert!(OfflineTransport
            .fetch(&ImageReference::Url("https://cdn.example/x.png".to_string()))
            .await
            .is_err());
    }

    mod replicate_http {
        use super::*;
        use crate::backends::test_utils::FakeHttpEndpoint;

        fn client(endpoint: &FakeHttpEndpoint, poll_timeout_secs: u64) -> ReplicateClient {
            let config = TransportConfig {
                api_base: endpoint.base.clone(),
                request_timeout_secs: 5,
                poll_interval_ms: 1,
                poll_timeout_secs,
            };
            ReplicateClient::new(Credential::new("r8_test").unwrap(), &config).unwrap()
        }

        fn model() -> ModelRef {
            ModelRef::new("stability-ai", "sdxl", None)
        }

        #[tokio::test]
        async fn test_sync_prediction_returns_output() {
            let endpoint = FakeHttpEndpoint::json(vec![(
                201,
                r#"{"status": "succeeded", "output": ["https://cdn.example/a.png"]}"#,
            )])
            .await;

            let output = client(&endpoint, 60)
                .run(&model(), json!({"prompt": "a vase"}))
                .await
                .unwrap();
            assert_eq!(output, json!(["https://cdn.example/a.png"]));

            let requests = endpoint.requests();
            assert_eq!(requests.len(), 1);
            assert!(requests[0].starts_with("post /models/stability-ai/sdxl/predictions"));
            assert!(requests[0].contains("authorization: bearer r8_test"));
            assert!(requests[0].contains("prefer: wait"));
        }

        #[tokio::test]
        async fn test_error_statuses_are_classified() {
            for status in [401u16, 403, 422, 429, 500, 503] {
                let endpoint =
                    FakeHttpEndpoint::json(vec![(status, r#"{"detail": "request rejected"}"#)]).await;
                let failure = client(&endpoint, 60)
                    .run(&model(), json!({}))
                    .await
                    .unwrap_err();
                assert_eq!(failure.kind, FailureKind::HttpStatus(status));
                assert_eq!(failure.backend, "stability-ai/sdxl");
                assert!(failure.message.contains("request rejected"), "{}", status);
            }
        }

        #[tokio::test]
        async fn test_failed_and_canceled_predictions() {
            for status in ["failed", "canceled"] {
                let body = format!(r#"{{"status": "{}", "error": "NSFW content detected"}}"#, status);
                let endpoint = FakeHttpEndpoint::json(vec![(201, body.as_str())]).await;
                let failure = client(&endpoint, 60)
                    .run(&model(), json!({}))
                    .await
                    .unwrap_err();
                assert_eq!(failure.kind, FailureKind::PredictionFailed);
                assert_eq!(failure.message, "NSFW content detected");
            }
        }

        #[tokio::test]
        async fn test_polls_until_succeeded() {
            let endpoint = FakeHttpEndpoint::json(vec![
                (201, r#"{"status": "starting", "urls": {"get": "{base}/predictions/p1"}}"#),
                (200, r#"{"status": "processing", "urls": {"get": "{base}/predictions/p1"}}"#),
                (200, r#"{"status": "succeeded", "output": "https://cdn.example/b.png"}"#),
            ])
            .await;

            let output = client(&endpoint, 60).run(&model(), json!({})).await.unwrap();
            assert_eq!(output, json!("https://cdn.example/b.png"));

            let requests = endpoint.requests();
            assert_eq!(requests.len(), 3);
            assert!(requests[1].starts_with("get /predictions/p1"));
            assert!(requests[2].contains("authorization: bearer r8_test"));
        }

        #[tokio::test]
        async fn test_poll_timeout_and_missing_poll_url() {
            let endpoint = FakeHttpEndpoint::json(vec![(
                201,
                r#"{"status": "processing", "urls": {"get": "{base}/predictions/p2"}}"#,
            )])
            .await;
            let failure = client(&endpoint, 0).run(&model(), json!({})).await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::Timeout);
            assert_eq!(endpoint.requests().len(), 1);

            let endpoint = FakeHttpEndpoint::json(vec![(201, r#"{"status": "starting"}"#)]).await;
            let failure = client(&endpoint, 60).run(&model(), json!({})).await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::MalformedResponse);
            assert!(failure.message.contains("poll URL"));
        }

        #[tokio::test]
        async fn test_unusable_responses() {
            let endpoint =
                FakeHttpEndpoint::json(vec![(201, r#"{"status": "succeeded", "output": null}"#)]).await;
            let failure = client(&endpoint, 60).run(&model(), json!({})).await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::EmptyOutput);

            let endpoint = FakeHttpEndpoint::json(vec![(200, "<html>gateway</html>")]).await;
            let failure = client(&endpoint, 60).run(&model(), json!({})).await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::MalformedResponse);

            let endpoint = FakeHttpEndpoint::json(vec![(201, r#"{"status": "queued-forever"}"#)]).await;
            let failure = client(&endpoint, 60).run(&model(), json!({})).await.unwrap_err();
            assert_eq!(failure.kind, FailureKind::MalformedResponse);
        }

        #[tokio::test]
        async fn test_fetch_accepts_any_success_status() {
            let endpoint = FakeHttpEndpoint::json(vec![(200, "png-bytes"), (203, "cached")]).await;
            let client = client(&endpoint, 60);

            let url = ImageReference::Url(endpoint.url("/out.png"));
            assert_eq!(client.fetch(&url).await.unwrap(), b"png-bytes".to_vec());
            assert_eq!(client.fetch(&url).await.unwrap(), b"cached".to_vec());
            // Result downloads carry no API token
            assert!(!endpoint.requests()[0].contains("authorization"));
        }

        #[tokio::test]
        async fn test_fetch_rejects_error_status() {
            let endpoint = FakeHttpEndpoint::json(vec![(404, r#"{"detail": "gone"}"#)]).await;
            let url = ImageReference::Url(endpoint.url("/expired.png"));
            let err = client(&endpoint, 60).fetch(&url).await.unwrap_err();
            assert!(matches!(err, StudioError::Network(_)));
            assert!(err.to_string().contains("404"));
        }
    }
}
