//! Remote OCR services
//!
//! Google Cloud Vision (JSON body, base64 image) and OCR.space (multipart
//! upload). Timeouts and connection failures are retried on a fixed
//! schedule; authorization and other status failures are not.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::OcrError;
use crate::config::RemoteConfig;

const CLOUD_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";
const OCR_SPACE_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Supported services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteService {
    #[default]
    CloudVision,
    OcrSpace,
}

impl RemoteService {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CloudVision => "cloud-vision",
            Self::OcrSpace => "ocr-space",
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self {
            Self::CloudVision => CLOUD_VISION_ENDPOINT,
            Self::OcrSpace => OCR_SPACE_ENDPOINT,
        }
    }
}

/// Failure of one HTTP attempt
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("request could not be sent: {0}")]
    Send(String),
    #[error("service rejected the API key (HTTP {0})")]
    Unauthorized(u16),
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("service error: {0}")]
    Service(String),
}

impl RemoteError {
    /// Worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Send(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Send(e.to_string())
        }
    }
}

impl From<RemoteError> for OcrError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout => OcrError::TimedOut,
            RemoteError::Send(msg) => OcrError::ExecutionFailed(msg),
            other => OcrError::BackendError(other.to_string()),
        }
    }
}

/// Run `attempt` once, then again after each delay while it fails transiently
pub async fn with_retries<T, F, Fut>(delays: &[Duration], mut attempt: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut result = attempt().await;
    for (n, delay) in delays.iter().enumerate() {
        match &result {
            Err(e) if e.is_transient() => {
                warn!("Remote OCR attempt {} failed ({}), retrying in {:?}", n + 1, e, delay);
                tokio::time::sleep(*delay).await;
                result = attempt().await;
            }
            _ => break,
        }
    }
    result
}

/// Remote engine
pub struct RemoteAdapter {
    client: reqwest::Client,
    service: RemoteService,
    api_key: String,
    endpoint: String,
    language: String,
    timeout: Duration,
    retry_delays: Vec<Duration>,
}

impl RemoteAdapter {
    pub fn new(config: &RemoteConfig, client: reqwest::Client) -> Result<Self, OcrError> {
        if config.api_key.trim().is_empty() {
            return Err(OcrError::BackendError(format!(
                "no API key configured for {}",
                config.service.name()
            )));
        }
        Ok(Self {
            client,
            service: config.service,
            api_key: config.api_key.clone(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| config.service.default_endpoint().to_string()),
            language: config.language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            retry_delays: config.retry_delays(),
        })
    }

    pub fn service(&self) -> RemoteService {
        self.service
    }

    /// Recognize one PNG-encoded image
    pub async fn recognize(&self, png: &[u8]) -> Result<String, OcrError> {
        let text = with_retries(&self.retry_delays, || self.attempt(png)).await?;
        debug!("{} returned {} characters", self.service.name(), text.chars().count());
        Ok(text)
    }

    async fn attempt(&self, png: &[u8]) -> Result<String, RemoteError> {
        let request = match self.service {
            RemoteService::CloudVision => self
                .client
                .post(&self.endpoint)
                .query(&[("key", self.api_key.as_str())])
                .json(&cloud_vision_body(png)),
            RemoteService::OcrSpace => {
                let image = multipart::Part::bytes(png.to_vec())
                    .file_name("image.png")
                    .mime_str("image/png")
                    .map_err(|e| RemoteError::Send(e.to_string()))?;
                let form = multipart::Form::new()
                    .text("language", self.language.clone())
                    .text("OCREngine", "1")
                    .part("file", image);
                self.client
                    .post(&self.endpoint)
                    .header("apikey", &self.api_key)
                    .multipart(form)
            }
        };

        let response = request.timeout(self.timeout).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(RemoteError::UnexpectedStatus(status.as_u16()));
        }

        let json: serde_json::Value = response.json().await?;
        match self.service {
            RemoteService::CloudVision => parse_cloud_vision(&json),
            RemoteService::OcrSpace => parse_ocr_space(&json),
        }
    }
}

fn cloud_vision_body(png: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "requests": [{
            "image": { "content": BASE64.encode(png) },
            "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
            "imageContext": { "languageHints": ["ja"] }
        }]
    })
}

fn parse_cloud_vision(json: &serde_json::Value) -> Result<String, RemoteError> {
    let response = json["responses"]
        .get(0)
        .ok_or_else(|| RemoteError::Malformed("no responses".to_string()))?;
    if let Some(message) = response["error"]["message"].as_str() {
        return Err(RemoteError::Service(message.to_string()));
    }
    let text = response["fullTextAnnotation"]["text"]
        .as_str()
        .or_else(|| response["textAnnotations"][0]["description"].as_str())
        .unwrap_or("");
    Ok(text.trim().to_string())
}

fn parse_ocr_space(json: &serde_json::Value) -> Result<String, RemoteError> {
    if json["IsErroredOnProcessing"].as_bool().unwrap_or(false) {
        let message = match &json["ErrorMessage"] {
            serde_json::Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            other => other.as_str().unwrap_or("unknown error").to_string(),
        };
        return Err(RemoteError::Service(message));
    }
    let results = json["ParsedResults"]
        .as_array()
        .ok_or_else(|| RemoteError::Malformed("no ParsedResults".to_string()))?;
    let text = results
        .iter()
        .filter_map(|r| r["ParsedText"].as_str())
        .map(|t| t.replace("\r\n", "\n"))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let delays = [Duration::ZERO, Duration::ZERO];
        let result = with_retries(&delays, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::Timeout)
            } else {
                Ok("テキスト")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "テキスト");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let delays = [Duration::ZERO, Duration::ZERO];
        let result: Result<(), _> = with_retries(&delays, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Send("connection refused".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Send(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_authorization_failure_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let delays = [Duration::ZERO, Duration::ZERO];
        let result: Result<(), _> = with_retries(&delays, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Unauthorized(401))
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Unauthorized(401))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Answers every connection with a bare 401
    async fn unauthorized_server(hits: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                // read headers and body before answering
                loop {
                    let Ok(n) = socket.read(&mut buf).await else { break };
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request_complete(&request) {
                        break;
                    }
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });
        format!("http://{}/annotate", addr)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                if !name.trim().eq_ignore_ascii_case("content-length") {
                    return None;
                }
                value.trim().parse::<usize>().ok()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + length
    }

    #[tokio::test]
    async fn test_unauthorized_response_hits_server_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let endpoint = unauthorized_server(hits.clone()).await;
        let config = RemoteConfig {
            api_key: "bad-key".to_string(),
            endpoint: Some(endpoint),
            retry_delays_secs: vec![0, 0],
            ..RemoteConfig::default()
        };
        let adapter = RemoteAdapter::new(&config, reqwest::Client::new()).unwrap();

        let result = adapter.recognize(&[0x89, b'P', b'N', b'G']).await;
        assert!(matches!(result, Err(OcrError::BackendError(ref m)) if m.contains("401")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_api_key() {
        let result = RemoteAdapter::new(&RemoteConfig::default(), reqwest::Client::new());
        assert!(matches!(result, Err(OcrError::BackendError(_))));
    }

    #[test]
    fn test_parse_cloud_vision() {
        let json = serde_json::json!({
            "responses": [{ "fullTextAnnotation": { "text": "吾輩は猫である\n名前はまだ無い\n" } }]
        });
        assert_eq!(parse_cloud_vision(&json).unwrap(), "吾輩は猫である\n名前はまだ無い");

        let fallback = serde_json::json!({
            "responses": [{ "textAnnotations": [{ "description": " 猫 " }] }]
        });
        assert_eq!(parse_cloud_vision(&fallback).unwrap(), "猫");

        let error = serde_json::json!({ "responses": [{ "error": { "message": "quota" } }] });
        assert!(matches!(parse_cloud_vision(&error), Err(RemoteError::Service(_))));
    }

    #[test]
    fn test_parse_ocr_space() {
        let json = serde_json::json!({
            "ParsedResults": [{ "ParsedText": "こんにちは\r\n世界\r\n" }],
            "IsErroredOnProcessing": false
        });
        assert_eq!(parse_ocr_space(&json).unwrap(), "こんにちは\n世界");

        let error = serde_json::json!({
            "IsErroredOnProcessing": true,
            "ErrorMessage": ["File failed validation", "Unsupported type"]
        });
        match parse_ocr_space(&error) {
            Err(RemoteError::Service(msg)) => assert_eq!(msg, "File failed validation; Unsupported type"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cloud_vision_body_is_base64() {
        let body = cloud_vision_body(&[1, 2, 3]);
        assert_eq!(body["requests"][0]["image"]["content"], "AQID");
    }
}
