//! OCR Layer
//!
//! Runs recognition on a prepared image through one of three engines:
//! - Tesseract, several preprocessed variants at once (hOCR output)
//! - manga-ocr, one long-lived subprocess (plain text output)
//! - a remote HTTP service (plain text output)

pub mod hocr;
pub mod manga_ocr;
pub mod remote;
pub mod tesseract;

use crossbeam_channel::Sender;
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{AppConfig, EngineKind};

pub use manga_ocr::MangaOcrAdapter;
pub use remote::RemoteAdapter;
pub use tesseract::TesseractAdapter;

/// Failure of a single backend call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OcrError {
    #[error("OCR execution failed: {0}")]
    ExecutionFailed(String),
    #[error("OCR timed out")]
    TimedOut,
    #[error("OCR backend error: {0}")]
    BackendError(String),
}

/// Raw engine output before parsing
#[derive(Debug, Clone, PartialEq)]
pub enum RawContent {
    PlainText(String),
    Hocr(String),
}

/// Raw output of one preprocessing variant
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariant {
    /// Which variant produced it
    pub label: String,
    pub content: RawContent,
}

impl RawVariant {
    pub fn plain(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: RawContent::PlainText(text.into()),
        }
    }

    pub fn hocr(label: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: RawContent::Hocr(markup.into()),
        }
    }
}

/// Request kinds a ready recognizer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    ManualBlock,
    AutoBlock,
    Region,
    ProvidedImage,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [
        RequestKind::ManualBlock,
        RequestKind::AutoBlock,
        RequestKind::Region,
        RequestKind::ProvidedImage,
    ];
}

/// Backend lifecycle events published to the caller
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// Engine is ready and accepts these request kinds
    Initialized(Vec<RequestKind>),
    /// manga-ocr is fetching its model for the first time
    ModelDownloading,
    /// manga-ocr did not answer in time and is being restarted
    TimedOutRestarting,
    /// manga-ocr died; the engine stays unavailable
    Crashed,
    /// Diagnostic overlay from block detection
    DebugImageSubmitted(RgbImage),
}

/// The configured OCR engine
pub enum OcrEngine {
    Tesseract(TesseractAdapter),
    MangaOcr(MangaOcrAdapter),
    Remote(RemoteAdapter),
}

impl OcrEngine {
    /// Start the engine selected in the configuration.
    ///
    /// Probes or launches whatever the engine depends on; a failure here
    /// means the engine cannot be used this session.
    pub async fn start(
        config: &AppConfig,
        client: reqwest::Client,
        events: Sender<RecognizerEvent>,
    ) -> Result<Self, OcrError> {
        let kind = config.recognizer.engine;
        info!("Starting OCR engine {:?}", kind);
        let engine = match kind {
            EngineKind::Tesseract => Self::Tesseract(TesseractAdapter::start(&config.tesseract).await?),
            EngineKind::MangaOcr => Self::MangaOcr(MangaOcrAdapter::start(&config.manga_ocr, events).await?),
            EngineKind::Remote => Self::Remote(RemoteAdapter::new(&config.remote, client)?),
        };
        Ok(engine)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tesseract(_) => "tesseract",
            Self::MangaOcr(_) => "manga-ocr",
            Self::Remote(adapter) => adapter.service().name(),
        }
    }

    /// Can the engine still take requests
    pub fn is_available(&self) -> bool {
        match self {
            Self::Tesseract(_) | Self::Remote(_) => true,
            Self::MangaOcr(adapter) => adapter.is_usable(),
        }
    }

    /// Recognize one image, returning one raw output per variant that succeeded
    pub async fn recognize(&mut self, image: &RgbImage) -> Result<Vec<RawVariant>, OcrError> {
        match self {
            Self::Tesseract(adapter) => adapter.recognize(image).await,
            Self::MangaOcr(adapter) => {
                let png = encode(image)?;
                let text = adapter.recognize(&png).await?;
                Ok(vec![RawVariant::plain("manga-ocr", text)])
            }
            Self::Remote(adapter) => {
                let png = encode(image)?;
                let text = adapter.recognize(&png).await?;
                Ok(vec![RawVariant::plain(adapter.service().name(), text)])
            }
        }
    }
}

fn encode(image: &RgbImage) -> Result<Vec<u8>, OcrError> {
    crate::imaging::primitives::encode_png(image).map_err(|e| OcrError::ExecutionFailed(format!("PNG encoding failed: {e}")))
}
