//! Recognition Conductor
//!
//! Owns the OCR engine and the recognizer status. Each request obtains an
//! image through the platform, optionally narrows it to the text block,
//! runs OCR and reduces the result.
//!
//! Status flow:
//! - `Initializing` → `Idle`, or `Unavailable` when the engine cannot start
//! - `Idle` → `AwaitingUserInput` → `Processing` → `Idle`
//! - a dead engine moves to `Unavailable` for the rest of the session

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::autoblock::{AutoBlockDetector, DebugSink};
use crate::chunks::{ChunkReducer, CjkSpacingCorrector, PostprocessedChunk, ReduceError, ReplaceRules, TextCorrector};
use crate::config::{AppConfig, AutoBlockConfig};
use crate::geometry::{Point, Rectangle};
use crate::imaging::primitives::crop;
use crate::ocr::{OcrEngine, OcrError, RecognizerEvent, RequestKind};
use crate::platform::{Platform, SelectionError};

/// Smallest width or height worth sending to OCR
pub const MIN_INPUT_DIMENSION: u32 = 16;

/// What the recognizer is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerStatus {
    Unavailable,
    Initializing,
    Idle,
    AwaitingUserInput,
    Processing,
}

/// A recognition request
#[derive(Debug, Clone)]
pub enum RecognitionRequest {
    /// User drags out the area to recognize
    ManualBlock,
    /// User points at text and the block around it is found automatically
    AutoBlock,
    /// A known screen area, optionally narrowed to the block at its center
    Region { area: Rectangle, auto_narrow: bool },
    /// An image supplied by the caller
    ProvidedImage(RgbImage),
}

impl RecognitionRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::ManualBlock => RequestKind::ManualBlock,
            Self::AutoBlock => RequestKind::AutoBlock,
            Self::Region { .. } => RequestKind::Region,
            Self::ProvidedImage(_) => RequestKind::ProvidedImage,
        }
    }
}

/// Why a request produced no text
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecognitionOpError {
    #[error("OCR engine is unavailable")]
    OcrUnavailable,
    #[error("selection cancelled")]
    SelectionCancelled,
    #[error("selection failed: {0}")]
    SelectionFailed(String),
    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),
    #[error("input of {width}x{height} is below the {min}px minimum", min = MIN_INPUT_DIMENSION)]
    InputTooSmall { width: u32, height: u32 },
    #[error("no text block found at the selected point")]
    NoBlockDetected,
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    OcrError(#[from] OcrError),
    #[error("no text recognized")]
    ZeroVariants,
}

impl RecognitionOpError {
    /// Message shown to the user; `None` when the user should not be bothered
    pub fn user_message(&self) -> Option<&'static str> {
        let message = match self {
            Self::SelectionCancelled => return None,
            Self::OcrUnavailable => "OCR is unavailable. Check the engine settings and restart.",
            Self::SelectionFailed(_) => "The selection could not be completed.",
            Self::ScreenshotFailed(_) => "Could not take a screenshot of the selected area.",
            Self::InputTooSmall { .. } => "The selected area is too small to recognize.",
            Self::NoBlockDetected => "No text block was found at the selected point.",
            Self::Internal(_) => "Text block detection failed unexpectedly.",
            Self::OcrError(OcrError::TimedOut) => "OCR took too long and was stopped.",
            Self::OcrError(_) => "OCR failed. See the log for details.",
            Self::ZeroVariants => "No text was recognized.",
        };
        Some(message)
    }
}

impl From<SelectionError> for RecognitionOpError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::Cancelled => Self::SelectionCancelled,
            SelectionError::Failed(msg) => Self::SelectionFailed(msg),
        }
    }
}

/// Receiving ends handed to the caller
pub struct ConductorChannels {
    /// Every status transition
    pub status: Receiver<RecognizerStatus>,
    /// Engine lifecycle and debug images
    pub events: Receiver<RecognizerEvent>,
    /// User-facing failure messages
    pub notifications: Receiver<String>,
}

/// Forwards detector overlays as events
struct EventDebugSink {
    events: Sender<RecognizerEvent>,
}

impl DebugSink for EventDebugSink {
    fn submit(&self, overlay: RgbImage) {
        let _ = self.events.send(RecognizerEvent::DebugImageSubmitted(overlay));
    }
}

/// Runs recognition requests one at a time
pub struct Conductor<P: Platform> {
    platform: P,
    engine: Option<OcrEngine>,
    detector: AutoBlockDetector,
    auto_block: AutoBlockConfig,
    reducer: ChunkReducer,
    submit_debug_images: bool,
    status: Arc<RwLock<RecognizerStatus>>,
    status_tx: Sender<RecognizerStatus>,
    events_tx: Sender<RecognizerEvent>,
    notify_tx: Sender<String>,
}

impl<P: Platform> Conductor<P> {
    /// Build the conductor and start the configured engine once.
    ///
    /// An engine that fails to start leaves the conductor `Unavailable`; only
    /// invalid replace rules are an error here.
    pub async fn new(
        platform: P,
        config: &AppConfig,
        client: reqwest::Client,
    ) -> Result<(Self, ConductorChannels), regex::Error> {
        let rules = ReplaceRules::compile(&config.postprocess.replace_rules)?;
        let corrector: Option<Box<dyn TextCorrector>> = if config.postprocess.correct_spacing {
            Some(Box::new(CjkSpacingCorrector))
        } else {
            None
        };

        let (status_tx, status_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let (notify_tx, notify_rx) = unbounded();

        let mut conductor = Self {
            platform,
            engine: None,
            detector: AutoBlockDetector::new(config.auto_block.variant),
            auto_block: config.auto_block.clone(),
            reducer: ChunkReducer::new(corrector, rules),
            submit_debug_images: config.debug.submit_images,
            status: Arc::new(RwLock::new(RecognizerStatus::Initializing)),
            status_tx,
            events_tx,
            notify_tx,
        };
        let _ = conductor.status_tx.send(RecognizerStatus::Initializing);

        match OcrEngine::start(config, client, conductor.events_tx.clone()).await {
            Ok(engine) => {
                info!("OCR engine {} initialized", engine.name());
                conductor.engine = Some(engine);
                let _ = conductor
                    .events_tx
                    .send(RecognizerEvent::Initialized(RequestKind::ALL.to_vec()));
                conductor.set_status(RecognizerStatus::Idle);
            }
            Err(e) => {
                error!("OCR engine could not be started: {}", e);
                let _ = conductor.notify_tx.send(format!("OCR engine could not be started: {e}"));
                conductor.set_status(RecognizerStatus::Unavailable);
            }
        }

        let channels = ConductorChannels {
            status: status_rx,
            events: events_rx,
            notifications: notify_rx,
        };
        Ok((conductor, channels))
    }

    pub fn status(&self) -> RecognizerStatus {
        *self.status.read()
    }

    /// Shared read access to the status for reporting collaborators
    pub fn status_handle(&self) -> Arc<RwLock<RecognizerStatus>> {
        Arc::clone(&self.status)
    }

    /// Run one request to completion
    pub async fn recognize(
        &mut self,
        request: RecognitionRequest,
    ) -> Result<Vec<PostprocessedChunk>, RecognitionOpError> {
        let kind = request.kind();
        debug!("Recognition request {:?}", kind);

        let result = if self.engine_available() {
            self.run(request).await
        } else {
            Err(RecognitionOpError::OcrUnavailable)
        };

        if self.engine_available() {
            self.set_status(RecognizerStatus::Idle);
        } else {
            self.set_status(RecognizerStatus::Unavailable);
        }

        match &result {
            Ok(chunks) => info!("{:?} produced {} candidates", kind, chunks.len()),
            Err(e) => self.report(e),
        }
        result
    }

    fn engine_available(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_available())
    }

    async fn run(&mut self, request: RecognitionRequest) -> Result<Vec<PostprocessedChunk>, RecognitionOpError> {
        let image = match request {
            RecognitionRequest::ManualBlock => {
                self.set_status(RecognizerStatus::AwaitingUserInput);
                let area = self.platform.user_selected_area().await?;
                self.set_status(RecognizerStatus::Processing);
                self.capture(area).await?
            }
            RecognitionRequest::AutoBlock => {
                self.set_status(RecognizerStatus::AwaitingUserInput);
                let point = self.platform.user_selected_point().await?;
                self.set_status(RecognizerStatus::Processing);
                self.auto_block_at(point).await?
            }
            RecognitionRequest::Region { area, auto_narrow } => {
                self.set_status(RecognizerStatus::Processing);
                let image = self.capture(area).await?;
                if auto_narrow {
                    self.narrow(image).await?
                } else {
                    image
                }
            }
            RecognitionRequest::ProvidedImage(image) => {
                self.set_status(RecognizerStatus::Processing);
                image
            }
        };

        let (width, height) = image.dimensions();
        if width < MIN_INPUT_DIMENSION || height < MIN_INPUT_DIMENSION {
            return Err(RecognitionOpError::InputTooSmall { width, height });
        }

        let engine = self.engine.as_mut().ok_or(RecognitionOpError::OcrUnavailable)?;
        let raw = engine.recognize(&image).await?;
        self.reducer.reduce(&raw).map_err(|e| match e {
            ReduceError::NoParseableOutput => {
                RecognitionOpError::OcrError(OcrError::BackendError("no recognizable text in OCR output".to_string()))
            }
            ReduceError::ZeroVariants => RecognitionOpError::ZeroVariants,
        })
    }

    async fn capture(&self, area: Rectangle) -> Result<RgbImage, RecognitionOpError> {
        self.platform
            .area_screenshot(area)
            .await
            .map_err(|e| RecognitionOpError::ScreenshotFailed(e.to_string()))
    }

    /// Capture a fixed-size area around the point and cut out the block under it
    async fn auto_block_at(&self, point: Point) -> Result<RgbImage, RecognitionOpError> {
        let left = point.x.saturating_sub(self.auto_block.capture_width / 2);
        let top = point.y.saturating_sub(self.auto_block.capture_height / 2);
        let area = Rectangle::from_xywh(left, top, self.auto_block.capture_width, self.auto_block.capture_height)
            .ok_or_else(|| RecognitionOpError::Internal("auto-block capture size is zero".to_string()))?;
        let image = self.capture(area).await?;

        let focal = Point::new(point.x - left, point.y - top);
        let block = self.find_block(&image, focal).await?.ok_or(RecognitionOpError::NoBlockDetected)?;
        debug!("Auto-block found {:?} around {:?}", block, point);
        Ok(crop(&image, block))
    }

    /// Narrow a region to the block at its center, keeping it whole when none is found
    async fn narrow(&self, image: RgbImage) -> Result<RgbImage, RecognitionOpError> {
        let (w, h) = image.dimensions();
        let center = Point::new(w / 2, h / 2);
        match self.find_block(&image, center).await? {
            Some(block) => Ok(crop(&image, block)),
            None => {
                debug!("No block at region center, using the whole region");
                Ok(image)
            }
        }
    }

    async fn find_block(&self, image: &RgbImage, focal: Point) -> Result<Option<Rectangle>, RecognitionOpError> {
        let detector = self.detector.clone();
        let sink = self.submit_debug_images.then(|| EventDebugSink {
            events: self.events_tx.clone(),
        });
        let image = image.clone();

        tokio::task::spawn_blocking(move || {
            detector.detect(&image, focal, sink.as_ref().map(|s| s as &dyn DebugSink))
        })
        .await
        .map_err(|e| RecognitionOpError::Internal(format!("block detection task failed: {e}")))?
        .map_err(|e| RecognitionOpError::Internal(e.to_string()))
    }

    fn set_status(&self, status: RecognizerStatus) {
        let mut current = self.status.write();
        if *current != status {
            debug!("Recognizer status {:?} -> {:?}", *current, status);
            *current = status;
            let _ = self.status_tx.send(status);
        }
    }

    fn report(&self, err: &RecognitionOpError) {
        match err.user_message() {
            None => debug!("Recognition cancelled: {}", err),
            Some(message) => {
                error!("Recognition failed: {}", err);
                let _ = self.notify_tx.send(message.to_string());
            }
        }
    }
}
