//! Yomiscan - Japanese text recognition for screen content
//!
//! Finds the text block around a point on screen, runs OCR over it and
//! ranks the candidate readings.

pub mod autoblock;
pub mod chunks;
pub mod conductor;
pub mod config;
pub mod geometry;
pub mod imaging;
pub mod ocr;
pub mod platform;
pub mod storage;

pub use autoblock::{AutoBlockDetector, BlockVariant, DebugSink};
pub use chunks::{ChunkReducer, PostprocessedChunk};
pub use conductor::{Conductor, ConductorChannels, RecognitionOpError, RecognitionRequest, RecognizerStatus};
pub use config::AppConfig;
pub use geometry::{Point, Rectangle};
pub use ocr::{OcrEngine, OcrError, RecognizerEvent};
pub use platform::{CaptureError, Platform, SelectionError, StillImagePlatform};
