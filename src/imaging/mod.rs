//! Imaging Layer
//!
//! Pixel-level building blocks for block detection and OCR preprocessing:
//! - Pixel primitives over `RgbImage` (gray images keep equal channels)
//! - Connected component labeling
//! - Border following

pub mod components;
pub mod contours;
pub mod primitives;

pub use components::{extract_components, ComponentError, ComponentSet, ConnectedComponent};
pub use contours::{find_contours, Contour, ContourKind};
