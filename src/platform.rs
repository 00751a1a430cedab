//! Platform interface
//!
//! Point/area selection and screen capture are provided by the host. The
//! recognizer waits on these calls while the user interacts.

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

use crate::geometry::{Point, Rectangle};
use crate::imaging::primitives::crop;

/// Outcome of an interactive selection that produced nothing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The user backed out
    #[error("selection cancelled")]
    Cancelled,
    #[error("selection failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("screenshot failed: {0}")]
    Failed(String),
}

/// Selection and capture services of the host environment
#[async_trait]
pub trait Platform: Send + Sync {
    /// Let the user pick a point on screen
    async fn user_selected_point(&self) -> Result<Point, SelectionError>;

    /// Let the user drag out an area on screen
    async fn user_selected_area(&self) -> Result<Rectangle, SelectionError>;

    /// Capture an area of the screen
    async fn area_screenshot(&self, area: Rectangle) -> Result<RgbImage, CaptureError>;
}

/// A "screen" backed by one still image, with selections fixed up front.
///
/// A selection that was not set counts as cancelled.
pub struct StillImagePlatform {
    screen: RgbImage,
    point: Option<Point>,
    area: Option<Rectangle>,
}

impl StillImagePlatform {
    pub fn new(screen: RgbImage) -> Self {
        Self {
            screen,
            point: None,
            area: None,
        }
    }

    pub fn with_point(mut self, point: Point) -> Self {
        self.point = Some(point);
        self
    }

    pub fn with_area(mut self, area: Rectangle) -> Self {
        self.area = Some(area);
        self
    }
}

#[async_trait]
impl Platform for StillImagePlatform {
    async fn user_selected_point(&self) -> Result<Point, SelectionError> {
        self.point.ok_or(SelectionError::Cancelled)
    }

    async fn user_selected_area(&self) -> Result<Rectangle, SelectionError> {
        self.area.ok_or(SelectionError::Cancelled)
    }

    async fn area_screenshot(&self, area: Rectangle) -> Result<RgbImage, CaptureError> {
        let (w, h) = self.screen.dimensions();
        if area.left() >= w || area.top() >= h {
            return Err(CaptureError::Failed(format!("{:?} lies outside the {}x{} screen", area, w, h)));
        }
        let visible = Rectangle::clamped(
            area.left() as i64,
            area.top() as i64,
            area.right() as i64,
            area.bottom() as i64,
            w,
            h,
        )
        .ok_or_else(|| CaptureError::Failed("empty screen".to_string()))?;
        Ok(crop(&self.screen, visible))
    }
}
