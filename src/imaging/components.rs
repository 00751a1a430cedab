//! Connected component labeling
//!
//! Single-pass contour-tracing labeling (Chang, Chen & Lu) over a binary
//! buffer where `0` is foreground and `255` is background. Foreground is
//! 8-connected. Runs iteratively, never recursively, so large blobs cannot
//! blow the stack.

use thiserror::Error;

use crate::geometry::Rectangle;

/// Background value of the binary input
pub const BACKGROUND: u8 = 255;
/// Foreground value of the binary input
pub const FOREGROUND: u8 = 0;

/// Label of a pixel that was visited while tracing and is known background
const MARKED: i32 = -1;

/// Clockwise neighbour offsets, starting at "right"
const OFFSETS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Start direction when tracing an external contour (up-right)
const EXTERNAL_START: usize = 7;
/// Start direction when tracing an internal contour (down-left)
const INTERNAL_START: usize = 3;

/// Internal consistency failures of the labeler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComponentError {
    #[error("invalid image dimensions {width}x{height} for {len} pixels")]
    InvalidDimensions { width: u32, height: u32, len: usize },
    #[error("contour trace exceeded {limit} steps")]
    TraceBoundExceeded { limit: usize },
}

/// One labeled region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedComponent {
    /// Label, starting at 1
    pub label: u32,
    /// Bounding box of every pixel carrying the label
    pub bounds: Rectangle,
}

/// Labeling result, indexed by label. Slot 0 is the background placeholder.
#[derive(Debug, Clone)]
pub struct ComponentSet {
    slots: Vec<Option<Rectangle>>,
}

impl ComponentSet {
    /// Component for a label; `None` for label 0 or unknown labels
    pub fn get(&self, label: u32) -> Option<ConnectedComponent> {
        let bounds = (*self.slots.get(label as usize)?)?;
        Some(ConnectedComponent { label, bounds })
    }

    /// Number of real components (excludes the placeholder)
    pub fn len(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All real components in label order
    pub fn iter(&self) -> impl Iterator<Item = ConnectedComponent> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(label, bounds)| bounds.map(|bounds| ConnectedComponent { label: label as u32, bounds }))
    }
}

/// Working state of one labeling pass
struct Labeler {
    width: i64,
    height: i64,
    pixels: Vec<u8>,
    labels: Vec<i32>,
    trace_limit: usize,
}

impl Labeler {
    fn index(&self, x: i64, y: i64) -> usize {
        (y * self.width + x) as usize
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn is_foreground(&self, x: i64, y: i64) -> bool {
        self.in_bounds(x, y) && self.pixels[self.index(x, y)] == FOREGROUND
    }

    /// Find the next contour point clockwise from `direction`, marking the
    /// background neighbours examined on the way.
    fn tracer(&mut self, x: i64, y: i64, direction: usize) -> Option<(i64, i64, usize)> {
        for step in 0..8 {
            let d = (direction + step) % 8;
            let (dx, dy) = OFFSETS[d];
            let (nx, ny) = (x + dx, y + dy);
            if self.is_foreground(nx, ny) {
                return Some((nx, ny, d));
            }
            if self.in_bounds(nx, ny) {
                let idx = self.index(nx, ny);
                self.labels[idx] = MARKED;
            }
        }
        None
    }

    /// Follow one contour starting at `(sx, sy)`, assigning `label` to every
    /// contour pixel.
    fn trace_contour(&mut self, sx: i64, sy: i64, label: i32, start: usize) -> Result<(), ComponentError> {
        let idx = self.index(sx, sy);
        self.labels[idx] = label;

        // isolated pixel
        let Some((tx, ty, mut direction)) = self.tracer(sx, sy, start) else {
            return Ok(());
        };

        let (mut cx, mut cy) = (tx, ty);
        let idx = self.index(cx, cy);
        self.labels[idx] = label;

        let mut steps = 0usize;
        loop {
            steps += 1;
            if steps > self.trace_limit {
                return Err(ComponentError::TraceBoundExceeded { limit: self.trace_limit });
            }

            let search_from = (direction + 6) % 8;
            // the previous contour point is foreground, so the tracer always finds one
            let Some((nx, ny, d)) = self.tracer(cx, cy, search_from) else {
                return Ok(());
            };
            direction = d;

            if cx == sx && cy == sy && nx == tx && ny == ty {
                return Ok(());
            }

            let idx = self.index(nx, ny);
            self.labels[idx] = label;
            cx = nx;
            cy = ny;
        }
    }
}

/// Label the 8-connected foreground regions of `pixels`.
///
/// `pixels` must hold `width * height` values of [`FOREGROUND`] or
/// [`BACKGROUND`]; anything else counts as background. Pixels on the image
/// border are forced to background first. `height` must be at least 2.
pub fn extract_components(pixels: &[u8], width: u32, height: u32) -> Result<ComponentSet, ComponentError> {
    let len = (width as usize) * (height as usize);
    if width == 0 || height < 2 || pixels.len() != len {
        return Err(ComponentError::InvalidDimensions { width, height, len: pixels.len() });
    }

    let mut buffer = pixels.to_vec();
    for x in 0..width as usize {
        buffer[x] = BACKGROUND;
        buffer[(height as usize - 1) * width as usize + x] = BACKGROUND;
    }
    for y in 0..height as usize {
        buffer[y * width as usize] = BACKGROUND;
        buffer[y * width as usize + width as usize - 1] = BACKGROUND;
    }

    let mut labeler = Labeler {
        width: width as i64,
        height: height as i64,
        pixels: buffer,
        labels: vec![0; len],
        // a contour pixel is revisited at most once per incident direction pair
        trace_limit: len * 4,
    };

    let mut next_label: i32 = 1;
    for y in 0..labeler.height {
        for x in 0..labeler.width {
            if !labeler.is_foreground(x, y) {
                continue;
            }
            let idx = labeler.index(x, y);

            // external contour: first pixel of a new component
            if labeler.labels[idx] == 0 && !labeler.is_foreground(x, y - 1) {
                labeler.trace_contour(x, y, next_label, EXTERNAL_START)?;
                next_label += 1;
            }

            // internal contour: unmarked background below
            if !labeler.is_foreground(x, y + 1) && labeler.in_bounds(x, y + 1) {
                let below = labeler.index(x, y + 1);
                if labeler.labels[below] == 0 {
                    let label = if labeler.labels[idx] > 0 {
                        labeler.labels[idx]
                    } else {
                        labeler.labels[labeler.index(x - 1, y)]
                    };
                    labeler.trace_contour(x, y, label, INTERNAL_START)?;
                }
            }

            // interior pixel: inherit from the left
            if labeler.labels[idx] == 0 {
                labeler.labels[idx] = labeler.labels[labeler.index(x - 1, y)];
            }
        }
    }

    let count = (next_label - 1).max(0) as usize;
    let mut extents: Vec<Option<(u32, u32, u32, u32)>> = vec![None; count + 1];
    for y in 0..height {
        for x in 0..width {
            let label = labeler.labels[(y * width + x) as usize];
            if label <= 0 {
                continue;
            }
            let slot = &mut extents[label as usize];
            *slot = Some(match *slot {
                None => (x, y, x, y),
                Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x), b.max(y)),
            });
        }
    }

    let slots = extents
        .into_iter()
        .enumerate()
        .map(|(label, extent)| {
            if label == 0 {
                return None;
            }
            extent.and_then(|(l, t, r, b)| Rectangle::from_edges(l, t, r, b))
        })
        .collect();

    Ok(ComponentSet { slots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::primitives::{binarize, erode, gray_values, otsu_threshold};
    use image::{Rgb, RgbImage};

    fn blank(width: u32, height: u32) -> Vec<u8> {
        vec![BACKGROUND; (width * height) as usize]
    }

    fn fill(pixels: &mut [u8], width: u32, rect: (u32, u32, u32, u32)) {
        let (x, y, w, h) = rect;
        for yy in y..y + h {
            for xx in x..x + w {
                pixels[(yy * width + xx) as usize] = FOREGROUND;
            }
        }
    }

    fn bounds_of(set: &ComponentSet) -> Vec<(u32, u32, u32, u32)> {
        let mut all: Vec<_> = set
            .iter()
            .map(|c| (c.bounds.left(), c.bounds.top(), c.bounds.width(), c.bounds.height()))
            .collect();
        all.sort();
        all
    }

    #[test]
    fn test_disjoint_rectangles() {
        let (w, h) = (60, 40);
        let rects = [(2, 2, 5, 7), (10, 3, 1, 1), (20, 10, 15, 20), (40, 30, 12, 8)];
        let mut pixels = blank(w, h);
        for r in rects {
            fill(&mut pixels, w, r);
        }

        let set = extract_components(&pixels, w, h).unwrap();
        assert_eq!(set.len(), rects.len());
        let mut expected = rects.to_vec();
        expected.sort();
        assert_eq!(bounds_of(&set), expected);
        assert!(set.get(0).is_none());
    }

    #[test]
    fn test_ring_is_one_component() {
        let (w, h) = (20, 20);
        let mut pixels = blank(w, h);
        fill(&mut pixels, w, (3, 3, 12, 12));
        for y in 6..12 {
            for x in 6..12 {
                pixels[(y * w + x) as usize] = BACKGROUND;
            }
        }
        // speck inside the hole
        pixels[(8 * w + 8) as usize] = FOREGROUND;

        let set = extract_components(&pixels, w, h).unwrap();
        assert_eq!(bounds_of(&set), vec![(3, 3, 12, 12), (8, 8, 1, 1)]);
    }

    #[test]
    fn test_diagonal_pixels_connect() {
        let (w, h) = (10, 10);
        let mut pixels = blank(w, h);
        for i in 2..7 {
            pixels[(i * w + i) as usize] = FOREGROUND;
        }
        let set = extract_components(&pixels, w, h).unwrap();
        assert_eq!(bounds_of(&set), vec![(2, 2, 5, 5)]);
    }

    #[test]
    fn test_u_shape_merges_branches() {
        let (w, h) = (12, 12);
        let mut pixels = blank(w, h);
        fill(&mut pixels, w, (2, 2, 2, 7));
        fill(&mut pixels, w, (7, 2, 2, 7));
        fill(&mut pixels, w, (2, 8, 7, 2));
        let set = extract_components(&pixels, w, h).unwrap();
        assert_eq!(bounds_of(&set), vec![(2, 2, 7, 8)]);
    }

    #[test]
    fn test_border_pixels_forced_to_background() {
        let (w, h) = (6, 6);
        let pixels = vec![FOREGROUND; 36];
        let set = extract_components(&pixels, w, h).unwrap();
        assert_eq!(bounds_of(&set), vec![(1, 1, 4, 4)]);
    }

    #[test]
    fn test_single_column_image() {
        let pixels = vec![FOREGROUND; 5];
        let set = extract_components(&pixels, 1, 5).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(
            extract_components(&[0, 0], 2, 1),
            Err(ComponentError::InvalidDimensions { .. })
        ));
        assert!(extract_components(&[0, 0, 0], 2, 2).is_err());
    }

    #[test]
    fn test_threshold_erode_label_roundtrip() {
        let (w, h) = (64u32, 64u32);
        let sizes: Vec<u32> = (2..=50u32).step_by(4).chain([3, 49]).collect();
        for &bw in &sizes {
            for &bh in &sizes {
                let (x, y) = (3 + bw % 7, 4 + bh % 5);
                let img = RgbImage::from_fn(w, h, |px, py| {
                    if px >= x && px < x + bw && py >= y && py < y + bh {
                        Rgb([30, 30, 30])
                    } else {
                        Rgb([220, 220, 220])
                    }
                });

                let mut binary = img.clone();
                binarize(&mut binary, otsu_threshold(&gray_values(&img)));

                let exact = extract_components(&gray_values(&erode(&binary, 0, 0)), w, h).unwrap();
                assert_eq!(bounds_of(&exact), vec![(x, y, bw, bh)], "blob {}x{} at ({}, {})", bw, bh, x, y);

                // unit erosion thickens the blob by one pixel on every side
                let thick = extract_components(&gray_values(&erode(&binary, 1, 1)), w, h).unwrap();
                assert_eq!(
                    bounds_of(&thick),
                    vec![(x - 1, y - 1, bw + 2, bh + 2)],
                    "eroded blob {}x{} at ({}, {})",
                    bw,
                    bh,
                    x,
                    y
                );
            }
        }
    }
}
