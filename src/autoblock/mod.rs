//! Automatic text-block detection
//!
//! Given a screenshot and the point the user pointed at, find the rectangle
//! of the text block under that point. Characters are found as connected
//! components, sized against the characters nearest the point, grown toward
//! each other and merged; the merged shape under the point is the block.
//!
//! Two tunings exist: dense vertical manga text and sparse horizontal game
//! textboxes. Their constants were tuned by hand against real screenshots.

mod params;

pub use params::{BlockVariant, HeuristicParams};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

use crate::geometry::{Point, Rectangle};
use crate::imaging::components::{extract_components, ComponentError, ConnectedComponent};
use crate::imaging::contours::{find_contours, Contour, ContourKind};
use crate::imaging::primitives::{binarize, erode, gray_values, is_dark_dominated, negate, otsu_threshold, to_grayscale};

/// Receives a diagnostic overlay of a detection run
pub trait DebugSink {
    fn submit(&self, overlay: RgbImage);
}

const KEPT_COLOR: Rgb<u8> = Rgb([40, 90, 255]);
const GROWN_COLOR: Rgb<u8> = Rgb([20, 200, 60]);
const BLOCK_COLOR: Rgb<u8> = Rgb([255, 30, 30]);

/// Average character size around the focal point
#[derive(Debug, Clone, Copy, PartialEq)]
struct Exemplar {
    width: f64,
    height: f64,
}

impl Exemplar {
    fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// A grown component box, signed so it may spill past the image before clamping
#[derive(Debug, Clone, Copy)]
struct GrownBox {
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
}

impl GrownBox {
    fn center_x(&self) -> f64 {
        (self.left + self.right) as f64 / 2.0
    }
}

/// Text block detector for one heuristic variant
#[derive(Debug, Clone)]
pub struct AutoBlockDetector {
    params: HeuristicParams,
}

impl AutoBlockDetector {
    pub fn new(variant: BlockVariant) -> Self {
        Self::with_params(HeuristicParams::for_variant(variant))
    }

    pub fn with_params(params: HeuristicParams) -> Self {
        Self { params }
    }

    /// Find the text block containing `focal`.
    ///
    /// Returns `Ok(None)` when no character-like component lies near the
    /// point or no merged shape contains it. Errors only on labeler
    /// consistency failures.
    pub fn detect(
        &self,
        image: &RgbImage,
        focal: Point,
        debug_sink: Option<&dyn DebugSink>,
    ) -> Result<Option<Rectangle>, ComponentError> {
        let (width, height) = image.dimensions();
        if width < 2 || height < 2 || focal.x >= width || focal.y >= height {
            return Ok(None);
        }
        let p = &self.params;

        // 1. grayscale, light-on-dark becomes dark-on-light
        let mut gray = image.clone();
        to_grayscale(&mut gray);
        let r = p.sample_radius as i64;
        let sample = Rectangle::clamped(
            focal.x as i64 - r,
            focal.y as i64 - r,
            focal.x as i64 + r,
            focal.y as i64 + r,
            width,
            height,
        );
        if is_dark_dominated(&gray, sample) {
            debug!("Sample window around {:?} is dark, inverting", focal);
            negate(&mut gray);
        }

        // 2. thicken strokes, then binarize
        let mut binary = erode(&gray, p.erode_radius.0, p.erode_radius.1);
        let level = otsu_threshold(&gray_values(&binary));
        binarize(&mut binary, level);

        // 3. character-plausible components
        let components = extract_components(&gray_values(&binary), width, height)?;
        let plausible: Vec<ConnectedComponent> = components.iter().filter(|c| p.is_plausible(&c.bounds)).collect();

        // 4. exemplar from the neighbourhood of the point
        let Some(exemplar) = self.exemplar(&plausible, focal) else {
            debug!("No component within {}px of {:?}", p.near_radius, focal);
            self.submit_overlay(debug_sink, image, &plausible, &[], None);
            return Ok(None);
        };
        debug!(
            "Exemplar {:.1}x{:.1} from {} plausible components",
            exemplar.width,
            exemplar.height,
            plausible.len()
        );

        // 5. filter against the exemplar and grow toward the point
        let grown: Vec<GrownBox> = plausible
            .iter()
            .filter(|c| !self.too_large(&c.bounds, exemplar))
            .map(|c| self.grow(&c.bounds, exemplar, focal))
            .collect();

        // 6. merge and pick the shape under the point
        let mask = rasterize(&grown, width, height);
        let contours = find_contours(&mask, width, height)?;
        let Some(contour) = pick_contour(&contours, focal) else {
            debug!("No merged shape contains {:?}", focal);
            self.submit_overlay(debug_sink, image, &plausible, &grown, None);
            return Ok(None);
        };
        let Some(mut block) = contour.bounding_box() else {
            return Ok(None);
        };

        // 7. keep neighbouring blocks out
        if let Some(ratio) = p.slice_jump_ratio {
            if let Some(sliced) = slice_contour(contour, &grown, focal, exemplar.height * ratio) {
                block = sliced;
            }
        }

        // 8. margin
        let block = block.expanded(p.margin, width, height);
        self.submit_overlay(debug_sink, image, &plausible, &grown, block);
        Ok(block)
    }

    fn exemplar(&self, components: &[ConnectedComponent], focal: Point) -> Option<Exemplar> {
        let near: Vec<&ConnectedComponent> = components
            .iter()
            .filter(|c| c.bounds.distance_to(focal) <= self.params.near_radius)
            .collect();
        if near.is_empty() {
            return None;
        }
        let n = near.len() as f64;
        Some(Exemplar {
            width: near.iter().map(|c| c.bounds.width() as f64).sum::<f64>() / n,
            height: near.iter().map(|c| c.bounds.height() as f64).sum::<f64>() / n,
        })
    }

    fn too_large(&self, bounds: &Rectangle, exemplar: Exemplar) -> bool {
        let p = &self.params;
        bounds.width() as f64 > exemplar.width * p.max_width_ratio
            || bounds.height() as f64 > exemplar.height * p.max_height_ratio
            || bounds.area() as f64 > exemplar.area() * p.max_area_ratio
    }

    fn grow(&self, bounds: &Rectangle, exemplar: Exemplar, focal: Point) -> GrownBox {
        let p = &self.params;
        let mut left = bounds.left() as f64;
        let mut right = bounds.right() as f64;
        let mut top = bounds.top() as f64;
        let mut bottom = bounds.bottom() as f64;
        let w = bounds.width() as f64;
        let h = bounds.height() as f64;

        // a kana split into a narrow stroke pair, e.g. い or り
        if w < exemplar.width * p.split_kana_short && h > exemplar.height * p.split_kana_long {
            let extra = (exemplar.width - w) / 2.0;
            left -= extra;
            right += extra;
        }
        // a kana split into flat strokes, e.g. こ or ニ
        if h < exemplar.height * p.split_kana_short && w > exemplar.width * p.split_kana_long {
            let extra = (exemplar.height - h) / 2.0;
            top -= extra;
            bottom += extra;
        }

        let (cx, cy) = bounds.center();
        let distance = (cx - focal.x as f64).hypot(cy - focal.y as f64);
        let falloff = 1.0 / (1.0 + distance / p.growth_falloff);
        let grow_x = exemplar.width * p.growth_x * falloff;
        let grow_y = exemplar.height * p.growth_y * falloff;

        GrownBox {
            left: (left - grow_x).round() as i64,
            top: (top - grow_y).round() as i64,
            right: (right + grow_x).round() as i64,
            bottom: (bottom + grow_y).round() as i64,
        }
    }

    fn submit_overlay(
        &self,
        sink: Option<&dyn DebugSink>,
        image: &RgbImage,
        components: &[ConnectedComponent],
        grown: &[GrownBox],
        block: Option<Rectangle>,
    ) {
        let Some(sink) = sink else {
            return;
        };
        let mut overlay = image.clone();
        for c in components {
            draw_hollow_rect_mut(&mut overlay, to_draw_rect(&c.bounds), KEPT_COLOR);
        }
        let (w, h) = image.dimensions();
        for g in grown {
            if let Some(rect) = Rectangle::clamped(g.left, g.top, g.right, g.bottom, w, h) {
                draw_hollow_rect_mut(&mut overlay, to_draw_rect(&rect), GROWN_COLOR);
            }
        }
        if let Some(block) = block {
            draw_hollow_rect_mut(&mut overlay, to_draw_rect(&block), BLOCK_COLOR);
        }
        sink.submit(overlay);
    }
}

fn to_draw_rect(rect: &Rectangle) -> Rect {
    Rect::at(rect.left() as i32, rect.top() as i32).of_size(rect.width(), rect.height())
}

/// Paint grown boxes onto a 0/1 mask
fn rasterize(boxes: &[GrownBox], width: u32, height: u32) -> Vec<u8> {
    let mut mask = vec![0u8; (width as usize) * (height as usize)];
    for g in boxes {
        let Some(rect) = Rectangle::clamped(g.left, g.top, g.right, g.bottom, width, height) else {
            continue;
        };
        for y in rect.top()..=rect.bottom() {
            let row = (y * width) as usize;
            mask[row + rect.left() as usize..=row + rect.right() as usize].fill(1);
        }
    }
    mask
}

/// Largest outer contour whose bounding box contains the point
fn pick_contour(contours: &[Contour], focal: Point) -> Option<&Contour> {
    contours
        .iter()
        .filter(|c| c.kind == ContourKind::Outer)
        .filter_map(|c| c.bounding_box().map(|b| (c, b)))
        .filter(|(_, b)| b.contains(focal))
        .max_by_key(|(_, b)| b.area())
        .map(|(c, _)| c)
}

/// Cut the block where its upper edge jumps by more than `max_jump`.
///
/// Returns the narrowed block, or `None` when no cut is needed.
fn slice_contour(contour: &Contour, grown: &[GrownBox], focal: Point, max_jump: f64) -> Option<Rectangle> {
    let bounds = contour.bounding_box()?;
    let left = bounds.left();
    let span = bounds.width() as usize;

    let mut upper = vec![u32::MAX; span];
    for p in &contour.points {
        let slot = &mut upper[(p.x - left) as usize];
        *slot = (*slot).min(p.y);
    }

    let jumps = |a: u32, b: u32| a != u32::MAX && b != u32::MAX && (a as f64 - b as f64).abs() > max_jump;
    let fx = (focal.x - left) as usize;

    let mut cut_left = 0;
    for x in (0..fx).rev() {
        if jumps(upper[x], upper[x + 1]) {
            cut_left = x + 1;
            break;
        }
    }
    let mut cut_right = span - 1;
    for x in fx + 1..span {
        if jumps(upper[x], upper[x - 1]) {
            cut_right = x - 1;
            break;
        }
    }

    if cut_left == 0 && cut_right == span - 1 {
        return None;
    }
    let (lo, hi) = ((left as usize + cut_left) as f64, (left as usize + cut_right) as f64);
    debug!("Slicing block to columns {}..={}", lo, hi);

    // rebuild from the grown boxes that live inside the kept columns
    let mut extent: Option<(i64, i64, i64, i64)> = None;
    for g in grown {
        let inside = g.center_x() >= lo
            && g.center_x() <= hi
            && g.bottom >= bounds.top() as i64
            && g.top <= bounds.bottom() as i64;
        if !inside {
            continue;
        }
        extent = Some(match extent {
            None => (g.left, g.top, g.right, g.bottom),
            Some((l, t, r, b)) => (l.min(g.left), t.min(g.top), r.max(g.right), b.max(g.bottom)),
        });
    }
    let (l, t, r, b) = extent?;
    Rectangle::from_edges(
        (l.max(lo as i64)).max(bounds.left() as i64) as u32,
        t.max(bounds.top() as i64) as u32,
        (r.min(hi as i64)).min(bounds.right() as i64) as u32,
        b.min(bounds.bottom() as i64) as u32,
    )
}
