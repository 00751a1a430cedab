//! Border following (Suzuki & Abe, 1985)
//!
//! Traces the outer borders and hole borders of a binary mask and records
//! which border immediately encloses each one. The auto-block detector only
//! needs outer borders and their bounding boxes, so no polygon simplification
//! is provided.

use super::components::ComponentError;
use crate::geometry::{Point, Rectangle};

/// Clockwise neighbour offsets, starting at "right" (x grows right, y grows down)
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

/// Kind of border
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourKind {
    /// Boundary between a component and the background surrounding it
    Outer,
    /// Boundary between a component and a hole inside it
    Hole,
}

/// A traced border
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    /// Border number, unique within one call (starts at 2; 1 is the image frame)
    pub id: i32,
    /// Immediately enclosing border, `None` when it is the image frame
    pub parent: Option<i32>,
    pub kind: ContourKind,
    /// Border pixels in tracing order
    pub points: Vec<Point>,
}

impl Contour {
    /// Bounding box of the border pixels
    pub fn bounding_box(&self) -> Option<Rectangle> {
        let first = self.points.first()?;
        let (mut l, mut t, mut r, mut b) = (first.x, first.y, first.x, first.y);
        for p in &self.points {
            l = l.min(p.x);
            t = t.min(p.y);
            r = r.max(p.x);
            b = b.max(p.y);
        }
        Rectangle::from_edges(l, t, r, b)
    }
}

/// Zero-padded working copy of the mask
struct Plane {
    width: i64,
    height: i64,
    cells: Vec<i32>,
}

impl Plane {
    fn get(&self, x: i64, y: i64) -> i32 {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return 0;
        }
        self.cells[(y * self.width + x) as usize]
    }

    fn set(&mut self, x: i64, y: i64, value: i32) {
        let idx = (y * self.width + x) as usize;
        self.cells[idx] = value;
    }
}

fn direction_of(from: (i64, i64), to: (i64, i64)) -> usize {
    let delta = (to.0 - from.0, to.1 - from.1);
    OFFSETS.iter().position(|&o| o == delta).unwrap_or(0)
}

/// Trace all borders of `mask` (non-zero = foreground).
///
/// A single border can never take more than four steps per pixel; running
/// past that means the tracer lost its way and is reported as an error.
pub fn find_contours(mask: &[u8], width: u32, height: u32) -> Result<Vec<Contour>, ComponentError> {
    let limit = mask.len() * 4;
    trace_borders(mask, width, height, limit)
}

fn trace_borders(mask: &[u8], width: u32, height: u32, limit: usize) -> Result<Vec<Contour>, ComponentError> {
    if mask.len() != (width as usize) * (height as usize) {
        return Err(ComponentError::InvalidDimensions {
            width,
            height,
            len: mask.len(),
        });
    }
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }

    let pw = width as i64 + 2;
    let ph = height as i64 + 2;
    let mut plane = Plane {
        width: pw,
        height: ph,
        cells: vec![0; (pw * ph) as usize],
    };
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            if mask[(y * width as i64 + x) as usize] != 0 {
                plane.set(x + 1, y + 1, 1);
            }
        }
    }

    // border kinds and parents by border number; slot 1 is the frame (a hole)
    let mut kinds: Vec<ContourKind> = vec![ContourKind::Hole, ContourKind::Hole];
    let mut parents: Vec<Option<i32>> = vec![None, None];
    let mut contours = Vec::new();
    let mut nbd: i32 = 1;

    for y in 1..ph - 1 {
        let mut lnbd: i32 = 1;
        for x in 1..pw - 1 {
            let value = plane.get(x, y);
            if value == 0 {
                continue;
            }

            let start = if value == 1 && plane.get(x - 1, y) == 0 {
                Some((ContourKind::Outer, (x - 1, y)))
            } else if value >= 1 && plane.get(x + 1, y) == 0 {
                if value > 1 {
                    lnbd = value;
                }
                Some((ContourKind::Hole, (x + 1, y)))
            } else {
                None
            };

            if let Some((kind, from)) = start {
                nbd += 1;
                let enclosing_kind = kinds[lnbd as usize];
                let parent = match (kind, enclosing_kind) {
                    (ContourKind::Outer, ContourKind::Outer) | (ContourKind::Hole, ContourKind::Hole) => {
                        parents[lnbd as usize]
                    }
                    _ => Some(lnbd),
                };
                kinds.push(kind);
                parents.push(parent);

                let points = follow_border(&mut plane, (x, y), from, nbd, limit)?;
                contours.push(Contour {
                    id: nbd,
                    // the frame is not reported as a parent
                    parent: parent.filter(|&p| p > 1),
                    kind,
                    points,
                });
            }

            let after = plane.get(x, y);
            if after != 1 {
                lnbd = after.abs();
            }
        }
    }

    Ok(contours)
}

/// Steps 3.1–3.5 of the algorithm. Returns the border in image coordinates.
fn follow_border(
    plane: &mut Plane,
    start: (i64, i64),
    from: (i64, i64),
    nbd: i32,
    limit: usize,
) -> Result<Vec<Point>, ComponentError> {
    let to_point = |p: (i64, i64)| Point::new((p.0 - 1) as u32, (p.1 - 1) as u32);

    // 3.1: clockwise search around the start for a non-zero pixel
    let first_dir = direction_of(start, from);
    let mut found = None;
    for step in 0..8 {
        let d = (first_dir + step) % 8;
        let p = (start.0 + OFFSETS[d].0, start.1 + OFFSETS[d].1);
        if plane.get(p.0, p.1) != 0 {
            found = Some(p);
            break;
        }
    }
    let Some(p1) = found else {
        plane.set(start.0, start.1, -nbd);
        return Ok(vec![to_point(start)]);
    };

    // 3.2
    let mut p2 = p1;
    let mut p3 = start;
    let mut points = Vec::new();

    loop {
        if points.len() >= limit {
            return Err(ComponentError::TraceBoundExceeded { limit });
        }
        points.push(to_point(p3));

        // 3.3: counterclockwise search around p3, starting after p2
        let back = direction_of(p3, p2);
        let mut east_examined_zero = false;
        let mut p4 = p2;
        for step in 1..=8 {
            let d = (back + 8 - step) % 8;
            let p = (p3.0 + OFFSETS[d].0, p3.1 + OFFSETS[d].1);
            if plane.get(p.0, p.1) != 0 {
                p4 = p;
                break;
            }
            if d == 0 {
                east_examined_zero = true;
            }
        }

        // 3.4
        if east_examined_zero {
            plane.set(p3.0, p3.1, -nbd);
        } else if plane.get(p3.0, p3.1) == 1 {
            plane.set(p3.0, p3.1, nbd);
        }

        // 3.5
        if p4 == start && p3 == p1 {
            break;
        }
        p2 = p3;
        p3 = p4;
    }

    Ok(points)
}
