//! Pixel primitives
//!
//! Small transforms over packed RGB buffers. Gray images are RGB images with
//! three equal channels, so every function here works on [`RgbImage`].
//!
//! Some operations mutate their argument and some return a fresh image; the
//! contract is stated on each function and callers that build several variants
//! from one base image rely on it.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::OnceLock;

use image::{imageops, ImageFormat, Rgb, RgbImage};

use crate::geometry::Rectangle;

/// Pure white
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
/// Pure black
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const GAMMA: f64 = 2.2;

/// sRGB-ish channel value to linear light
fn linear_lut() -> &'static [f64; 256] {
    static LUT: OnceLock<[f64; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0.0; 256];
        for (v, slot) in lut.iter_mut().enumerate() {
            *slot = (v as f64 / 255.0).powf(GAMMA);
        }
        lut
    })
}

/// Gamma-corrected luminance of one pixel, in `0..=255`
pub fn gray_level(pixel: &Rgb<u8>) -> u8 {
    let lut = linear_lut();
    let [r, g, b] = pixel.0;
    let linear = 0.2126 * lut[r as usize] + 0.7152 * lut[g as usize] + 0.0722 * lut[b as usize];
    (linear.powf(1.0 / GAMMA) * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Convert to grayscale in place
pub fn to_grayscale(img: &mut RgbImage) {
    for pixel in img.pixels_mut() {
        let gray = gray_level(pixel);
        *pixel = Rgb([gray, gray, gray]);
    }
}

/// Gray values of a grayscale image (first channel of each pixel)
pub fn gray_values(img: &RgbImage) -> Vec<u8> {
    img.pixels().map(|p| p.0[0]).collect()
}

/// Invert every channel in place
pub fn negate(img: &mut RgbImage) {
    for pixel in img.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = 255 - *c;
        }
    }
}

/// Band threshold in place: gray in `min..=max` becomes black, the rest white.
///
/// Expects a grayscale image.
pub fn threshold(img: &mut RgbImage, min: u8, max: u8) {
    for pixel in img.pixels_mut() {
        let v = pixel.0[0];
        *pixel = if v >= min && v <= max { BLACK } else { WHITE };
    }
}

/// Binarize in place: gray `<= level` becomes black (foreground), the rest white
pub fn binarize(img: &mut RgbImage, level: u8) {
    for pixel in img.pixels_mut() {
        *pixel = if pixel.0[0] <= level { BLACK } else { WHITE };
    }
}

/// Offsets of an elliptical neighbourhood. A zero radius collapses its axis.
fn ellipse_offsets(radius_x: u32, radius_y: u32) -> Vec<(i64, i64)> {
    let rx = radius_x as i64;
    let ry = radius_y as i64;
    let mut offsets = Vec::new();
    for dy in -ry..=ry {
        for dx in -rx..=rx {
            let nx = if rx == 0 { 0.0 } else { dx as f64 / rx as f64 };
            let ny = if ry == 0 { 0.0 } else { dy as f64 / ry as f64 };
            if nx * nx + ny * ny <= 1.0 {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Min filter over an elliptical neighbourhood. Returns a new image.
///
/// On dark-on-light text this thickens strokes, joining the pieces of one
/// glyph and dropping specks thinner than the neighbourhood.
pub fn erode(img: &RgbImage, radius_x: u32, radius_y: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let offsets = ellipse_offsets(radius_x, radius_y);
    let mut out = RgbImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut min = [255u8; 3];
            for &(dx, dy) in &offsets {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let p = img.get_pixel(nx as u32, ny as u32);
                for c in 0..3 {
                    min[c] = min[c].min(p.0[c]);
                }
            }
            out.put_pixel(x, y, Rgb(min));
        }
    }

    out
}

/// Resize by `factor` with a triangle filter. Returns a new image.
pub fn scale(img: &RgbImage, factor: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let nw = ((w as f32 * factor).round() as u32).max(1);
    let nh = ((h as f32 * factor).round() as u32).max(1);
    imageops::resize(img, nw, nh, imageops::FilterType::Triangle)
}

/// Blur by downscaling with `factor` and scaling back. Returns a new image
/// with the original dimensions.
pub fn blur(img: &RgbImage, factor: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let small = scale(img, factor);
    imageops::resize(&small, w, h, imageops::FilterType::Triangle)
}

/// Unsharp mask in place.
///
/// `diff = original - blur(original)`; where `|diff| > threshold` the pixel
/// becomes `original + amount * diff`, clamped to `0..=255`.
pub fn sharpen(img: &mut RgbImage, amount: f32, threshold: u8, blur_factor: f32) {
    let blurred = blur(img, blur_factor);
    for (pixel, soft) in img.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let orig = pixel.0[c] as f32;
            let diff = orig - soft.0[c] as f32;
            if diff.abs() > threshold as f32 {
                pixel.0[c] = (orig + amount * diff).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Cheap brightness used for flood fill and edge statistics
fn brightness(pixel: &Rgb<u8>) -> i32 {
    let [r, g, b] = pixel.0;
    (r as i32 + g as i32 + b as i32) / 3
}

/// 4-connected flood fill in place.
///
/// Starting at `(x, y)`, every reachable pixel whose brightness is within
/// `threshold` of the seed's brightness is painted `color`. Returns the number
/// of pixels filled.
pub fn flood_fill(img: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>, threshold: u8) -> usize {
    let (w, h) = img.dimensions();
    if x >= w || y >= h {
        return 0;
    }

    let seed = brightness(img.get_pixel(x, y));
    let limit = threshold as i32;
    let mut visited = vec![false; (w as usize) * (h as usize)];
    let mut queue = VecDeque::new();
    let mut filled = 0;

    visited[(y * w + x) as usize] = true;
    queue.push_back((x, y));

    while let Some((cx, cy)) = queue.pop_front() {
        img.put_pixel(cx, cy, color);
        filled += 1;

        let neighbours = [
            (cx.wrapping_sub(1), cy),
            (cx + 1, cy),
            (cx, cy.wrapping_sub(1)),
            (cx, cy + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= w || ny >= h {
                continue;
            }
            let idx = (ny * w + nx) as usize;
            if visited[idx] {
                continue;
            }
            if (brightness(img.get_pixel(nx, ny)) - seed).abs() <= limit {
                visited[idx] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    filled
}

/// Otsu's threshold over a list of gray values.
///
/// The histogram only holds levels that actually occur. For each split `t`
/// (class 0 = levels `<= t`) the within-class variance `w0*var0 + w1*var1` is
/// computed and the smallest wins; ties keep the lowest `t`. A single observed
/// level yields that level. An empty input yields 0.
pub fn otsu_threshold(values: &[u8]) -> u8 {
    let mut counts = [0u64; 256];
    for &v in values {
        counts[v as usize] += 1;
    }
    let levels: Vec<(u8, u64)> = counts
        .iter()
        .enumerate()
        .filter(|(_, &n)| n > 0)
        .map(|(level, &n)| (level as u8, n))
        .collect();

    match levels.len() {
        0 => return 0,
        1 => return levels[0].0,
        _ => {}
    }

    let total = values.len() as f64;
    let mut best_level = levels[0].0;
    let mut best_variance = f64::INFINITY;

    for split in 0..levels.len() {
        let (low, high) = levels.split_at(split + 1);
        let variance = weighted_variance(low, total) + weighted_variance(high, total);
        if variance < best_variance {
            best_variance = variance;
            best_level = levels[split].0;
        }
    }

    best_level
}

/// `weight * variance` of one Otsu class
fn weighted_variance(class: &[(u8, u64)], total: f64) -> f64 {
    let n: u64 = class.iter().map(|&(_, c)| c).sum();
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let mean = class.iter().map(|&(l, c)| l as f64 * c as f64).sum::<f64>() / n;
    let variance = class
        .iter()
        .map(|&(l, c)| {
            let d = l as f64 - mean;
            d * d * c as f64
        })
        .sum::<f64>()
        / n;
    (n / total) * variance
}

/// Whether more than half of the region's pixels are darker than mid-gray
pub fn is_dark_dominated(img: &RgbImage, region: Option<Rectangle>) -> bool {
    let (w, h) = img.dimensions();
    let Some(region) = region.or_else(|| Rectangle::from_xywh(0, 0, w, h)) else {
        return false;
    };

    let mut dark = 0u64;
    let mut total = 0u64;
    for y in region.top()..=region.bottom().min(h.saturating_sub(1)) {
        for x in region.left()..=region.right().min(w.saturating_sub(1)) {
            total += 1;
            if gray_level(img.get_pixel(x, y)) < 128 {
                dark += 1;
            }
        }
    }

    total > 0 && dark * 2 > total
}

/// Whether the image border is cluttered rather than a flat background.
///
/// Border pixels are compared against the most common border brightness;
/// more than 10% deviating by over 40 levels counts as busy.
pub fn has_busy_edges(img: &RgbImage) -> bool {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return false;
    }

    let mut border = Vec::with_capacity(2 * (w + h) as usize);
    for x in 0..w {
        border.push(brightness(img.get_pixel(x, 0)));
        border.push(brightness(img.get_pixel(x, h - 1)));
    }
    for y in 1..h.saturating_sub(1) {
        border.push(brightness(img.get_pixel(0, y)));
        border.push(brightness(img.get_pixel(w - 1, y)));
    }

    let mut histogram: HashMap<i32, usize> = HashMap::new();
    for &b in &border {
        *histogram.entry(b).or_default() += 1;
    }
    let mode = histogram
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(level, _)| level)
        .unwrap_or(0);

    let deviating = border.iter().filter(|&&b| (b - mode).abs() > 40).count();
    deviating * 10 > border.len()
}

/// Whether fewer than 5% of pixels carry noticeable colour
pub fn is_mostly_colorless(img: &RgbImage) -> bool {
    let total = img.pixels().len();
    if total == 0 {
        return true;
    }
    let colored = img
        .pixels()
        .filter(|p| {
            let max = *p.0.iter().max().unwrap_or(&0);
            let min = *p.0.iter().min().unwrap_or(&0);
            max - min > 40
        })
        .count();
    colored * 20 < total
}

/// Pad with a solid border on every side. Returns a new image.
pub fn add_border(img: &RgbImage, size: u32, color: Rgb<u8>) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = RgbImage::from_pixel(w + 2 * size, h + 2 * size, color);
    imageops::replace(&mut out, img, size as i64, size as i64);
    out
}

/// Copy out a rectangle of the image
pub fn crop(img: &RgbImage, rect: Rectangle) -> RgbImage {
    imageops::crop_imm(img, rect.left(), rect.top(), rect.width(), rect.height()).to_image()
}

/// Encode as PNG for hand-off to an OCR backend
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(width: u32, height: u32, values: &[u8]) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = values[(y * width + x) as usize];
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_grayscale_uses_gamma_corrected_luminance() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        to_grayscale(&mut img);
        // 0.2126^(1/2.2) * 255 = 126.15
        assert_eq!(img.get_pixel(0, 0).0, [126, 126, 126]);

        let mut white = RgbImage::from_pixel(1, 1, WHITE);
        to_grayscale(&mut white);
        assert_eq!(white.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_negate() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([0, 100, 255]));
        negate(&mut img);
        assert_eq!(img.get_pixel(0, 0).0, [255, 155, 0]);
    }

    #[test]
    fn test_band_threshold() {
        let mut img = gray_image(3, 1, &[10, 100, 200]);
        threshold(&mut img, 50, 150);
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert_eq!(img.get_pixel(1, 0).0[0], 0);
        assert_eq!(img.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn test_otsu_two_levels_separates_perfectly() {
        for dark in [1usize, 3, 50, 99] {
            let mut values = vec![0u8; dark];
            values.extend(std::iter::repeat(255u8).take(100 - dark));
            let t = otsu_threshold(&values);
            assert!(values.iter().filter(|&&v| v == 0).all(|&v| v <= t));
            assert!(values.iter().filter(|&&v| v == 255).all(|&v| v > t));
        }
    }

    #[test]
    fn test_otsu_single_level_is_stable() {
        assert_eq!(otsu_threshold(&[77, 77, 77]), 77);
        assert_eq!(otsu_threshold(&[]), 0);
    }

    #[test]
    fn test_otsu_three_clusters() {
        let mut values = vec![10u8; 40];
        values.extend(vec![12u8; 40]);
        values.extend(vec![200u8; 40]);
        let t = otsu_threshold(&values);
        assert!((12..200).contains(&t));
    }

    #[test]
    fn test_erode_spreads_dark_pixels() {
        let mut values = vec![255u8; 25];
        values[12] = 0; // center of 5x5
        let img = gray_image(5, 5, &values);

        let eroded = erode(&img, 1, 1);
        assert_eq!(eroded.get_pixel(2, 1).0[0], 0);
        assert_eq!(eroded.get_pixel(1, 2).0[0], 0);
        // diagonal lies outside the unit ellipse
        assert_eq!(eroded.get_pixel(1, 1).0[0], 255);
        // original untouched
        assert_eq!(img.get_pixel(2, 1).0[0], 255);

        let identity = erode(&img, 0, 0);
        assert_eq!(identity, img);
    }

    #[test]
    fn test_flood_fill_respects_threshold() {
        let mut img = gray_image(4, 1, &[100, 105, 200, 102]);
        let filled = flood_fill(&mut img, 0, 0, WHITE, 10);
        assert_eq!(filled, 2);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255]);
        // blocked by the bright pixel in between
        assert_eq!(img.get_pixel(3, 0).0[0], 102);
    }

    #[test]
    fn test_flood_fill_out_of_bounds_seed() {
        let mut img = gray_image(2, 2, &[0, 0, 0, 0]);
        assert_eq!(flood_fill(&mut img, 5, 5, WHITE, 10), 0);
    }

    #[test]
    fn test_sharpen_leaves_flat_regions() {
        let mut img = RgbImage::from_pixel(8, 8, Rgb([120, 120, 120]));
        sharpen(&mut img, 1.5, 4, 0.5);
        assert!(img.pixels().all(|p| p.0 == [120, 120, 120]));
    }

    #[test]
    fn test_blur_keeps_dimensions() {
        let img = RgbImage::from_pixel(20, 10, WHITE);
        assert_eq!(blur(&img, 0.5).dimensions(), (20, 10));
        assert_eq!(scale(&img, 0.75).dimensions(), (15, 8));
    }

    #[test]
    fn test_heuristics() {
        let dark = RgbImage::from_pixel(10, 10, Rgb([20, 20, 20]));
        assert!(is_dark_dominated(&dark, None));
        assert!(!is_dark_dominated(&RgbImage::from_pixel(10, 10, WHITE), None));

        let mut framed = RgbImage::from_pixel(10, 10, WHITE);
        assert!(!has_busy_edges(&framed));
        for x in 0..10 {
            framed.put_pixel(x, 0, BLACK);
        }
        assert!(has_busy_edges(&framed));

        assert!(is_mostly_colorless(&framed));
        let red = RgbImage::from_pixel(4, 4, Rgb([220, 10, 10]));
        assert!(!is_mostly_colorless(&red));
    }

    #[test]
    fn test_add_border_and_encode() {
        let img = RgbImage::from_pixel(2, 2, BLACK);
        let bordered = add_border(&img, 3, WHITE);
        assert_eq!(bordered.dimensions(), (8, 8));
        assert_eq!(bordered.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(bordered.get_pixel(3, 3).0, [0, 0, 0]);

        let png = encode_png(&bordered).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
