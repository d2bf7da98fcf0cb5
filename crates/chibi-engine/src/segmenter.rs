//! Background removal for synthesized characters.
//!
//! Generated images come back on a near-white canvas with no alpha. The
//! background is whatever whitish region is connected to the image border;
//! whitish areas enclosed by the character (eye highlights, white clothing)
//! stay opaque.
//!
//! An image that already carries transparency has been cut out before. Its
//! alpha is kept as is and only the height is normalized, so feeding our own
//! output back in returns the same pixels.

use std::collections::VecDeque;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::warn;

/// Euclidean RGB distance from pure white below which a pixel counts as whitish.
pub const WHITE_DISTANCE_THRESHOLD: f64 = 42.0;
/// Alpha given to background pixels touching the foreground.
pub const EDGE_ALPHA: u8 = 60;
/// Rows and columns whose alpha never exceeds this are trimmed away.
pub const TRIM_ALPHA_THRESHOLD: u8 = 5;
pub const OUTPUT_HEIGHT: u32 = 800;

const TRANSPARENT: Rgba<u8> = Rgba([255, 255, 255, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLabel {
    Unvisited,
    Background,
    Foreground,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMask {
    width: u32,
    height: u32,
    labels: Vec<PixelLabel>,
}

impl PixelMask {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            labels: vec![PixelLabel::Unvisited; width as usize * height as usize],
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> PixelLabel {
        self.labels[self.offset(x, y)]
    }

    fn set(&mut self, x: u32, y: u32, label: PixelLabel) {
        let offset = self.offset(x, y);
        self.labels[offset] = label;
    }

    pub fn is_background(&self, x: u32, y: u32) -> bool {
        self.get(x, y) == PixelLabel::Background
    }

    pub fn count(&self, label: PixelLabel) -> usize {
        self.labels.iter().filter(|item| **item == label).count()
    }

    fn neighbours(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
        let (width, height) = (self.width, self.height);
        [
            (x.checked_sub(1), Some(y)),
            (x.checked_add(1).filter(|nx| *nx < width), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), y.checked_add(1).filter(|ny| *ny < height)),
        ]
        .into_iter()
        .filter_map(|(nx, ny)| Some((nx?, ny?)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentStats {
    pub background_pixels: usize,
    pub edge_pixels: usize,
    pub width: u32,
    pub height: u32,
}

/// Result of [`remove_background`]. Always carries usable bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segmentation {
    Segmented { png: Vec<u8>, stats: SegmentStats },
    /// Processing failed; the input is handed back untouched.
    Fallback { original: Vec<u8>, reason: String },
}

impl Segmentation {
    pub fn is_segmented(&self) -> bool {
        matches!(self, Segmentation::Segmented { .. })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Segmentation::Segmented { png, .. } => png,
            Segmentation::Fallback { original, .. } => original,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Segmentation::Segmented { png, .. } => png,
            Segmentation::Fallback { original, .. } => original,
        }
    }
}

pub fn remove_background(bytes: &[u8]) -> Segmentation {
    match try_remove_background(bytes) {
        Ok((png, stats)) => Segmentation::Segmented { png, stats },
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(error = %reason, "background removal failed; keeping original image");
            Segmentation::Fallback {
                original: bytes.to_vec(),
                reason,
            }
        }
    }
}

fn try_remove_background(bytes: &[u8]) -> anyhow::Result<(Vec<u8>, SegmentStats)> {
    let decoded = image::load_from_memory(bytes)?.to_rgba8();
    let (subject, mut stats) = if has_transparency(&decoded) {
        let stats = existing_alpha_stats(&decoded);
        (decoded, stats)
    } else {
        let (cutout, stats) = cut_out_background(&decoded);
        let trimmed = match trim_bounds(&cutout, TRIM_ALPHA_THRESHOLD) {
            Some((x, y, width, height)) => {
                image::imageops::crop_imm(&cutout, x, y, width, height).to_image()
            }
            None => cutout,
        };
        (trimmed, stats)
    };
    let normalized = normalize_height(&subject, OUTPUT_HEIGHT);
    stats.width = normalized.width();
    stats.height = normalized.height();
    Ok((encode_png(&normalized)?, stats))
}

pub fn has_transparency(image: &RgbaImage) -> bool {
    image.pixels().any(|pixel| pixel[3] < u8::MAX)
}

fn existing_alpha_stats(image: &RgbaImage) -> SegmentStats {
    let mut stats = SegmentStats {
        width: image.width(),
        height: image.height(),
        ..SegmentStats::default()
    };
    for pixel in image.pixels() {
        match pixel[3] {
            0 => stats.background_pixels += 1,
            EDGE_ALPHA => stats.edge_pixels += 1,
            _ => {}
        }
    }
    stats
}

/// Colour test only; alpha is ignored.
pub fn is_whitish(pixel: &Rgba<u8>) -> bool {
    let distance = (0..3)
        .map(|channel| {
            let delta = 255.0 - f64::from(pixel[channel]);
            delta * delta
        })
        .sum::<f64>()
        .sqrt();
    distance < WHITE_DISTANCE_THRESHOLD
}

/// Breadth-first fill from every border pixel through whitish pixels.
pub fn flood_fill_mask(image: &RgbaImage) -> PixelMask {
    let (width, height) = image.dimensions();
    let mut mask = PixelMask::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }
    let mut queue = VecDeque::new();

    let mut seed = |x: u32, y: u32, mask: &mut PixelMask| {
        if mask.get(x, y) != PixelLabel::Unvisited {
            return;
        }
        if is_whitish(image.get_pixel(x, y)) {
            mask.set(x, y, PixelLabel::Background);
            queue.push_back((x, y));
        } else {
            mask.set(x, y, PixelLabel::Foreground);
        }
    };
    for x in 0..width {
        seed(x, 0, &mut mask);
        seed(x, height.saturating_sub(1), &mut mask);
    }
    for y in 0..height {
        seed(0, y, &mut mask);
        seed(width.saturating_sub(1), y, &mut mask);
    }

    while let Some((x, y)) = queue.pop_front() {
        let neighbours = mask.neighbours(x, y).collect::<Vec<(u32, u32)>>();
        for (nx, ny) in neighbours {
            if mask.get(nx, ny) != PixelLabel::Unvisited {
                continue;
            }
            if is_whitish(image.get_pixel(nx, ny)) {
                mask.set(nx, ny, PixelLabel::Background);
                queue.push_back((nx, ny));
            } else {
                mask.set(nx, ny, PixelLabel::Foreground);
            }
        }
    }

    mask
}

/// Applies the flood-fill mask: background goes transparent, background
/// pixels bordering the subject keep [`EDGE_ALPHA`].
pub fn cut_out_background(image: &RgbaImage) -> (RgbaImage, SegmentStats) {
    let mask = flood_fill_mask(image);
    let mut out = image.clone();
    let mut stats = SegmentStats {
        width: image.width(),
        height: image.height(),
        ..SegmentStats::default()
    };

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if !mask.is_background(x, y) {
            continue;
        }
        stats.background_pixels += 1;
        let touches_subject = mask
            .neighbours(x, y)
            .any(|(nx, ny)| !mask.is_background(nx, ny));
        if touches_subject {
            stats.edge_pixels += 1;
            pixel[3] = EDGE_ALPHA;
        } else {
            pixel[3] = 0;
        }
    }

    (out, stats)
}

/// Smallest `(x, y, width, height)` box holding every pixel with alpha above
/// `threshold`, or `None` when nothing qualifies.
pub fn trim_bounds(image: &RgbaImage, threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] <= threshold {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }
    bounds.map(|(min_x, min_y, max_x, max_y)| {
        (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    })
}

/// Scales to `target_height` keeping the aspect ratio. An empty image becomes
/// a one pixel wide transparent strip.
pub fn normalize_height(image: &RgbaImage, target_height: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return RgbaImage::from_pixel(1, target_height, TRANSPARENT);
    }
    if height == target_height {
        return image.clone();
    }
    let scaled_width = f64::from(width) * f64::from(target_height) / f64::from(height);
    let target_width = (scaled_width.round() as u32).max(1);
    image::imageops::resize(image, target_width, target_height, FilterType::Lanczos3)
}

fn encode_png(image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::{
        cut_out_background, flood_fill_mask, has_transparency, remove_background, trim_bounds,
        PixelLabel, Segmentation, EDGE_ALPHA, OUTPUT_HEIGHT, TRIM_ALPHA_THRESHOLD,
    };
    use crate::testing::encode_png;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([200, 30, 30, 255]);

    fn decode(bytes: &[u8]) -> RgbaImage {
        image::load_from_memory(bytes)
            .map(|image| image.to_rgba8())
            .unwrap_or_default()
    }

    fn count_alpha(image: &RgbaImage, alpha: u8) -> usize {
        image.pixels().filter(|pixel| pixel[3] == alpha).count()
    }

    /// White canvas, red ring with a white hole in the middle.
    fn ring(width: u32, height: u32) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(width, height, WHITE);
        for y in 2..height - 2 {
            for x in 2..width - 2 {
                image.put_pixel(x, y, RED);
            }
        }
        image.put_pixel(width / 2, height / 2, WHITE);
        image
    }

    #[test]
    fn uniform_white_is_all_background_and_trims_to_nothing() {
        let image = RgbaImage::from_pixel(12, 9, Rgba([250, 252, 251, 255]));
        let mask = flood_fill_mask(&image);
        assert_eq!(mask.count(PixelLabel::Background), 12 * 9);

        let (cutout, stats) = cut_out_background(&image);
        assert_eq!(stats.edge_pixels, 0);
        assert_eq!(count_alpha(&cutout, 0), 12 * 9);
        assert_eq!(trim_bounds(&cutout, TRIM_ALPHA_THRESHOLD), None);
    }

    #[test]
    fn solid_colour_has_no_background() {
        let image = RgbaImage::from_pixel(10, 10, Rgba([180, 180, 180, 255]));
        let mask = flood_fill_mask(&image);
        assert_eq!(mask.count(PixelLabel::Background), 0);
        assert_eq!(mask.count(PixelLabel::Unvisited), 64);

        let (cutout, _) = cut_out_background(&image);
        assert_eq!(count_alpha(&cutout, 255), 100);
    }

    #[test]
    fn enclosed_white_survives_and_edges_are_softened() {
        let image = ring(9, 9);
        let mask = flood_fill_mask(&image);
        assert_eq!(mask.get(4, 4), PixelLabel::Unvisited);
        assert_eq!(mask.get(0, 0), PixelLabel::Background);
        assert_eq!(mask.get(2, 2), PixelLabel::Foreground);

        let (cutout, stats) = cut_out_background(&image);
        assert_eq!(cutout.get_pixel(4, 4)[3], 255);
        assert_eq!(cutout.get_pixel(0, 0)[3], 0);
        assert_eq!(cutout.get_pixel(1, 4)[3], EDGE_ALPHA);
        // Diagonal neighbours do not count as touching the subject.
        assert_eq!(cutout.get_pixel(1, 1)[3], 0);
        assert_eq!(stats.edge_pixels, 5 * 4);
    }

    #[test]
    fn trim_bounds_cover_visible_pixels() {
        let mut image = RgbaImage::from_pixel(10, 8, Rgba([255, 255, 255, 0]));
        image.put_pixel(3, 2, RED);
        image.put_pixel(6, 5, Rgba([0, 0, 0, 6]));
        image.put_pixel(9, 7, Rgba([0, 0, 0, TRIM_ALPHA_THRESHOLD]));
        assert_eq!(
            trim_bounds(&image, TRIM_ALPHA_THRESHOLD),
            Some((3, 2, 4, 4))
        );
    }

    #[test]
    fn output_height_is_normalized_with_aspect_ratio() {
        for (width, height) in [(60, 90), (300, 120), (41, 1500)] {
            let result = remove_background(&encode_png(&ring(width, height)));
            assert!(result.is_segmented());
            let out = decode(result.bytes());
            // Trimmed content is (width - 2) x (height - 2) once edges are kept.
            let expected = f64::from(width - 2) * f64::from(OUTPUT_HEIGHT) / f64::from(height - 2);
            assert_eq!(out.height(), OUTPUT_HEIGHT);
            assert!((f64::from(out.width()) - expected).abs() <= 1.0);
        }
    }

    #[test]
    fn all_white_input_still_yields_transparent_canvas() {
        let result = remove_background(&encode_png(&RgbaImage::from_pixel(20, 10, WHITE)));
        let out = decode(result.bytes());
        assert_eq!(out.height(), OUTPUT_HEIGHT);
        assert_eq!(out.width(), 1600);
        assert!(out.pixels().all(|pixel| pixel[3] == 0));
    }

    #[test]
    fn rerunning_on_own_output_removes_no_foreground() {
        // Subject rows 11..=808 plus one soft edge row on each side make the
        // trimmed height exactly OUTPUT_HEIGHT, so no resampling happens.
        let mut image = RgbaImage::from_pixel(60, 830, WHITE);
        for y in 11..809 {
            for x in 10..50 {
                image.put_pixel(x, y, RED);
            }
        }
        image.put_pixel(30, 400, WHITE);

        let first = remove_background(&encode_png(&image));
        let first_image = decode(first.bytes());
        let second = remove_background(first.bytes());
        let second_image = decode(second.bytes());

        assert!(first.is_segmented() && second.is_segmented());
        assert_eq!(first_image.dimensions(), (42, OUTPUT_HEIGHT));
        assert_eq!(second_image.dimensions(), first_image.dimensions());
        assert_eq!(count_alpha(&first_image, 255), 40 * 798);
        assert_eq!(
            count_alpha(&second_image, 255),
            count_alpha(&first_image, 255)
        );
        assert_eq!(second_image.get_pixel(21, 390)[3], 255);
    }

    /// Light grey block on white; the trimmed height never lands on 800.
    fn grey_block(width: u32, height: u32, margin_x: u32, margin_y: u32) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(width, height, WHITE);
        for y in margin_y..height - margin_y {
            for x in margin_x..width - margin_x {
                image.put_pixel(x, y, Rgba([215, 215, 215, 255]));
            }
        }
        image
    }

    #[test]
    fn rerunning_after_resampling_returns_same_pixels() {
        // 60x100 scales up, 300x1700 scales down.
        for image in [grey_block(60, 100, 15, 20), grey_block(300, 1700, 80, 100)] {
            let first = remove_background(&encode_png(&image));
            let first_image = decode(first.bytes());
            assert!(first.is_segmented());
            assert_eq!(first_image.height(), OUTPUT_HEIGHT);
            assert!(has_transparency(&first_image));

            let second = remove_background(first.bytes());
            assert!(second.is_segmented());
            assert_eq!(decode(second.bytes()), first_image);
        }
    }

    #[test]
    fn existing_alpha_is_kept_instead_of_flood_filling() {
        let mut image = RgbaImage::from_pixel(20, OUTPUT_HEIGHT, WHITE);
        image.put_pixel(0, 0, Rgba([255, 255, 255, 0]));
        image.put_pixel(1, 0, Rgba([255, 255, 255, EDGE_ALPHA]));

        let result = remove_background(&encode_png(&image));

        assert_eq!(decode(result.bytes()), image);
        match result {
            Segmentation::Segmented { stats, .. } => {
                assert_eq!(stats.background_pixels, 1);
                assert_eq!(stats.edge_pixels, 1);
            }
            Segmentation::Fallback { .. } => panic!("expected segmentation"),
        }
    }

    #[test]
    fn undecodable_bytes_fall_back_to_original() {
        let bytes = b"definitely not an image".to_vec();
        let result = remove_background(&bytes);
        assert!(!result.is_segmented());
        assert_eq!(result.bytes(), bytes.as_slice());
        match result {
            Segmentation::Fallback { reason, .. } => assert!(!reason.is_empty()),
            Segmentation::Segmented { .. } => panic!("expected fallback"),
        }
    }
}
