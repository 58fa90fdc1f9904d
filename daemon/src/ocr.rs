/// Glyph-template OCR for the HUD clock.
///
/// The clock is light text on a dark bar. The region is binarized with a
/// threshold calibrated on its own brightness, split into characters by
/// column occupancy, and each character is compared against the digit glyphs
/// in `<assets>/images/digits/0.png` … `9.png`. Narrow characters with a gap
/// through their middle are separators.
use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops::FilterType, GrayImage, Luma};

use crate::detect::ClockReader;

/// Fraction of the region expected to be lit text.
const TARGET_WHITE_RATIO: f32 = 0.15;
/// Minimum column occupancy, relative to height, to count as part of a glyph.
const COLUMN_THRESHOLD_RATIO: f32 = 0.05;
/// Minimum similarity for a glyph match; below it the character is `?`.
const MIN_GLYPH_SCORE: f32 = 0.75;
/// Aspect ratio mismatch above which a glyph is not considered.
const MAX_ASPECT_MISMATCH: f32 = 0.5;

pub struct DigitClockReader {
    glyphs: Vec<(char, GrayImage)>,
}

impl DigitClockReader {
    pub fn load(digits_dir: &Path) -> Result<Self> {
        let mut glyphs = Vec::with_capacity(10);
        for digit in '0'..='9' {
            let path = digits_dir.join(format!("{digit}.png"));
            let image = image::open(&path)
                .with_context(|| format!("Failed to load digit glyph: {}", path.display()))?
                .to_luma8();
            glyphs.push((digit, trim(&binarize(&image, 127))));
        }
        Ok(Self { glyphs })
    }

    #[cfg(test)]
    pub fn from_glyphs(glyphs: Vec<(char, GrayImage)>) -> Self {
        Self { glyphs: glyphs.into_iter().map(|(c, g)| (c, trim(&binarize(&g, 127)))).collect() }
    }

    fn recognize(&self, segment: &GrayImage) -> Option<char> {
        let ar_in = segment.width() as f32 / segment.height().max(1) as f32;
        let mut best: Option<(char, f32)> = None;

        for (label, glyph) in &self.glyphs {
            let ar_glyph = glyph.width() as f32 / glyph.height().max(1) as f32;
            if (ar_in - ar_glyph).abs() / ar_glyph.max(0.01) > MAX_ASPECT_MISMATCH {
                continue;
            }
            let resized =
                image::imageops::resize(segment, glyph.width(), glyph.height(), FilterType::Triangle);
            let sad: u64 = resized
                .pixels()
                .zip(glyph.pixels())
                .map(|(a, b)| u64::from(a.0[0].abs_diff(b.0[0])))
                .sum();
            let area = u64::from(glyph.width() * glyph.height()).max(1);
            let score = 1.0 - sad as f32 / (255 * area) as f32;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*label, score));
            }
        }

        best.filter(|(_, score)| *score >= MIN_GLYPH_SCORE).map(|(c, _)| c)
    }
}

impl ClockReader for DigitClockReader {
    fn read_text(&self, region: &GrayImage) -> String {
        let binary = binarize(region, adaptive_threshold(region));
        let Some((top, bottom)) = text_rows(&binary) else {
            return String::new();
        };
        let height = bottom - top + 1;

        find_character_columns(&binary)
            .into_iter()
            .map(|(start, end)| {
                let segment =
                    image::imageops::crop_imm(&binary, start, top, end - start + 1, height).to_image();
                if is_separator(&segment) {
                    ':'
                } else {
                    self.recognize(&segment).unwrap_or('?')
                }
            })
            .collect()
    }
}

/// Luminance below which the brightest [`TARGET_WHITE_RATIO`] of pixels lie.
pub fn adaptive_threshold(region: &GrayImage) -> u8 {
    let mut luminances: Vec<u8> = region.pixels().map(|p| p.0[0]).collect();
    if luminances.is_empty() {
        return 80;
    }
    luminances.sort_unstable();
    let idx = ((1.0 - TARGET_WHITE_RATIO) * luminances.len() as f32) as usize;
    luminances[idx.min(luminances.len() - 1)].clamp(40, 200)
}

pub fn binarize(region: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(region.width(), region.height(), |x, y| {
        if region.get_pixel(x, y).0[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// First and last rows holding any lit pixel.
fn text_rows(binary: &GrayImage) -> Option<(u32, u32)> {
    let lit = |y: u32| (0..binary.width()).any(|x| binary.get_pixel(x, y).0[0] > 0);
    let top = (0..binary.height()).find(|&y| lit(y))?;
    let bottom = (0..binary.height()).rev().find(|&y| lit(y))?;
    Some((top, bottom))
}

/// Crops to the bounding box of lit pixels.
fn trim(binary: &GrayImage) -> GrayImage {
    let Some((top, bottom)) = text_rows(binary) else {
        return binary.clone();
    };
    let columns = find_character_columns(binary);
    let (left, right) = match (columns.first(), columns.last()) {
        (Some(first), Some(last)) => (first.0, last.1),
        _ => return binary.clone(),
    };
    image::imageops::crop_imm(binary, left, top, right - left + 1, bottom - top + 1).to_image()
}

/// Inclusive column ranges of consecutive occupied columns.
pub fn find_character_columns(binary: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = binary.dimensions();
    let threshold = (height as f32 * COLUMN_THRESHOLD_RATIO) as u32;
    let mut boundaries = Vec::new();
    let mut start = None;

    for x in 0..width {
        let col_sum = (0..height).filter(|&y| binary.get_pixel(x, y).0[0] > 0).count() as u32;
        match (col_sum > threshold, start) {
            (true, None) => start = Some(x),
            (false, Some(s)) => {
                boundaries.push((s, x - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        boundaries.push((s, width - 1));
    }
    boundaries
}

/// Narrow segment with nothing lit across its vertical middle (`:` or `.`).
pub fn is_separator(segment: &GrayImage) -> bool {
    let (width, height) = segment.dimensions();
    if height < 3 || width * 2 > height {
        return false;
    }
    let mid = height / 2;
    (mid - 1..=mid + 1).all(|y| (0..width).all(|x| segment.get_pixel(x, y).0[0] == 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLYPH_H: u32 = 9;

    fn zero() -> GrayImage {
        GrayImage::from_fn(5, GLYPH_H, |x, y| {
            let edge = x == 0 || x == 4 || y == 0 || y == GLYPH_H - 1;
            Luma([if edge { 255 } else { 0 }])
        })
    }

    fn one() -> GrayImage {
        GrayImage::from_fn(5, GLYPH_H, |x, _| Luma([if x == 2 { 255 } else { 0 }]))
    }

    fn reader() -> DigitClockReader {
        DigitClockReader::from_glyphs(vec![('0', zero()), ('1', one())])
    }

    /// Renders `text` (only `0`, `1`, `:`) on a dark background with padding.
    fn render(text: &str) -> GrayImage {
        let mut columns: Vec<Vec<u8>> = vec![vec![0; GLYPH_H as usize]; 2];
        for ch in text.chars() {
            let glyph: Vec<Vec<u8>> = match ch {
                '0' => (0..5).map(|x| (0..GLYPH_H).map(|y| zero().get_pixel(x, y).0[0]).collect()).collect(),
                '1' => vec![vec![255; GLYPH_H as usize]],
                ':' => {
                    let dots: Vec<u8> = (0..GLYPH_H).map(|y| if [1, 2, 6, 7].contains(&y) { 255 } else { 0 }).collect();
                    vec![dots.clone(), dots]
                }
                _ => unreachable!(),
            };
            columns.extend(glyph);
            columns.extend(vec![vec![0; GLYPH_H as usize]; 2]);
        }
        let pad = 2;
        GrayImage::from_fn(columns.len() as u32, GLYPH_H + 2 * pad, |x, y| {
            if y < pad || y >= GLYPH_H + pad {
                Luma([10])
            } else {
                Luma([columns[x as usize][(y - pad) as usize].max(10)])
            }
        })
    }

    #[test]
    fn reads_rendered_clock() {
        assert_eq!(reader().read_text(&render("1:01")), "1:01");
        assert_eq!(reader().read_text(&render("10:10")), "10:10");
    }

    #[test]
    fn blank_region_reads_nothing() {
        let blank = GrayImage::from_pixel(30, 12, Luma([5]));
        assert_eq!(reader().read_text(&blank), "");
    }

    #[test]
    fn columns_split_on_empty_gaps() {
        let binary = binarize(&render("1:0"), 127);
        assert_eq!(find_character_columns(&binary), vec![(2, 2), (5, 6), (9, 13)]);
    }

    #[test]
    fn separator_needs_middle_gap() {
        let colon = GrayImage::from_fn(2, 9, |_, y| Luma([if [1, 2, 6, 7].contains(&y) { 255 } else { 0 }]));
        let bar = GrayImage::from_pixel(1, 9, Luma([255]));
        assert!(is_separator(&colon));
        assert!(!is_separator(&bar));
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(adaptive_threshold(&GrayImage::from_pixel(4, 4, Luma([255]))), 200);
        assert_eq!(adaptive_threshold(&GrayImage::from_pixel(4, 4, Luma([0]))), 40);
    }

    #[test]
    fn load_requires_every_digit() {
        let dir = tempfile::tempdir().unwrap();
        zero().save(dir.path().join("0.png")).unwrap();
        assert!(DigitClockReader::load(dir.path()).is_err());
    }
}
