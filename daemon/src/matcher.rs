/// Normalised cross-correlation template matcher.
///
/// Templates are trigger images under `<assets>/images`, loaded once as
/// grayscale. Matching slides each template over the search region and keeps
/// the best correlation.
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use image::GrayImage;

use crate::detect::{Detector, Match};

/// Coarse search stride in pixels; the best coarse hit is refined at stride 1.
const COARSE_STRIDE: u32 = 2;

pub struct TemplateDetector {
    templates: HashMap<String, GrayImage>,
}

impl TemplateDetector {
    /// Loads every template id (a path relative to `images_dir`).
    pub fn load(images_dir: &Path, ids: &[String]) -> Result<Self> {
        let mut templates = HashMap::new();
        for id in ids {
            let path = images_dir.join(id);
            let image = image::open(&path)
                .with_context(|| format!("Failed to load template: {}", path.display()))?
                .to_luma8();
            templates.insert(id.clone(), image);
        }
        tracing::debug!(count = templates.len(), "templates loaded");
        Ok(Self { templates })
    }

    #[cfg(test)]
    fn from_images(templates: impl IntoIterator<Item = (String, GrayImage)>) -> Self {
        Self { templates: templates.into_iter().collect() }
    }
}

impl Detector for TemplateDetector {
    fn match_template(&self, template_id: &str, region: &GrayImage) -> Match {
        let start = Instant::now();
        let confidence = match self.templates.get(template_id) {
            Some(template) => best_correlation(template, region).max(0.0),
            None => {
                tracing::warn!(template_id, "unknown template");
                0.0
            }
        };
        Match { confidence, elapsed: start.elapsed() }
    }
}

/// Highest NCC of `template` over every placement inside `region`.
/// Zero when the template does not fit.
pub fn best_correlation(template: &GrayImage, region: &GrayImage) -> f32 {
    let (tw, th) = template.dimensions();
    let (rw, rh) = region.dimensions();
    if tw == 0 || th == 0 || tw > rw || th > rh {
        return 0.0;
    }
    let stats = TemplateStats::new(template);
    let (max_x, max_y) = (rw - tw, rh - th);

    let mut best = (f32::MIN, 0, 0);
    for y in (0..=max_y).step_by(COARSE_STRIDE as usize) {
        for x in (0..=max_x).step_by(COARSE_STRIDE as usize) {
            let score = stats.ncc_at(template, region, x, y);
            if score > best.0 {
                best = (score, x, y);
            }
        }
    }

    let (_, bx, by) = best;
    for y in by.saturating_sub(COARSE_STRIDE - 1)..=(by + COARSE_STRIDE - 1).min(max_y) {
        for x in bx.saturating_sub(COARSE_STRIDE - 1)..=(bx + COARSE_STRIDE - 1).min(max_x) {
            best.0 = best.0.max(stats.ncc_at(template, region, x, y));
        }
    }
    best.0
}

struct TemplateStats {
    mean: f64,
    /// Sum of squared deviations from the mean.
    energy: f64,
}

impl TemplateStats {
    fn new(template: &GrayImage) -> Self {
        let n = f64::from(template.width() * template.height());
        let mean = template.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
        let energy = template
            .pixels()
            .map(|p| (f64::from(p.0[0]) - mean).powi(2))
            .sum();
        Self { mean, energy }
    }

    /// NCC of `template` against the window of `region` at (`ox`, `oy`),
    /// in [-1, 1]. Flat windows or templates score zero.
    fn ncc_at(&self, template: &GrayImage, region: &GrayImage, ox: u32, oy: u32) -> f32 {
        let (tw, th) = template.dimensions();
        let n = f64::from(tw * th);

        let mut sum = 0.0_f64;
        for y in 0..th {
            for x in 0..tw {
                sum += f64::from(region.get_pixel(ox + x, oy + y).0[0]);
            }
        }
        let mean_c = sum / n;

        let mut numerator = 0.0_f64;
        let mut energy_c = 0.0_f64;
        for y in 0..th {
            for x in 0..tw {
                let dt = f64::from(template.get_pixel(x, y).0[0]) - self.mean;
                let dc = f64::from(region.get_pixel(ox + x, oy + y).0[0]) - mean_c;
                numerator += dt * dc;
                energy_c += dc * dc;
            }
        }

        let denom = (self.energy * energy_c).sqrt();
        if denom < 1e-10 {
            return 0.0;
        }
        (numerator / denom) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Diagonal gradient with a bright square at (`sx`, `sy`).
    fn scene(width: u32, height: u32, sx: u32, sy: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if (sx..sx + 6).contains(&x) && (sy..sy + 6).contains(&y) {
                Luma([250])
            } else {
                Luma([(x * 2 + y) as u8])
            }
        })
    }

    fn patch(region: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
        image::imageops::crop_imm(region, x, y, w, h).to_image()
    }

    #[test]
    fn exact_patch_scores_one() {
        let region = scene(40, 30, 16, 8);
        let template = patch(&region, 14, 6, 10, 10);
        let score = best_correlation(&template, &region);
        assert!((score - 1.0).abs() < 1e-4, "{score}");
    }

    #[test]
    fn odd_offset_is_found_by_refinement() {
        let region = scene(41, 31, 20, 12);
        let template = patch(&region, 19, 11, 9, 9);
        assert!(best_correlation(&template, &region) > 0.999);
    }

    #[test]
    fn oversized_template_scores_zero() {
        let region = scene(10, 10, 2, 2);
        let template = GrayImage::from_pixel(12, 4, Luma([9]));
        assert_eq!(best_correlation(&template, &region), 0.0);
    }

    #[test]
    fn flat_region_scores_zero() {
        let region = GrayImage::from_pixel(20, 20, Luma([80]));
        let template = patch(&scene(20, 20, 5, 5), 3, 3, 8, 8);
        assert_eq!(best_correlation(&template, &region), 0.0);
    }

    #[test]
    fn detector_reports_unknown_template_as_zero() {
        let region = scene(20, 20, 5, 5);
        let detector = TemplateDetector::from_images([("roshan/a.png".to_string(), patch(&region, 2, 2, 8, 8))]);
        assert!(detector.match_template("roshan/a.png", &region).confidence > 0.99);
        assert_eq!(detector.match_template("roshan/b.png", &region).confidence, 0.0);
    }

    #[test]
    fn load_reads_png_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("roshan")).unwrap();
        scene(12, 12, 3, 3).save(dir.path().join("roshan/a.png")).unwrap();

        let detector = TemplateDetector::load(dir.path(), &["roshan/a.png".to_string()]).unwrap();
        assert_eq!(detector.templates["roshan/a.png"].dimensions(), (12, 12));
        assert!(TemplateDetector::load(dir.path(), &["roshan/missing.png".to_string()]).is_err());
    }
}
