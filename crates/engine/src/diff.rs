//! Perceptual pixel diff between a baseline and a candidate capture
//!
//! Pixels are compared in YIQ space. A pixel differs when its weighted YIQ
//! distance exceeds `threshold² × 35215`, where 35215 is the largest possible
//! distance (black vs. white). `threshold` is therefore a 0–1 scale: 0 flags
//! any change, 1 flags nothing. Pixels that look like anti-aliasing (a step
//! between a darker and a brighter neighbour, each part of a flat region in
//! both images) are ignored unless `include_aa` is set.

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RegressionError, RegressionResult};
use crate::record::{encode_png, CaptureRecord, Dimensions};

/// Largest YIQ distance between two colours
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Diff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Colour distance threshold on a 0–1 scale
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Count anti-aliased pixels as differences
    #[serde(default)]
    pub include_aa: bool,

    /// Highlight colour for differing pixels
    #[serde(default = "default_diff_color")]
    pub diff_color: [u8; 4],

    /// Colour for detected anti-aliasing; not drawn when unset
    #[serde(default)]
    pub aa_color: Option<[u8; 4]>,
}

fn default_threshold() -> f64 {
    0.1
}

fn default_diff_color() -> [u8; 4] {
    [255, 0, 0, 255]
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            include_aa: false,
            diff_color: default_diff_color(),
            aa_color: None,
        }
    }
}

impl DiffConfig {
    pub fn validate(&self) -> RegressionResult<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(RegressionError::Config(format!(
                "Diff threshold must be within 0..=1, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    fn max_delta(&self) -> f64 {
        MAX_YIQ_DELTA * self.threshold * self.threshold
    }
}

/// Outcome of comparing two captures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffOutcome {
    /// No pixel exceeded the threshold
    Match,
    PixelsDiffer {
        diff_pixels: u64,
        total_pixels: u64,
        diff_image: PathBuf,
    },
    /// Inputs differ in size; pixels were not compared
    DimensionMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub identifier: String,
    pub profile: String,
    pub baseline: Dimensions,
    pub candidate: Dimensions,
    pub outcome: DiffOutcome,
}

impl DiffResult {
    pub fn is_match(&self) -> bool {
        matches!(self.outcome, DiffOutcome::Match)
    }

    /// Differing pixel count; `None` for a dimension mismatch
    pub fn diff_pixels(&self) -> Option<u64> {
        match &self.outcome {
            DiffOutcome::Match => Some(0),
            DiffOutcome::PixelsDiffer { diff_pixels, .. } => Some(*diff_pixels),
            DiffOutcome::DimensionMismatch => None,
        }
    }

    pub fn diff_image(&self) -> Option<&Path> {
        match &self.outcome {
            DiffOutcome::PixelsDiffer { diff_image, .. } => Some(diff_image),
            _ => None,
        }
    }
}

/// Pixel comparison over RGBA buffers
#[derive(Debug, Clone, Default)]
pub struct Differ {
    config: DiffConfig,
}

impl Differ {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare two captures. Writes the diff image to `diff_path` only when
    /// at least one pixel differs; performs no other filesystem access.
    pub fn diff(
        &self,
        baseline: &CaptureRecord,
        candidate: &CaptureRecord,
        diff_path: &Path,
    ) -> RegressionResult<DiffResult> {
        let mut result = DiffResult {
            identifier: candidate.identifier.clone(),
            profile: candidate.profile.clone(),
            baseline: baseline.dimensions(),
            candidate: candidate.dimensions(),
            outcome: DiffOutcome::Match,
        };

        if result.baseline != result.candidate {
            warn!(
                profile = %candidate.profile,
                target = %candidate.identifier,
                "Dimensions differ: baseline {} vs candidate {}",
                result.baseline, result.candidate
            );
            result.outcome = DiffOutcome::DimensionMismatch;
            return Ok(result);
        }

        let (width, height) = (candidate.width(), candidate.height());
        let mut output = RgbaImage::new(width, height);
        let diff_pixels = self.compare(&baseline.pixels, &candidate.pixels, Some(&mut output))?;

        if diff_pixels == 0 {
            debug!(profile = %candidate.profile, target = %candidate.identifier, "Captures match");
            return Ok(result);
        }

        let bytes = encode_png(&output)?;
        std::fs::write(diff_path, bytes).map_err(|e| RegressionError::storage(diff_path, e))?;

        result.outcome = DiffOutcome::PixelsDiffer {
            diff_pixels,
            total_pixels: result.candidate.pixel_count(),
            diff_image: diff_path.to_path_buf(),
        };
        Ok(result)
    }

    /// Count differing pixels between two equally sized images, optionally
    /// painting them into `output` (transparent elsewhere).
    pub fn compare(
        &self,
        baseline: &RgbaImage,
        candidate: &RgbaImage,
        mut output: Option<&mut RgbaImage>,
    ) -> RegressionResult<u64> {
        if baseline.dimensions() != candidate.dimensions() {
            let (bw, bh) = baseline.dimensions();
            let (cw, ch) = candidate.dimensions();
            return Err(RegressionError::DimensionMismatch {
                baseline: Dimensions::new(bw, bh),
                candidate: Dimensions::new(cw, ch),
            });
        }

        let a = baseline.as_raw();
        let b = candidate.as_raw();
        if a == b {
            return Ok(0);
        }

        let (width, height) = baseline.dimensions();
        let max_delta = self.config.max_delta();
        let mut diff_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                let pos = pixel_offset(x, y, width);
                let delta = color_delta(a, b, pos, pos, false);
                if delta.abs() <= max_delta {
                    continue;
                }

                let anti_aliased = !self.config.include_aa
                    && (antialiased(a, x, y, width, height, b) || antialiased(b, x, y, width, height, a));

                if anti_aliased {
                    if let (Some(out), Some(color)) = (output.as_deref_mut(), self.config.aa_color) {
                        out.put_pixel(x, y, Rgba(color));
                    }
                } else {
                    if let Some(out) = output.as_deref_mut() {
                        out.put_pixel(x, y, Rgba(self.config.diff_color));
                    }
                    diff_pixels += 1;
                }
            }
        }

        Ok(diff_pixels)
    }
}

fn pixel_offset(x: u32, y: u32, width: u32) -> usize {
    (y as usize * width as usize + x as usize) * 4
}

fn blend(channel: f64, alpha: f64) -> f64 {
    255.0 + (channel - 255.0) * alpha
}

fn rgb_to_y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb_to_i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb_to_q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

/// Colours composited onto white, so transparency compares like it renders.
fn blended_rgb(img: &[u8], k: usize) -> (f64, f64, f64) {
    let (r, g, b, a) = (img[k] as f64, img[k + 1] as f64, img[k + 2] as f64, img[k + 3]);
    if a < 255 {
        let alpha = a as f64 / 255.0;
        (blend(r, alpha), blend(g, alpha), blend(b, alpha))
    } else {
        (r, g, b)
    }
}

/// Signed YIQ distance between pixel `k` of `img1` and pixel `m` of `img2`.
/// Negative when the first pixel is brighter. With `y_only` only the
/// brightness difference is returned.
fn color_delta(img1: &[u8], img2: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    if img1[k..k + 4] == img2[m..m + 4] {
        return 0.0;
    }

    let (r1, g1, b1) = blended_rgb(img1, k);
    let (r2, g2, b2) = blended_rgb(img2, m);

    let y1 = rgb_to_y(r1, g1, b1);
    let y2 = rgb_to_y(r2, g2, b2);
    let y = y1 - y2;

    if y_only {
        return y;
    }

    let i = rgb_to_i(r1, g1, b1) - rgb_to_i(r2, g2, b2);
    let q = rgb_to_q(r1, g1, b1) - rgb_to_q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

fn neighbourhood(x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    (
        x.saturating_sub(1),
        y.saturating_sub(1),
        (x + 1).min(width - 1),
        (y + 1).min(height - 1),
    )
}

/// Whether pixel (x1, y1) of `img` looks like an anti-aliased edge.
fn antialiased(img: &[u8], x1: u32, y1: u32, width: u32, height: u32, other: &[u8]) -> bool {
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let pos = pixel_offset(x1, y1, width);

    // Edge pixels start with one "equal" neighbour
    let mut zeroes = if x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2 { 1 } else { 0 };
    let mut min = 0.0;
    let mut max = 0.0;
    let mut darkest = (0, 0);
    let mut brightest = (0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }

            let delta = color_delta(img, img, pos, pixel_offset(x, y, width), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                darkest = (x, y);
            } else if delta > max {
                max = delta;
                brightest = (x, y);
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, darkest.0, darkest.1, width, height)
        && has_many_siblings(other, darkest.0, darkest.1, width, height))
        || (has_many_siblings(img, brightest.0, brightest.1, width, height)
            && has_many_siblings(other, brightest.0, brightest.1, width, height))
}

/// Whether pixel (x1, y1) has more than two identical neighbours.
fn has_many_siblings(img: &[u8], x1: u32, y1: u32, width: u32, height: u32) -> bool {
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let pos = pixel_offset(x1, y1, width);
    let mut zeroes = if x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2 { 1 } else { 0 };

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let other = pixel_offset(x, y, width);
            if img[pos..pos + 4] == img[other..other + 4] {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }

    false
}
