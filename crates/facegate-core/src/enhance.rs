//! Image enhancement for hard detection cases: brightness/contrast
//! normalization, Gaussian and bilateral smoothing, sharpening.
//!
//! All functions operate on packed RGBA buffers (4 bytes per pixel). Only
//! the RGB channels are modified; alpha is passed through.
//!
//! Edge policy: the convolution filters only write pixels whose full kernel
//! window lies inside the image. Pixels closer to the border than the kernel
//! radius keep their input values, and an image smaller than the kernel is
//! left untouched.

use serde::{Deserialize, Serialize};

const CHANNELS: usize = 4;

/// Luma statistics of an RGBA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BrightnessStats {
    pub avg_brightness: f32,
    pub min: f32,
    pub max: f32,
}

impl BrightnessStats {
    /// Observed luma range (max − min).
    pub fn contrast(&self) -> f32 {
        self.max - self.min
    }
}

/// Enhancement strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementLevel {
    /// Pick from the image's brightness and contrast.
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

impl EnhancementLevel {
    /// Smoothing sigma used at this level. `Auto` must be resolved first.
    fn sigma(self) -> f32 {
        match self {
            EnhancementLevel::Auto | EnhancementLevel::Low => 0.5,
            EnhancementLevel::Medium => 1.0,
            EnhancementLevel::High => 1.5,
        }
    }
}

impl std::str::FromStr for EnhancementLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown enhancement level: {other}")),
        }
    }
}

/// Options for [`enhance_for_detection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceOptions {
    pub level: EnhancementLevel,
    /// Use the edge-preserving bilateral filter instead of a Gaussian blur.
    pub bilateral: bool,
    /// Range sigma for the bilateral filter, in luma units.
    pub range_sigma: f32,
    pub sharpen: bool,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            level: EnhancementLevel::Auto,
            bilateral: true,
            range_sigma: 30.0,
            sharpen: true,
        }
    }
}

#[inline]
fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Whether `buffer` holds exactly `width × height` RGBA pixels.
fn dims_match(buffer: &[u8], width: u32, height: u32) -> bool {
    buffer.len() == width as usize * height as usize * CHANNELS
}

/// Kernel size for a Gaussian of the given sigma: odd and at least 3.
pub fn kernel_size(sigma: f32) -> usize {
    let size = ((3.0 * sigma).round().max(0.0) as usize) | 1;
    size.max(3)
}

/// Luma-weighted average, minimum and maximum over all pixels.
pub fn compute_brightness_contrast(buffer: &[u8]) -> BrightnessStats {
    let mut sum = 0.0f64;
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut count = 0usize;

    for px in buffer.chunks_exact(CHANNELS) {
        let y = luma(px);
        sum += y as f64;
        min = min.min(y);
        max = max.max(y);
        count += 1;
    }

    if count == 0 {
        return BrightnessStats::default();
    }

    BrightnessStats {
        avg_brightness: (sum / count as f64) as f32,
        min,
        max,
    }
}

/// Multiply every colour channel by `factor`, clamped to [0, 255].
pub fn adjust_brightness(buffer: &mut [u8], factor: f32) {
    for px in buffer.chunks_exact_mut(CHANNELS) {
        for c in &mut px[..3] {
            *c = clamp_u8(*c as f32 * factor);
        }
    }
}

/// Scale every colour channel's distance from mid-grey by `factor`.
pub fn adjust_contrast(buffer: &mut [u8], factor: f32) {
    adjust_contrast_around(buffer, factor, 128.0);
}

/// Scale every colour channel's distance from `pivot` by `factor`.
pub fn adjust_contrast_around(buffer: &mut [u8], factor: f32, pivot: f32) {
    for px in buffer.chunks_exact_mut(CHANNELS) {
        for c in &mut px[..3] {
            *c = clamp_u8((*c as f32 - pivot) * factor + pivot);
        }
    }
}

/// Normalized 2-D Gaussian kernel, row-major `size × size`.
fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as i32;
    let two_sigma_sq = 2.0 * sigma.max(1e-3).powi(2);
    let mut kernel = Vec::with_capacity(size * size);
    for ky in -half..=half {
        for kx in -half..=half {
            kernel.push((-((kx * kx + ky * ky) as f32) / two_sigma_sq).exp());
        }
    }
    let total: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= total;
    }
    kernel
}

/// Convolve the interior of `buffer` with a square kernel.
fn convolve(buffer: &mut [u8], width: u32, height: u32, kernel: &[f32], size: usize) {
    let w = width as usize;
    let h = height as usize;
    let half = size / 2;
    if !dims_match(buffer, width, height) || w < size || h < size {
        return;
    }

    let src = buffer.to_vec();
    for y in half..h - half {
        for x in half..w - half {
            let mut acc = [0.0f32; 3];
            for ky in 0..size {
                let row = (y + ky - half) * w;
                for kx in 0..size {
                    let k = kernel[ky * size + kx];
                    let i = (row + x + kx - half) * CHANNELS;
                    acc[0] += src[i] as f32 * k;
                    acc[1] += src[i + 1] as f32 * k;
                    acc[2] += src[i + 2] as f32 * k;
                }
            }
            let o = (y * w + x) * CHANNELS;
            buffer[o] = clamp_u8(acc[0]);
            buffer[o + 1] = clamp_u8(acc[1]);
            buffer[o + 2] = clamp_u8(acc[2]);
        }
    }
}

/// Gaussian blur with kernel size `max(3, round(3σ) | 1)`.
pub fn gaussian_blur(buffer: &mut [u8], width: u32, height: u32, sigma: f32) {
    let size = kernel_size(sigma);
    let kernel = gaussian_kernel(size, sigma);
    convolve(buffer, width, height, &kernel, size);
}

/// Edge-preserving bilateral filter.
///
/// Each neighbour is weighted by a spatial Gaussian on its offset and a
/// range Gaussian on its luma difference from the centre pixel.
pub fn bilateral_filter(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    spatial_sigma: f32,
    range_sigma: f32,
) {
    let w = width as usize;
    let h = height as usize;
    let size = kernel_size(spatial_sigma);
    let half = size / 2;
    if !dims_match(buffer, width, height) || w < size || h < size {
        return;
    }

    // Unnormalized spatial weights; normalization happens per pixel.
    let two_spatial_sq = 2.0 * spatial_sigma.max(1e-3).powi(2);
    let spatial: Vec<f32> = (0..size * size)
        .map(|i| {
            let dx = (i % size) as f32 - half as f32;
            let dy = (i / size) as f32 - half as f32;
            (-(dx * dx + dy * dy) / two_spatial_sq).exp()
        })
        .collect();
    let two_range_sq = 2.0 * range_sigma.max(1e-3).powi(2);

    let src = buffer.to_vec();
    for y in half..h - half {
        for x in half..w - half {
            let c = (y * w + x) * CHANNELS;
            let centre = luma(&src[c..c + 3]);

            let mut acc = [0.0f32; 3];
            let mut total_weight = 0.0f32;
            for ky in 0..size {
                let row = (y + ky - half) * w;
                for kx in 0..size {
                    let i = (row + x + kx - half) * CHANNELS;
                    let diff = luma(&src[i..i + 3]) - centre;
                    let weight = spatial[ky * size + kx] * (-(diff * diff) / two_range_sq).exp();
                    acc[0] += src[i] as f32 * weight;
                    acc[1] += src[i + 1] as f32 * weight;
                    acc[2] += src[i + 2] as f32 * weight;
                    total_weight += weight;
                }
            }

            if total_weight > f32::EPSILON {
                buffer[c] = clamp_u8(acc[0] / total_weight);
                buffer[c + 1] = clamp_u8(acc[1] / total_weight);
                buffer[c + 2] = clamp_u8(acc[2] / total_weight);
            }
        }
    }
}

/// 3×3 sharpening with kernel `[[0,-1,0],[-1,5,-1],[0,-1,0]]`.
pub fn sharpen(buffer: &mut [u8], width: u32, height: u32) {
    const KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
    convolve(buffer, width, height, &KERNEL, 3);
}

/// Resolve `Auto` from the image statistics; explicit levels pass through.
pub fn select_level(stats: &BrightnessStats, requested: EnhancementLevel) -> EnhancementLevel {
    if requested != EnhancementLevel::Auto {
        return requested;
    }

    let avg = stats.avg_brightness;
    let by_brightness = if !(60.0..=200.0).contains(&avg) {
        EnhancementLevel::High
    } else if !(80.0..=180.0).contains(&avg) {
        EnhancementLevel::Medium
    } else {
        EnhancementLevel::Low
    };

    let range = stats.contrast();
    let by_contrast = if range < 40.0 {
        EnhancementLevel::High
    } else if range < 80.0 {
        EnhancementLevel::Medium
    } else {
        EnhancementLevel::Low
    };

    by_brightness.max(by_contrast)
}

/// Enhance an RGBA frame so a detector has a better chance of finding a face.
///
/// Never fails. A buffer that does not match the stated dimensions is
/// returned as an unmodified copy.
pub fn enhance_for_detection(
    buffer: &[u8],
    width: u32,
    height: u32,
    options: &EnhanceOptions,
) -> Vec<u8> {
    let mut out = buffer.to_vec();
    if !dims_match(buffer, width, height) {
        tracing::warn!(
            len = buffer.len(),
            width,
            height,
            "enhance: buffer does not match dimensions, returning input unchanged"
        );
        return out;
    }

    let stats = compute_brightness_contrast(&out);
    let level = select_level(&stats, options.level);
    let avg = stats.avg_brightness;

    if avg > 180.0 {
        adjust_brightness(&mut out, 1.0 - (avg - 180.0) / 255.0);
    } else if avg < 80.0 {
        adjust_brightness(&mut out, 1.0 + (80.0 - avg) / 80.0);
    }

    // Stretch about the corrected mean so the contrast boost does not undo
    // the brightness correction.
    let range = stats.contrast();
    if range < 80.0 {
        let pivot = compute_brightness_contrast(&out).avg_brightness;
        adjust_contrast_around(&mut out, 1.0 + 0.5 * (80.0 - range) / 80.0, pivot);
    }

    let sigma = level.sigma();
    if options.bilateral {
        bilateral_filter(&mut out, width, height, sigma, options.range_sigma);
    } else {
        gaussian_blur(&mut out, width, height, sigma);
    }

    if options.sharpen {
        sharpen(&mut out, width, height);
    }

    tracing::debug!(
        ?level,
        avg_brightness = avg,
        contrast = range,
        "enhanced frame for detection"
    );

    out
}
