//! CPU fallback renderer
//!
//! Runs the same per-pixel algorithm as the WGSL kernel, striping rows across
//! a rayon pool. Used when the GPU is unavailable; outputs match the GPU
//! path within float tolerance (not bit for bit).

use cgmath::{InnerSpace, Vector2, Vector3};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::color::{self, Rgb};
use crate::error::{RenderError, RenderStop};
use crate::gpu::uniforms::AdjustUniforms;
use crate::render::cancel::CancellationToken;
use crate::state::data::PixelBuffer;
use crate::state::edit::AdjustmentParameters;

/// Rows between cancellation checks
const ROWS_PER_CHECK: usize = 16;

const NOISE_SIGMA: f32 = 0.1;

/// Ring directions for the clarity blur
const RING: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

pub struct CpuRenderer {
    pool: ThreadPool,
}

impl std::fmt::Debug for CpuRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuRenderer")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl CpuRenderer {
    /// Create a renderer with `threads` stripes (0 = one per core)
    pub fn new(threads: usize) -> Result<Self, RenderError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("raw-render-cpu-{}", i))
            .build()
            .map_err(|e| RenderError::Initialization(format!("CPU pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Render `image` with `params`, checking `token` every few rows
    pub fn render(
        &self,
        image: &PixelBuffer,
        params: &AdjustmentParameters,
        token: &CancellationToken,
    ) -> Result<PixelBuffer, RenderStop> {
        if image.is_empty() {
            return Err(RenderError::InputRejected("image is empty".to_string()).into());
        }
        if token.is_cancelled() {
            return Err(RenderStop::Cancelled);
        }

        let (width, height) = image.dimensions();
        let uniforms = AdjustUniforms::new(params, width, height);
        let row_len = width as usize * 4;
        let mut output = vec![0.0f32; row_len * height as usize];

        let started = std::time::Instant::now();
        let stripes = self.pool.install(|| {
            output
                .par_chunks_mut(row_len)
                .enumerate()
                .try_for_each(|(y, row)| {
                    if y % ROWS_PER_CHECK == 0 && token.is_cancelled() {
                        return Err(RenderStop::Cancelled);
                    }
                    for x in 0..width as usize {
                        let px = adjust_pixel(image, &uniforms, x as u32, y as u32);
                        row[x * 4..x * 4 + 4].copy_from_slice(&px);
                    }
                    Ok(())
                })
        });
        stripes?;

        debug!(
            "CPU render {}x{} on {} threads took {:?}",
            width,
            height,
            self.threads(),
            started.elapsed()
        );

        PixelBuffer::from_rgba_f32(width, height, output).map_err(RenderStop::Failed)
    }
}

fn load_linear(image: &PixelBuffer, x: i64, y: i64) -> Rgb {
    let [r, g, b, _] = image.pixel(x, y);
    color::rgb_to_linear(color::clamp_rgb(Vector3::new(r, g, b), 0.0, 1.0))
}

fn curve_band(l: f32, center: f32) -> f32 {
    (1.0 - (l - center).abs() * 4.0).max(0.0)
}

fn ring_blur_luma(image: &PixelBuffer, x: i64, y: i64) -> f32 {
    let mut sum = color::luma(load_linear(image, x, y));
    for (dx, dy) in RING {
        let diagonal = dx != 0 && dy != 0;
        let (far, near) = if diagonal { (4, 2) } else { (6, 3) };
        sum += color::luma(load_linear(image, x + dx * far, y + dy * far));
        sum += color::luma(load_linear(image, x + dx * near, y + dy * near));
    }
    sum / 17.0
}

fn denoise_delta(image: &PixelBuffer, x: i64, y: i64, center: Rgb) -> Rgb {
    let center_luma = color::luma(center);
    let mut sum = Vector3::new(0.0, 0.0, 0.0);
    let mut weight = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let c = load_linear(image, x + dx, y + dy);
            let diff = color::luma(c) - center_luma;
            let w = (-(diff * diff) / (2.0 * NOISE_SIGMA * NOISE_SIGMA)).exp();
            sum += c * w;
            weight += w;
        }
    }
    sum / weight - center
}

/// Integer hash mapped to [-1, 1]
pub fn grain_hash(x: u32, y: u32, seed: u32) -> f32 {
    let mut h = seed ^ x.wrapping_mul(0x8da6_b343) ^ y.wrapping_mul(0xd816_3841);
    h = (h ^ (h >> 16)).wrapping_mul(0x7feb_352d);
    h = (h ^ (h >> 15)).wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    h as f32 / u32::MAX as f32 * 2.0 - 1.0
}

/// The adjustment algorithm for one pixel
pub fn adjust_pixel(image: &PixelBuffer, u: &AdjustUniforms, px: u32, py: u32) -> [f32; 4] {
    let (x, y) = (px as i64, py as i64);

    // 1. Stored -> linear
    let stored = image.pixel(x, y);
    let alpha = stored[3].clamp(0.0, 1.0);
    let source = load_linear(image, x, y);

    // 2. Exposure
    let mut rgb = source * u.exposure.exp2();

    // 3. Contrast
    rgb = color::floor_rgb(
        (rgb - Vector3::new(0.5, 0.5, 0.5)) * (1.0 + u.contrast) + Vector3::new(0.5, 0.5, 0.5),
        0.0,
    );

    // 4-5. Luma-masked tone
    let l = color::luma(rgb);
    let bright = color::smoothstep(0.5, 1.0, l);
    let dark = 1.0 - color::smoothstep(0.0, 0.5, l);
    rgb *= 1.0 + u.highlights * bright * 0.5;
    let lift = u.shadows * dark * 0.25
        + u.whites * bright * bright * 0.25
        + u.blacks * dark * dark * 0.25;
    rgb = color::floor_rgb(rgb + Vector3::new(lift, lift, lift), 0.0);

    // 6. Tone curve
    let tl = color::luma(rgb);
    let curve = u.curve_highlights * curve_band(tl, 0.875)
        + u.curve_lights * curve_band(tl, 0.625)
        + u.curve_darks * curve_band(tl, 0.375)
        + u.curve_shadows * curve_band(tl, 0.125);
    let delta = curve * 0.2;
    rgb = color::clamp_rgb(rgb + Vector3::new(delta, delta, delta), 0.0, 1.0);

    // 7. HSL
    let hsl = color::rgb_to_hsl(rgb);
    let mut s = hsl.y * (1.0 + u.saturation);
    s *= 1.0 + u.vibrance * (1.0 - s.clamp(0.0, 1.0)) * color::skin_protection(hsl.x);
    s *= 1.0 + u.saturation_shift;
    let shifted = hsl.x + u.hue_shift;
    let h = shifted - shifted.floor();
    let lightness = if u.luminance_shift >= 0.0 {
        hsl.z + (1.0 - hsl.z) * u.luminance_shift
    } else {
        hsl.z * (1.0 + u.luminance_shift)
    };
    rgb = color::hsl_to_rgb(Vector3::new(h, s.clamp(0.0, 1.0), lightness.clamp(0.0, 1.0)));

    // 8. Optional stages
    if u.apply_clarity != 0 {
        let detail = color::luma(source) - ring_blur_luma(image, x, y);
        let lc = color::luma(rgb).clamp(0.0, 1.0);
        let midtones = 1.0 - (2.0 * lc - 1.0) * (2.0 * lc - 1.0);
        let d = detail * u.clarity * midtones;
        rgb += Vector3::new(d, d, d);
    }
    if u.apply_sharpening != 0 {
        let around = load_linear(image, x, y - 1)
            + load_linear(image, x, y + 1)
            + load_linear(image, x - 1, y)
            + load_linear(image, x + 1, y);
        rgb += (source - around * 0.25) * u.sharpening * 1.5;
    }
    if u.apply_noise_reduction != 0 {
        rgb += denoise_delta(image, x, y, source) * u.noise_reduction;
    }
    if u.apply_grain != 0 {
        let noise = grain_hash(px, py, u.grain_seed);
        let gl = color::luma(rgb).clamp(0.0, 1.0);
        let g = noise * u.grain * 0.1 * 4.0 * gl * (1.0 - gl);
        rgb += Vector3::new(g, g, g);
    }

    // 9. Vignette
    if u.vignette_strength != 0.0 {
        let offset = Vector2::new(
            (px as f32 + 0.5 - u.center_x) * u.inv_width,
            (py as f32 + 0.5 - u.center_y) * u.inv_height,
        ) * 2.0;
        let dist = (offset.magnitude() * 0.707_106_78).max(1e-6);
        let exponent = 4.0 + (1.0 - 4.0) * u.vignette_falloff;
        rgb *= (1.0 - u.vignette_strength * dist.powf(exponent)).max(0.0);
    }

    // 10. Linear -> stored
    let encoded = color::rgb_to_srgb(color::clamp_rgb(rgb, 0.0, 1.0));
    [encoded.x, encoded.y, encoded.z, alpha]
}
