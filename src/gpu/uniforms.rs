//! Uniform block for the adjustment kernel
//!
//! Slider values are normalized here so the kernel works with unit ranges.
//! The CPU fallback reads the same struct, so both paths see identical
//! constants.

use crate::state::edit::AdjustmentParameters;

/// Seed for the grain hash; fixed so renders are reproducible
pub const GRAIN_SEED: u32 = 0x9E37_79B9;

/// Edit parameters in a GPU-friendly format
/// Must match the WGSL `AdjustParams` struct field for field (128 bytes)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AdjustUniforms {
    pub exposure: f32,
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    pub whites: f32,
    pub blacks: f32,
    pub saturation: f32,
    pub vibrance: f32,

    pub curve_highlights: f32,
    pub curve_lights: f32,
    pub curve_darks: f32,
    pub curve_shadows: f32,

    /// Hue rotation in turns (-0.5 to 0.5)
    pub hue_shift: f32,
    pub saturation_shift: f32,
    pub luminance_shift: f32,
    pub vignette_strength: f32,

    pub vignette_falloff: f32,
    pub clarity: f32,
    pub sharpening: f32,
    pub noise_reduction: f32,

    pub grain: f32,
    pub inv_width: f32,
    pub inv_height: f32,
    /// Vignette center in pixels
    pub center_x: f32,

    pub center_y: f32,
    pub width: u32,
    pub height: u32,
    pub apply_clarity: u32,

    pub apply_sharpening: u32,
    pub apply_noise_reduction: u32,
    pub apply_grain: u32,
    pub grain_seed: u32,
}

impl AdjustUniforms {
    /// Derive the uniform block for an image of the given size
    pub fn new(params: &AdjustmentParameters, width: u32, height: u32) -> Self {
        let p = params.clamped();
        let slider = |v: f32| v / 100.0;
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;

        Self {
            exposure: p.exposure,
            contrast: slider(p.contrast),
            highlights: slider(p.highlights),
            shadows: slider(p.shadows),
            whites: slider(p.whites),
            blacks: slider(p.blacks),
            saturation: slider(p.saturation),
            vibrance: slider(p.vibrance),
            curve_highlights: slider(p.curve_highlights),
            curve_lights: slider(p.curve_lights),
            curve_darks: slider(p.curve_darks),
            curve_shadows: slider(p.curve_shadows),
            hue_shift: p.hue_shift / 360.0,
            saturation_shift: slider(p.saturation_shift),
            luminance_shift: slider(p.luminance_shift),
            vignette_strength: slider(p.vignette_strength),
            vignette_falloff: slider(p.vignette_falloff),
            clarity: slider(p.clarity),
            sharpening: slider(p.sharpening),
            noise_reduction: slider(p.noise_reduction),
            grain: slider(p.grain),
            inv_width: 1.0 / w,
            inv_height: 1.0 / h,
            center_x: w * 0.5,
            center_y: h * 0.5,
            width,
            height,
            apply_clarity: p.apply_clarity as u32,
            apply_sharpening: p.apply_sharpening as u32,
            apply_noise_reduction: p.apply_noise_reduction as u32,
            apply_grain: p.apply_grain as u32,
            grain_seed: GRAIN_SEED,
        }
    }
}
