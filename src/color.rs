//! Color math shared by the CPU kernel
//!
//! These mirror the helper functions in the WGSL kernel one for one:
//! - sRGB transfer (stored <-> linear working space)
//! - Rec. 709 luma
//! - RGB <-> HSL

use cgmath::{InnerSpace, Vector3};

use crate::state::data::LUMA_WEIGHTS;

pub type Rgb = Vector3<f32>;

/// Decode the sRGB transfer curve
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Encode with the sRGB transfer curve
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

pub fn rgb_to_linear(c: Rgb) -> Rgb {
    Vector3::new(srgb_to_linear(c.x), srgb_to_linear(c.y), srgb_to_linear(c.z))
}

pub fn rgb_to_srgb(c: Rgb) -> Rgb {
    Vector3::new(linear_to_srgb(c.x), linear_to_srgb(c.y), linear_to_srgb(c.z))
}

pub fn luma(c: Rgb) -> f32 {
    c.dot(Vector3::new(LUMA_WEIGHTS[0], LUMA_WEIGHTS[1], LUMA_WEIGHTS[2]))
}

/// Hermite step, same definition as WGSL `smoothstep`
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Component-wise clamp
pub fn clamp_rgb(c: Rgb, min: f32, max: f32) -> Rgb {
    Vector3::new(c.x.clamp(min, max), c.y.clamp(min, max), c.z.clamp(min, max))
}

/// Component-wise lower bound
pub fn floor_rgb(c: Rgb, min: f32) -> Rgb {
    Vector3::new(c.x.max(min), c.y.max(min), c.z.max(min))
}

/// RGB to (hue in turns, saturation, lightness)
pub fn rgb_to_hsl(c: Rgb) -> Rgb {
    let mx = c.x.max(c.y.max(c.z));
    let mn = c.x.min(c.y.min(c.z));
    let l = (mx + mn) * 0.5;
    let d = mx - mn;
    if d < 1e-6 {
        return Vector3::new(0.0, 0.0, l);
    }

    let s = if l > 0.5 { d / (2.0 - mx - mn) } else { d / (mx + mn) };

    let h = if mx == c.x {
        let h = (c.y - c.z) / d;
        if c.y < c.z {
            h + 6.0
        } else {
            h
        }
    } else if mx == c.y {
        (c.z - c.x) / d + 2.0
    } else {
        (c.x - c.y) / d + 4.0
    };
    Vector3::new(h / 6.0, s, l)
}

fn hue_to_channel(p: f32, q: f32, hue: f32) -> f32 {
    let t = hue - hue.floor();
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/// (hue in turns, saturation, lightness) to RGB
pub fn hsl_to_rgb(hsl: Rgb) -> Rgb {
    let (h, s, l) = (hsl.x, hsl.y, hsl.z);
    if s < 1e-6 {
        return Vector3::new(l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    Vector3::new(
        hue_to_channel(p, q, h + 1.0 / 3.0),
        hue_to_channel(p, q, h),
        hue_to_channel(p, q, h - 1.0 / 3.0),
    )
}

/// Vibrance weight: orange hues (roughly 0-50 degrees) get half the effect
pub fn skin_protection(hue: f32) -> f32 {
    let band = smoothstep(0.0, 0.03, hue) * (1.0 - smoothstep(0.11, 0.14, hue));
    1.0 - 0.5 * band
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_srgb_round_trip() {
        for i in 0..=20 {
            let v = i as f32 / 20.0;
            assert_abs_diff_eq!(linear_to_srgb(srgb_to_linear(v)), v, epsilon = 1e-5);
        }
        // Mid-grey in sRGB is about 21% linear
        assert_abs_diff_eq!(srgb_to_linear(0.5), 0.214, epsilon = 1e-3);
    }

    #[test]
    fn test_hsl_round_trip() {
        let samples = [
            Vector3::new(0.9, 0.2, 0.1),
            Vector3::new(0.1, 0.8, 0.3),
            Vector3::new(0.2, 0.3, 0.95),
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(1.0, 1.0, 0.0),
        ];
        for rgb in samples {
            let back = hsl_to_rgb(rgb_to_hsl(rgb));
            assert_abs_diff_eq!(back.x, rgb.x, epsilon = 1e-5);
            assert_abs_diff_eq!(back.y, rgb.y, epsilon = 1e-5);
            assert_abs_diff_eq!(back.z, rgb.z, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_hsl_primaries() {
        let red = rgb_to_hsl(Vector3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(red.x, 0.0);
        assert_abs_diff_eq!(red.y, 1.0);
        assert_abs_diff_eq!(red.z, 0.5);

        let blue = rgb_to_hsl(Vector3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(blue.x, 2.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_luma_weights_sum_to_one() {
        assert_abs_diff_eq!(luma(Vector3::new(1.0, 1.0, 1.0)), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_skin_protection_band() {
        assert_eq!(skin_protection(0.07), 0.5);
        assert_eq!(skin_protection(0.5), 1.0);
    }
}
