//! WGSL compute shader for the adjustment pipeline
//!
//! One invocation per output pixel, 16x16 invocations per workgroup. The
//! host dispatches `ceil(size / 16)` groups per axis, so edge invocations
//! outside the image return without writing.
//!
//! Stage order (must stay in sync with `cpu.rs`):
//! 1. Decode stored sRGB to linear
//! 2. Exposure
//! 3. Contrast around mid-grey
//! 4. Rec. 709 luma
//! 5. Highlights / shadows / whites / blacks (luma masks)
//! 6. Four-band tone curve
//! 7. HSL: saturation, vibrance, hue/saturation/luminance shift
//! 8. Optional: clarity, sharpening, noise reduction, grain
//! 9. Vignette
//! 10. Encode back to sRGB and store

/// Edge length of a square workgroup
pub const WORKGROUP_SIZE: u32 = 16;

/// Entry point name of the compute kernel
pub const ENTRY_POINT: &str = "main";

pub const ADJUST_SHADER: &str = r#"
struct AdjustParams {
    exposure: f32,
    contrast: f32,
    highlights: f32,
    shadows: f32,
    whites: f32,
    blacks: f32,
    saturation: f32,
    vibrance: f32,
    curve_highlights: f32,
    curve_lights: f32,
    curve_darks: f32,
    curve_shadows: f32,
    hue_shift: f32,
    saturation_shift: f32,
    luminance_shift: f32,
    vignette_strength: f32,
    vignette_falloff: f32,
    clarity: f32,
    sharpening: f32,
    noise_reduction: f32,
    grain: f32,
    inv_width: f32,
    inv_height: f32,
    center_x: f32,
    center_y: f32,
    width: u32,
    height: u32,
    apply_clarity: u32,
    apply_sharpening: u32,
    apply_noise_reduction: u32,
    apply_grain: u32,
    grain_seed: u32,
}

@group(0) @binding(0)
var input_image: texture_2d<f32>;

@group(0) @binding(1)
var output_image: texture_storage_2d<rgba32float, write>;

@group(0) @binding(2)
var<uniform> params: AdjustParams;

const LUMA_WEIGHTS: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);
const NOISE_SIGMA: f32 = 0.1;

// ========== Sampling ==========

fn load_stored(x: i32, y: i32) -> vec4<f32> {
    let cx = clamp(x, 0, i32(params.width) - 1);
    let cy = clamp(y, 0, i32(params.height) - 1);
    let texel = textureLoad(input_image, vec2<i32>(cx, cy), 0);
    return clamp(texel, vec4<f32>(0.0), vec4<f32>(1.0));
}

fn srgb_to_linear(c: vec3<f32>) -> vec3<f32> {
    let lo = c / 12.92;
    let hi = pow((c + vec3<f32>(0.055)) / 1.055, vec3<f32>(2.4));
    return select(hi, lo, c <= vec3<f32>(0.04045));
}

fn linear_to_srgb(c: vec3<f32>) -> vec3<f32> {
    let lo = c * 12.92;
    let hi = 1.055 * pow(c, vec3<f32>(1.0 / 2.4)) - vec3<f32>(0.055);
    return select(hi, lo, c <= vec3<f32>(0.0031308));
}

fn load_linear(x: i32, y: i32) -> vec3<f32> {
    return srgb_to_linear(load_stored(x, y).rgb);
}

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, LUMA_WEIGHTS);
}

// ========== Tone ==========

fn curve_band(l: f32, center: f32) -> f32 {
    return max(0.0, 1.0 - abs(l - center) * 4.0);
}

// ========== HSL ==========

fn rgb_to_hsl(c: vec3<f32>) -> vec3<f32> {
    let mx = max(c.r, max(c.g, c.b));
    let mn = min(c.r, min(c.g, c.b));
    let l = (mx + mn) * 0.5;
    let d = mx - mn;
    if (d < 1e-6) {
        return vec3<f32>(0.0, 0.0, l);
    }

    var s = d / (mx + mn);
    if (l > 0.5) {
        s = d / (2.0 - mx - mn);
    }

    var h = 0.0;
    if (mx == c.r) {
        h = (c.g - c.b) / d;
        if (c.g < c.b) {
            h = h + 6.0;
        }
    } else if (mx == c.g) {
        h = (c.b - c.r) / d + 2.0;
    } else {
        h = (c.r - c.g) / d + 4.0;
    }
    return vec3<f32>(h / 6.0, s, l);
}

fn hue_to_channel(p: f32, q: f32, hue: f32) -> f32 {
    let t = hue - floor(hue);
    if (t < 1.0 / 6.0) {
        return p + (q - p) * 6.0 * t;
    }
    if (t < 0.5) {
        return q;
    }
    if (t < 2.0 / 3.0) {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    return p;
}

fn hsl_to_rgb(hsl: vec3<f32>) -> vec3<f32> {
    let h = hsl.x;
    let s = hsl.y;
    let l = hsl.z;
    if (s < 1e-6) {
        return vec3<f32>(l);
    }

    var q = l + s - l * s;
    if (l < 0.5) {
        q = l * (1.0 + s);
    }
    let p = 2.0 * l - q;
    return vec3<f32>(
        hue_to_channel(p, q, h + 1.0 / 3.0),
        hue_to_channel(p, q, h),
        hue_to_channel(p, q, h - 1.0 / 3.0),
    );
}

// Orange hues (roughly 0-50 degrees) get half the vibrance
fn skin_protection(h: f32) -> f32 {
    let band = smoothstep(0.0, 0.03, h) * (1.0 - smoothstep(0.11, 0.14, h));
    return 1.0 - 0.5 * band;
}

// ========== Detail ==========

// 17-tap ring blur of luma: center plus 8 directions at two radii
fn ring_blur_luma(x: i32, y: i32) -> f32 {
    var dirs = array<vec2<i32>, 8>(
        vec2<i32>(1, 0), vec2<i32>(1, 1), vec2<i32>(0, 1), vec2<i32>(-1, 1),
        vec2<i32>(-1, 0), vec2<i32>(-1, -1), vec2<i32>(0, -1), vec2<i32>(1, -1),
    );
    var sum = luma(load_linear(x, y));
    for (var i = 0; i < 8; i = i + 1) {
        let dir = dirs[i];
        let diagonal = dir.x != 0 && dir.y != 0;
        let far = select(6, 4, diagonal);
        let near = select(3, 2, diagonal);
        sum = sum + luma(load_linear(x + dir.x * far, y + dir.y * far));
        sum = sum + luma(load_linear(x + dir.x * near, y + dir.y * near));
    }
    return sum / 17.0;
}

// Range-weighted 3x3 mean minus the center value
fn denoise_delta(x: i32, y: i32, center: vec3<f32>) -> vec3<f32> {
    let center_luma = luma(center);
    var sum = vec3<f32>(0.0);
    var weight = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let c = load_linear(x + dx, y + dy);
            let diff = luma(c) - center_luma;
            let w = exp(-(diff * diff) / (2.0 * NOISE_SIGMA * NOISE_SIGMA));
            sum = sum + c * w;
            weight = weight + w;
        }
    }
    return sum / weight - center;
}

fn grain_hash(x: u32, y: u32, seed: u32) -> f32 {
    var h = seed ^ (x * 0x8da6b343u) ^ (y * 0xd8163841u);
    h = (h ^ (h >> 16u)) * 0x7feb352du;
    h = (h ^ (h >> 15u)) * 0x846ca68bu;
    h = h ^ (h >> 16u);
    return f32(h) / 4294967295.0 * 2.0 - 1.0;
}

// ========== Kernel ==========

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    // Partial edge tiles
    if (gid.x >= params.width || gid.y >= params.height) {
        return;
    }
    let x = i32(gid.x);
    let y = i32(gid.y);

    // 1. Stored -> linear
    let stored = load_stored(x, y);
    let source = srgb_to_linear(stored.rgb);

    // 2. Exposure
    var rgb = source * exp2(params.exposure);

    // 3. Contrast
    rgb = max((rgb - vec3<f32>(0.5)) * (1.0 + params.contrast) + vec3<f32>(0.5), vec3<f32>(0.0));

    // 4-5. Luma-masked tone
    let l = luma(rgb);
    let bright = smoothstep(0.5, 1.0, l);
    let dark = 1.0 - smoothstep(0.0, 0.5, l);
    rgb = rgb * (1.0 + params.highlights * bright * 0.5);
    let lift = params.shadows * dark * 0.25
        + params.whites * bright * bright * 0.25
        + params.blacks * dark * dark * 0.25;
    rgb = max(rgb + vec3<f32>(lift), vec3<f32>(0.0));

    // 6. Tone curve
    let tl = luma(rgb);
    let curve = params.curve_highlights * curve_band(tl, 0.875)
        + params.curve_lights * curve_band(tl, 0.625)
        + params.curve_darks * curve_band(tl, 0.375)
        + params.curve_shadows * curve_band(tl, 0.125);
    rgb = clamp(rgb + vec3<f32>(curve * 0.2), vec3<f32>(0.0), vec3<f32>(1.0));

    // 7. HSL
    let hsl = rgb_to_hsl(rgb);
    var s = hsl.y * (1.0 + params.saturation);
    s = s * (1.0 + params.vibrance * (1.0 - clamp(s, 0.0, 1.0)) * skin_protection(hsl.x));
    s = s * (1.0 + params.saturation_shift);
    let shifted = hsl.x + params.hue_shift;
    let h = shifted - floor(shifted);
    var lightness = hsl.z;
    if (params.luminance_shift >= 0.0) {
        lightness = lightness + (1.0 - lightness) * params.luminance_shift;
    } else {
        lightness = lightness * (1.0 + params.luminance_shift);
    }
    rgb = hsl_to_rgb(vec3<f32>(h, clamp(s, 0.0, 1.0), clamp(lightness, 0.0, 1.0)));

    // 8. Optional stages
    if (params.apply_clarity != 0u) {
        let detail = luma(source) - ring_blur_luma(x, y);
        let lc = clamp(luma(rgb), 0.0, 1.0);
        let midtones = 1.0 - (2.0 * lc - 1.0) * (2.0 * lc - 1.0);
        rgb = rgb + vec3<f32>(detail * params.clarity * midtones);
    }
    if (params.apply_sharpening != 0u) {
        let around = load_linear(x, y - 1) + load_linear(x, y + 1)
            + load_linear(x - 1, y) + load_linear(x + 1, y);
        rgb = rgb + (source - around * 0.25) * params.sharpening * 1.5;
    }
    if (params.apply_noise_reduction != 0u) {
        rgb = rgb + denoise_delta(x, y, source) * params.noise_reduction;
    }
    if (params.apply_grain != 0u) {
        let noise = grain_hash(gid.x, gid.y, params.grain_seed);
        let gl = clamp(luma(rgb), 0.0, 1.0);
        rgb = rgb + vec3<f32>(noise * params.grain * 0.1 * 4.0 * gl * (1.0 - gl));
    }

    // 9. Vignette
    if (params.vignette_strength != 0.0) {
        let offset = vec2<f32>(
            (f32(x) + 0.5 - params.center_x) * params.inv_width,
            (f32(y) + 0.5 - params.center_y) * params.inv_height,
        ) * 2.0;
        let dist = max(length(offset) * 0.70710678, 1e-6);
        let exponent = mix(4.0, 1.0, params.vignette_falloff);
        rgb = rgb * max(1.0 - params.vignette_strength * pow(dist, exponent), 0.0);
    }

    // 10. Linear -> stored
    let encoded = linear_to_srgb(clamp(rgb, vec3<f32>(0.0), vec3<f32>(1.0)));
    textureStore(output_image, vec2<i32>(x, y), vec4<f32>(encoded, stored.a));
}
"#;

/// Get the shader source code for the adjustment kernel
pub fn get_shader() -> &'static str {
    ADJUST_SHADER
}
