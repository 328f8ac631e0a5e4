//! Non-destructive adjustment parameters
//!
//! This struct stores every user-tunable knob of a render. It is attached to
//! a `RenderRequest` by value and never changes while that request is in
//! flight. The surrounding application persists it as JSON or as a flat
//! key-value document; both forms round-trip exactly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// All adjustment parameters for one render
///
/// Slider-style values use the -100..+100 range the UI exposes; the GPU
/// uniforms normalize them. A default-constructed value is neutral: rendering
/// with it reproduces the input image.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AdjustmentParameters {
    // ========== Exposure & Tone ==========

    /// Exposure adjustment in stops (-5.0 to +5.0)
    /// - Negative values darken the image
    /// - Positive values brighten the image
    /// - 0.0 = no adjustment
    pub exposure: f32,

    /// Contrast around mid-grey (-100.0 to +100.0)
    /// - Negative values flatten, positive values steepen
    pub contrast: f32,

    /// Highlights adjustment (-100.0 to +100.0)
    /// - Negative values recover bright areas, positive values boost them
    pub highlights: f32,

    /// Shadows adjustment (-100.0 to +100.0)
    /// - Positive values lift shadows, negative values crush them
    pub shadows: f32,

    /// Whites adjustment (-100.0 to +100.0), acts on the brightest tones
    pub whites: f32,

    /// Blacks adjustment (-100.0 to +100.0), acts on the darkest tones
    pub blacks: f32,

    // ========== Color ==========

    /// Global saturation (-100.0 to +100.0)
    /// - -100.0 = grayscale, 0.0 = original, +100.0 = double saturation
    pub saturation: f32,

    /// Vibrance (-100.0 to +100.0)
    /// - Smart saturation: weak colors move more than strong ones,
    ///   skin tones move least
    pub vibrance: f32,

    // ========== Tone Curve ==========

    /// Tone curve weight for the brightest band (-100.0 to +100.0)
    pub curve_highlights: f32,
    /// Tone curve weight for the upper midtones (-100.0 to +100.0)
    pub curve_lights: f32,
    /// Tone curve weight for the lower midtones (-100.0 to +100.0)
    pub curve_darks: f32,
    /// Tone curve weight for the darkest band (-100.0 to +100.0)
    pub curve_shadows: f32,

    // ========== HSL ==========

    /// Hue rotation in degrees (-180.0 to +180.0)
    pub hue_shift: f32,
    /// Saturation shift applied after saturation/vibrance (-100.0 to +100.0)
    pub saturation_shift: f32,
    /// Lightness shift (-100.0 to +100.0)
    pub luminance_shift: f32,

    // ========== Effects ==========

    /// Vignette strength (-100.0 to +100.0)
    /// - Positive values darken the corners, negative values brighten them
    pub vignette_strength: f32,
    /// Vignette falloff (0.0 to 100.0)
    /// - 0.0 = tight falloff near the corners, 100.0 = gradual from the center
    pub vignette_falloff: f32,

    /// Local contrast strength (-100.0 to +100.0)
    pub clarity: f32,
    /// Sharpening amount (0.0 to 100.0)
    pub sharpening: f32,
    /// Noise reduction amount (0.0 to 100.0)
    pub noise_reduction: f32,
    /// Film grain amount (0.0 to 100.0)
    pub grain: f32,

    // ========== Optional stages ==========
    // These stages sample neighbouring pixels (or add noise), so they are
    // skipped entirely unless enabled.

    pub apply_clarity: bool,
    pub apply_sharpening: bool,
    pub apply_noise_reduction: bool,
    pub apply_grain: bool,
}

impl Default for AdjustmentParameters {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            contrast: 0.0,
            highlights: 0.0,
            shadows: 0.0,
            whites: 0.0,
            blacks: 0.0,
            saturation: 0.0,
            vibrance: 0.0,
            curve_highlights: 0.0,
            curve_lights: 0.0,
            curve_darks: 0.0,
            curve_shadows: 0.0,
            hue_shift: 0.0,
            saturation_shift: 0.0,
            luminance_shift: 0.0,
            vignette_strength: 0.0,
            vignette_falloff: 50.0,
            clarity: 0.0,
            sharpening: 0.0,
            noise_reduction: 0.0,
            grain: 0.0,
            apply_clarity: false,
            apply_sharpening: false,
            apply_noise_reduction: false,
            apply_grain: false,
        }
    }
}

impl AdjustmentParameters {
    /// Create new neutral parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert to JSON string for storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON string; missing keys take their neutral value
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Flatten into a key-value document (one entry per field)
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct of plain numbers and bools always serializes to an object
            _ => Map::new(),
        }
    }

    /// Rebuild from a key-value document. Unknown keys are ignored.
    pub fn from_document(document: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(document.clone()))
    }

    /// Check if this represents an unedited image (all values at default)
    pub fn is_unedited(&self) -> bool {
        *self == Self::default()
    }

    /// Reset all adjustments to default (no edits)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Copy with every value pulled into its documented range.
    /// Non-finite values fall back to the neutral value.
    pub fn clamped(&self) -> Self {
        let neutral = Self::default();
        let fit = |value: f32, fallback: f32, min: f32, max: f32| {
            if value.is_finite() {
                value.clamp(min, max)
            } else {
                fallback
            }
        };
        let slider = |value: f32| fit(value, 0.0, -100.0, 100.0);
        let amount = |value: f32| fit(value, 0.0, 0.0, 100.0);

        Self {
            exposure: fit(self.exposure, 0.0, -5.0, 5.0),
            contrast: slider(self.contrast),
            highlights: slider(self.highlights),
            shadows: slider(self.shadows),
            whites: slider(self.whites),
            blacks: slider(self.blacks),
            saturation: slider(self.saturation),
            vibrance: slider(self.vibrance),
            curve_highlights: slider(self.curve_highlights),
            curve_lights: slider(self.curve_lights),
            curve_darks: slider(self.curve_darks),
            curve_shadows: slider(self.curve_shadows),
            hue_shift: fit(self.hue_shift, 0.0, -180.0, 180.0),
            saturation_shift: slider(self.saturation_shift),
            luminance_shift: slider(self.luminance_shift),
            vignette_strength: slider(self.vignette_strength),
            vignette_falloff: fit(self.vignette_falloff, neutral.vignette_falloff, 0.0, 100.0),
            clarity: slider(self.clarity),
            sharpening: amount(self.sharpening),
            noise_reduction: amount(self.noise_reduction),
            grain: amount(self.grain),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unedited() {
        let params = AdjustmentParameters::default();
        assert!(params.is_unedited());
    }

    #[test]
    fn test_serialization() {
        let mut params = AdjustmentParameters::default();
        params.exposure = 1.5;
        params.contrast = 20.0;
        params.saturation = -10.0;
        params.hue_shift = 12.25;
        params.apply_grain = true;
        params.grain = 35.0;

        let json = params.to_json().unwrap();
        let restored = AdjustmentParameters::from_json(&json).unwrap();

        assert_eq!(params, restored);
        assert!(!restored.is_unedited());
    }

    #[test]
    fn test_document_round_trip() {
        let mut params = AdjustmentParameters::default();
        params.curve_darks = -42.5;
        params.vignette_strength = 60.0;
        params.vignette_falloff = 12.0;
        params.apply_clarity = true;
        params.clarity = 0.1;

        let document = params.to_document();
        assert_eq!(document.len(), 25);
        assert_eq!(document["curve_darks"], serde_json::json!(-42.5));
        assert_eq!(document["apply_clarity"], serde_json::json!(true));

        let restored = AdjustmentParameters::from_document(&document).unwrap();
        assert_eq!(params, restored);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let json = r#"{"exposure": 0.5, "unknown": 3}"#;
        let restored = AdjustmentParameters::from_json(json).unwrap();
        assert_eq!(restored.exposure, 0.5);
        assert_eq!(restored.vignette_falloff, 50.0);
        assert!(!restored.apply_sharpening);
    }

    #[test]
    fn test_reset() {
        let mut params = AdjustmentParameters::default();
        params.exposure = 2.0;
        params.contrast = 50.0;

        assert!(!params.is_unedited());

        params.reset();

        assert!(params.is_unedited());
    }

    #[test]
    fn test_clamped() {
        let mut params = AdjustmentParameters::default();
        params.exposure = 12.0;
        params.contrast = -250.0;
        params.sharpening = -5.0;
        params.hue_shift = f32::NAN;
        params.vignette_falloff = f32::INFINITY;

        let clamped = params.clamped();
        assert_eq!(clamped.exposure, 5.0);
        assert_eq!(clamped.contrast, -100.0);
        assert_eq!(clamped.sharpening, 0.0);
        assert_eq!(clamped.hue_shift, 0.0);
        assert_eq!(clamped.vignette_falloff, 50.0);
        assert!(AdjustmentParameters::default().clamped().is_unedited());
    }
}
