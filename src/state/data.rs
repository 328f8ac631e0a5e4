//! Pixel buffers exchanged with the render engine
//!
//! Source images arrive at any bit depth and are normalized once into
//! interleaved RGBA `f32` in [0, 1], display-encoded (sRGB transfer). The
//! rendered output uses the same representation.

use image::{imageops::FilterType, DynamicImage, Rgba32FImage};

use crate::error::RenderError;

/// Rec. 709 luma weights
pub const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// A decoded RGBA image
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    /// Interleaved RGBA, row-major, 4 floats per pixel
    data: Vec<f32>,
}

impl PixelBuffer {
    /// Wrap already-normalized RGBA float data
    pub fn from_rgba_f32(width: u32, height: u32, data: Vec<f32>) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(RenderError::InputRejected(format!(
                "buffer holds {} floats, {}x{} RGBA needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Normalize 8-bit RGBA
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> Result<Self, RenderError> {
        let floats = data.iter().map(|&v| v as f32 / u8::MAX as f32).collect();
        Self::from_rgba_f32(width, height, floats)
    }

    /// Normalize 16-bit RGBA
    pub fn from_rgba16(width: u32, height: u32, data: &[u16]) -> Result<Self, RenderError> {
        let floats = data.iter().map(|&v| v as f32 / u16::MAX as f32).collect();
        Self::from_rgba_f32(width, height, floats)
    }

    /// Normalize any decoded image (8/16/32-bit, gray or color)
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba32f();
        let (width, height) = rgba.dimensions();
        Self { width, height, data: rgba.into_raw() }
    }

    /// A single-color image
    pub fn solid(width: u32, height: u32, rgba: [f32; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get the image dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw interleaved RGBA data
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<f32> {
        self.data
    }

    /// RGBA value at (x, y), clamped to the image edge
    pub fn pixel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let i = (y * self.width as usize + x) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Average Rec. 709 luma of the stored (display-encoded) values
    pub fn mean_luma(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .data
            .chunks_exact(4)
            .map(|p| {
                (p[0] * LUMA_WEIGHTS[0] + p[1] * LUMA_WEIGHTS[1] + p[2] * LUMA_WEIGHTS[2]) as f64
            })
            .sum();
        (sum / self.pixel_count() as f64) as f32
    }

    /// Quantize to 8-bit RGBA for display or export
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }

    /// Convert into an `image` buffer
    pub fn to_image(&self) -> Option<Rgba32FImage> {
        Rgba32FImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Resample to new dimensions (triangle filter)
    pub fn resized(&self, width: u32, height: u32) -> Result<Self, RenderError> {
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 || self.is_empty() {
            return Err(RenderError::InputRejected(format!(
                "cannot resize {}x{} to {}x{}",
                self.width, self.height, width, height
            )));
        }
        let source = self.to_image().ok_or_else(|| {
            RenderError::InputRejected("pixel data does not match dimensions".to_string())
        })?;
        let resized = image::imageops::resize(&source, width, height, FilterType::Triangle);
        Ok(Self { width, height, data: resized.into_raw() })
    }
}
