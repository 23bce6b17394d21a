use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::sync::Arc;

/// A decoded bitmap shared between producer calls and the render thread.
///
/// Frames are replaced wholesale and never mutated in place, so the render
/// loop detects a new frame by pointer identity rather than by comparing
/// pixels.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pixels: Arc<RgbaImage>,
}

impl PreviewFrame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(image),
        }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn same_frame(&self, other: &PreviewFrame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Number of live handles to this bitmap.
    #[cfg(test)]
    pub(crate) fn share_count(&self) -> usize {
        Arc::strong_count(&self.pixels)
    }
}

impl From<RgbaImage> for PreviewFrame {
    fn from(image: RgbaImage) -> Self {
        Self::new(image)
    }
}

/// Pixel buffer as handed over by the host: row-major, channel-interleaved
/// floats in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<f32>,
}

impl HostImage {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<f32>) -> Self {
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Converts to an 8-bit RGBA bitmap. Values are scaled by 255 and clamped;
    /// grayscale is replicated across RGB and missing alpha is opaque.
    pub fn to_rgba(&self) -> Result<RgbaImage> {
        let channels = usize::from(self.channels);
        if !matches!(channels, 1 | 3 | 4) {
            return Err(anyhow!("unsupported channel count {}", self.channels));
        }
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(channels);
        if self.data.len() != expected {
            return Err(anyhow!(
                "host image buffer holds {} values, expected {expected} for {}x{}x{}",
                self.data.len(),
                self.width,
                self.height,
                self.channels
            ));
        }

        let mut out = Vec::with_capacity(expected / channels * 4);
        for px in self.data.chunks_exact(channels) {
            match channels {
                1 => {
                    let v = to_u8(px[0]);
                    out.extend_from_slice(&[v, v, v, 255]);
                }
                3 => out.extend_from_slice(&[to_u8(px[0]), to_u8(px[1]), to_u8(px[2]), 255]),
                _ => out.extend_from_slice(&[
                    to_u8(px[0]),
                    to_u8(px[1]),
                    to_u8(px[2]),
                    to_u8(px[3]),
                ]),
            }
        }

        RgbaImage::from_raw(self.width, self.height, out)
            .ok_or_else(|| anyhow!("host image dimensions do not match converted buffer"))
    }

    pub fn to_frame(&self) -> Result<PreviewFrame> {
        self.to_rgba().map(PreviewFrame::new)
    }
}

fn to_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value * 255.0).clamp(0.0, 255.0) as u8
}
