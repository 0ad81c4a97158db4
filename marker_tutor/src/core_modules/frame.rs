// THEORY:
// A `Frame` is the raw input of one processing cycle: an immutable RGBA raster plus
// the moment it was captured. The processing loop owns it for exactly one cycle;
// nothing downstream keeps a reference once the cycle ends.
//
// A frame is allowed to be malformed (zero dimensions, a buffer that does not match
// its dimensions). Such frames are still valid input: the detector reports zero
// markers for them instead of failing.

use crate::core_modules::pixel::{CHANNELS, Pixel};
use image::{DynamicImage, GrayImage};
use std::time::Instant;

/// An immutable RGBA frame delivered by a frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic id assigned by the frame source.
    pub frame_id: u64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Tightly packed RGBA bytes, row-major.
    pub data: Vec<u8>,
    /// Capture time.
    pub timestamp: Instant,
}

impl Frame {
    /// Wraps a raw RGBA buffer. The buffer is not checked here.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            frame_id: 0,
            width,
            height,
            data,
            timestamp: Instant::now(),
        }
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(width, height, rgba.into_raw())
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = Vec::with_capacity((width * height) as usize * CHANNELS);
        for value in image.as_raw() {
            data.extend_from_slice(&[*value, *value, *value, 255]);
        }
        Self::from_rgba(width, height, data)
    }

    pub fn with_id(mut self, frame_id: u64) -> Self {
        self.frame_id = frame_id;
        self
    }

    /// True when the dimensions are non-zero and the buffer holds exactly one RGBA
    /// pixel per position.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * CHANNELS
    }

    /// Converts the frame into a luminance image, or `None` for a malformed frame.
    pub fn to_gray(&self) -> Option<GrayImage> {
        if !self.is_well_formed() {
            return None;
        }
        let gray: Vec<u8> = self
            .data
            .chunks_exact(CHANNELS)
            .map(|bytes| Pixel::from(bytes).gray())
            .collect();
        GrayImage::from_raw(self.width, self.height, gray)
    }
}
