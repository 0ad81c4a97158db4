// THEORY:
// The `Pixel` module is the smallest unit of the vision core. It is a "dumb" data
// container for a single RGBA pixel plus the one single-pixel heuristic the marker
// detector needs: perceived brightness.
//
// Key architectural principles:
// 1.  **Single-pixel scope**: `luminance` reads only this pixel's channels. Anything
//     that compares pixels (thresholds, gradients) lives in the detector.
// 2.  **Raw layout**: frames are tightly packed RGBA, 4 bytes per pixel, so a pixel
//     is always built from a 4-byte slice of the frame buffer.

pub type Channel = u8;
pub type Luminance = f64;

pub const CHANNELS: usize = 4;

/// A "dumb" data container representing a single RGBA pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    /// The red channel value (0-255).
    pub red: Channel,
    /// The green channel value (0-255).
    pub green: Channel,
    /// The blue channel value (0-255).
    pub blue: Channel,
    /// The alpha (transparency) channel value (0-255). Ignored by every heuristic.
    pub alpha: Channel,
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
    pub fn luminance(&self) -> Luminance {
        0.299_f64 * self.red as f64 + 0.587_f64 * self.green as f64 + 0.114_f64 * self.blue as f64
    }

    /// Luminance rounded into a gray byte.
    pub fn gray(&self) -> u8 {
        self.luminance().round().clamp(0.0, 255.0) as u8
    }
}

impl From<&[u8]> for Pixel {
    /// Reads the first four bytes as RGBA. Short slices are padded with zeros and an
    /// opaque alpha.
    fn from(bytes: &[u8]) -> Self {
        match bytes {
            [r, g, b, a, ..] => Pixel::new(*r, *g, *b, *a),
            [r, g, b] => Pixel::new(*r, *g, *b, 255),
            _ => Pixel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_weights_green_heaviest() {
        let green = Pixel::new(0, 255, 0, 255);
        let red = Pixel::new(255, 0, 0, 255);
        let blue = Pixel::new(0, 0, 255, 255);
        assert!(green.luminance() > red.luminance());
        assert!(red.luminance() > blue.luminance());
    }

    #[test]
    fn gray_of_white_and_black() {
        assert_eq!(Pixel::new(255, 255, 255, 255).gray(), 255);
        assert_eq!(Pixel::new(0, 0, 0, 0).gray(), 0);
    }

    #[test]
    fn from_bytes_reads_rgba() {
        let bytes = [10u8, 20, 30, 40, 99];
        assert_eq!(Pixel::from(&bytes[..]), Pixel::new(10, 20, 30, 40));
    }
}
