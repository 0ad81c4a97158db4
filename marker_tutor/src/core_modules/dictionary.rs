// THEORY:
// A `MarkerDictionary` is the list of bit patterns the detector accepts. Pattern
// `i` encodes marker id `i`. Codes are stored as integers, most significant bit
// first in row-major order, with a 1 meaning a white cell.
//
// Key architectural principles:
// 1.  **Unambiguous by construction**: a dictionary is only accepted when every pair
//     of codes, under every rotation, is more than twice the correction budget
//     apart. The same holds for each code against its own rotations. One observed
//     pattern can then never decode to two ids or two orientations.
// 2.  **Orientation-free lookup**: `identify` compares a pattern in one fixed
//     orientation. The detector tries the four corner rolls and keeps the best.

use crate::core_modules::observation::MarkerId;
use crate::error::ConfigError;
use image::{GrayImage, Luma};
use serde::Deserialize;

/// Six 6x6 codes with a minimum rotational Hamming distance of 14.
pub const DEFAULT_CODES: [u64; 6] = [
    0xa2b790602,
    0xcb2122b13,
    0xe54f1b974,
    0x934f81895,
    0x1afc3434b,
    0xf1915ec28,
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DictionarySettings {
    /// Side of the inner bit grid (without the black border ring).
    pub marker_bits: u32,
    pub codes: Vec<u64>,
    /// Largest Hamming distance still accepted as a match.
    pub max_correction: u32,
}

impl Default for DictionarySettings {
    fn default() -> Self {
        Self {
            marker_bits: 6,
            codes: DEFAULT_CODES.to_vec(),
            max_correction: 3,
        }
    }
}

/// A successful lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub id: MarkerId,
    pub hamming: u32,
}

#[derive(Debug, Clone)]
pub struct MarkerDictionary {
    bits: u32,
    codes: Vec<u64>,
    max_correction: u32,
}

/// Rotates an `n x n` code by 90 degrees clockwise.
pub fn rotate(code: u64, n: u32) -> u64 {
    let mut out = 0;
    for r in 0..n {
        for c in 0..n {
            if bit_at(code, n, n - 1 - c, r) {
                out |= 1 << bit_index(n, r, c);
            }
        }
    }
    out
}

fn bit_index(n: u32, row: u32, col: u32) -> u32 {
    n * n - 1 - (row * n + col)
}

/// Reads the cell at (`row`, `col`); `true` means white.
pub fn bit_at(code: u64, n: u32, row: u32, col: u32) -> bool {
    (code >> bit_index(n, row, col)) & 1 == 1
}

/// Converts one marker row of an OpenCV/ArUco byte table (first orientation) into
/// a code. Bytes hold the cells row-major, most significant bit first; the last
/// byte carries the remaining `n * n % 8` cells in its low bits.
pub fn code_from_bytes(bytes: &[u8], n: u32) -> u64 {
    let mut remaining = n * n;
    let mut code = 0u64;
    for byte in bytes {
        if remaining == 0 {
            break;
        }
        let width = remaining.min(8);
        code = (code << width) | u64::from(*byte & (0xffu16 >> (8 - width)) as u8);
        remaining -= width;
    }
    code
}

/// Packs a row-major grid of cells (`true` = white) into a code.
pub fn pack(cells: &[bool], n: u32) -> u64 {
    cells
        .iter()
        .take((n * n) as usize)
        .fold(0, |code, white| (code << 1) | u64::from(*white))
}

impl MarkerDictionary {
    pub fn new(settings: &DictionarySettings) -> Result<Self, ConfigError> {
        let n = settings.marker_bits;
        if !(3..=8).contains(&n) {
            return Err(ConfigError::InvalidDictionary(format!(
                "marker_bits must be between 3 and 8, got {n}"
            )));
        }
        if settings.codes.is_empty() {
            return Err(ConfigError::InvalidDictionary("no codes".to_string()));
        }
        let cells = n * n;
        for (id, code) in settings.codes.iter().enumerate() {
            if cells < 64 && *code >> cells != 0 {
                return Err(ConfigError::InvalidDictionary(format!(
                    "code {id} does not fit a {n}x{n} grid"
                )));
            }
        }

        // --- Ambiguity check ---
        let limit = 2 * settings.max_correction;
        for (i, a) in settings.codes.iter().enumerate() {
            let mut rotated = *a;
            for turn in 0..4 {
                if turn > 0 && (rotated ^ a).count_ones() <= limit {
                    return Err(ConfigError::InvalidDictionary(format!(
                        "code {i} is too close to its own rotation"
                    )));
                }
                for (j, b) in settings.codes.iter().enumerate().skip(i + 1) {
                    if (rotated ^ b).count_ones() <= limit {
                        return Err(ConfigError::InvalidDictionary(format!(
                            "codes {i} and {j} are within {limit} bits of each other"
                        )));
                    }
                }
                rotated = rotate(rotated, n);
            }
        }

        Ok(Self {
            bits: n,
            codes: settings.codes.clone(),
            max_correction: settings.max_correction,
        })
    }

    pub fn marker_bits(&self) -> u32 {
        self.bits
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn code(&self, id: MarkerId) -> Option<u64> {
        self.codes.get(id as usize).copied()
    }

    /// Finds the closest code in this exact orientation. Ties go to the lowest id.
    pub fn identify(&self, observed: u64) -> Option<Match> {
        self.codes
            .iter()
            .enumerate()
            .map(|(id, code)| Match {
                id: id as MarkerId,
                hamming: (code ^ observed).count_ones(),
            })
            .min_by_key(|candidate| (candidate.hamming, candidate.id))
            .filter(|best| best.hamming <= self.max_correction)
    }

    /// Renders a printable marker: a one-cell white quiet zone, the black border
    /// ring, then the bit grid.
    pub fn render(&self, id: MarkerId, cell_px: u32) -> Option<GrayImage> {
        let code = self.code(id)?;
        let cell_px = cell_px.max(1);
        let n = self.bits;
        let side = (n + 4) * cell_px;
        Some(GrayImage::from_fn(side, side, |x, y| {
            let (cx, cy) = (x / cell_px, y / cell_px);
            let white = if cx == 0 || cy == 0 || cx == n + 3 || cy == n + 3 {
                true
            } else if cx == 1 || cy == 1 || cx == n + 2 || cy == n + 2 {
                false
            } else {
                bit_at(code, n, cy - 2, cx - 2)
            };
            Luma([if white { 255 } else { 0 }])
        }))
    }
}
