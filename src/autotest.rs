//! Autotest side channel
//!
//! When `diagnostics.autotest` is on, every successful readback publishes
//! what it saw here so an external harness can check that frames actually
//! made it through. A frame counts as observed only when every pixel in the
//! read region is identical; otherwise the color is `None`.

use crate::handle::{ConnectionId, DrawableId};
use parking_lot::Mutex;

/// Which eye a readback came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

/// Last published observation for one eye
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutotestReport {
    /// `r | g << 8 | b << 16` of a uniform frame
    pub color: Option<u32>,
    /// Left-eye readbacks seen by the publishing surface so far
    pub frame: u64,
    pub connection: ConnectionId,
    pub drawable: DrawableId,
}

#[derive(Debug, Default)]
pub struct AutotestSlots {
    left: Mutex<AutotestReport>,
    right: Mutex<AutotestReport>,
}

impl AutotestSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, eye: Eye, report: AutotestReport) {
        let slot = match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        };
        *slot.lock() = report;
    }

    pub fn left(&self) -> AutotestReport {
        *self.left.lock()
    }

    pub fn right(&self) -> AutotestReport {
        *self.right.lock()
    }
}

/// Pack an RGB triple the way the harness expects it
pub fn pack_color(rgb: [u8; 3]) -> u32 {
    rgb[0] as u32 | (rgb[1] as u32) << 8 | (rgb[2] as u32) << 16
}

/// True when every `pixel_size`-byte pixel in the region equals the first
/// one. Bytes between `width * pixel_size` and `pitch` are ignored.
pub fn is_uniform(pixels: &[u8], width: usize, height: usize, pitch: usize, pixel_size: usize) -> bool {
    if width == 0 || height == 0 || pixel_size == 0 {
        return false;
    }
    let Some(first) = pixels.get(..pixel_size) else {
        return false;
    };
    (0..height).all(|row| {
        let start = row * pitch;
        pixels
            .get(start..start + width * pixel_size)
            .map(|line| line.chunks_exact(pixel_size).all(|px| px == first))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_independent() {
        let slots = AutotestSlots::new();
        slots.publish(
            Eye::Right,
            AutotestReport {
                color: Some(0xff),
                frame: 3,
                connection: ConnectionId(1),
                drawable: DrawableId(2),
            },
        );
        assert_eq!(slots.left(), AutotestReport::default());
        assert_eq!(slots.right().color, Some(0xff));
    }

    #[test]
    fn color_packing_is_little_endian_rgb() {
        assert_eq!(pack_color([0x11, 0x22, 0x33]), 0x33_22_11);
    }

    #[test]
    fn uniformity_ignores_row_padding() {
        // 2x2 RGB with one padding byte per row
        let pixels = [1, 2, 3, 1, 2, 3, 0xEE, 1, 2, 3, 1, 2, 3];
        assert!(is_uniform(&pixels, 2, 2, 7, 3));

        let mut odd = pixels;
        odd[10] = 9;
        assert!(!is_uniform(&odd, 2, 2, 7, 3));
        assert!(!is_uniform(&[], 0, 0, 0, 3));
    }
}
