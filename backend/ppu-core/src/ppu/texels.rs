//! Tile row decode: one packed row of 4bpp or 8bpp texels into one color index per pixel
//!
//! The default decoder unpacks all 8 lanes of a row at once inside a `u64`. The `scalar-texels`
//! feature switches to a per-pixel loop, which is handy for checking the packed version.

#[cfg(not(feature = "scalar-texels"))]
pub use swar::{decode_4bpp, decode_8bpp};

#[cfg(feature = "scalar-texels")]
pub use scalar::{decode_4bpp, decode_8bpp};

#[cfg_attr(feature = "scalar-texels", allow(dead_code))]
mod swar {
    #[inline]
    pub fn decode_4bpp(row: [u8; 4], h_flip: bool) -> [u8; 8] {
        let mut lanes = u64::from(u32::from_le_bytes(row));

        // Spread byte i of the row into the low byte of 16-bit lane i
        lanes = (lanes | (lanes << 16)) & 0x0000_FFFF_0000_FFFF;
        lanes = (lanes | (lanes << 8)) & 0x00FF_00FF_00FF_00FF;

        // Low nibble is the left pixel, high nibble the right pixel
        lanes = (lanes & 0x000F_000F_000F_000F) | ((lanes & 0x00F0_00F0_00F0_00F0) << 4);

        if h_flip {
            lanes = lanes.swap_bytes();
        }

        lanes.to_le_bytes()
    }

    #[inline]
    pub fn decode_8bpp(row: [u8; 8], h_flip: bool) -> [u8; 8] {
        let lanes = u64::from_le_bytes(row);
        if h_flip { lanes.swap_bytes().to_le_bytes() } else { row }
    }
}

#[cfg_attr(not(feature = "scalar-texels"), allow(dead_code))]
mod scalar {
    use std::array;

    pub fn decode_4bpp(row: [u8; 4], h_flip: bool) -> [u8; 8] {
        let mut pixels = array::from_fn(|i| (row[i >> 1] >> (4 * (i & 1))) & 0xF);
        if h_flip {
            pixels.reverse();
        }
        pixels
    }

    pub fn decode_8bpp(mut row: [u8; 8], h_flip: bool) -> [u8; 8] {
        if h_flip {
            row.reverse();
        }
        row
    }
}
