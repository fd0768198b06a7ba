use bincode::{Decode, Encode};
use ppu_common::num::GetBit;
use std::array;

// Wide enough for either display
pub const MAX_SCREEN_WIDTH: usize = 256;

/// BGR555 color with bit 15 used as the opaque flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct Pixel(u16);

impl Pixel {
    pub const TRANSPARENT: Self = Self(0);

    pub fn transparent(self) -> bool {
        !self.0.bit(15)
    }

    pub fn red(self) -> u16 {
        self.0 & 0x1F
    }

    pub fn green(self) -> u16 {
        (self.0 >> 5) & 0x1F
    }

    pub fn blue(self) -> u16 {
        (self.0 >> 10) & 0x1F
    }

    pub fn color(self) -> u16 {
        self.0 & 0x7FFF
    }

    pub fn new_opaque(color: u16) -> Self {
        Self(color | 0x8000)
    }

    pub fn new_opaque_rgb(r: u16, g: u16, b: u16) -> Self {
        Self(0x8000 | r | (g << 5) | (b << 10))
    }

    pub fn new_transparent(color: u16) -> Self {
        Self(color & 0x7FFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ObjPixel {
    pub color: Pixel,
    pub priority: u8,
    pub semi_transparent: bool,
}

impl ObjPixel {
    pub const EMPTY: Self =
        Self { color: Pixel::TRANSPARENT, priority: u8::MAX, semi_transparent: false };
}

/// Per-column layer visibility: bits 0-3 BG0-3, bit 4 OBJ, bit 5 color effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct WindowMask(u8);

impl WindowMask {
    pub const ALL: Self = Self(0x3F);
    pub const NONE: Self = Self(0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x3F)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn bg(self, bg: usize) -> bool {
        self.0.bit(bg as u8)
    }

    pub fn obj(self) -> bool {
        self.0.bit(4)
    }

    pub fn effects(self) -> bool {
        self.0.bit(5)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Buffers {
    pub bg_pixels: [[Pixel; MAX_SCREEN_WIDTH]; 4],
    // Sprites are rendered one line ahead, so these hold the line after the one being drawn
    pub obj_pixels: [ObjPixel; MAX_SCREEN_WIDTH],
    pub obj_window: [bool; MAX_SCREEN_WIDTH],
    pub window_mask: [WindowMask; MAX_SCREEN_WIDTH],
    pub line_3d: [u16; MAX_SCREEN_WIDTH],
}

impl Buffers {
    pub fn new() -> Self {
        Self {
            bg_pixels: array::from_fn(|_| [Pixel::TRANSPARENT; MAX_SCREEN_WIDTH]),
            obj_pixels: [ObjPixel::EMPTY; MAX_SCREEN_WIDTH],
            obj_window: [false; MAX_SCREEN_WIDTH],
            window_mask: [WindowMask::ALL; MAX_SCREEN_WIDTH],
            line_3d: [0; MAX_SCREEN_WIDTH],
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct FrameBuffer(Box<[u16]>);

impl FrameBuffer {
    pub fn new(len: usize) -> Self {
        Self(vec![0; len].into_boxed_slice())
    }

    pub fn line_mut(&mut self, line: u32, width: u32) -> &mut [u16] {
        let start = (line * width) as usize;
        &mut self.0[start..start + width as usize]
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}
