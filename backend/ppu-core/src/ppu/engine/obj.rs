//! Sprite (OBJ) renderer, evaluated one line ahead of the line being drawn

use crate::ppu::buffers::{ObjPixel, Pixel};
use crate::ppu::engine::Engine;
use crate::ppu::registers::{BitsPerPixel, ObjTileMapping};
use crate::ppu::vram::{EngineVram, VramView};
use ppu_common::num::GetBit;

// Cycles available per line for OBJ rendering on the GBA
const OBJ_CYCLES_PER_LINE: u32 = 1210;
const OBJ_CYCLES_PER_LINE_HBLANK_FREE: u32 = 954;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpriteMode {
    Normal,
    SemiTransparent,
    ObjWindow,
    // GBA: prohibited; NDS: bitmap OBJ (not supported)
    Invalid,
}

impl SpriteMode {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Normal,
            1 => Self::SemiTransparent,
            2 => Self::ObjWindow,
            3 => Self::Invalid,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpriteSize {
    Zero,
    One,
    Two,
    Three,
}

impl SpriteSize {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpriteShape {
    Square,
    HorizontalRect,
    VerticalRect,
    Invalid,
}

impl SpriteShape {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Square,
            1 => Self::HorizontalRect,
            2 => Self::VerticalRect,
            3 => Self::Invalid,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    fn size_pixels(self, size: SpriteSize) -> Option<(u32, u32)> {
        use SpriteShape::{HorizontalRect, Invalid, Square, VerticalRect};
        use SpriteSize::{One, Three, Two, Zero};

        let dimensions = match (self, size) {
            (Square, Zero) => (8, 8),
            (Square, One) => (16, 16),
            (Square, Two) => (32, 32),
            (Square, Three) => (64, 64),
            (HorizontalRect, Zero) => (16, 8),
            (HorizontalRect, One) => (32, 8),
            (HorizontalRect, Two) => (32, 16),
            (HorizontalRect, Three) => (64, 32),
            (VerticalRect, Zero) => (8, 16),
            (VerticalRect, One) => (8, 32),
            (VerticalRect, Two) => (16, 32),
            (VerticalRect, Three) => (32, 64),
            (Invalid, _) => return None,
        };

        Some(dimensions)
    }
}

#[derive(Debug, Clone)]
struct OamEntry {
    x: u32,
    y: u32,
    tile_number: u32,
    affine: bool,
    affine_double_size: bool,
    affine_parameter_group: usize,
    disabled: bool,
    mode: SpriteMode,
    mosaic: bool,
    bpp: BitsPerPixel,
    shape: SpriteShape,
    size: SpriteSize,
    h_flip: bool,
    v_flip: bool,
    priority: u8,
    palette: u16,
}

impl OamEntry {
    fn parse(attributes: [u16; 3]) -> Self {
        let affine = attributes[0].bit(8);

        Self {
            x: (attributes[1] & 0x1FF).into(),
            y: (attributes[0] & 0xFF).into(),
            tile_number: (attributes[2] & 0x3FF).into(),
            affine,
            affine_double_size: affine && attributes[0].bit(9),
            affine_parameter_group: ((attributes[1] >> 9) & 0x1F).into(),
            disabled: !affine && attributes[0].bit(9),
            mode: SpriteMode::from_bits(attributes[0] >> 10),
            mosaic: attributes[0].bit(12),
            bpp: BitsPerPixel::from_bit(attributes[0].bit(13)),
            shape: SpriteShape::from_bits(attributes[0] >> 14),
            size: SpriteSize::from_bits(attributes[1] >> 14),
            h_flip: !affine && attributes[1].bit(12),
            v_flip: !affine && attributes[1].bit(13),
            priority: ((attributes[2] >> 10) & 3) as u8,
            palette: attributes[2] >> 12,
        }
    }
}

// Remaining OBJ render cycles on the current line; None if the console has no limit
struct ObjCycleBudget(Option<u32>);

impl ObjCycleBudget {
    fn consume(&mut self, cycles: u32) -> bool {
        match &mut self.0 {
            Some(remaining) if *remaining < cycles => false,
            Some(remaining) => {
                *remaining -= cycles;
                true
            }
            None => true,
        }
    }
}

// Where a sprite's tiles live and how to find a texel in them
#[derive(Debug, Clone, Copy)]
struct SpriteTileLayout {
    tile_number: u32,
    bpp: BitsPerPixel,
    width_tiles: u32,
    mapping: ObjTileMapping,
    // NDS 1D mapping: tile numbers are in units of (32 << boundary) bytes
    boundary_shift: Option<u8>,
    // GBA bitmap modes: OBJ tiles 0-511 overlap the frame buffers
    skip_low_tiles: bool,
}

impl SpriteTileLayout {
    fn color_id(self, obj_vram: VramView<'_>, col: u32, row: u32) -> u8 {
        let tile_row = row / 8;
        let tile_col = col / 8;
        let row_in_tile = row % 8;
        let col_in_tile = col % 8;

        let tile_base_addr = match (self.mapping, self.boundary_shift) {
            (ObjTileMapping::OneD, Some(boundary_shift)) => {
                let sprite_base_addr = self.tile_number << boundary_shift;
                let tile_idx = tile_row * self.width_tiles + tile_col;
                sprite_base_addr + tile_idx * self.bpp.tile_size_bytes()
            }
            _ => {
                let map_step = match self.bpp {
                    BitsPerPixel::Four => 1,
                    BitsPerPixel::Eight => 2,
                };
                let map_row_width = match self.mapping {
                    ObjTileMapping::TwoD => 32,
                    ObjTileMapping::OneD => map_step * self.width_tiles,
                };

                let tile_number =
                    (self.tile_number + tile_row * map_row_width + tile_col * map_step) & 0x3FF;
                if self.skip_low_tiles && tile_number < 512 {
                    // Fully transparent
                    return 0;
                }

                tile_number * 32
            }
        };

        match self.bpp {
            BitsPerPixel::Four => {
                let tile_addr = tile_base_addr + 4 * row_in_tile + (col_in_tile >> 1);
                let tile_byte = obj_vram.byte(tile_addr);
                (tile_byte >> (4 * (col_in_tile & 1))) & 0xF
            }
            BitsPerPixel::Eight => obj_vram.byte(tile_base_addr + 8 * row_in_tile + col_in_tile),
        }
    }
}

impl Engine {
    pub fn render_sprite_line(&mut self, target_line: u32, vram: EngineVram<'_>) {
        let width = self.variant.screen_width;

        self.buffers.obj_pixels.fill(ObjPixel::EMPTY);
        self.buffers.obj_window.fill(false);

        if self.registers.forced_blanking {
            return;
        }

        let mut budget = ObjCycleBudget(self.variant.obj_cycle_budget.then_some(
            if self.registers.oam_free_during_hblank {
                OBJ_CYCLES_PER_LINE_HBLANK_FREE
            } else {
                OBJ_CYCLES_PER_LINE
            },
        ));

        let skip_low_tiles = self.registers.is_gba_bitmap_mode();
        let boundary_shift =
            self.variant.extended_modes.then_some(5 + self.registers.obj_tile_boundary);

        'outer: for oam_idx in 0..128 {
            let oam_addr = 4 * oam_idx;
            let oam_attributes =
                [self.oam[oam_addr], self.oam[oam_addr + 1], self.oam[oam_addr + 2]];
            let oam_entry = OamEntry::parse(oam_attributes);

            if oam_entry.disabled || oam_entry.mode == SpriteMode::Invalid {
                continue;
            }

            let Some((sprite_width, sprite_height)) = oam_entry.shape.size_pixels(oam_entry.size)
            else {
                continue;
            };

            // Bounding box; double-size affine sprites get twice the area to rotate into
            let (bounds_width, bounds_height) = if oam_entry.affine_double_size {
                (2 * sprite_width, 2 * sprite_height)
            } else {
                (sprite_width, sprite_height)
            };

            let mut sprite_y = target_line.wrapping_sub(oam_entry.y) & 0xFF;
            if sprite_y >= bounds_height {
                // Sprite does not overlap this scanline
                continue;
            }

            if oam_entry.mosaic {
                sprite_y -= sprite_y % (u32::from(self.registers.obj_mosaic_v_size) + 1);
            }

            let layout = SpriteTileLayout {
                tile_number: oam_entry.tile_number,
                bpp: oam_entry.bpp,
                width_tiles: sprite_width / 8,
                mapping: self.registers.obj_tile_mapping,
                boundary_shift,
                skip_low_tiles,
            };

            let palette_base = match oam_entry.bpp {
                BitsPerPixel::Four => 0x100 | (16 * oam_entry.palette),
                BitsPerPixel::Eight => 0x100,
            };

            let affine_matrix = oam_entry.affine.then(|| {
                let group_addr = 16 * oam_entry.affine_parameter_group;
                [3, 7, 11, 15].map(|offset| i32::from(self.oam[group_addr + offset] as i16))
            });

            if affine_matrix.is_some() && !budget.consume(10) {
                break 'outer;
            }

            let mosaic_h_size = u32::from(self.registers.obj_mosaic_h_size) + 1;

            for bounds_x in 0..bounds_width {
                // Affine sprites take 2 cycles per pixel, normal sprites take 1
                if !budget.consume(if affine_matrix.is_some() { 2 } else { 1 }) {
                    break 'outer;
                }

                let pixel = (oam_entry.x + bounds_x) & 0x1FF;
                if pixel >= width {
                    continue;
                }

                let sample_x =
                    if oam_entry.mosaic { bounds_x - bounds_x % mosaic_h_size } else { bounds_x };

                let (sprite_col, sprite_row) = match affine_matrix {
                    Some([pa, pb, pc, pd]) => {
                        // Rotate around the center of the bounding box
                        let ix = sample_x as i32 - (bounds_width / 2) as i32;
                        let iy = sprite_y as i32 - (bounds_height / 2) as i32;

                        let tx = ((pa * ix + pb * iy) >> 8) + (sprite_width / 2) as i32;
                        let ty = ((pc * ix + pd * iy) >> 8) + (sprite_height / 2) as i32;
                        if !(0..sprite_width as i32).contains(&tx)
                            || !(0..sprite_height as i32).contains(&ty)
                        {
                            continue;
                        }

                        (tx as u32, ty as u32)
                    }
                    None => {
                        let col =
                            if oam_entry.h_flip { sprite_width - 1 - sample_x } else { sample_x };
                        let row =
                            if oam_entry.v_flip { sprite_height - 1 - sprite_y } else { sprite_y };
                        (col, row)
                    }
                };

                let color_id = layout.color_id(vram.obj, sprite_col, sprite_row);
                let pixel = pixel as usize;

                if oam_entry.mode == SpriteMode::ObjWindow {
                    // OBJ window sprites are never displayed, they only define the window area
                    if color_id != 0 {
                        self.buffers.obj_window[pixel] = true;
                    }
                    continue;
                }

                let existing = &mut self.buffers.obj_pixels[pixel];
                let existing_opaque = !existing.color.transparent();

                if existing_opaque && oam_entry.priority >= existing.priority {
                    // Existing opaque pixel with the same or lower priority
                    continue;
                }

                if color_id == 0 && !existing_opaque {
                    // Both new pixel and existing pixel are transparent
                    continue;
                }

                // Hardware bug: A transparent pixel that overlaps with an opaque pixel from a
                // sprite with lower OAM index and higher priority will overwrite the priority and
                // semi-transparency flags
                existing.priority = oam_entry.priority;
                existing.semi_transparent = oam_entry.mode == SpriteMode::SemiTransparent;

                if color_id == 0 {
                    continue;
                }

                let palette_addr = usize::from(palette_base + u16::from(color_id));
                existing.color = Pixel::new_opaque(self.palette_ram[palette_addr]);
            }
        }
    }
}
