//! Background layer renderers: text, affine, extended affine, bitmap, and 3D passthrough

use crate::ppu::buffers::Pixel;
use crate::ppu::engine::{BgAffineLatch, Engine};
use crate::ppu::registers::{
    AffineOverflowBehavior, BgKind, BitmapFormat, BitmapLayout, BitsPerPixel, Registers,
};
use crate::ppu::texels;
use crate::ppu::vram::EngineVram;
use ppu_common::num::GetBit;

// Sampling state shared by every BG on a line; cheap to copy into sampler closures
#[derive(Clone, Copy)]
struct BgContext<'a> {
    registers: &'a Registers,
    // BG half of palette RAM
    palette: &'a [u16],
    vram: EngineVram<'a>,
    line: u32,
}

impl BgContext<'_> {
    fn palette_pixel(self, color_id: u16) -> Pixel {
        Pixel::new_opaque(self.palette.get(usize::from(color_id)).copied().unwrap_or(0))
    }
}

impl Engine {
    pub(super) fn render_bg_layers(&mut self, line: u32, vram: EngineVram<'_>, has_3d: bool) {
        let width = self.variant.screen_width as usize;
        let ctx = BgContext {
            registers: &self.registers,
            palette: &self.palette_ram[..256],
            vram,
            line,
        };

        for bg in 0..4 {
            let out = &mut self.buffers.bg_pixels[bg][..width];
            out.fill(Pixel::TRANSPARENT);

            if !self.registers.bg_enabled[bg] {
                continue;
            }

            match self.registers.bg_kind(bg) {
                BgKind::Disabled => {}
                BgKind::Text => render_text_bg(ctx, bg, out),
                BgKind::Affine => {
                    let sampler = affine_tile_map_sampler(ctx, bg);
                    render_affine_bg(ctx, bg, &self.affine_latch, out, sampler);
                }
                BgKind::ExtendedAffine => {
                    let sampler = extended_affine_tile_map_sampler(ctx, bg);
                    render_affine_bg(ctx, bg, &self.affine_latch, out, sampler);
                }
                BgKind::Bitmap(layout) => {
                    let sampler = bitmap_sampler(ctx, layout);
                    render_affine_bg(ctx, bg, &self.affine_latch, out, sampler);
                }
                BgKind::ThreeD => {
                    if has_3d {
                        for (pixel, &color) in out.iter_mut().zip(&self.buffers.line_3d) {
                            if color.bit(15) {
                                *pixel = Pixel::new_opaque(color);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn mosaic_line(line: u32, v_size: u8) -> u32 {
    line - line % (u32::from(v_size) + 1)
}

// Each mosaic block repeats the first pixel sampled in it
fn apply_horizontal_mosaic(out: &mut [Pixel], h_size: u8) {
    if h_size == 0 {
        return;
    }

    for block in out.chunks_mut(usize::from(h_size) + 1) {
        let held = block[0];
        block.fill(held);
    }
}

fn render_text_bg(ctx: BgContext<'_>, bg: usize, out: &mut [Pixel]) {
    let registers = ctx.registers;
    let bg_control = &registers.bg_control[bg];

    let width_tiles = bg_control.size.text_width_tiles();
    let width_screens = width_tiles / 32;
    let height_tiles = bg_control.size.text_height_tiles();

    let h_scroll = registers.bg_h_scroll[bg];
    let fine_h_scroll = h_scroll % 8;
    let coarse_h_scroll = h_scroll / 8;

    let line = if bg_control.mosaic {
        mosaic_line(ctx.line, registers.bg_mosaic_v_size)
    } else {
        ctx.line
    };
    let scrolled_line = line + registers.bg_v_scroll[bg];
    let (tile_map_row, screen_map_row) = {
        let tile_map_row = (scrolled_line / 8) & (height_tiles - 1);
        let screen_map_row = tile_map_row / 32;
        (tile_map_row % 32, screen_map_row)
    };
    let tile_row = scrolled_line % 8;

    let tile_map_base_addr = registers.bg_tile_map_addr(bg);
    let tile_data_base_addr = registers.bg_tile_data_addr(bg);
    let tile_size_bytes = bg_control.bpp.tile_size_bytes();

    let width = out.len() as u32;
    let end_tile = if fine_h_scroll != 0 { width / 8 + 1 } else { width / 8 };

    for tile_idx in 0..end_tile {
        let base_pixel = (8 * tile_idx) as i32 - fine_h_scroll as i32;

        let (tile_map_col, screen_map_col) = {
            let tile_map_col = (tile_idx + coarse_h_scroll) & (width_tiles - 1);
            let screen_map_col = tile_map_col / 32;
            (tile_map_col % 32, screen_map_col)
        };

        let screen_idx = screen_map_row * width_screens + screen_map_col;
        let screen_addr = tile_map_base_addr + screen_idx * 2 * 32 * 32;

        let tile_map_addr = screen_addr + 2 * (tile_map_row * 32 + tile_map_col);
        let tile_map_entry = ctx.vram.bg.halfword(tile_map_addr);

        let tile_number: u32 = (tile_map_entry & 0x3FF).into();
        let h_flip = tile_map_entry.bit(10);
        let v_flip = tile_map_entry.bit(11);

        let tile_base_addr = tile_data_base_addr + tile_number * tile_size_bytes;
        let tile_row = if v_flip { 7 - tile_row } else { tile_row };

        let (color_ids, palette) = match bg_control.bpp {
            BitsPerPixel::Four => {
                let row = ctx.vram.bg.bytes(tile_base_addr + 4 * tile_row);
                (texels::decode_4bpp(row, h_flip), tile_map_entry >> 12)
            }
            BitsPerPixel::Eight => {
                let row = ctx.vram.bg.bytes(tile_base_addr + 8 * tile_row);
                (texels::decode_8bpp(row, h_flip), 0)
            }
        };

        for (pixel_idx, color_id) in color_ids.into_iter().enumerate() {
            let pixel = base_pixel + pixel_idx as i32;
            if color_id == 0 || !(0..width as i32).contains(&pixel) {
                continue;
            }

            out[pixel as usize] = ctx.palette_pixel(16 * palette + u16::from(color_id));
        }
    }

    if bg_control.mosaic {
        apply_horizontal_mosaic(out, registers.bg_mosaic_h_size);
    }
}

fn render_affine_bg(
    ctx: BgContext<'_>,
    bg: usize,
    latch: &BgAffineLatch,
    out: &mut [Pixel],
    sample_fn: impl Fn(i32, i32) -> Pixel,
) {
    debug_assert!(bg == 2 || bg == 3, "affine BG index {bg}");

    let registers = ctx.registers;
    let bg_control = &registers.bg_control[bg];
    let params = &registers.bg_affine_parameters[bg - 2];

    let mut x = latch.x[bg - 2];
    let mut y = latch.y[bg - 2];

    if bg_control.mosaic {
        // Step the latch back to the first line of the mosaic block
        let lines_into_block = (ctx.line % (u32::from(registers.bg_mosaic_v_size) + 1)) as i32;
        x -= params.b * lines_into_block;
        y -= params.d * lines_into_block;
    }

    for pixel in out.iter_mut() {
        // Affine coordinates are in 1/256 pixel units - convert to pixel
        *pixel = sample_fn(x >> 8, y >> 8);

        x += params.a;
        y += params.c;
    }

    if bg_control.mosaic {
        apply_horizontal_mosaic(out, registers.bg_mosaic_h_size);
    }
}

// Applies the overflow behavior; None if the coordinate is outside and the BG does not wrap
fn affine_coordinates(
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    overflow: AffineOverflowBehavior,
) -> Option<(u32, u32)> {
    if (0..width).contains(&x) && (0..height).contains(&y) {
        return Some((x as u32, y as u32));
    }

    match overflow {
        AffineOverflowBehavior::Transparent => None,
        AffineOverflowBehavior::Wrap => Some(((x & (width - 1)) as u32, (y & (height - 1)) as u32)),
    }
}

fn affine_tile_map_sampler(ctx: BgContext<'_>, bg: usize) -> impl Fn(i32, i32) -> Pixel + '_ {
    let bg_control = &ctx.registers.bg_control[bg];

    let dimension_tiles = bg_control.size.affine_dimension_tiles();
    let dimension_pixels = (8 * dimension_tiles) as i32;

    let base_tile_map_addr = ctx.registers.bg_tile_map_addr(bg);
    let base_tile_data_addr = ctx.registers.bg_tile_data_addr(bg);
    let affine_overflow = bg_control.affine_overflow;

    move |x, y| {
        let Some((x, y)) =
            affine_coordinates(x, y, dimension_pixels, dimension_pixels, affine_overflow)
        else {
            return Pixel::TRANSPARENT;
        };

        let tile_map_addr = base_tile_map_addr + (y / 8) * dimension_tiles + x / 8;
        let tile_number: u32 = ctx.vram.bg.byte(tile_map_addr).into();

        // Affine tiles are always 8bpp
        let tile_addr = base_tile_data_addr + 64 * tile_number + 8 * (y % 8) + x % 8;
        let color_id = ctx.vram.bg.byte(tile_addr);

        if color_id == 0 {
            return Pixel::TRANSPARENT;
        }

        ctx.palette_pixel(color_id.into())
    }
}

// NDS extended affine: 16-bit map entries with flip bits, same layout as text BG entries
fn extended_affine_tile_map_sampler(
    ctx: BgContext<'_>,
    bg: usize,
) -> impl Fn(i32, i32) -> Pixel + '_ {
    let bg_control = &ctx.registers.bg_control[bg];

    let dimension_tiles = bg_control.size.affine_dimension_tiles();
    let dimension_pixels = (8 * dimension_tiles) as i32;

    let base_tile_map_addr = ctx.registers.bg_tile_map_addr(bg);
    let base_tile_data_addr = ctx.registers.bg_tile_data_addr(bg);
    let affine_overflow = bg_control.affine_overflow;

    move |x, y| {
        let Some((x, y)) =
            affine_coordinates(x, y, dimension_pixels, dimension_pixels, affine_overflow)
        else {
            return Pixel::TRANSPARENT;
        };

        let tile_map_addr = base_tile_map_addr + 2 * ((y / 8) * dimension_tiles + x / 8);
        let tile_map_entry = ctx.vram.bg.halfword(tile_map_addr);

        let tile_number: u32 = (tile_map_entry & 0x3FF).into();
        let tile_col = if tile_map_entry.bit(10) { 7 - x % 8 } else { x % 8 };
        let tile_row = if tile_map_entry.bit(11) { 7 - y % 8 } else { y % 8 };

        let tile_addr = base_tile_data_addr + 64 * tile_number + 8 * tile_row + tile_col;
        let color_id = ctx.vram.bg.byte(tile_addr);

        if color_id == 0 {
            return Pixel::TRANSPARENT;
        }

        ctx.palette_pixel(color_id.into())
    }
}

fn bitmap_sampler(ctx: BgContext<'_>, layout: BitmapLayout) -> impl Fn(i32, i32) -> Pixel + '_ {
    let width = layout.width as i32;
    let height = layout.height as i32;
    let overflow = if layout.wrap {
        AffineOverflowBehavior::Wrap
    } else {
        AffineOverflowBehavior::Transparent
    };

    move |x, y| {
        let Some((x, y)) = affine_coordinates(x, y, width, height, overflow) else {
            return Pixel::TRANSPARENT;
        };

        let pixel_idx = y * layout.width + x;

        match layout.format {
            BitmapFormat::Indexed => {
                let color_id = ctx.vram.bitmap.byte(layout.base_addr + pixel_idx);
                if color_id == 0 {
                    return Pixel::TRANSPARENT;
                }
                ctx.palette_pixel(color_id.into())
            }
            BitmapFormat::Direct { alpha_bit } => {
                let color = ctx.vram.bitmap.halfword(layout.base_addr + 2 * pixel_idx);
                if alpha_bit && !color.bit(15) {
                    return Pixel::TRANSPARENT;
                }
                Pixel::new_opaque(color)
            }
        }
    }
}
