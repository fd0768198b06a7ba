//! One 2D engine and the display it drives: registers, palette, OAM, and line/frame buffers

mod bg;
mod compositor;
mod obj;

use crate::ppu::VariantConfig;
use crate::ppu::buffers::{Buffers, FrameBuffer, MAX_SCREEN_WIDTH};
use crate::ppu::registers::{DisplayMode, Registers};
use crate::ppu::vram::EngineVram;
use bincode::{Decode, Encode};
use ppu_common::boxedarray::BoxedWordArray;
use std::{iter, mem};

// 256 BG colors followed by 256 OBJ colors
pub const PALETTE_RAM_LEN_HALFWORDS: usize = 1024 / 2;

pub const OAM_LEN_HALFWORDS: usize = 1024 / 2;

const WHITE: u16 = 0x7FFF;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub(super) struct BgAffineLatch {
    pub x: [i32; 2],
    pub y: [i32; 2],
}

impl BgAffineLatch {
    // Called once per frame during VBlank
    fn latch_reference_points(&mut self, registers: &Registers) {
        self.x = registers.bg_affine_parameters.map(|params| params.reference_x);
        self.y = registers.bg_affine_parameters.map(|params| params.reference_y);
    }

    // Called once per line during active display
    fn increment_reference_latches(&mut self, registers: &Registers) {
        for (i, (x, y)) in iter::zip(&mut self.x, &mut self.y).enumerate() {
            *x += registers.bg_affine_parameters[i].b;
            *y += registers.bg_affine_parameters[i].d;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Engine {
    variant: VariantConfig,
    registers: Registers,
    affine_latch: BgAffineLatch,
    palette_ram: BoxedWordArray<PALETTE_RAM_LEN_HALFWORDS>,
    oam: BoxedWordArray<OAM_LEN_HALFWORDS>,
    buffers: Box<Buffers>,
    // BG indices sorted by (priority, index); only recomputed after DISPCNT/BGxCNT writes
    bg_order: [usize; 4],
    front_buffer: FrameBuffer,
    back_buffer: FrameBuffer,
}

impl Engine {
    pub fn new(variant: VariantConfig, main_engine: bool) -> Self {
        let frame_len = variant.frame_size().len();

        Self {
            variant,
            registers: Registers::new(variant.extended_modes, main_engine),
            affine_latch: BgAffineLatch::default(),
            palette_ram: BoxedWordArray::new(),
            oam: BoxedWordArray::new(),
            buffers: Box::new(Buffers::new()),
            bg_order: [0, 1, 2, 3],
            front_buffer: FrameBuffer::new(frame_len),
            back_buffer: FrameBuffer::new(frame_len),
        }
    }

    pub fn render_line(&mut self, line: u32, vram: EngineVram<'_>, has_3d: bool) {
        let width = self.variant.screen_width;

        if self.registers.forced_blanking {
            self.back_buffer.line_mut(line, width).fill(WHITE);
            return;
        }

        match self.registers.display_mode {
            DisplayMode::Off => {
                self.back_buffer.line_mut(line, width).fill(WHITE);
                return;
            }
            DisplayMode::Normal => {
                self.update_bg_order();
                self.render_window_mask(line);
                self.render_bg_layers(line, vram, has_3d);
                self.merge_layers(line);
            }
            DisplayMode::Vram => {
                // Raw 256x192 direct color image from the selected LCDC bank
                let bank_base = u32::from(self.registers.vram_display_block) * 0x20000;
                let line_addr = bank_base + 2 * line * width;
                for (pixel, out) in self.back_buffer.line_mut(line, width).iter_mut().enumerate() {
                    *out = vram.lcdc.halfword(line_addr + 2 * pixel as u32) & 0x7FFF;
                }
            }
            DisplayMode::MainMemory => {
                log::debug!("Main memory display mode is not supported; line {line} left blank");
                self.back_buffer.line_mut(line, width).fill(0);
            }
        }

        self.apply_master_brightness(line);
    }

    fn update_bg_order(&mut self) {
        if !self.registers.bg_order_dirty {
            return;
        }
        self.registers.bg_order_dirty = false;

        // Stable sort: equal priorities stay in BG index order
        let mut bg_order = [0, 1, 2, 3];
        bg_order.sort_by_key(|&bg| self.registers.bg_control[bg].priority);
        self.bg_order = bg_order;
    }

    /// Whether BG0 should be fed from the 3D renderer this line.
    pub fn wants_3d_line(&self) -> bool {
        self.registers.bg0_3d && self.registers.bg_enabled[0]
    }

    pub fn line_3d_mut(&mut self) -> &mut [u16] {
        &mut self.buffers.line_3d[..self.variant.screen_width as usize]
    }

    pub fn latch_reference_points(&mut self) {
        self.affine_latch.latch_reference_points(&self.registers);
    }

    pub fn increment_reference_latches(&mut self) {
        self.affine_latch.increment_reference_latches(&self.registers);
    }

    pub fn swap_buffers(&mut self) {
        mem::swap(&mut self.front_buffer, &mut self.back_buffer);
    }

    pub fn frame_buffer(&self) -> &[u16] {
        self.front_buffer.as_slice()
    }

    pub fn forced_blanking(&self) -> bool {
        self.registers.forced_blanking
    }

    pub fn oam_free_during_hblank(&self) -> bool {
        self.registers.oam_free_during_hblank
    }

    pub fn is_gba_bitmap_mode(&self) -> bool {
        self.registers.is_gba_bitmap_mode()
    }

    pub fn read_register(&self, offset: u32) -> Option<u8> {
        self.registers.read_byte(offset)
    }

    pub fn write_registers(&mut self, offset: u32, bytes: &[u8]) {
        self.registers.write(offset, bytes, &mut self.affine_latch);
    }

    pub fn read_palette_ram(&self, index: usize) -> u16 {
        self.palette_ram[index & (PALETTE_RAM_LEN_HALFWORDS - 1)]
    }

    pub fn write_palette_ram(&mut self, index: usize, value: u16) {
        self.palette_ram[index & (PALETTE_RAM_LEN_HALFWORDS - 1)] = value;
    }

    pub fn read_oam(&self, index: usize) -> u16 {
        self.oam[index & (OAM_LEN_HALFWORDS - 1)]
    }

    pub fn write_oam(&mut self, index: usize, value: u16) {
        self.oam[index & (OAM_LEN_HALFWORDS - 1)] = value;
    }
}

const _: () = assert!(MAX_SCREEN_WIDTH >= VariantConfig::NDS.screen_width as usize);
