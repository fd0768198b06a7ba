//! Scanline timing state machine and the memory-mapped facade over the 2D engines

mod buffers;
mod colors;
mod engine;
mod registers;
mod texels;
mod vram;

#[cfg(test)]
mod tests;

use crate::api::{PpuBus, PpuConfig, PpuInterrupt, RenderError};
use crate::ppu::engine::Engine;
use crate::ppu::registers::{DisplayStatus, REGISTER_SPACE_LEN};
use crate::ppu::vram::Vram;
use crate::scheduler::{SchedulerEvent, SchedulerInterface};
use bincode::{Decode, Encode};
use ppu_common::frontend::{Color, FrameSize, Renderer};
use ppu_common::num::GetBit;
use ppu_config::ConsoleVariant;
use std::array;

/// Per-console constants. The engine and renderers are shared; everything that differs between
/// the two consoles is read from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct VariantConfig {
    pub variant: ConsoleVariant,
    pub screen_width: u32,
    pub screen_height: u32,
    pub lines_per_frame: u32,
    pub cycles_per_line: u64,
    pub hblank_start_cycle: u64,
    // DISPSTAT VBlank flag is set on lines screen_height..vblank_flag_end
    pub vblank_flag_end: u32,
    pub nine_bit_v_counter: bool,
    pub engine_count: usize,
    pub bg0_3d: bool,
    pub extended_modes: bool,
    pub banked_vram: bool,
    pub obj_cycle_budget: bool,
}

impl VariantConfig {
    pub const GBA: Self = Self {
        variant: ConsoleVariant::Gba,
        screen_width: 240,
        screen_height: 160,
        lines_per_frame: 228,
        cycles_per_line: 1232,
        hblank_start_cycle: 1006,
        // VBlank flag is not set on the last line of the frame because of sprite processing for
        // line 0
        vblank_flag_end: 227,
        nine_bit_v_counter: false,
        engine_count: 1,
        bg0_3d: false,
        extended_modes: false,
        banked_vram: false,
        obj_cycle_budget: true,
    };

    pub const NDS: Self = Self {
        variant: ConsoleVariant::Nds,
        screen_width: 256,
        screen_height: 192,
        lines_per_frame: 263,
        cycles_per_line: 2130,
        hblank_start_cycle: 1536,
        vblank_flag_end: 262,
        nine_bit_v_counter: true,
        engine_count: 2,
        bg0_3d: true,
        extended_modes: true,
        banked_vram: true,
        obj_cycle_budget: false,
    };

    #[must_use]
    pub const fn for_variant(variant: ConsoleVariant) -> Self {
        match variant {
            ConsoleVariant::Gba => Self::GBA,
            ConsoleVariant::Nds => Self::NDS,
        }
    }

    #[must_use]
    pub const fn frame_size(self) -> FrameSize {
        FrameSize { width: self.screen_width, height: self.screen_height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum LineState {
    Drawing,
    HBlank,
    VBlank,
    VBlankHBlank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum DisplayId {
    /// Engine A (the only display on GBA)
    Main,
    /// Engine B
    Sub,
}

impl DisplayId {
    fn engine_idx(self) -> usize {
        match self {
            Self::Main => 0,
            Self::Sub => 1,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct State {
    line: u32,
    line_state: LineState,
    line_start_cycles: u64,
    frame_complete: bool,
    frame_count: u64,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Ppu {
    config: PpuConfig,
    variant: VariantConfig,
    engines: Vec<Engine>,
    vram: Vram,
    status: DisplayStatus,
    state: State,
}

impl Ppu {
    pub fn new(config: PpuConfig, scheduler: &mut impl SchedulerInterface) -> Self {
        let variant = VariantConfig::for_variant(config.variant);
        let engines = (0..variant.engine_count).map(|i| Engine::new(variant, i == 0)).collect();

        scheduler.schedule(SchedulerEvent::PpuLineState, variant.hblank_start_cycle);

        Self {
            config,
            variant,
            engines,
            vram: Vram::new(variant.banked_vram),
            status: DisplayStatus::default(),
            state: State {
                line: 0,
                line_state: LineState::Drawing,
                line_start_cycles: scheduler.cycles(),
                frame_complete: false,
                frame_count: 0,
            },
        }
    }

    #[must_use]
    pub fn config(&self) -> PpuConfig {
        self.config
    }

    #[must_use]
    pub fn variant(&self) -> VariantConfig {
        self.variant
    }

    /// Apply runtime-changeable settings. The console variant is fixed at construction.
    pub fn reload_config(&mut self, config: PpuConfig) {
        if config.variant != self.config.variant {
            log::warn!(
                "Ignoring console variant change from {} to {}; variant is fixed at construction",
                self.config.variant,
                config.variant
            );
        }

        self.config.color_correction = config.color_correction;
    }

    /// Handle a `SchedulerEvent::PpuLineState` event that fired `lateness` cycles late.
    pub fn handle_line_event(
        &mut self,
        lateness: u64,
        scheduler: &mut impl SchedulerInterface,
        bus: &mut impl PpuBus,
    ) {
        let delay = match self.state.line_state {
            LineState::Drawing | LineState::VBlank => {
                self.enter_hblank(bus);
                self.variant.cycles_per_line - self.variant.hblank_start_cycle
            }
            LineState::HBlank | LineState::VBlankHBlank => {
                self.end_line(bus);
                self.state.line_start_cycles = scheduler.cycles() - lateness;
                self.variant.hblank_start_cycle
            }
        };

        scheduler.schedule(SchedulerEvent::PpuLineState, delay.saturating_sub(lateness));
    }

    fn enter_hblank(&mut self, bus: &mut impl PpuBus) {
        let line = self.state.line;
        let visible = line < self.variant.screen_height;

        self.vram.refresh();

        if visible {
            for (i, engine) in self.engines.iter_mut().enumerate() {
                let has_3d = i == 0
                    && self.variant.bg0_3d
                    && engine.wants_3d_line()
                    && bus.render_3d_line(line, engine.line_3d_mut());
                engine.render_line(line, self.vram.engine_view(i), has_3d);
            }
        }

        // Sprites are evaluated one line ahead; the last line of the frame prepares line 0
        let next_line = if line + 1 == self.variant.lines_per_frame { 0 } else { line + 1 };
        if next_line < self.variant.screen_height {
            for (i, engine) in self.engines.iter_mut().enumerate() {
                engine.render_sprite_line(next_line, self.vram.engine_view(i));
            }
        }

        if visible {
            for engine in &mut self.engines {
                engine.increment_reference_latches();
            }

            bus.notify_hblank_dma();

            if line == self.variant.screen_height - 1 {
                bus.notify_display_dma();
            }
        }

        if self.status.hblank_irq_enabled {
            bus.set_interrupt_flag(PpuInterrupt::HBlank);
        }

        self.state.line_state = if visible { LineState::HBlank } else { LineState::VBlankHBlank };
    }

    fn end_line(&mut self, bus: &mut impl PpuBus) {
        self.state.line += 1;
        if self.state.line == self.variant.lines_per_frame {
            self.state.line = 0;
        } else if self.state.line == self.variant.screen_height {
            if self.status.vblank_irq_enabled {
                bus.set_interrupt_flag(PpuInterrupt::VBlank);
            }

            bus.notify_vblank_dma();

            for engine in &mut self.engines {
                engine.latch_reference_points();
                engine.swap_buffers();
            }

            self.state.frame_count += 1;
            self.state.frame_complete = true;
        }

        if self.status.v_counter_irq_enabled
            && self.state.line == u32::from(self.status.v_counter_target)
        {
            bus.set_interrupt_flag(PpuInterrupt::VCounter);
        }

        self.state.line_state = if self.state.line < self.variant.screen_height {
            LineState::Drawing
        } else {
            LineState::VBlank
        };
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.state.line
    }

    #[must_use]
    pub fn line_state(&self) -> LineState {
        self.state.line_state
    }

    fn in_vblank(&self) -> bool {
        (self.variant.screen_height..self.variant.vblank_flag_end).contains(&self.state.line)
    }

    fn in_hblank(&self, cycles: u64) -> bool {
        cycles.saturating_sub(self.state.line_start_cycles) >= self.variant.hblank_start_cycle
    }

    fn in_active_display(&self) -> bool {
        self.state.line_state == LineState::Drawing
            && !self.engines.iter().all(Engine::forced_blanking)
    }

    /// Finished image for a display, or None if this console does not have that display.
    #[must_use]
    pub fn frame_buffer(&self, display: DisplayId) -> Option<&[u16]> {
        self.engines.get(display.engine_idx()).map(Engine::frame_buffer)
    }

    #[must_use]
    pub fn frame_complete(&self) -> bool {
        self.state.frame_complete
    }

    pub fn clear_frame_complete(&mut self) {
        self.state.frame_complete = false;
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.state.frame_count
    }

    /// Convert a display's finished image through the color-correction table and present it.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the renderer.
    pub fn render_frame<R: Renderer>(
        &self,
        display: DisplayId,
        renderer: &mut R,
    ) -> Result<(), RenderError<R::Err>> {
        let Some(frame_buffer) = self.frame_buffer(display) else {
            log::warn!("{:?} has no {display:?} display", self.variant.variant);
            return Ok(());
        };

        let table = colors::table(self.config.color_correction);
        let rgb_buffer: Vec<Color> =
            frame_buffer.iter().map(|&color| table[(color & 0x7FFF) as usize]).collect();

        renderer.render_frame(&rgb_buffer, self.variant.frame_size()).map_err(RenderError::Render)
    }

    // $4000000-$400006F and $4001000-$400106F
    fn engine_register(&self, address: u32) -> Option<(usize, u32)> {
        let engine = match address & !0xFFF {
            0x4000000 => 0,
            0x4001000 => 1,
            _ => return None,
        };
        let offset = address & 0xFFF;

        (engine < self.engines.len() && (offset as usize) < REGISTER_SPACE_LEN)
            .then_some((engine, offset))
    }

    // $4000240-$4000246 are VRAMCNT_A-G, $4000247 is WRAMCNT, $4000248-$4000249 are VRAMCNT_H-I
    fn vram_control_bank(address: u32) -> Option<usize> {
        match address {
            0x4000240..=0x4000246 => Some((address - 0x4000240) as usize),
            0x4000248 | 0x4000249 => Some((address - 0x4000241) as usize),
            _ => None,
        }
    }

    fn read_register_byte_inner(&self, address: u32, cycles: u64) -> u8 {
        let value = match address {
            0x4000004..=0x4000007 => Some(self.read_status_byte(address, cycles)),
            0x4000240..=0x400024B if self.variant.banked_vram => {
                Self::vram_control_bank(address).and_then(|bank| self.vram.read_control(bank))
            }
            _ => self
                .engine_register(address)
                .and_then(|(engine, offset)| self.engines[engine].read_register(offset)),
        };

        value.unwrap_or_else(|| {
            log::warn!("Unhandled PPU register read {address:08X}");
            0
        })
    }

    // $4000004: DISPSTAT, $4000006: VCOUNT
    fn read_status_byte(&self, address: u32, cycles: u64) -> u8 {
        let line = self.state.line as u16;
        let dispstat = self.status.read(
            self.in_vblank(),
            self.in_hblank(cycles),
            line == self.status.v_counter_target,
        );

        let value = if address.bit(1) { line } else { dispstat };
        let [lsb, msb] = value.to_le_bytes();
        if address.bit(0) { msb } else { lsb }
    }

    #[must_use]
    pub fn read_register_byte(&self, address: u32, cycles: u64) -> u8 {
        self.read_register_byte_inner(address, cycles)
    }

    #[must_use]
    pub fn read_register_halfword(&self, address: u32, cycles: u64) -> u16 {
        let address = address & !1;
        u16::from_le_bytes([
            self.read_register_byte_inner(address, cycles),
            self.read_register_byte_inner(address | 1, cycles),
        ])
    }

    #[must_use]
    pub fn read_register_word(&self, address: u32, cycles: u64) -> u32 {
        let address = address & !3;
        u32::from_le_bytes(array::from_fn(|i| {
            self.read_register_byte_inner(address + i as u32, cycles)
        }))
    }

    fn write_register_bytes(&mut self, address: u32, bytes: &[u8]) {
        log::debug!(
            "PPU register write {address:08X} {bytes:02X?} (line {} {:?})",
            self.state.line,
            self.state.line_state
        );

        match address {
            0x4000004..=0x4000007 => {
                for (i, &byte) in bytes.iter().enumerate() {
                    self.write_status_byte(address + i as u32, byte);
                }
            }
            0x4000240..=0x400024B if self.variant.banked_vram => {
                for (i, &byte) in bytes.iter().enumerate() {
                    let address = address + i as u32;
                    match Self::vram_control_bank(address) {
                        Some(bank) => self.vram.write_control(bank, byte),
                        None => log::debug!("Ignoring non-VRAM write {address:08X} {byte:02X}"),
                    }
                }
            }
            _ => match self.engine_register(address) {
                Some((engine, offset)) => self.engines[engine].write_registers(offset, bytes),
                None => log::warn!("Unhandled PPU register write {address:08X} {bytes:02X?}"),
            },
        }
    }

    fn write_status_byte(&mut self, address: u32, value: u8) {
        match address & 3 {
            0 => self.status.write_low(value, self.variant.nine_bit_v_counter),
            1 => self.status.write_high(value),
            _ => log::debug!("Ignoring VCOUNT write {address:08X} {value:02X}"),
        }
    }

    pub fn write_register_byte(&mut self, address: u32, value: u8) {
        self.write_register_bytes(address, &[value]);
    }

    pub fn write_register_halfword(&mut self, address: u32, value: u16) {
        self.write_register_bytes(address & !1, &value.to_le_bytes());
    }

    pub fn write_register_word(&mut self, address: u32, value: u32) {
        self.write_register_bytes(address & !3, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_vram_byte(&self, address: u32) -> u8 {
        self.vram.read_byte(address)
    }

    #[must_use]
    pub fn read_vram_halfword(&self, address: u32) -> u16 {
        self.vram.read_halfword(address)
    }

    #[must_use]
    pub fn read_vram_word(&self, address: u32) -> u32 {
        let address = address & !3;
        u32::from(self.vram.read_halfword(address))
            | (u32::from(self.vram.read_halfword(address + 2)) << 16)
    }

    pub fn write_vram_byte(&mut self, address: u32, value: u8) {
        if self.variant.banked_vram {
            self.vram.write_byte(address, value);
            self.log_active_display_write("VRAM", address);
            return;
        }

        // GBA byte writes to BG VRAM write the byte to both halves of the halfword; byte writes to
        // OBJ VRAM are ignored
        let bg_vram_limit = if self.engines[0].is_gba_bitmap_mode() { 0x14000 } else { 0x10000 };
        if Vram::gba_address(address) < bg_vram_limit {
            self.write_vram_halfword(address, u16::from_le_bytes([value, value]));
        } else {
            log::debug!("Ignoring GBA OBJ VRAM byte write {address:08X} {value:02X}");
        }
    }

    pub fn write_vram_halfword(&mut self, address: u32, value: u16) {
        self.vram.write_halfword(address, value);
        self.log_active_display_write("VRAM", address);
    }

    pub fn write_vram_word(&mut self, address: u32, value: u32) {
        let address = address & !3;
        self.write_vram_halfword(address, value as u16);
        self.write_vram_halfword(address + 2, (value >> 16) as u16);
    }

    // GBA: $5000000-$50003FF mirrored; NDS: bit 10 selects engine B's half
    fn engine_half(&self, address: u32) -> (usize, usize) {
        let engine = if self.engines.len() > 1 { ((address >> 10) & 1) as usize } else { 0 };
        (engine, ((address & 0x3FF) >> 1) as usize)
    }

    #[must_use]
    pub fn read_palette_byte(&self, address: u32) -> u8 {
        let [lsb, msb] = self.read_palette_halfword(address).to_le_bytes();
        if address.bit(0) { msb } else { lsb }
    }

    #[must_use]
    pub fn read_palette_halfword(&self, address: u32) -> u16 {
        let (engine, index) = self.engine_half(address);
        self.engines[engine].read_palette_ram(index)
    }

    #[must_use]
    pub fn read_palette_word(&self, address: u32) -> u32 {
        let address = address & !3;
        u32::from(self.read_palette_halfword(address))
            | (u32::from(self.read_palette_halfword(address + 2)) << 16)
    }

    pub fn write_palette_byte(&mut self, address: u32, value: u8) {
        if self.variant.extended_modes {
            log::debug!("Ignoring palette RAM byte write {address:08X} {value:02X}");
            return;
        }

        self.write_palette_halfword(address, u16::from_le_bytes([value, value]));
    }

    pub fn write_palette_halfword(&mut self, address: u32, value: u16) {
        let (engine, index) = self.engine_half(address);
        self.engines[engine].write_palette_ram(index, value);
        self.log_active_display_write("Palette RAM", address);
    }

    pub fn write_palette_word(&mut self, address: u32, value: u32) {
        let address = address & !3;
        self.write_palette_halfword(address, value as u16);
        self.write_palette_halfword(address + 2, (value >> 16) as u16);
    }

    #[must_use]
    pub fn read_oam_byte(&self, address: u32) -> u8 {
        let [lsb, msb] = self.read_oam_halfword(address).to_le_bytes();
        if address.bit(0) { msb } else { lsb }
    }

    #[must_use]
    pub fn read_oam_halfword(&self, address: u32) -> u16 {
        let (engine, index) = self.engine_half(address);
        self.engines[engine].read_oam(index)
    }

    #[must_use]
    pub fn read_oam_word(&self, address: u32) -> u32 {
        let address = address & !3;
        u32::from(self.read_oam_halfword(address))
            | (u32::from(self.read_oam_halfword(address + 2)) << 16)
    }

    pub fn write_oam_byte(&mut self, address: u32, value: u8) {
        log::debug!(
            "Ignoring OAM byte write {address:08X} {value:02X} (line {})",
            self.state.line
        );
    }

    pub fn write_oam_halfword(&mut self, address: u32, value: u16) {
        let (engine, index) = self.engine_half(address);
        self.engines[engine].write_oam(index, value);

        let oam_free = self.engines[engine].oam_free_during_hblank();
        if !oam_free {
            self.log_active_display_write("OAM", address);
        }
    }

    pub fn write_oam_word(&mut self, address: u32, value: u32) {
        let address = address & !3;
        self.write_oam_halfword(address, value as u16);
        self.write_oam_halfword(address + 2, (value >> 16) as u16);
    }

    fn log_active_display_write(&self, memory: &str, address: u32) {
        if self.in_active_display() {
            log::debug!(
                "{memory} write to {address:08X} during active rendering (line {})",
                self.state.line
            );
        }
    }
}
