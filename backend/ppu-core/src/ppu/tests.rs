use super::*;
use crate::api;
use crate::api::PpuError;
use crate::scheduler::Scheduler;
use ppu_common::frontend::{Color, FrameSize, Renderer};
use ppu_config::ColorCorrection;
use std::io;
use test_log::test;

const RED: u16 = 0x001F;
const GREEN: u16 = 0x03E0;
const BLUE: u16 = 0x7C00;
const WHITE: u16 = 0x7FFF;

#[derive(Debug, Default)]
struct TestBus {
    interrupts: Vec<PpuInterrupt>,
    hblank_dma: u32,
    vblank_dma: u32,
    display_dma: u32,
    line_3d: Option<u16>,
}

impl PpuBus for TestBus {
    fn set_interrupt_flag(&mut self, interrupt: PpuInterrupt) {
        self.interrupts.push(interrupt);
    }

    fn notify_hblank_dma(&mut self) {
        self.hblank_dma += 1;
    }

    fn notify_vblank_dma(&mut self) {
        self.vblank_dma += 1;
    }

    fn notify_display_dma(&mut self) {
        self.display_dma += 1;
    }

    fn render_3d_line(&mut self, _line: u32, out: &mut [u16]) -> bool {
        match self.line_3d {
            Some(color) => {
                out.fill(color);
                true
            }
            None => false,
        }
    }
}

struct Harness {
    ppu: Ppu,
    scheduler: Scheduler,
    bus: TestBus,
}

impl Harness {
    fn new(variant: ConsoleVariant) -> Self {
        let mut scheduler = Scheduler::new();
        let config = PpuConfig { variant, color_correction: ColorCorrection::None };
        let ppu = Ppu::new(config, &mut scheduler);

        Self { ppu, scheduler, bus: TestBus::default() }
    }

    fn step(&mut self) {
        self.scheduler.advance_to(self.scheduler.next_event_cycles());
        while let Some((event, lateness)) = self.scheduler.pop_due() {
            assert_eq!(event, SchedulerEvent::PpuLineState);
            self.ppu.handle_line_event(lateness, &mut self.scheduler, &mut self.bus);
        }
    }

    // Runs until the next VBlank
    fn run_frame(&mut self) {
        while !self.ppu.frame_complete() {
            self.step();
        }
        self.ppu.clear_frame_complete();
    }

    fn run_to_line(&mut self, line: u32) {
        while self.ppu.line() != line {
            self.step();
        }
    }

    fn frame(&self, display: DisplayId) -> &[u16] {
        self.ppu.frame_buffer(display).unwrap()
    }

    fn pixel(&self, x: u32, y: u32) -> u16 {
        let width = self.ppu.variant().screen_width;
        self.frame(DisplayId::Main)[(y * width + x) as usize]
    }

    fn row(&self, y: u32) -> &[u16] {
        let width = self.ppu.variant().screen_width as usize;
        let start = y as usize * width;
        &self.frame(DisplayId::Main)[start..start + width]
    }
}

// 4bpp tile filled with a single color index
fn write_solid_tile(ppu: &mut Ppu, tile_addr: u32, color_id: u16) {
    let halfword = 0x1111 * color_id;
    for offset in (0..32).step_by(2) {
        ppu.write_vram_halfword(tile_addr + offset, halfword);
    }
}

fn disable_all_sprites(ppu: &mut Ppu, from: u32) {
    for i in from..128 {
        ppu.write_oam_halfword(0x7000000 + 8 * i, 0x0200);
    }
}

#[test]
fn forced_blank_outputs_white() {
    let mut harness = Harness::new(ConsoleVariant::Gba);

    harness.ppu.write_palette_halfword(0x5000000, BLUE);
    // BG0 and OBJ enabled alongside forced blanking
    harness.ppu.write_register_halfword(0x4000000, 0x1180);

    harness.run_frame();

    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == WHITE));
}

#[test]
fn red_tile_over_backdrop() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    // BG0: screen block 8 ($4000), char block 0
    ppu.write_register_halfword(0x4000008, 0x0800);
    write_solid_tile(ppu, 0x6000020, 5);
    ppu.write_vram_halfword(0x6004000, 0x0001);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x500000A, RED);
    ppu.write_register_halfword(0x4000000, 0x0100);

    harness.run_frame();

    for y in 0..8 {
        let row = harness.row(y);
        assert!(row[..8].iter().all(|&color| color == RED), "line {y}: {row:04X?}");
        assert!(row[8..].iter().all(|&color| color == BLUE), "line {y}: {row:04X?}");
    }
    assert!(harness.row(8).iter().all(|&color| color == BLUE));
}

#[test]
fn equal_priority_bgs_render_in_index_order() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    write_solid_tile(ppu, 0x6000020, 5);
    // BG0 map at $4000, BG1 map at $4800 using palette 1
    ppu.write_register_halfword(0x4000008, 0x0800);
    ppu.write_register_halfword(0x400000A, 0x0900);
    ppu.write_vram_halfword(0x6004000, 0x0001);
    ppu.write_vram_halfword(0x6004800, 0x1001);
    ppu.write_palette_halfword(0x500000A, RED);
    ppu.write_palette_halfword(0x500002A, GREEN);
    ppu.write_register_halfword(0x4000000, 0x0300);

    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), RED);

    // Lower priority value wins regardless of index
    harness.ppu.write_register_halfword(0x4000008, 0x0801);
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), GREEN);
}

fn setup_sprite_over_bg(ppu: &mut Ppu) {
    // BG0 solid red over the top-left tile
    ppu.write_register_halfword(0x4000008, 0x0800);
    write_solid_tile(ppu, 0x6000020, 5);
    ppu.write_vram_halfword(0x6004000, 0x0001);
    ppu.write_palette_halfword(0x500000A, RED);

    // OBJ tile 1 solid color 5; OBJ palette 0 is green, OBJ palette 1 is blue
    write_solid_tile(ppu, 0x6010020, 5);
    ppu.write_palette_halfword(0x500020A, GREEN);
    ppu.write_palette_halfword(0x500022A, BLUE);

    disable_all_sprites(ppu, 0);
    ppu.write_register_halfword(0x4000000, 0x1100);
}

fn write_sprite(ppu: &mut Ppu, idx: u32, attributes: [u16; 3]) {
    for (i, attribute) in attributes.into_iter().enumerate() {
        ppu.write_oam_halfword(0x7000000 + 8 * idx + 2 * i as u32, attribute);
    }
}

#[test]
fn sprite_wins_priority_ties_with_bg() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    setup_sprite_over_bg(&mut harness.ppu);

    // 8x8 sprite at (0, 0), tile 1, priority 0
    write_sprite(&mut harness.ppu, 0, [0x0000, 0x0000, 0x0001]);
    harness.run_frame();
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), GREEN);
    assert_eq!(harness.pixel(7, 7), GREEN);

    // Priority 1 sprite falls behind the priority 0 BG
    write_sprite(&mut harness.ppu, 0, [0x0000, 0x0000, 0x0401]);
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), RED);
}

#[test]
fn sprite_ties_follow_oam_order() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    setup_sprite_over_bg(&mut harness.ppu);
    // BG0 off so only sprites and backdrop remain
    harness.ppu.write_register_halfword(0x4000000, 0x1000);

    write_sprite(&mut harness.ppu, 0, [0x0000, 0x0000, 0x0001]);
    write_sprite(&mut harness.ppu, 1, [0x0000, 0x0000, 0x1001]);
    harness.run_frame();
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), GREEN);

    // A higher priority sprite wins even with a larger OAM index
    write_sprite(&mut harness.ppu, 0, [0x0000, 0x0000, 0x0401]);
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), BLUE);
}

#[test]
fn rotated_affine_sprite_corner() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    // One opaque texel at (7, 0) of OBJ tile 0
    ppu.write_vram_halfword(0x6010002, 0x1000);
    ppu.write_palette_halfword(0x5000202, GREEN);

    disable_all_sprites(ppu, 1);
    // 8x8 affine sprite at (20, 10) using parameter group 0
    write_sprite(ppu, 0, [0x010A, 0x0014, 0x0000]);

    // 90 degree rotation: PA=0, PB=-1.0, PC=1.0, PD=0
    for (offset, value) in [(3, 0x0000), (7, 0xFF00), (11, 0x0100), (15, 0x0000)] {
        ppu.write_oam_halfword(0x7000000 + 2 * offset, value);
    }

    ppu.write_register_halfword(0x4000000, 0x1000);

    harness.run_frame();
    harness.run_frame();

    let width = harness.ppu.variant().screen_width;
    for (i, &color) in harness.frame(DisplayId::Main).iter().enumerate() {
        let (x, y) = (i as u32 % width, i as u32 / width);
        let expected = if (x, y) == (20, 11) { GREEN } else { 0 };
        assert_eq!(color, expected, "pixel ({x}, {y})");
    }
}

#[test]
fn semi_transparent_sprite_blends_with_bg() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    setup_sprite_over_bg(&mut harness.ppu);

    // Semi-transparent sprite; BG0 is a 2nd target, EVA=8 EVB=8
    write_sprite(&mut harness.ppu, 0, [0x0400, 0x0000, 0x0001]);
    harness.ppu.write_register_halfword(0x4000050, 0x0100);
    harness.ppu.write_register_halfword(0x4000052, 0x0808);

    harness.run_frame();
    harness.run_frame();

    // (31 * 8) >> 4 = 15 for each of red and green
    assert_eq!(harness.pixel(0, 0), 15 | (15 << 5));
}

#[test]
fn brightness_decrease_on_first_target() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    ppu.write_palette_halfword(0x5000000, WHITE);
    // Backdrop is 1st target, brightness decrease, EVY=16
    ppu.write_register_halfword(0x4000050, 0x00E0);
    ppu.write_register_halfword(0x4000054, 0x0010);
    ppu.write_register_halfword(0x4000000, 0x0000);

    harness.run_frame();

    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == 0));
}

#[test]
fn window_wraparound_on_dual_display() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    let ppu = &mut harness.ppu;

    // Bank A to engine A BG
    ppu.write_register_byte(0x4000240, 0x81);

    // BG0 is a full screen of tile 0, solid color 1
    ppu.write_register_halfword(0x4000008, 0x0800);
    write_solid_tile(ppu, 0x6000000, 1);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);

    // Window 0 spans x=250..10 (wrapping) on every line and only shows BG0
    ppu.write_register_halfword(0x4000040, 0xFA0A);
    ppu.write_register_halfword(0x4000044, 0x00C0);
    ppu.write_register_halfword(0x4000048, 0x0001);
    ppu.write_register_halfword(0x400004A, 0x0000);

    // Normal display, BG0, window 0
    ppu.write_register_word(0x4000000, 0x0001_2100);

    harness.run_frame();

    for y in [0, 100, 191] {
        let row = harness.row(y);
        assert_eq!(row[255], RED);
        assert_eq!(row[5], RED);
        assert_eq!(row[250], RED);
        assert_eq!(row[128], BLUE);
        assert_eq!(row[10], BLUE);
    }
}

#[test]
fn sub_engine_uses_own_registers_and_palette() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    let ppu = &mut harness.ppu;

    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000400, GREEN);
    ppu.write_register_word(0x4000000, 0x0001_0000);
    ppu.write_register_word(0x4001000, 0x0001_0000);

    harness.run_frame();

    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == BLUE));
    assert!(harness.frame(DisplayId::Sub).iter().all(|&color| color == GREEN));
    assert_eq!(harness.ppu.read_palette_halfword(0x5000400), GREEN);
}

#[test]
fn master_brightness_up() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    let ppu = &mut harness.ppu;

    ppu.write_palette_halfword(0x5000000, 0x0010);
    ppu.write_register_word(0x4000000, 0x0001_0000);
    ppu.write_register_halfword(0x400006C, 0x4010);

    harness.run_frame();

    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == WHITE));
}

#[test]
fn bg0_3d_passthrough() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    harness.bus.line_3d = Some(0x8000 | RED);

    harness.ppu.write_palette_halfword(0x5000000, BLUE);
    // Normal display, BG0 enabled as 3D
    harness.ppu.write_register_word(0x4000000, 0x0001_0108);

    harness.run_frame();
    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == RED));

    // No 3D renderer output leaves BG0 transparent
    harness.bus.line_3d = None;
    harness.run_frame();
    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == BLUE));
}

#[test]
fn vram_display_mode_follows_bank_mapping() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    let ppu = &mut harness.ppu;

    // Bank A to LCDC
    ppu.write_register_byte(0x4000240, 0x80);
    let pixel_addr = 0x6800000 + 2 * (2 * 256 + 3);
    ppu.write_vram_halfword(pixel_addr, 0x1234);

    // VRAM display mode, block A
    ppu.write_register_word(0x4000000, 0x0002_0000);

    harness.run_frame();
    assert_eq!(harness.pixel(3, 2), 0x1234);
    assert_eq!(harness.pixel(4, 2), 0);

    // Remap bank A to engine A BG: LCDC view goes empty, data is visible at the BG address
    harness.ppu.write_register_byte(0x4000240, 0x81);
    assert_eq!(harness.ppu.read_register_byte(0x4000240, 0), 0x81);
    harness.run_frame();

    assert_eq!(harness.pixel(3, 2), 0);
    assert_eq!(harness.ppu.read_vram_halfword(0x6000000 + 2 * (2 * 256 + 3)), 0x1234);
}

#[test]
fn register_byte_writes_merge() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    ppu.write_register_byte(0x4000008, 0x01);
    ppu.write_register_byte(0x4000009, 0x08);
    assert_eq!(ppu.read_register_halfword(0x4000008, 0), 0x0801);

    ppu.write_register_byte(0x4000008, 0x02);
    assert_eq!(ppu.read_register_halfword(0x4000008, 0), 0x0802);

    // Scroll registers are write-only
    ppu.write_register_halfword(0x4000010, 0x0123);
    assert_eq!(ppu.read_register_halfword(0x4000010, 0), 0);
}

#[test]
fn status_flags_are_computed_live() {
    let mut harness = Harness::new(ConsoleVariant::Gba);

    harness.ppu.write_register_halfword(0x4000004, 0x0500);

    assert_eq!(harness.ppu.read_register_halfword(0x4000004, 500) & 7, 0);
    // HBlank flag follows the cycle counter even before the HBlank event is handled
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, 1100) & 7, 2);
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, 0) >> 8, 5);

    harness.run_to_line(5);
    let cycles = harness.scheduler.cycles();
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, cycles) & 7, 4);
    assert_eq!(harness.ppu.read_register_halfword(0x4000006, cycles), 5);

    harness.run_to_line(200);
    let cycles = harness.scheduler.cycles();
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, cycles) & 1, 1);

    // VBlank flag is clear on the last line of the frame
    harness.run_to_line(227);
    let cycles = harness.scheduler.cycles();
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, cycles) & 1, 0);
}

#[test]
fn nine_bit_v_counter_target() {
    let mut harness = Harness::new(ConsoleVariant::Nds);

    // Target 256: bit 7 holds target bit 8
    harness.ppu.write_register_halfword(0x4000004, 0x00A0);
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, 0) & 0xFF80, 0x0080);

    harness.run_to_line(256);
    let cycles = harness.scheduler.cycles();
    assert_eq!(harness.ppu.read_register_halfword(0x4000004, cycles) & 4, 4);
    assert_eq!(harness.ppu.read_register_halfword(0x4000006, cycles), 256);
    assert_eq!(harness.bus.interrupts, vec![PpuInterrupt::VCounter]);
}

#[test]
fn interrupts_and_dma_notifications() {
    let mut harness = Harness::new(ConsoleVariant::Gba);

    // VBlank, HBlank, and V counter IRQs with target 3
    harness.ppu.write_register_halfword(0x4000004, 0x0338);

    harness.run_frame();

    let count = |interrupt| harness.bus.interrupts.iter().filter(|&&i| i == interrupt).count();
    assert_eq!(count(PpuInterrupt::HBlank), 160);
    assert_eq!(count(PpuInterrupt::VBlank), 1);
    assert_eq!(count(PpuInterrupt::VCounter), 1);
    assert_eq!(harness.bus.hblank_dma, 160);
    assert_eq!(harness.bus.vblank_dma, 1);
    assert_eq!(harness.bus.display_dma, 1);
    assert_eq!(harness.ppu.frame_count(), 1);
}

#[test]
fn late_events_do_not_drift() {
    let mut harness = Harness::new(ConsoleVariant::Gba);

    harness.scheduler.advance_to(1016);
    let (event, lateness) = harness.scheduler.pop_due().unwrap();
    assert_eq!((event, lateness), (SchedulerEvent::PpuLineState, 10));
    harness.ppu.handle_line_event(lateness, &mut harness.scheduler, &mut harness.bus);
    assert_eq!(harness.ppu.line_state(), LineState::HBlank);
    assert_eq!(harness.scheduler.next_event_cycles(), 1232);

    harness.scheduler.advance_to(1240);
    let (_, lateness) = harness.scheduler.pop_due().unwrap();
    harness.ppu.handle_line_event(lateness, &mut harness.scheduler, &mut harness.bus);
    assert_eq!(harness.ppu.line(), 1);
    assert_eq!(harness.ppu.line_state(), LineState::Drawing);
    assert_eq!(harness.scheduler.next_event_cycles(), 1232 + 1006);
}

#[test]
fn gba_byte_writes() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    // BG VRAM and palette RAM duplicate the byte; OBJ VRAM and OAM ignore it
    ppu.write_vram_byte(0x6000001, 0xAB);
    assert_eq!(ppu.read_vram_halfword(0x6000000), 0xABAB);

    ppu.write_vram_byte(0x6010000, 0xAB);
    assert_eq!(ppu.read_vram_halfword(0x6010000), 0);

    ppu.write_palette_byte(0x5000003, 0x12);
    assert_eq!(ppu.read_palette_halfword(0x5000002), 0x1212);

    ppu.write_oam_byte(0x7000000, 0x34);
    assert_eq!(ppu.read_oam_halfword(0x7000000), 0);

    // Upper 32KB of VRAM is mirrored
    ppu.write_vram_word(0x6010000, 0x1234_5678);
    assert_eq!(ppu.read_vram_word(0x6018000), 0x1234_5678);
}

#[test]
fn save_state_round_trip() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    harness.ppu.write_register_halfword(0x4000008, 0x0800);
    harness.ppu.write_palette_halfword(0x5000000, BLUE);
    harness.ppu.write_register_halfword(0x4000000, 0x0000);
    harness.run_frame();

    let mut state = Vec::new();
    api::save_state(&harness.ppu, &mut state).unwrap();

    let loaded = api::load_state(state.as_slice(), ConsoleVariant::Gba).unwrap();
    assert_eq!(loaded.read_register_halfword(0x4000008, 0), 0x0800);
    assert_eq!(loaded.frame_buffer(DisplayId::Main), harness.ppu.frame_buffer(DisplayId::Main));
    assert_eq!(loaded.line(), harness.ppu.line());
    assert_eq!(loaded.frame_count(), 1);

    let mismatch = api::load_state(state.as_slice(), ConsoleVariant::Nds);
    assert!(matches!(
        mismatch,
        Err(PpuError::VariantMismatch {
            expected: ConsoleVariant::Nds,
            actual: ConsoleVariant::Gba
        })
    ));
}

#[test]
fn gba_has_no_sub_display() {
    let harness = Harness::new(ConsoleVariant::Gba);
    assert!(harness.ppu.frame_buffer(DisplayId::Sub).is_none());
    assert_eq!(harness.frame(DisplayId::Main).len(), 240 * 160);
}

#[test]
fn semi_transparent_sprite_without_2nd_target_uses_bldcnt_effect() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    setup_sprite_over_bg(&mut harness.ppu);

    // Semi-transparent sprite over BG0; OBJ is 1st target for brightness decrease, no 2nd targets
    write_sprite(&mut harness.ppu, 0, [0x0400, 0x0000, 0x0001]);
    harness.ppu.write_register_halfword(0x4000050, 0x00D0);
    harness.ppu.write_register_halfword(0x4000054, 0x0010);

    harness.run_frame();
    harness.run_frame();

    assert_eq!(harness.pixel(0, 0), 0);

    // With BG0 selected as 2nd target the sprite is alpha blended instead
    harness.ppu.write_register_halfword(0x4000050, 0x01D0);
    harness.ppu.write_register_halfword(0x4000052, 0x0808);
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), 15 | (15 << 5));
}

struct FailingFlush(Vec<u8>);

impl io::Write for FailingFlush {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("device full"))
    }
}

#[test]
fn save_state_reports_flush_errors() {
    let harness = Harness::new(ConsoleVariant::Gba);

    let result = api::save_state(&harness.ppu, FailingFlush(Vec::new()));
    assert!(matches!(result, Err(PpuError::Io { .. })), "{result:?}");
}

// GBA mode 1 BG2: 128x128 affine map at $4000 filled with 8bpp tile 1
fn setup_gba_affine_bg(ppu: &mut Ppu, tile_row_halfwords: impl Fn(u32) -> u16) {
    for offset in (0..64).step_by(2) {
        ppu.write_vram_halfword(0x6000040 + offset, tile_row_halfwords(offset));
    }
    for offset in (0..16 * 16).step_by(2) {
        ppu.write_vram_halfword(0x6004000 + offset, 0x0101);
    }

    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);
    ppu.write_palette_halfword(0x5000004, GREEN);

    ppu.write_register_halfword(0x400000C, 0x0800);
    ppu.write_register_halfword(0x4000000, 0x0401);
}

#[test]
fn affine_bg_identity_wrap_and_reference_point() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    setup_gba_affine_bg(&mut harness.ppu, |_| 0x0101);

    harness.run_frame();
    for y in [0, 64, 127] {
        let row = harness.row(y);
        assert!(row[..128].iter().all(|&color| color == RED), "line {y}: {row:04X?}");
        assert!(row[128..].iter().all(|&color| color == BLUE), "line {y}: {row:04X?}");
    }
    assert!(harness.row(128).iter().all(|&color| color == BLUE));

    // Wraparound fills the whole screen
    harness.ppu.write_register_halfword(0x400000C, 0x2800);
    harness.run_frame();
    assert!(harness.frame(DisplayId::Main).iter().all(|&color| color == RED));

    // Reference X = 64.0 shifts the map left; the write reloads the internal latch immediately
    harness.ppu.write_register_halfword(0x400000C, 0x0800);
    harness.ppu.write_register_word(0x4000028, 64 << 8);
    harness.run_frame();
    assert_eq!(harness.pixel(63, 0), RED);
    assert_eq!(harness.pixel(64, 0), BLUE);
    assert_eq!(harness.pixel(63, 127), RED);
}

#[test]
fn affine_bg_latch_steps_once_per_line() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    // Rows 0-3 of the tile are color 1, rows 4-7 are color 2
    setup_gba_affine_bg(&mut harness.ppu, |offset| if offset < 32 { 0x0101 } else { 0x0202 });

    // PD = 0.5: each map row spans two screen lines
    harness.ppu.write_register_halfword(0x4000026, 0x0080);
    harness.run_frame();

    for (y, expected) in [(0, RED), (4, RED), (7, RED), (8, GREEN), (15, GREEN), (16, RED)] {
        assert_eq!(harness.pixel(0, y), expected, "line {y}");
    }
    // Map is 128 pixels tall, so it ends at line 256 with PD = 0.5
    assert_eq!(harness.pixel(0, 159), GREEN);
}

#[test]
fn gba_mode_3_direct_color_bitmap() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_vram_halfword(0x6000000 + 2 * (2 * 240 + 3), 0x1234);
    ppu.write_vram_halfword(0x6000000 + 2 * (159 * 240 + 239), WHITE);
    ppu.write_register_halfword(0x4000000, 0x0403);

    harness.run_frame();

    assert_eq!(harness.pixel(3, 2), 0x1234);
    assert_eq!(harness.pixel(239, 159), WHITE);
    // Direct color pixels are always opaque, so black covers the backdrop
    assert_eq!(harness.pixel(4, 2), 0);
}

#[test]
fn gba_mode_4_indexed_bitmap_page_flip() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);
    ppu.write_palette_halfword(0x5000004, GREEN);

    // Frame 0: (4, 2) = color 1, (5, 2) = color 2; frame 1: (0, 0) = color 2
    ppu.write_vram_halfword(0x6000000 + 2 * 240 + 4, 0x0201);
    ppu.write_vram_halfword(0x600A000, 0x0002);
    ppu.write_register_halfword(0x4000000, 0x0404);

    harness.run_frame();
    assert_eq!(harness.pixel(4, 2), RED);
    assert_eq!(harness.pixel(5, 2), GREEN);
    assert_eq!(harness.pixel(0, 0), BLUE);

    harness.ppu.write_register_halfword(0x4000000, 0x0414);
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), GREEN);
    assert_eq!(harness.pixel(1, 0), BLUE);
    assert_eq!(harness.pixel(4, 2), BLUE);
}

#[test]
fn gba_mode_5_small_bitmap() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_vram_halfword(0x6000000 + 2 * (127 * 160 + 159), WHITE);
    ppu.write_register_halfword(0x4000000, 0x0405);

    harness.run_frame();

    assert_eq!(harness.pixel(159, 127), WHITE);
    assert_eq!(harness.pixel(0, 0), 0);
    // 160x128 frame buffer; the backdrop shows outside it
    assert_eq!(harness.pixel(160, 0), BLUE);
    assert_eq!(harness.pixel(0, 128), BLUE);
}

fn setup_nds_engine_a_bg2(ppu: &mut Ppu, dispcnt: u32, bg2cnt: u16) {
    // Bank A to engine A BG at 0
    ppu.write_register_byte(0x4000240, 0x81);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);
    ppu.write_palette_halfword(0x5000004, GREEN);
    ppu.write_register_halfword(0x400000C, bg2cnt);
    ppu.write_register_word(0x4000000, dispcnt);
}

#[test]
fn nds_extended_direct_color_bitmap() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    // Mode 5 BG2: 256x256 direct color bitmap at 0
    setup_nds_engine_a_bg2(&mut harness.ppu, 0x0001_0405, 0x4084);

    harness.ppu.write_vram_halfword(0x6000000 + 2 * (2 * 256 + 3), 0x8000 | RED);
    // Alpha bit clear: transparent
    harness.ppu.write_vram_halfword(0x6000000 + 2 * (2 * 256 + 4), RED);

    harness.run_frame();

    assert_eq!(harness.pixel(3, 2), RED);
    assert_eq!(harness.pixel(4, 2), BLUE);
    assert_eq!(harness.pixel(0, 0), BLUE);
}

#[test]
fn nds_extended_indexed_bitmap() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    // Mode 5 BG2: 256x256 8bpp bitmap at 16KB block 1
    setup_nds_engine_a_bg2(&mut harness.ppu, 0x0001_0405, 0x4180);

    harness.ppu.write_vram_halfword(0x6004000 + 2 * 256 + 4, 0x0201);

    harness.run_frame();

    assert_eq!(harness.pixel(4, 2), RED);
    assert_eq!(harness.pixel(5, 2), GREEN);
    assert_eq!(harness.pixel(6, 2), BLUE);
}

#[test]
fn nds_extended_affine_map_flips() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    // Mode 5 BG2: 128x128 16-bit map at 0, 8bpp tiles at $4000
    setup_nds_engine_a_bg2(&mut harness.ppu, 0x0001_0405, 0x0004);

    // Tile 1 has a single texel at (0, 0)
    harness.ppu.write_vram_halfword(0x6004040, 0x0001);
    // Map (0, 0): tile 1 horizontally flipped; map (1, 0): tile 1 vertically flipped
    harness.ppu.write_vram_halfword(0x6000000, 0x0401);
    harness.ppu.write_vram_halfword(0x6000002, 0x0801);

    harness.run_frame();

    assert_eq!(harness.pixel(7, 0), RED);
    assert_eq!(harness.pixel(0, 0), BLUE);
    assert_eq!(harness.pixel(8, 7), RED);
    assert_eq!(harness.pixel(8, 0), BLUE);
}

#[test]
fn nds_mode_6_large_bitmap_spans_banks() {
    let mut harness = Harness::new(ConsoleVariant::Nds);
    // Mode 6 BG2: 512x1024 8bpp bitmap covering banks A and B
    setup_nds_engine_a_bg2(&mut harness.ppu, 0x0001_0406, 0x0000);
    // Bank B to engine A BG at $20000
    harness.ppu.write_register_byte(0x4000241, 0x89);

    // Row 256 starts at $20000, inside bank B
    harness.ppu.write_vram_halfword(0x6020004, 0x0100);
    harness.ppu.write_register_word(0x400002C, 256 << 8);

    harness.run_frame();

    assert_eq!(harness.pixel(5, 0), RED);
    assert_eq!(harness.pixel(4, 0), BLUE);
    assert_eq!(harness.pixel(5, 1), BLUE);
}

#[test]
fn text_bg_tile_flips() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    // Tile 1 has a single texel at (0, 0)
    ppu.write_vram_halfword(0x6000020, 0x0001);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);
    ppu.write_register_halfword(0x4000008, 0x0800);
    ppu.write_register_halfword(0x4000000, 0x0100);

    // Map (0, 0): vertical flip; map (1, 0): both flips
    ppu.write_vram_halfword(0x6004000, 0x0801);
    ppu.write_vram_halfword(0x6004002, 0x0C01);

    harness.run_frame();

    assert_eq!(harness.pixel(0, 7), RED);
    assert_eq!(harness.pixel(0, 0), BLUE);
    assert_eq!(harness.pixel(15, 7), RED);
    assert_eq!(harness.pixel(8, 0), BLUE);

    // Flipping twice restores the original orientation
    harness.ppu.write_vram_halfword(0x6004000, 0x0001);
    harness.run_frame();
    assert_eq!(harness.pixel(0, 0), RED);
    assert_eq!(harness.pixel(0, 7), BLUE);
}

#[test]
fn text_bg_scroll() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    ppu.write_register_halfword(0x4000008, 0x0800);
    write_solid_tile(ppu, 0x6000020, 5);
    ppu.write_vram_halfword(0x6004000, 0x0001);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x500000A, RED);
    ppu.write_register_halfword(0x4000000, 0x0100);

    // Scroll the tile 4 pixels left and 2 lines up
    ppu.write_register_halfword(0x4000010, 4);
    ppu.write_register_halfword(0x4000012, 2);

    harness.run_frame();

    assert_eq!(harness.pixel(0, 0), RED);
    assert_eq!(harness.pixel(3, 5), RED);
    assert_eq!(harness.pixel(4, 0), BLUE);
    assert_eq!(harness.pixel(0, 6), BLUE);
}

#[test]
fn bg_mosaic_repeats_block_origin() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;

    // Tile 1 has a single texel at (0, 0); BG0 mosaic with 4x4 blocks
    ppu.write_vram_halfword(0x6000020, 0x0001);
    ppu.write_vram_halfword(0x6004000, 0x0001);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);
    ppu.write_register_halfword(0x4000008, 0x0840);
    ppu.write_register_halfword(0x400004C, 0x0033);
    ppu.write_register_halfword(0x4000000, 0x0100);

    harness.run_frame();

    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(harness.pixel(x, y), RED, "pixel ({x}, {y})");
        }
    }
    assert_eq!(harness.pixel(4, 0), BLUE);
    assert_eq!(harness.pixel(0, 4), BLUE);
}

fn setup_full_screen_bg0(ppu: &mut Ppu) {
    // Every map entry is tile 0, which is solid color 1
    write_solid_tile(ppu, 0x6000000, 1);
    ppu.write_register_halfword(0x4000008, 0x0800);
    ppu.write_palette_halfword(0x5000000, BLUE);
    ppu.write_palette_halfword(0x5000002, RED);
}

#[test]
fn obj_window_masks_bg() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;
    setup_full_screen_bg0(ppu);

    // OBJ window sprite: 8x8 at (16, 0) using solid tile 1
    write_solid_tile(ppu, 0x6010020, 5);
    disable_all_sprites(ppu, 1);
    write_sprite(ppu, 0, [0x0800, 0x0010, 0x0001]);

    // Only BG0 inside the OBJ window, nothing outside
    ppu.write_register_halfword(0x400004A, 0x0100);
    ppu.write_register_halfword(0x4000000, 0x9100);

    harness.run_frame();
    harness.run_frame();

    for y in [0, 7] {
        let row = harness.row(y);
        assert!(row[..16].iter().all(|&color| color == BLUE), "line {y}: {row:04X?}");
        assert!(row[16..24].iter().all(|&color| color == RED), "line {y}: {row:04X?}");
        assert!(row[24..].iter().all(|&color| color == BLUE), "line {y}: {row:04X?}");
    }
    assert!(harness.row(8).iter().all(|&color| color == BLUE));
}

#[test]
fn window_0_has_priority_over_window_1() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    let ppu = &mut harness.ppu;
    setup_full_screen_bg0(ppu);

    // Window 0: x=0..20 hides everything; window 1: x=10..30 shows BG0
    ppu.write_register_halfword(0x4000040, 0x0014);
    ppu.write_register_halfword(0x4000042, 0x0A1E);
    ppu.write_register_halfword(0x4000044, 0x00A0);
    ppu.write_register_halfword(0x4000046, 0x00A0);
    ppu.write_register_halfword(0x4000048, 0x0100);
    ppu.write_register_halfword(0x400004A, 0x0000);
    ppu.write_register_halfword(0x4000000, 0x6100);

    harness.run_frame();

    for y in [0, 159] {
        let row = harness.row(y);
        assert!(row[..20].iter().all(|&color| color == BLUE), "line {y}: {row:04X?}");
        assert!(row[20..30].iter().all(|&color| color == RED), "line {y}: {row:04X?}");
        assert!(row[30..].iter().all(|&color| color == BLUE), "line {y}: {row:04X?}");
    }
}

#[derive(Default)]
struct CapturingRenderer {
    frames: Vec<(Vec<Color>, FrameSize)>,
}

impl Renderer for CapturingRenderer {
    type Err = String;

    fn render_frame(
        &mut self,
        frame_buffer: &[Color],
        frame_size: FrameSize,
    ) -> Result<(), String> {
        self.frames.push((frame_buffer.to_vec(), frame_size));
        Ok(())
    }
}

#[test]
fn render_frame_applies_color_correction() {
    let mut harness = Harness::new(ConsoleVariant::Gba);
    harness.ppu.write_palette_halfword(0x5000000, RED);
    harness.ppu.write_register_halfword(0x4000000, 0x0000);
    harness.run_frame();

    let mut renderer = CapturingRenderer::default();
    harness.ppu.render_frame(DisplayId::Main, &mut renderer).unwrap();

    let (frame, size) = &renderer.frames[0];
    assert_eq!(*size, FrameSize { width: 240, height: 160 });
    assert_eq!(frame.len(), 240 * 160);
    assert!(frame.iter().all(|&color| color == Color::rgb(255, 0, 0)));

    // Color correction can change at runtime; the variant cannot
    harness.ppu.reload_config(PpuConfig {
        variant: ConsoleVariant::Nds,
        color_correction: ColorCorrection::GbaLcd,
    });
    assert_eq!(harness.ppu.config().variant, ConsoleVariant::Gba);
    assert_eq!(harness.ppu.config().color_correction, ColorCorrection::GbaLcd);
    assert_eq!(harness.ppu.config().to_string(), "\n  variant: Gba\n  color_correction: GbaLcd");

    harness.ppu.render_frame(DisplayId::Main, &mut renderer).unwrap();
    let corrected = colors::table(ColorCorrection::GbaLcd)[usize::from(RED)];
    assert_ne!(corrected, Color::rgb(255, 0, 0));
    assert!(renderer.frames[1].0.iter().all(|&color| color == corrected));

    // No sub display on the GBA: nothing is presented
    harness.ppu.render_frame(DisplayId::Sub, &mut renderer).unwrap();
    assert_eq!(renderer.frames.len(), 2);
}
