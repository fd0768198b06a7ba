use crate::ppu::buffers::WindowMask;
use crate::ppu::engine::BgAffineLatch;
use bincode::{Decode, Encode};
use ppu_common::define_bit_enum;
use ppu_common::num::{GetBit, U16Ext, U32Ext};
use std::array;

/// Per-engine register block length: DISPCNT ($00) through MASTER_BRIGHT ($6C)
pub const REGISTER_SPACE_LEN: usize = 0x70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum BgMode {
    #[default]
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    // NDS engine A only: large 8bpp bitmap on BG2
    Six,
    Invalid(u8),
}

impl BgMode {
    fn to_bits(self) -> u32 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
            Self::Five => 5,
            Self::Six => 6,
            Self::Invalid(bits) => bits.into(),
        }
    }

    fn from_bits(bits: u32, large_bitmap_supported: bool) -> Self {
        match bits & 7 {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4 => Self::Four,
            5 => Self::Five,
            6 if large_bitmap_supported => Self::Six,
            b => Self::Invalid(b as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum DisplayMode {
    // Screen shows white
    Off,
    #[default]
    Normal,
    // Screen shows a VRAM bank mapped to LCDC as a raw 256x192 direct color image
    Vram,
    // Screen shows main memory display FIFO data
    MainMemory,
}

impl DisplayMode {
    fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Off,
            1 => Self::Normal,
            2 => Self::Vram,
            3 => Self::MainMemory,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Normal => 1,
            Self::Vram => 2,
            Self::MainMemory => 3,
        }
    }
}

define_bit_enum!(BitmapFrameBuffer, [Zero, One]);

impl BitmapFrameBuffer {
    pub fn vram_address(self) -> u32 {
        match self {
            Self::Zero => 0x00000,
            Self::One => 0x0A000,
        }
    }
}

define_bit_enum!(ObjTileMapping, [TwoD, OneD]);
define_bit_enum!(BitsPerPixel, [Four, Eight]);

impl BitsPerPixel {
    pub fn tile_size_bytes(self) -> u32 {
        match self {
            Self::Four => 32,
            Self::Eight => 64,
        }
    }
}

define_bit_enum!(AffineOverflowBehavior, [Transparent, Wrap]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ScreenSize {
    #[default]
    Zero = 0,
    One = 1,
    Two = 2,
    Three = 3,
}

impl ScreenSize {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    pub fn text_width_tiles(self) -> u32 {
        match self {
            Self::Zero | Self::Two => 32,
            Self::One | Self::Three => 64,
        }
    }

    pub fn text_height_tiles(self) -> u32 {
        match self {
            Self::Zero | Self::One => 32,
            Self::Two | Self::Three => 64,
        }
    }

    pub fn affine_dimension_tiles(self) -> u32 {
        16 << (self as u32)
    }

    // NDS extended-mode bitmaps
    pub fn bitmap_dimensions(self) -> (u32, u32) {
        match self {
            Self::Zero => (128, 128),
            Self::One => (256, 256),
            Self::Two => (512, 256),
            Self::Three => (512, 512),
        }
    }

    // NDS mode 6 large bitmap; sizes 2-3 are prohibited and treated like size 0
    pub fn large_bitmap_dimensions(self) -> (u32, u32) {
        match self {
            Self::One => (1024, 512),
            Self::Zero | Self::Two | Self::Three => (512, 1024),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct BgControl {
    pub priority: u8,
    // 16KB units
    pub char_block: u32,
    pub mosaic: bool,
    pub bpp: BitsPerPixel,
    // 2KB units for tile maps, 16KB units for NDS extended bitmaps
    pub screen_block: u32,
    // On NDS BG0/BG1 this bit instead selects the extended palette slot
    pub affine_overflow: AffineOverflowBehavior,
    pub size: ScreenSize,
}

impl BgControl {
    fn read(&self) -> u16 {
        u16::from(self.priority)
            | ((self.char_block as u16) << 2)
            | (u16::from(self.mosaic) << 6)
            | ((self.bpp as u16) << 7)
            | ((self.screen_block as u16) << 8)
            | ((self.affine_overflow as u16) << 13)
            | ((self.size as u16) << 14)
    }

    fn write(&mut self, value: u16) {
        self.priority = (value & 3) as u8;
        self.char_block = value.bits(2..=5).into();
        self.mosaic = value.bit(6);
        self.bpp = BitsPerPixel::from_bit(value.bit(7));
        self.screen_block = value.bits(8..=12).into();
        self.affine_overflow = AffineOverflowBehavior::from_bit(value.bit(13));
        self.size = ScreenSize::from_bits(value >> 14);
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct BgAffineParameters {
    // BG2X / BG3X: signed 20.8 fixed point
    pub reference_x: i32,
    // BG2Y / BG3Y: signed 20.8 fixed point
    pub reference_y: i32,
    // BG2PA / BG3PA
    pub a: i32,
    // BG2PB / BG3PB
    pub b: i32,
    // BG2PC / BG3PC
    pub c: i32,
    // BG2PD / BG3PD
    pub d: i32,
}

impl Default for BgAffineParameters {
    fn default() -> Self {
        Self { reference_x: 0, reference_y: 0, a: 1 << 8, b: 0, c: 0, d: 1 << 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum BlendMode {
    #[default]
    None = 0,
    AlphaBlending = 1,
    BrightnessIncrease = 2,
    BrightnessDecrease = 3,
}

impl BlendMode {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::None,
            1 => Self::AlphaBlending,
            2 => Self::BrightnessIncrease,
            3 => Self::BrightnessDecrease,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum MasterBrightnessMode {
    #[default]
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Inside0,
    Inside1,
    InsideObj,
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapFormat {
    Indexed,
    // Bit 15 is an alpha bit on NDS; GBA direct color pixels are always opaque
    Direct { alpha_bit: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapLayout {
    pub format: BitmapFormat,
    pub width: u32,
    pub height: u32,
    pub base_addr: u32,
    pub wrap: bool,
}

/// How a BG layer is drawn under the current BG mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgKind {
    Disabled,
    Text,
    // 8-bit tile map entries
    Affine,
    // 16-bit tile map entries with flips
    ExtendedAffine,
    Bitmap(BitmapLayout),
    ThreeD,
}

/// Display status and V counter compare, shared by every engine of a console.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct DisplayStatus {
    pub vblank_irq_enabled: bool,
    pub hblank_irq_enabled: bool,
    pub v_counter_irq_enabled: bool,
    pub v_counter_target: u16,
}

impl DisplayStatus {
    // $4000004: DISPSTAT bits 0-7
    pub fn write_low(&mut self, value: u8, nine_bit_counter: bool) {
        self.vblank_irq_enabled = value.bit(3);
        self.hblank_irq_enabled = value.bit(4);
        self.v_counter_irq_enabled = value.bit(5);
        if nine_bit_counter {
            self.v_counter_target = (self.v_counter_target & 0xFF) | (u16::from(value.bit(7)) << 8);
        }

        log::debug!("DISPSTAT low write: {value:02X}");
        log::debug!("  VBlank IRQs enabled: {}", self.vblank_irq_enabled);
        log::debug!("  HBlank IRQs enabled: {}", self.hblank_irq_enabled);
        log::debug!("  V counter IRQs enabled: {}", self.v_counter_irq_enabled);
    }

    // $4000005: DISPSTAT bits 8-15
    pub fn write_high(&mut self, value: u8) {
        self.v_counter_target = (self.v_counter_target & 0x100) | u16::from(value);

        log::debug!("DISPSTAT high write: {value:02X}");
        log::debug!("  V counter match target: {}", self.v_counter_target);
    }

    pub fn read(&self, in_vblank: bool, in_hblank: bool, v_counter_match: bool) -> u16 {
        u16::from(in_vblank)
            | (u16::from(in_hblank) << 1)
            | (u16::from(v_counter_match) << 2)
            | (u16::from(self.vblank_irq_enabled) << 3)
            | (u16::from(self.hblank_irq_enabled) << 4)
            | (u16::from(self.v_counter_irq_enabled) << 5)
            | (u16::from(self.v_counter_target.bit(8)) << 7)
            | ((self.v_counter_target & 0xFF) << 8)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    // NDS register layout (32-bit DISPCNT, extended modes, MASTER_BRIGHT)
    extended: bool,
    // NDS engine A: 3D, large bitmap, display capture modes, 64KB char/screen bases
    main_engine: bool,
    // Last byte written to every address, so partial writes keep the untouched bytes
    shadow: [u8; REGISTER_SPACE_LEN],
    // Set by writes that can change layer priority order
    pub bg_order_dirty: bool,
    // DISPCNT (Display control)
    pub bg_mode: BgMode,
    pub bg0_3d: bool,
    pub bitmap_frame_buffer: BitmapFrameBuffer,
    pub oam_free_during_hblank: bool,
    pub obj_tile_mapping: ObjTileMapping,
    pub obj_tile_boundary: u8,
    pub forced_blanking: bool,
    pub bg_enabled: [bool; 4],
    pub obj_enabled: bool,
    pub window_enabled: [bool; 2],
    pub obj_window_enabled: bool,
    pub display_mode: DisplayMode,
    pub vram_display_block: u8,
    pub char_base_64kb: u32,
    pub screen_base_64kb: u32,
    // BGxCNT (BG0-3 control)
    pub bg_control: [BgControl; 4],
    // BGxHOFS (BG0-3 horizontal offset)
    pub bg_h_scroll: [u32; 4],
    // BGxVOFS (BG0-3 vertical offset)
    pub bg_v_scroll: [u32; 4],
    // BG2/3 affine registers
    pub bg_affine_parameters: [BgAffineParameters; 2],
    // WINxH (Window horizontal coordinates)
    pub window_x1: [u8; 2],
    pub window_x2: [u8; 2],
    // WINxV (Window vertical coordinates)
    pub window_y1: [u8; 2],
    pub window_y2: [u8; 2],
    // WININ (Window inside control)
    pub window_in: [WindowMask; 2],
    // WINOUT (Window outside control)
    pub window_out: WindowMask,
    pub obj_window: WindowMask,
    // MOSAIC (Mosaic size)
    pub bg_mosaic_h_size: u8,
    pub bg_mosaic_v_size: u8,
    pub obj_mosaic_h_size: u8,
    pub obj_mosaic_v_size: u8,
    // BLDCNT (Blending control)
    pub bg_blend_1st_target: [bool; 4],
    pub obj_blend_1st_target: bool,
    pub backdrop_blend_1st_target: bool,
    pub blend_mode: BlendMode,
    pub bg_blend_2nd_target: [bool; 4],
    pub obj_blend_2nd_target: bool,
    pub backdrop_blend_2nd_target: bool,
    // BLDALPHA (Alpha blending coefficients)
    pub blend_alpha_a: u8,
    pub blend_alpha_b: u8,
    // BLDY (Blending brightness coefficient)
    pub blend_brightness: u8,
    // MASTER_BRIGHT (NDS)
    pub master_brightness_mode: MasterBrightnessMode,
    pub master_brightness_factor: u8,
}

impl Registers {
    pub fn new(extended: bool, main_engine: bool) -> Self {
        let mut registers = Self {
            extended,
            main_engine,
            shadow: [0; REGISTER_SPACE_LEN],
            bg_order_dirty: true,
            bg_mode: BgMode::default(),
            bg0_3d: false,
            bitmap_frame_buffer: BitmapFrameBuffer::default(),
            oam_free_during_hblank: false,
            obj_tile_mapping: ObjTileMapping::default(),
            obj_tile_boundary: 0,
            forced_blanking: false,
            bg_enabled: [false; 4],
            obj_enabled: false,
            window_enabled: [false; 2],
            obj_window_enabled: false,
            display_mode: DisplayMode::default(),
            vram_display_block: 0,
            char_base_64kb: 0,
            screen_base_64kb: 0,
            bg_control: [BgControl::default(); 4],
            bg_h_scroll: [0; 4],
            bg_v_scroll: [0; 4],
            bg_affine_parameters: array::from_fn(|_| BgAffineParameters::default()),
            window_x1: [0; 2],
            window_x2: [0; 2],
            window_y1: [0; 2],
            window_y2: [0; 2],
            window_in: [WindowMask::NONE; 2],
            window_out: WindowMask::NONE,
            obj_window: WindowMask::NONE,
            bg_mosaic_h_size: 0,
            bg_mosaic_v_size: 0,
            obj_mosaic_h_size: 0,
            obj_mosaic_v_size: 0,
            bg_blend_1st_target: [false; 4],
            obj_blend_1st_target: false,
            backdrop_blend_1st_target: false,
            blend_mode: BlendMode::default(),
            bg_blend_2nd_target: [false; 4],
            obj_blend_2nd_target: false,
            backdrop_blend_2nd_target: false,
            blend_alpha_a: 0,
            blend_alpha_b: 0,
            blend_brightness: 0,
            master_brightness_mode: MasterBrightnessMode::default(),
            master_brightness_factor: 0,
        };

        // GBA powers on with forced blanking set; NDS powers on with the display off (DISPCNT=0)
        if !extended {
            registers.shadow[0] = 0x80;
        }
        registers.write_dispcnt(registers.shadow_u32(0));

        registers
    }

    fn shadow_u16(&self, offset: u32) -> u16 {
        let offset = offset as usize;
        u16::from_le_bytes([self.shadow[offset], self.shadow[offset + 1]])
    }

    fn shadow_u32(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        u32::from_le_bytes(array::from_fn(|i| self.shadow[offset + i]))
    }

    /// Write one or more consecutive bytes starting at `offset` within the register block.
    ///
    /// Every byte lands in the shadow first, then each logical register touched by the write is
    /// decoded once from the merged shadow value.
    pub fn write(&mut self, offset: u32, bytes: &[u8], latch: &mut BgAffineLatch) {
        for (i, &byte) in bytes.iter().enumerate() {
            match self.shadow.get_mut(offset as usize + i) {
                Some(slot) => *slot = byte,
                None => {
                    let byte_offset = offset as usize + i;
                    log::warn!("Unhandled PPU register write {byte_offset:02X} {byte:02X}");
                }
            }
        }

        let mut last_key = None;
        for i in 0..bytes.len() as u32 {
            let byte_offset = offset + i;
            if byte_offset as usize >= REGISTER_SPACE_LEN {
                break;
            }

            let key = logical_register(byte_offset);
            if last_key == Some(key) {
                continue;
            }
            last_key = Some(key);

            self.decode(key, latch);
        }
    }

    fn decode(&mut self, key: u32, latch: &mut BgAffineLatch) {
        match key {
            // GBA green swap ($4000002) shares the key and is masked off
            0x00 => self.write_dispcnt(self.shadow_u32(0x00)),
            0x08..=0x0E => self.write_bgcnt(((key - 0x08) >> 1) as usize, self.shadow_u16(key)),
            0x10..=0x1E => {
                let bg = ((key - 0x10) >> 2) as usize;
                let value = self.shadow_u16(key);
                if key.bit(1) {
                    self.write_bgvofs(bg, value);
                } else {
                    self.write_bghofs(bg, value);
                }
            }
            0x20..=0x26 | 0x30..=0x36 => self.write_bg_affine_parameter(key),
            0x28 | 0x2C | 0x38 | 0x3C => self.write_bg_reference_point(key, latch),
            0x40 | 0x42 => self.write_winh(((key - 0x40) >> 1) as usize),
            0x44 | 0x46 => self.write_winv(((key - 0x44) >> 1) as usize),
            0x48 => self.write_winin(self.shadow_u16(0x48)),
            0x4A => self.write_winout(self.shadow_u16(0x4A)),
            0x4C => self.write_mosaic(self.shadow_u16(0x4C)),
            0x50 => self.write_bldcnt(self.shadow_u16(0x50)),
            0x52 => self.write_bldalpha(self.shadow_u16(0x52)),
            0x54 => self.write_bldy(self.shadow_u16(0x54)),
            0x6C if self.extended => self.write_master_bright(self.shadow_u16(0x6C)),
            _ => log::warn!("Unhandled PPU register write {key:02X} {:04X}", self.shadow_u16(key)),
        }
    }

    /// Read a byte of a readable register; write-only registers read as 0.
    ///
    /// Returns None for addresses that are not PPU registers.
    pub fn read_byte(&self, offset: u32) -> Option<u8> {
        let halfword = self.read_halfword(offset & !1)?;
        Some(if offset.bit(0) { halfword.msb() } else { halfword.lsb() })
    }

    fn read_halfword(&self, offset: u32) -> Option<u16> {
        let value = match offset {
            0x00 => self.read_dispcnt().low_halfword(),
            0x02 if self.extended => self.read_dispcnt().high_halfword(),
            0x02 => self.shadow_u16(0x02) & 1,
            0x08..=0x0E => self.bg_control[((offset - 0x08) >> 1) as usize].read(),
            0x10..=0x46 | 0x4C | 0x54 => 0,
            0x48 => self.read_winin(),
            0x4A => self.read_winout(),
            0x50 => self.read_bldcnt(),
            0x52 => self.read_bldalpha(),
            0x6C if self.extended => self.read_master_bright(),
            _ => return None,
        };

        log::trace!("PPU register read {offset:02X} {value:04X}");

        Some(value)
    }

    fn dispcnt_mask(&self) -> u32 {
        match (self.extended, self.main_engine) {
            // Bit 3 (CGB mode) is read-only
            (false, _) => 0x0000_FFF7,
            (true, true) => 0xFFFF_FFFF,
            // No 3D, VRAM display, or 64KB char/screen bases on engine B
            (true, false) => 0xC0F1_FFF7,
        }
    }

    // $4000000: DISPCNT (Display control)
    fn write_dispcnt(&mut self, value: u32) {
        let value = value & self.dispcnt_mask();

        self.bg_mode = BgMode::from_bits(value, self.extended && self.main_engine);
        self.forced_blanking = value.bit(7);
        self.bg_enabled = array::from_fn(|i| value.bit((8 + i) as u8));
        self.obj_enabled = value.bit(12);
        self.window_enabled = [value.bit(13), value.bit(14)];
        self.obj_window_enabled = value.bit(15);

        if self.extended {
            self.bg0_3d = value.bit(3);
            self.obj_tile_mapping = ObjTileMapping::from_bit(value.bit(4));
            self.display_mode = DisplayMode::from_bits(value >> 16);
            self.vram_display_block = value.bits(18..=19) as u8;
            self.obj_tile_boundary = value.bits(20..=21) as u8;
            self.oam_free_during_hblank = value.bit(23);
            self.char_base_64kb = value.bits(24..=26);
            self.screen_base_64kb = value.bits(27..=29);
        } else {
            self.bitmap_frame_buffer = BitmapFrameBuffer::from_bit(value.bit(4));
            self.oam_free_during_hblank = value.bit(5);
            self.obj_tile_mapping = ObjTileMapping::from_bit(value.bit(6));
        }

        self.bg_order_dirty = true;

        log::debug!("DISPCNT write: {value:08X}");
        log::debug!("  BG mode: {:?}", self.bg_mode);
        log::debug!("  BG0 3D: {}", self.bg0_3d);
        log::debug!("  Bitmap frame buffer: {:?}", self.bitmap_frame_buffer);
        log::debug!("  OAM accessible during HBlank: {}", self.oam_free_during_hblank);
        log::debug!("  OBJ tile mapping: {:?}", self.obj_tile_mapping);
        log::debug!("  OBJ 1D tile boundary: {}", 32 << self.obj_tile_boundary);
        log::debug!("  Forced blanking enabled: {}", self.forced_blanking);
        log::debug!("  BGs enabled: {:?}", self.bg_enabled);
        log::debug!("  OBJ enabled: {}", self.obj_enabled);
        log::debug!("  Window 0 enabled: {}", self.window_enabled[0]);
        log::debug!("  Window 1 enabled: {}", self.window_enabled[1]);
        log::debug!("  OBJ window enabled: {}", self.obj_window_enabled);
        log::debug!("  Display mode: {:?}", self.display_mode);
        log::debug!("  VRAM display block: {}", self.vram_display_block);
        log::debug!("  Character base: {:05X}", self.char_base_64kb << 16);
        log::debug!("  Screen base: {:05X}", self.screen_base_64kb << 16);
    }

    // $4000000: DISPCNT (Display control)
    pub fn read_dispcnt(&self) -> u32 {
        let common = self.bg_mode.to_bits()
            | (u32::from(self.forced_blanking) << 7)
            | (u32::from(bool_array_to_bits(self.bg_enabled)) << 8)
            | (u32::from(self.obj_enabled) << 12)
            | (u32::from(self.window_enabled[0]) << 13)
            | (u32::from(self.window_enabled[1]) << 14)
            | (u32::from(self.obj_window_enabled) << 15);

        if !self.extended {
            return common
                | ((self.bitmap_frame_buffer as u32) << 4)
                | (u32::from(self.oam_free_during_hblank) << 5)
                | ((self.obj_tile_mapping as u32) << 6);
        }

        // Bitmap OBJ mapping and extended palette bits are stored but have no effect
        let stored_only = self.shadow_u32(0x00) & 0xC040_0060 & self.dispcnt_mask();

        common
            | stored_only
            | (u32::from(self.bg0_3d) << 3)
            | ((self.obj_tile_mapping as u32) << 4)
            | (self.display_mode.to_bits() << 16)
            | (u32::from(self.vram_display_block) << 18)
            | (u32::from(self.obj_tile_boundary) << 20)
            | (u32::from(self.oam_free_during_hblank) << 23)
            | (self.char_base_64kb << 24)
            | (self.screen_base_64kb << 27)
    }

    // $4000008-$400000E: BG0CNT/BG1CNT/BG2CNT/BG3CNT (BG0-3 control)
    fn write_bgcnt(&mut self, index: usize, value: u16) {
        let mask = match (self.extended, index) {
            // GBA: character base is 2 bits, and overflow behavior only exists on BG2/BG3
            (false, 0 | 1) => 0xDFCF,
            (false, _) => 0xFFCF,
            (true, _) => 0xFFFF,
        };
        self.bg_control[index].write(value & mask);
        self.bg_order_dirty = true;

        log::debug!("BG{index}CNT write: {value:04X}");
        log::debug!("  Priority: {}", self.bg_control[index].priority);
        log::debug!("  Tile data base address: {:05X}", self.bg_tile_data_addr(index));
        log::debug!("  Mosaic enabled: {}", self.bg_control[index].mosaic);
        log::debug!("  Bits per pixel: {:?}", self.bg_control[index].bpp);
        log::debug!("  Tile map base address: {:05X}", self.bg_tile_map_addr(index));
        log::debug!("  Affine overflow behavior: {:?}", self.bg_control[index].affine_overflow);
        log::debug!("  Screen size: {}", self.bg_control[index].size as u8);
    }

    // $4000010/$4000014/$4000018/$400001C: BG0HOFS/BG1HOFS/BG2HOFS/BG3HOFS
    fn write_bghofs(&mut self, index: usize, value: u16) {
        self.bg_h_scroll[index] = (value & 0x1FF).into();

        log::debug!("BG{index}HOFS write: {value:04X}");
    }

    // $4000012/$4000016/$400001A/$400001E: BG0VOFS/BG1VOFS/BG2VOFS/BG3VOFS
    fn write_bgvofs(&mut self, index: usize, value: u16) {
        self.bg_v_scroll[index] = (value & 0x1FF).into();

        log::debug!("BG{index}VOFS write: {value:04X}");
    }

    // $4000020-$4000026 / $4000030-$4000036: BG2PA-BG2PD / BG3PA-BG3PD
    fn write_bg_affine_parameter(&mut self, key: u32) {
        let bg_idx = ((key >> 4) & 1) as usize;
        // Parameters are signed 8.8 fixed point; sign extend to 32-bit
        let value = self.shadow_u16(key);
        let parameter = i32::from(value as i16);
        let affine_parameters = &mut self.bg_affine_parameters[bg_idx];

        let name = match key & 0x6 {
            0x0 => {
                affine_parameters.a = parameter;
                "PA"
            }
            0x2 => {
                affine_parameters.b = parameter;
                "PB"
            }
            0x4 => {
                affine_parameters.c = parameter;
                "PC"
            }
            0x6 => {
                affine_parameters.d = parameter;
                "PD"
            }
            _ => unreachable!("value & 6 is always one of the above 4 values"),
        };

        log::debug!("BG{}{name} write: {value:04X}", bg_idx + 2);
    }

    // $4000028-$400002F / $4000038-$400003F: BG2X/BG2Y / BG3X/BG3Y
    fn write_bg_reference_point(&mut self, key: u32, latch: &mut BgAffineLatch) {
        let bg_idx = ((key >> 4) & 1) as usize;
        // 28-bit signed value; sign extend from bit 27
        let value = ((self.shadow_u32(key) << 4) as i32) >> 4;
        let affine_parameters = &mut self.bg_affine_parameters[bg_idx];

        // Any write to a reference point register reloads the internal latch
        if key.bit(2) {
            affine_parameters.reference_y = value;
            latch.y[bg_idx] = value;
            log::debug!("BG{}Y write: {value:07X}", bg_idx + 2);
        } else {
            affine_parameters.reference_x = value;
            latch.x[bg_idx] = value;
            log::debug!("BG{}X write: {value:07X}", bg_idx + 2);
        }
    }

    // $4000040/$4000042: WIN0H/WIN1H (Window 0/1 horizontal coordinates)
    fn write_winh(&mut self, window: usize) {
        let value = self.shadow_u16(0x40 + 2 * window as u32);
        self.window_x1[window] = value.msb();
        self.window_x2[window] = value.lsb();

        log::debug!("WIN{window}H write: {value:04X}");
        log::debug!("  X1: {}", self.window_x1[window]);
        log::debug!("  X2: {}", self.window_x2[window]);
    }

    // $4000044/$4000046: WIN0V/WIN1V (Window 0/1 vertical coordinates)
    fn write_winv(&mut self, window: usize) {
        let value = self.shadow_u16(0x44 + 2 * window as u32);
        self.window_y1[window] = value.msb();
        self.window_y2[window] = value.lsb();

        log::debug!("WIN{window}V write: {value:04X}");
        log::debug!("  Y1: {}", self.window_y1[window]);
        log::debug!("  Y2: {}", self.window_y2[window]);
    }

    // $4000048: WININ (Window inside control)
    fn read_winin(&self) -> u16 {
        u16::from_le_bytes([self.window_in[0].bits(), self.window_in[1].bits()])
    }

    // $4000048: WININ (Window inside control)
    fn write_winin(&mut self, value: u16) {
        self.window_in = [WindowMask::from_bits(value.lsb()), WindowMask::from_bits(value.msb())];

        log::debug!("WININ write: {value:04X}");
        log::debug!("  Window 0: {:?}", self.window_in[0]);
        log::debug!("  Window 1: {:?}", self.window_in[1]);
    }

    // $400004A: WINOUT (Window outside control)
    fn read_winout(&self) -> u16 {
        u16::from_le_bytes([self.window_out.bits(), self.obj_window.bits()])
    }

    // $400004A: WINOUT (Window outside control)
    fn write_winout(&mut self, value: u16) {
        self.window_out = WindowMask::from_bits(value.lsb());
        self.obj_window = WindowMask::from_bits(value.msb());

        log::debug!("WINOUT write: {value:04X}");
        log::debug!("  Outside windows: {:?}", self.window_out);
        log::debug!("  OBJ window: {:?}", self.obj_window);
    }

    // $400004C: MOSAIC (Mosaic size)
    fn write_mosaic(&mut self, value: u16) {
        let [bg_mosaic, obj_mosaic] = value.to_le_bytes();
        self.bg_mosaic_h_size = bg_mosaic & 0xF;
        self.bg_mosaic_v_size = bg_mosaic >> 4;
        self.obj_mosaic_h_size = obj_mosaic & 0xF;
        self.obj_mosaic_v_size = obj_mosaic >> 4;

        log::debug!("MOSAIC write: {value:04X}");
        log::debug!("  BG H size: {}", self.bg_mosaic_h_size);
        log::debug!("  BG V size: {}", self.bg_mosaic_v_size);
        log::debug!("  OBJ H size: {}", self.obj_mosaic_h_size);
        log::debug!("  OBJ V size: {}", self.obj_mosaic_v_size);
    }

    // $4000050: BLDCNT (Blending control)
    fn read_bldcnt(&self) -> u16 {
        let bg_1st_target = bool_array_to_bits(self.bg_blend_1st_target);
        let bg_2nd_target = bool_array_to_bits(self.bg_blend_2nd_target);

        bg_1st_target
            | (u16::from(self.obj_blend_1st_target) << 4)
            | (u16::from(self.backdrop_blend_1st_target) << 5)
            | ((self.blend_mode as u16) << 6)
            | (bg_2nd_target << 8)
            | (u16::from(self.obj_blend_2nd_target) << 12)
            | (u16::from(self.backdrop_blend_2nd_target) << 13)
    }

    // $4000050: BLDCNT (Blending control)
    fn write_bldcnt(&mut self, value: u16) {
        self.bg_blend_1st_target = array::from_fn(|i| value.bit(i as u8));
        self.obj_blend_1st_target = value.bit(4);
        self.backdrop_blend_1st_target = value.bit(5);
        self.blend_mode = BlendMode::from_bits(value >> 6);
        self.bg_blend_2nd_target = array::from_fn(|i| value.bit((8 + i) as u8));
        self.obj_blend_2nd_target = value.bit(12);
        self.backdrop_blend_2nd_target = value.bit(13);

        log::debug!("BLDCNT write: {value:04X}");
        log::debug!("  Blend mode: {:?}", self.blend_mode);
        log::debug!("  BG 1st target: {:?}", self.bg_blend_1st_target);
        log::debug!("  OBJ 1st target: {}", self.obj_blend_1st_target);
        log::debug!("  Backdrop 1st target: {}", self.backdrop_blend_1st_target);
        log::debug!("  BG 2nd target: {:?}", self.bg_blend_2nd_target);
        log::debug!("  OBJ 2nd target: {}", self.obj_blend_2nd_target);
        log::debug!("  Backdrop 2nd target: {}", self.backdrop_blend_2nd_target);
    }

    // $4000052: BLDALPHA (Alpha blending coefficients)
    fn read_bldalpha(&self) -> u16 {
        u16::from_le_bytes([self.blend_alpha_a, self.blend_alpha_b])
    }

    // $4000052: BLDALPHA (Alpha blending coefficients)
    fn write_bldalpha(&mut self, value: u16) {
        self.blend_alpha_a = (value & 0x1F) as u8;
        self.blend_alpha_b = ((value >> 8) & 0x1F) as u8;

        log::debug!("BLDALPHA write: {value:04X}");
        log::debug!("  A: {}", self.blend_alpha_a);
        log::debug!("  B: {}", self.blend_alpha_b);
    }

    // $4000054: BLDY (Blending brightness coefficient)
    fn write_bldy(&mut self, value: u16) {
        self.blend_brightness = (value & 0x1F) as u8;

        log::debug!("BLDY write: {value:04X} (coefficient = {})", self.blend_brightness);
    }

    // $400006C: MASTER_BRIGHT (NDS)
    fn read_master_bright(&self) -> u16 {
        let mode: u16 = match self.master_brightness_mode {
            MasterBrightnessMode::None => 0,
            MasterBrightnessMode::Up => 1,
            MasterBrightnessMode::Down => 2,
        };
        u16::from(self.master_brightness_factor) | (mode << 14)
    }

    // $400006C: MASTER_BRIGHT (NDS)
    fn write_master_bright(&mut self, value: u16) {
        self.master_brightness_factor = (value & 0x1F) as u8;
        self.master_brightness_mode = match value >> 14 {
            1 => MasterBrightnessMode::Up,
            2 => MasterBrightnessMode::Down,
            // Mode 3 is reserved and behaves like no adjustment
            _ => MasterBrightnessMode::None,
        };

        log::debug!("MASTER_BRIGHT write: {value:04X}");
        log::debug!("  Mode: {:?}", self.master_brightness_mode);
        log::debug!("  Factor: {}", self.master_brightness_factor);
    }

    pub fn bg_tile_data_addr(&self, bg: usize) -> u32 {
        (self.char_base_64kb << 16) + (self.bg_control[bg].char_block << 14)
    }

    pub fn bg_tile_map_addr(&self, bg: usize) -> u32 {
        (self.screen_base_64kb << 16) + (self.bg_control[bg].screen_block << 11)
    }

    pub fn window_mask(&self, window: Window) -> WindowMask {
        match window {
            Window::Inside0 => self.window_in[0],
            Window::Inside1 => self.window_in[1],
            Window::InsideObj => self.obj_window,
            Window::Outside => self.window_out,
        }
    }

    pub fn any_window_enabled(&self) -> bool {
        self.window_enabled[0] || self.window_enabled[1] || self.obj_window_enabled
    }

    /// GBA bitmap BG modes, where OBJ tiles 0-511 overlap the frame buffers
    pub fn is_gba_bitmap_mode(&self) -> bool {
        !self.extended && matches!(self.bg_mode, BgMode::Three | BgMode::Four | BgMode::Five)
    }

    pub fn bg_kind(&self, bg: usize) -> BgKind {
        if self.extended { self.nds_bg_kind(bg) } else { self.gba_bg_kind(bg) }
    }

    #[allow(clippy::match_same_arms)]
    fn gba_bg_kind(&self, bg: usize) -> BgKind {
        const MODE_5_WIDTH: u32 = 160;
        const MODE_5_HEIGHT: u32 = 128;

        let bitmap = |format, width, height, base_addr| {
            BgKind::Bitmap(BitmapLayout { format, width, height, base_addr, wrap: false })
        };
        let direct = BitmapFormat::Direct { alpha_bit: false };
        let frame_buffer_addr = self.bitmap_frame_buffer.vram_address();

        match (self.bg_mode, bg) {
            (BgMode::Zero, _) | (BgMode::One, 0 | 1) => BgKind::Text,
            (BgMode::One, 2) | (BgMode::Two, 2 | 3) => BgKind::Affine,
            (BgMode::Three, 2) => bitmap(direct, 240, 160, 0),
            (BgMode::Four, 2) => bitmap(BitmapFormat::Indexed, 240, 160, frame_buffer_addr),
            (BgMode::Five, 2) => bitmap(direct, MODE_5_WIDTH, MODE_5_HEIGHT, frame_buffer_addr),
            _ => BgKind::Disabled,
        }
    }

    fn nds_bg_kind(&self, bg: usize) -> BgKind {
        match (self.bg_mode, bg) {
            (BgMode::Invalid(_), _) => BgKind::Disabled,
            (_, 0) if self.bg0_3d => BgKind::ThreeD,
            (BgMode::Six, 1 | 3) => BgKind::Disabled,
            (BgMode::Six, 2) => {
                let (width, height) = self.bg_control[2].size.large_bitmap_dimensions();
                BgKind::Bitmap(BitmapLayout {
                    format: BitmapFormat::Indexed,
                    width,
                    height,
                    base_addr: 0,
                    wrap: self.bg_control[2].affine_overflow == AffineOverflowBehavior::Wrap,
                })
            }
            (_, 0 | 1) | (BgMode::Zero, _) | (BgMode::One | BgMode::Three, 2) => BgKind::Text,
            (BgMode::One | BgMode::Two, 3) | (BgMode::Two | BgMode::Four, 2) => BgKind::Affine,
            _ => self.extended_bg_kind(bg),
        }
    }

    // Extended BG: BGxCNT bit 7 and bit 2 select between 16-bit tile maps and two bitmap formats
    fn extended_bg_kind(&self, bg: usize) -> BgKind {
        let control = &self.bg_control[bg];
        if control.bpp == BitsPerPixel::Four {
            return BgKind::ExtendedAffine;
        }

        let format = if control.char_block.bit(0) {
            BitmapFormat::Direct { alpha_bit: true }
        } else {
            BitmapFormat::Indexed
        };
        let (width, height) = control.size.bitmap_dimensions();

        BgKind::Bitmap(BitmapLayout {
            format,
            width,
            height,
            base_addr: control.screen_block << 14,
            wrap: control.affine_overflow == AffineOverflowBehavior::Wrap,
        })
    }
}

// Registers wider than 16 bits are decoded as a whole so that both halves stay consistent
fn logical_register(offset: u32) -> u32 {
    match offset {
        0x00..=0x03 | 0x28..=0x2F | 0x38..=0x3F => offset & !3,
        _ => offset & !1,
    }
}

fn bool_array_to_bits(arr: [bool; 4]) -> u16 {
    arr.into_iter().enumerate().map(|(i, b)| u16::from(b) << i).fold(0, |a, b| a | b)
}
