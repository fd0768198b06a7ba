//! Video memory: flat on the GBA, nine switchable banks on the NDS
//!
//! NDS banks are composited into contiguous per-role views (engine A BG/OBJ, engine B BG/OBJ, and
//! the flat LCDC view) so the renderers can index VRAM the same way on both consoles. Views are
//! rebuilt when a `VRAMCNT` register changes and kept in sync by write-through otherwise.

use bincode::{Decode, Encode};
use ppu_common::boxedarray::BoxedByteArray;
use ppu_common::num::GetBit;
use ppu_proc_macros::EnumAll;
use std::array;

const GBA_VRAM_LEN: usize = 96 * 1024;
const GBA_VRAM_ADDR_MASK: usize = (128 * 1024) - 1;
const GBA_BG_VRAM_LEN: usize = 64 * 1024;

const LCDC_VIEW_LEN: usize = 0xA4000;
const ENGINE_A_BG_LEN: usize = 512 * 1024;
const ENGINE_A_OBJ_LEN: usize = 256 * 1024;
const ENGINE_B_BG_LEN: usize = 128 * 1024;
const ENGINE_B_OBJ_LEN: usize = 128 * 1024;

const BANK_COUNT: usize = 9;

// A-I
const BANK_LEN: [usize; BANK_COUNT] = [
    128 * 1024,
    128 * 1024,
    128 * 1024,
    128 * 1024,
    64 * 1024,
    16 * 1024,
    16 * 1024,
    32 * 1024,
    16 * 1024,
];

// Fixed location of each bank in the LCDC view
const LCDC_OFFSET: [usize; BANK_COUNT] =
    [0x00000, 0x20000, 0x40000, 0x60000, 0x80000, 0x90000, 0x94000, 0x98000, 0xA0000];

/// Bounds-checked read-only window into video memory; out-of-range reads return 0.
#[derive(Debug, Clone, Copy)]
pub struct VramView<'a> {
    data: &'a [u8],
}

impl<'a> VramView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn byte(self, address: u32) -> u8 {
        self.data.get(address as usize).copied().unwrap_or(0)
    }

    pub fn halfword(self, address: u32) -> u16 {
        u16::from_le_bytes(self.bytes(address))
    }

    pub fn bytes<const N: usize>(self, address: u32) -> [u8; N] {
        let start = address as usize;
        match self.data.get(start..start + N) {
            Some(slice) => {
                let mut bytes = [0; N];
                bytes.copy_from_slice(slice);
                bytes
            }
            None => array::from_fn(|i| self.byte(address.wrapping_add(i as u32))),
        }
    }
}

/// Everything one engine's renderers read from VRAM during a line.
#[derive(Debug, Clone, Copy)]
pub struct EngineVram<'a> {
    // Tile maps and tile data
    pub bg: VramView<'a>,
    // Bitmap BG data; same as `bg` on the NDS, all of VRAM on the GBA
    pub bitmap: VramView<'a>,
    pub obj: VramView<'a>,
    // NDS display mode 2 source
    pub lcdc: VramView<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumAll)]
enum ViewId {
    Lcdc,
    EngineABg,
    EngineAObj,
    EngineBBg,
    EngineBObj,
}

// Where an enabled bank appears given its VRAMCNT value, or None if it feeds no 2D view
fn bank_mapping(bank: usize, control: u8) -> Option<(ViewId, usize)> {
    if !control.bit(7) {
        return None;
    }

    let mst = if bank < 2 { control & 3 } else { control & 7 };
    let offset = usize::from((control >> 3) & 3);

    let mapping = match (bank, mst) {
        (_, 0) => (ViewId::Lcdc, LCDC_OFFSET[bank]),
        (0..=3, 1) => (ViewId::EngineABg, 0x20000 * offset),
        (0 | 1, 2) => (ViewId::EngineAObj, 0x20000 * (offset & 1)),
        (2, 4) => (ViewId::EngineBBg, 0),
        (3, 4) => (ViewId::EngineBObj, 0),
        (4, 1) => (ViewId::EngineABg, 0),
        (4, 2) => (ViewId::EngineAObj, 0),
        (5 | 6, 1) => (ViewId::EngineABg, 0x4000 * (offset & 1) + 0x10000 * (offset >> 1)),
        (5 | 6, 2) => (ViewId::EngineAObj, 0x4000 * (offset & 1) + 0x10000 * (offset >> 1)),
        (7, 1) => (ViewId::EngineBBg, 0),
        (8, 1) => (ViewId::EngineBBg, 0x8000),
        (8, 2) => (ViewId::EngineBObj, 0),
        // Texture, texture palette, and extended palette roles
        _ => return None,
    };

    Some(mapping)
}

// Bus address (0x6000000-0x68FFFFF) to view and offset
fn bus_location(address: u32) -> (ViewId, usize) {
    let address = address as usize;
    match (address >> 21) & 7 {
        0 => (ViewId::EngineABg, address & (ENGINE_A_BG_LEN - 1)),
        1 => (ViewId::EngineBBg, address & (ENGINE_B_BG_LEN - 1)),
        2 => (ViewId::EngineAObj, address & (ENGINE_A_OBJ_LEN - 1)),
        3 => (ViewId::EngineBObj, address & (ENGINE_B_OBJ_LEN - 1)),
        _ => (ViewId::Lcdc, address & 0xFFFFF),
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct VramBank {
    data: Vec<u8>,
    control: u8,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct BankedVram {
    banks: [VramBank; BANK_COUNT],
    lcdc: BoxedByteArray<LCDC_VIEW_LEN>,
    engine_a_bg: BoxedByteArray<ENGINE_A_BG_LEN>,
    engine_a_obj: BoxedByteArray<ENGINE_A_OBJ_LEN>,
    engine_b_bg: BoxedByteArray<ENGINE_B_BG_LEN>,
    engine_b_obj: BoxedByteArray<ENGINE_B_OBJ_LEN>,
    dirty: bool,
}

impl BankedVram {
    fn new() -> Self {
        Self {
            banks: array::from_fn(|i| VramBank { data: vec![0; BANK_LEN[i]], control: 0 }),
            lcdc: BoxedByteArray::new(),
            engine_a_bg: BoxedByteArray::new(),
            engine_a_obj: BoxedByteArray::new(),
            engine_b_bg: BoxedByteArray::new(),
            engine_b_obj: BoxedByteArray::new(),
            dirty: false,
        }
    }

    fn view(&self, view: ViewId) -> &[u8] {
        match view {
            ViewId::Lcdc => self.lcdc.as_slice(),
            ViewId::EngineABg => self.engine_a_bg.as_slice(),
            ViewId::EngineAObj => self.engine_a_obj.as_slice(),
            ViewId::EngineBBg => self.engine_b_bg.as_slice(),
            ViewId::EngineBObj => self.engine_b_obj.as_slice(),
        }
    }

    // (bank, offset in bank) for every bank mapped over the given view offset
    fn mapped_banks(&self, view: ViewId, offset: usize) -> impl Iterator<Item = (usize, usize)> {
        self.banks.iter().enumerate().filter_map(move |(i, bank)| {
            let (bank_view, base) = bank_mapping(i, bank.control)?;
            let bank_offset = offset.checked_sub(base)?;
            (bank_view == view && bank_offset < bank.data.len()).then_some((i, bank_offset))
        })
    }

    fn read_byte(&self, address: u32) -> u8 {
        let (view, offset) = bus_location(address);
        // Overlapping banks read as the OR of every mapped bank
        self.mapped_banks(view, offset)
            .fold(0, |value, (bank, bank_offset)| value | self.banks[bank].data[bank_offset])
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        let (view, offset) = bus_location(address);

        let mut mapped = false;
        for (i, bank) in self.banks.iter_mut().enumerate() {
            let Some((bank_view, base)) = bank_mapping(i, bank.control) else { continue };
            if bank_view != view {
                continue;
            }
            let Some(slot) = offset.checked_sub(base).and_then(|o| bank.data.get_mut(o)) else {
                continue;
            };

            *slot = value;
            mapped = true;
        }

        if !mapped {
            log::debug!("VRAM write to unmapped address {address:08X} {value:02X}");
            return;
        }

        // All overlapping banks now hold the same byte, which is also their OR composite.
        // Views are rebuilt wholesale on the next refresh if a mapping changed
        if !self.dirty
            && let Some(slot) = self.view_mut(view).get_mut(offset)
        {
            *slot = value;
        }
    }

    fn view_mut(&mut self, view: ViewId) -> &mut [u8] {
        match view {
            ViewId::Lcdc => self.lcdc.as_mut_slice(),
            ViewId::EngineABg => self.engine_a_bg.as_mut_slice(),
            ViewId::EngineAObj => self.engine_a_obj.as_mut_slice(),
            ViewId::EngineBBg => self.engine_b_bg.as_mut_slice(),
            ViewId::EngineBObj => self.engine_b_obj.as_mut_slice(),
        }
    }

    fn write_control(&mut self, bank: usize, value: u8) {
        let control = &mut self.banks[bank].control;
        if *control == value {
            return;
        }
        *control = value;
        self.dirty = true;

        let bank_name = char::from(b'A' + bank as u8);
        log::debug!("VRAMCNT_{bank_name} write: {value:02X}");
        log::debug!("  Enabled: {}", value.bit(7));
        match bank_mapping(bank, value) {
            Some((view, base)) => log::debug!("  Mapped to {view:?} at {base:05X}"),
            None if value.bit(7) => log::debug!("  Mapped to a role with no 2D view"),
            None => {}
        }
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        for view in ViewId::ALL {
            self.view_mut(view).fill(0);
        }

        for i in 0..BANK_COUNT {
            let Some((view, base)) = bank_mapping(i, self.banks[i].control) else { continue };

            let Self { banks, lcdc, engine_a_bg, engine_a_obj, engine_b_bg, engine_b_obj, .. } =
                self;
            let view_data = match view {
                ViewId::Lcdc => lcdc.as_mut_slice(),
                ViewId::EngineABg => engine_a_bg.as_mut_slice(),
                ViewId::EngineAObj => engine_a_obj.as_mut_slice(),
                ViewId::EngineBBg => engine_b_bg.as_mut_slice(),
                ViewId::EngineBObj => engine_b_obj.as_mut_slice(),
            };
            let Some(view_data) = view_data.get_mut(base..) else { continue };

            for (dst, &src) in view_data.iter_mut().zip(&banks[i].data) {
                *dst |= src;
            }
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub enum Vram {
    Flat(BoxedByteArray<GBA_VRAM_LEN>),
    Banked(Box<BankedVram>),
}

impl Vram {
    pub fn new(banked: bool) -> Self {
        if banked {
            Self::Banked(Box::new(BankedVram::new()))
        } else {
            Self::Flat(BoxedByteArray::new())
        }
    }

    // GBA VRAM is 96KB mirrored in 128KB, with the upper 32KB mirrored twice
    pub fn gba_address(address: u32) -> usize {
        let vram_addr = (address as usize) & GBA_VRAM_ADDR_MASK;
        if vram_addr & 0x10000 != 0 { 0x10000 | (vram_addr & 0x7FFF) } else { vram_addr }
    }

    pub fn engine_view(&self, engine: usize) -> EngineVram<'_> {
        match self {
            Self::Flat(vram) => EngineVram {
                bg: VramView::new(&vram[..GBA_BG_VRAM_LEN]),
                bitmap: VramView::new(vram.as_slice()),
                obj: VramView::new(&vram[GBA_BG_VRAM_LEN..]),
                lcdc: VramView::new(&[]),
            },
            Self::Banked(vram) => {
                let (bg, obj) = if engine == 0 {
                    (vram.view(ViewId::EngineABg), vram.view(ViewId::EngineAObj))
                } else {
                    (vram.view(ViewId::EngineBBg), vram.view(ViewId::EngineBObj))
                };
                EngineVram {
                    bg: VramView::new(bg),
                    bitmap: VramView::new(bg),
                    obj: VramView::new(obj),
                    lcdc: VramView::new(vram.view(ViewId::Lcdc)),
                }
            }
        }
    }

    /// Rebuild bank views if any bank mapping changed since the last refresh.
    pub fn refresh(&mut self) {
        if let Self::Banked(vram) = self {
            vram.refresh();
        }
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        match self {
            Self::Flat(vram) => vram[Self::gba_address(address)],
            Self::Banked(vram) => vram.read_byte(address),
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        match self {
            Self::Flat(vram) => vram[Self::gba_address(address)] = value,
            Self::Banked(vram) => vram.write_byte(address, value),
        }
    }

    pub fn read_halfword(&self, address: u32) -> u16 {
        let address = address & !1;
        u16::from_le_bytes([self.read_byte(address), self.read_byte(address | 1)])
    }

    pub fn write_halfword(&mut self, address: u32, value: u16) {
        let address = address & !1;
        let [lsb, msb] = value.to_le_bytes();
        self.write_byte(address, lsb);
        self.write_byte(address | 1, msb);
    }

    /// `VRAMCNT_A` through `VRAMCNT_I`; None if the index is not a bank.
    pub fn read_control(&self, bank: usize) -> Option<u8> {
        match self {
            Self::Banked(vram) => vram.banks.get(bank).map(|bank| bank.control),
            Self::Flat(_) => None,
        }
    }

    pub fn write_control(&mut self, bank: usize, value: u8) {
        match self {
            Self::Banked(vram) if bank < BANK_COUNT => vram.write_control(bank, value),
            _ => log::warn!("Unhandled VRAMCNT write to bank {bank} {value:02X}"),
        }
    }
}
