//! PPU public interface: configuration, host callbacks, errors, and save states

use crate::ppu::Ppu;
use bincode::config::{Fixint, LittleEndian};
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use ppu_config::{ColorCorrection, ConsoleVariant};
use ppu_proc_macros::ConfigDisplay;
use std::io;
use std::io::{BufReader, BufWriter, Write};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, ConfigDisplay)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PpuConfig {
    pub variant: ConsoleVariant,
    pub color_correction: ColorCorrection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PpuInterrupt {
    VBlank,
    HBlank,
    VCounter,
}

/// Signals the PPU sends to the rest of the system.
///
/// Interrupts are edge-triggered: the PPU only calls `set_interrupt_flag` for interrupts that
/// are enabled in DISPSTAT. Masking beyond that belongs to the interrupt controller.
pub trait PpuBus {
    fn set_interrupt_flag(&mut self, interrupt: PpuInterrupt);

    fn notify_hblank_dma(&mut self);

    fn notify_vblank_dma(&mut self);

    /// Start of the last visible line's HBlank.
    fn notify_display_dma(&mut self);

    /// Fill `out` with one line of 3D output for BG0 passthrough (bit 15 = opaque).
    ///
    /// Returns false if no 3D renderer is attached, in which case BG0 is transparent.
    fn render_3d_line(&mut self, _line: u32, _out: &mut [u16]) -> bool {
        false
    }
}

#[derive(Debug, Error)]
pub enum PpuError {
    #[error("error saving state: {source}")]
    SaveState {
        #[from]
        source: EncodeError,
    },
    #[error("error loading state: {source}")]
    LoadState {
        #[from]
        source: DecodeError,
    },
    #[error("I/O error writing save state: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("save state is for {actual} but PPU is configured for {expected}")]
    VariantMismatch { expected: ConsoleVariant, actual: ConsoleVariant },
}

#[derive(Debug, Error)]
pub enum RenderError<RErr> {
    #[error("Error rendering video output: {0}")]
    Render(RErr),
}

const BINCODE_CONFIG: bincode::config::Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_little_endian().with_fixed_int_encoding();

/// # Errors
///
/// Returns an error if serialization fails or the writer returns an error.
pub fn save_state<W>(ppu: &Ppu, writer: W) -> Result<(), PpuError>
where
    W: io::Write,
{
    let mut writer = BufWriter::new(writer);

    bincode::encode_into_std_write(ppu.config().variant, &mut writer, BINCODE_CONFIG)?;
    bincode::encode_into_std_write(ppu, &mut writer, BINCODE_CONFIG)?;
    writer.flush()?;

    Ok(())
}

/// Load a state written by [`save_state`], checking it was saved by the expected console.
///
/// # Errors
///
/// Returns an error if deserialization fails or the state belongs to the other variant.
pub fn load_state<R>(reader: R, expected: ConsoleVariant) -> Result<Ppu, PpuError>
where
    R: io::Read,
{
    let mut reader = BufReader::new(reader);

    let actual: ConsoleVariant = bincode::decode_from_std_read(&mut reader, BINCODE_CONFIG)?;
    if actual != expected {
        return Err(PpuError::VariantMismatch { expected, actual });
    }

    let ppu = bincode::decode_from_std_read(&mut reader, BINCODE_CONFIG)?;
    Ok(ppu)
}
