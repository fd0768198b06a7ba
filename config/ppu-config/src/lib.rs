use bincode::{Decode, Encode};
use ppu_proc_macros::{EnumAll, EnumDisplay};

/// Which console's picture-processing unit to emulate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Encode, Decode, EnumDisplay, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(ppu_proc_macros::CustomValueEnum))]
pub enum ConsoleVariant {
    /// Single display, one 2D engine, flat VRAM
    #[default]
    Gba,
    /// Two displays, two 2D engines, bank-switched VRAM
    Nds,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Encode, Decode, EnumDisplay, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(ppu_proc_macros::CustomValueEnum))]
pub enum ColorCorrection {
    #[default]
    None,
    /// Approximate the washed-out colors of the original reflective LCD
    GbaLcd,
}
