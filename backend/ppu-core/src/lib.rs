//! Scanline-based 2D picture-processing core for the GBA and the NDS 2D engines

pub mod api;
mod ppu;
pub mod scheduler;

pub use ppu::{DisplayId, LineState, Ppu, VariantConfig};
