use ppu_common::frontend::Color;
use ppu_config::ColorCorrection;
use std::array;
use std::sync::LazyLock;

const RGB_5_TO_8: &[u8; 32] = &[
    0, 8, 16, 25, 33, 41, 49, 58, 66, 74, 82, 90, 99, 107, 115, 123, 132, 140, 148, 156, 165, 173,
    181, 189, 197, 206, 214, 222, 230, 239, 247, 255,
];

pub type ColorTable = [Color; 32768];

static NONE_TABLE: LazyLock<Box<ColorTable>> = LazyLock::new(|| {
    Box::new(array::from_fn(|color| {
        let r = color & 0x1F;
        let g = (color >> 5) & 0x1F;
        let b = (color >> 10) & 0x1F;
        Color::rgb(RGB_5_TO_8[r], RGB_5_TO_8[g], RGB_5_TO_8[b])
    }))
});

static GBA_LCD_TABLE: LazyLock<Box<ColorTable>> =
    LazyLock::new(|| Box::new(array::from_fn(gba_lcd_correction)));

pub fn table(color_correction: ColorCorrection) -> &'static ColorTable {
    match color_correction {
        ColorCorrection::None => &NONE_TABLE,
        ColorCorrection::GbaLcd => &GBA_LCD_TABLE,
    }
}

// Darkened, desaturated output of the original unlit LCD
fn gba_lcd_correction(color: usize) -> Color {
    const LCD_GAMMA: f64 = 4.0;
    const OUTPUT_GAMMA: f64 = 2.2;

    let linear = |shift: usize| (((color >> shift) & 0x1F) as f64 / 31.0).powf(LCD_GAMMA);
    let lr = linear(0);
    let lg = linear(5);
    let lb = linear(10);

    let to_u8 = |mixed: f64| {
        let corrected = (mixed / 255.0).powf(1.0 / OUTPUT_GAMMA) * 255.0 / 280.0;
        (corrected.min(1.0) * 255.0).round() as u8
    };

    let r = to_u8(50.0 * lg + 255.0 * lr);
    let g = to_u8(30.0 * lb + 230.0 * lg + 10.0 * lr);
    let b = to_u8(220.0 * lb + 10.0 * lg + 50.0 * lr);

    Color::rgb(r, g, b)
}
