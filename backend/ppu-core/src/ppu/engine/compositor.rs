//! Window masks, layer priority merge, color special effects, and NDS master brightness

use crate::ppu::buffers::{Pixel, WindowMask};
use crate::ppu::engine::Engine;
use crate::ppu::registers::{BgKind, BlendMode, MasterBrightnessMode, Registers, Window};
use std::cmp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Bg0,
    Bg1,
    Bg2,
    Bg3,
    Obj,
    Backdrop,
    None,
}

impl Layer {
    const BG: [Self; 4] = [Self::Bg0, Self::Bg1, Self::Bg2, Self::Bg3];

    fn is_1st_target_enabled(self, registers: &Registers) -> bool {
        match self {
            Self::Bg0 => registers.bg_blend_1st_target[0],
            Self::Bg1 => registers.bg_blend_1st_target[1],
            Self::Bg2 => registers.bg_blend_1st_target[2],
            Self::Bg3 => registers.bg_blend_1st_target[3],
            Self::Obj => registers.obj_blend_1st_target,
            Self::Backdrop => registers.backdrop_blend_1st_target,
            Self::None => false,
        }
    }

    fn is_2nd_target_enabled(self, registers: &Registers) -> bool {
        match self {
            Self::Bg0 => registers.bg_blend_2nd_target[0],
            Self::Bg1 => registers.bg_blend_2nd_target[1],
            Self::Bg2 => registers.bg_blend_2nd_target[2],
            Self::Bg3 => registers.bg_blend_2nd_target[3],
            Self::Obj => registers.obj_blend_2nd_target,
            Self::Backdrop => registers.backdrop_blend_2nd_target,
            Self::None => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MergePixel {
    color: Pixel,
    layer: Layer,
    priority: u8,
}

// Window bounds are half-open; start > end wraps around the edge of the screen
fn window_contains(start: u8, end: u8, coordinate: u8) -> bool {
    if start > end {
        coordinate >= start || coordinate < end
    } else {
        (start..end).contains(&coordinate)
    }
}

impl Engine {
    pub(super) fn render_window_mask(&mut self, line: u32) {
        let width = self.variant.screen_width as usize;
        let registers = &self.registers;
        let masks = &mut self.buffers.window_mask[..width];

        if !registers.any_window_enabled() {
            masks.fill(WindowMask::ALL);
            return;
        }

        masks.fill(registers.window_mask(Window::Outside));

        // Sprites were rendered during the previous line's HBlank, so the OBJ window is ready
        if registers.obj_window_enabled && registers.obj_enabled {
            let obj_window_mask = registers.window_mask(Window::InsideObj);
            for (mask, &inside) in masks.iter_mut().zip(&self.buffers.obj_window) {
                if inside {
                    *mask = obj_window_mask;
                }
            }
        }

        // Window 0 has priority over window 1
        for (window, window_mask) in [(1, Window::Inside1), (0, Window::Inside0)] {
            if !registers.window_enabled[window]
                || !window_contains(
                    registers.window_y1[window],
                    registers.window_y2[window],
                    line as u8,
                )
            {
                continue;
            }

            let window_mask = registers.window_mask(window_mask);
            let (x1, x2) = (registers.window_x1[window], registers.window_x2[window]);
            for (x, mask) in masks.iter_mut().enumerate() {
                if window_contains(x1, x2, x as u8) {
                    *mask = window_mask;
                }
            }
        }
    }

    pub(super) fn merge_layers(&mut self, line: u32) {
        let width = self.variant.screen_width;
        let registers = &self.registers;

        let backdrop_color = Pixel::new_transparent(self.palette_ram[0]);

        // Alpha blending coefficients
        let eva: u16 = cmp::min(16, registers.blend_alpha_a).into();
        let evb: u16 = cmp::min(16, registers.blend_alpha_b).into();

        // Brightness increase/decrease coefficient
        let evy: u16 = cmp::min(16, registers.blend_brightness).into();

        let bg_visible: [bool; 4] = [0, 1, 2, 3]
            .map(|bg| registers.bg_enabled[bg] && registers.bg_kind(bg) != BgKind::Disabled);

        let out = self.back_buffer.line_mut(line, width);

        for (pixel, out) in out.iter_mut().enumerate() {
            let window_mask = self.buffers.window_mask[pixel];

            let mut first_pixel =
                MergePixel { color: backdrop_color, layer: Layer::Backdrop, priority: u8::MAX };

            let mut second_pixel =
                MergePixel { color: Pixel::TRANSPARENT, layer: Layer::None, priority: u8::MAX };

            let mut check_pixel = |color: Pixel, layer: Layer, priority: u8| {
                if color.transparent() {
                    return;
                }

                if first_pixel.color.transparent() || priority < first_pixel.priority {
                    second_pixel = first_pixel;
                    first_pixel = MergePixel { color, layer, priority };
                    return;
                }

                if second_pixel.color.transparent() || priority < second_pixel.priority {
                    second_pixel = MergePixel { color, layer, priority };
                }
            };

            // OBJ goes first so that a BG with equal priority never displaces it
            let obj_pixel = self.buffers.obj_pixels[pixel];
            if registers.obj_enabled && window_mask.obj() {
                check_pixel(obj_pixel.color, Layer::Obj, obj_pixel.priority);
            }

            for &bg in &self.bg_order {
                if !bg_visible[bg] || !window_mask.bg(bg) {
                    continue;
                }

                check_pixel(
                    self.buffers.bg_pixels[bg][pixel],
                    Layer::BG[bg],
                    registers.bg_control[bg].priority,
                );
            }

            let mut blend_color = first_pixel.color;

            // Semi-transparent OBJs are always 1st target and force alpha blending when there is a
            // 2nd target underneath; otherwise they fall back to the BLDCNT effect
            let is_semi_transparent_obj =
                first_pixel.layer == Layer::Obj && obj_pixel.semi_transparent;
            let forced_alpha =
                is_semi_transparent_obj && second_pixel.layer.is_2nd_target_enabled(registers);

            if window_mask.effects()
                && (first_pixel.layer.is_1st_target_enabled(registers) || forced_alpha)
            {
                let blend_mode =
                    if forced_alpha { BlendMode::AlphaBlending } else { registers.blend_mode };

                match blend_mode {
                    BlendMode::AlphaBlending => {
                        if second_pixel.layer.is_2nd_target_enabled(registers) {
                            blend_color =
                                alpha_blend(first_pixel.color, second_pixel.color, eva, evb);
                        }
                    }
                    BlendMode::BrightnessIncrease => {
                        blend_color = adjust_brightness::<true>(first_pixel.color, evy);
                    }
                    BlendMode::BrightnessDecrease => {
                        blend_color = adjust_brightness::<false>(first_pixel.color, evy);
                    }
                    BlendMode::None => {}
                }
            }

            *out = blend_color.color();
        }
    }

    pub(super) fn apply_master_brightness(&mut self, line: u32) {
        let factor: u16 = cmp::min(16, self.registers.master_brightness_factor).into();
        if factor == 0 {
            return;
        }

        let adjust: fn(Pixel, u16) -> Pixel = match self.registers.master_brightness_mode {
            MasterBrightnessMode::None => return,
            MasterBrightnessMode::Up => adjust_brightness::<true>,
            MasterBrightnessMode::Down => adjust_brightness::<false>,
        };

        for color in self.back_buffer.line_mut(line, self.variant.screen_width) {
            *color = adjust(Pixel::new_opaque(*color), factor).color();
        }
    }
}

fn alpha_blend(first: Pixel, second: Pixel, eva: u16, evb: u16) -> Pixel {
    let alpha_blend_component =
        |first: u16, second: u16| cmp::min(31, (eva * first + evb * second) >> 4);

    let r = alpha_blend_component(first.red(), second.red());
    let g = alpha_blend_component(first.green(), second.green());
    let b = alpha_blend_component(first.blue(), second.blue());

    Pixel::new_opaque_rgb(r, g, b)
}

fn adjust_brightness<const INCREASE: bool>(color: Pixel, evy: u16) -> Pixel {
    let adjust_component = |component: u16| {
        if INCREASE {
            component + ((evy * (31 - component)) >> 4)
        } else {
            component - ((evy * component) >> 4)
        }
    };

    let r = adjust_component(color.red());
    let g = adjust_component(color.green());
    let b = adjust_component(color.blue());

    Pixel::new_opaque_rgb(r, g, b)
}
