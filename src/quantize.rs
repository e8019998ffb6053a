//! Image quantizer: RGBA source image to palette-indexed target pixels.
//!
//! DESIGN
//! ======
//! Pixels with alpha below [`OPACITY_THRESHOLD`] are dropped ("do not
//! paint"). Every remaining pixel is mapped to the perceptually nearest
//! palette color (CIEDE2000). With [`Dither::FloydSteinberg`] the
//! quantization error is diffused to not-yet-visited opaque neighbours in
//! RGB space, left to right, top to bottom. Error never flows into or out of
//! transparent pixels.
//!
//! Output is row-major and fully deterministic. Coordinates are offset into
//! board space but not clipped: the board size is unknown until it loads.

use std::collections::HashMap;

use crate::board::Pixel;
use crate::colors::Palette;

/// Minimum alpha for a source pixel to be painted.
pub const OPACITY_THRESHOLD: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dither {
    /// Independent nearest-color mapping.
    None,
    /// Floyd–Steinberg error diffusion (7/16, 3/16, 5/16, 1/16).
    #[default]
    FloydSteinberg,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuantizeError {
    #[error("image buffer has {actual} bytes; a {width}x{height} RGBA image needs {expected}")]
    BufferSize { width: u32, height: u32, expected: usize, actual: usize },
}

/// Straight (non-premultiplied) RGBA8 image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl SourceImage {
    /// Wrap an RGBA buffer.
    ///
    /// # Errors
    ///
    /// Returns [`QuantizeError::BufferSize`] when the buffer length does not
    /// equal `width * height * 4`.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, QuantizeError> {
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        if rgba.len() != expected {
            return Err(QuantizeError::BufferSize { width, height, expected, actual: rgba.len() });
        }
        Ok(Self { width, height, rgba })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    fn texel(&self, index: usize) -> [u8; 4] {
        let base = index * 4;
        [self.rgba[base], self.rgba[base + 1], self.rgba[base + 2], self.rgba[base + 3]]
    }
}

/// Convert `image` into target pixels placed at (`offset_x`, `offset_y`).
#[must_use]
pub fn quantize(image: &SourceImage, offset_x: i32, offset_y: i32, palette: &Palette, dither: Dither) -> Vec<Pixel> {
    let width = image.width as usize;
    let height = image.height as usize;
    let count = width * height;

    let opaque = (0..count)
        .map(|i| image.texel(i)[3] >= OPACITY_THRESHOLD)
        .collect::<Vec<_>>();
    let mut work = (0..count)
        .map(|i| {
            let [r, g, b, _] = image.texel(i);
            [f32::from(r), f32::from(g), f32::from(b)]
        })
        .collect::<Vec<_>>();

    let mut cache: HashMap<[u8; 3], u8> = HashMap::new();
    let mut pixels = Vec::with_capacity(opaque.iter().filter(|o| **o).count());

    for y in 0..height {
        for x in 0..width {
            let index = y * width + x;
            if !opaque[index] {
                continue;
            }

            let rgb = work[index].map(clamp_channel);
            let color = *cache.entry(rgb).or_insert_with(|| palette.nearest(rgb));

            if dither == Dither::FloydSteinberg {
                let chosen = palette.rgb(color).unwrap_or(rgb);
                let error = [
                    f32::from(rgb[0]) - f32::from(chosen[0]),
                    f32::from(rgb[1]) - f32::from(chosen[1]),
                    f32::from(rgb[2]) - f32::from(chosen[2]),
                ];
                let mut spread = |dx: isize, dy: usize, weight: f32| {
                    let Some(nx) = x.checked_add_signed(dx) else {
                        return;
                    };
                    let ny = y + dy;
                    if nx >= width || ny >= height {
                        return;
                    }
                    let neighbour = ny * width + nx;
                    if !opaque[neighbour] {
                        return;
                    }
                    for channel in 0..3 {
                        work[neighbour][channel] += error[channel] * weight;
                    }
                };
                spread(1, 0, 7.0 / 16.0);
                spread(-1, 1, 3.0 / 16.0);
                spread(0, 1, 5.0 / 16.0);
                spread(1, 1, 1.0 / 16.0);
            }

            pixels.push(Pixel {
                x: offset_x.saturating_add(to_i32(x)),
                y: offset_y.saturating_add(to_i32(y)),
                color,
            });
        }
    }

    pixels
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn to_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
#[path = "quantize_test.rs"]
mod tests;
