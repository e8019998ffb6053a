//! Board palette and perceptual color matching.
//!
//! DESIGN
//! ======
//! `Palette` is an immutable value handed to every consumer that needs it
//! (quantizer, snapshot validation, preview). Each entry is converted to
//! CIE L*a*b* once at construction; nearest-color lookups compare against
//! those cached values with CIEDE2000.

use palette::color_difference::Ciede2000;
use palette::white_point::D65;
use palette::{FromColor, Lab, Srgb};

/// Largest palette addressable by a `u8` color index.
pub const MAX_PALETTE_LEN: usize = 256;

/// The 32-color palette served by the default board, in index order.
pub const DEFAULT_COLORS: [[u8; 3]; 32] = [
    [0, 0, 0],
    [255, 255, 255],
    [170, 170, 170],
    [85, 85, 85],
    [254, 211, 199],
    [255, 196, 206],
    [250, 172, 142],
    [255, 139, 131],
    [244, 67, 54],
    [233, 30, 99],
    [226, 102, 158],
    [156, 39, 176],
    [103, 58, 183],
    [63, 81, 181],
    [0, 70, 112],
    [5, 113, 151],
    [33, 150, 243],
    [0, 188, 212],
    [59, 229, 219],
    [151, 253, 220],
    [22, 115, 0],
    [55, 169, 60],
    [137, 230, 66],
    [215, 255, 7],
    [255, 246, 209],
    [248, 203, 140],
    [255, 235, 59],
    [255, 193, 7],
    [255, 152, 0],
    [255, 87, 34],
    [184, 63, 39],
    [121, 85, 72],
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PaletteError {
    #[error("palette is empty")]
    Empty,
    #[error("palette has {0} colors; at most {max} are supported", max = MAX_PALETTE_LEN)]
    TooLarge(usize),
}

#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
    lab: Vec<Lab<D65, f32>>,
}

impl Palette {
    /// Build a palette from RGB triples.
    ///
    /// # Errors
    ///
    /// Returns [`PaletteError`] for an empty palette or one too large for `u8` indices.
    pub fn new(colors: Vec<[u8; 3]>) -> Result<Self, PaletteError> {
        if colors.is_empty() {
            return Err(PaletteError::Empty);
        }
        if colors.len() > MAX_PALETTE_LEN {
            return Err(PaletteError::TooLarge(colors.len()));
        }
        let lab = colors.iter().map(|rgb| rgb_to_lab(*rgb)).collect();
        Ok(Self { colors, lab })
    }

    /// Number of colors; always at least 1.
    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Whether `index` names a color of this palette.
    #[must_use]
    pub fn contains(&self, index: u8) -> bool {
        usize::from(index) < self.colors.len()
    }

    #[must_use]
    pub fn rgb(&self, index: u8) -> Option<[u8; 3]> {
        self.colors.get(usize::from(index)).copied()
    }

    #[must_use]
    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// Index of the perceptually closest palette color (CIEDE2000).
    /// Ties resolve to the lowest index.
    #[must_use]
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let target = rgb_to_lab(rgb);
        let mut best = 0_usize;
        let mut best_distance = f32::INFINITY;
        for (index, lab) in self.lab.iter().enumerate() {
            let distance = target.difference(*lab);
            if distance < best_distance {
                best = index;
                best_distance = distance;
            }
        }
        // Construction caps the length at 256, so every index fits.
        u8::try_from(best).unwrap_or(u8::MAX)
    }
}

impl Default for Palette {
    fn default() -> Self {
        let colors = DEFAULT_COLORS.to_vec();
        let lab = colors.iter().map(|rgb| rgb_to_lab(*rgb)).collect();
        Self { colors, lab }
    }
}

fn rgb_to_lab(rgb: [u8; 3]) -> Lab<D65, f32> {
    let srgb = Srgb::new(
        f32::from(rgb[0]) / 255.0,
        f32::from(rgb[1]) / 255.0,
        f32::from(rgb[2]) / 255.0,
    );
    Lab::from_color(srgb)
}

#[cfg(test)]
#[path = "colors_test.rs"]
mod tests;
