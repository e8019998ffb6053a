//! Board grid and snapshot codec.
//!
//! SNAPSHOT FORMAT
//! ===============
//! Newline-separated rows, one base-32 digit per cell. Row index is the x
//! coordinate and column index is the y coordinate: the number of rows is
//! the board width and each row's length is the board height. In memory the
//! grid is laid out `cells[y * width + x]`.

use std::sync::Arc;

/// A board cell, or a target for one. Identity is `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
    pub color: u8,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot is empty")]
    Empty,
    #[error("snapshot row {row} has {actual} cells, expected {expected}")]
    Ragged { row: usize, expected: usize, actual: usize },
    #[error("invalid cell {found:?} at ({x}, {y})")]
    InvalidDigit { x: usize, y: usize, found: char },
    #[error("color {color} at ({x}, {y}) is outside the {palette_len}-color palette")]
    OutOfPalette { x: usize, y: usize, color: u8, palette_len: usize },
    #[error("snapshot dimensions exceed the addressable board size")]
    TooLarge,
}

/// Full board state: `width * height` palette indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: u32,
    height: u32,
    cells: Vec<u8>,
}

impl Board {
    /// Board of the given size with every cell set to `fill`.
    #[must_use]
    pub fn filled(width: u32, height: u32, fill: u8) -> Self {
        Self { width, height, cells: vec![fill; width as usize * height as usize] }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Color at `(x, y)`, `None` when out of bounds.
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> Option<u8> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Overwrite one cell. Returns `false` when `(x, y)` is out of bounds.
    pub fn set(&mut self, x: i32, y: i32, color: u8) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = color;
                true
            }
            None => false,
        }
    }

    /// Immutable copy handed to event subscribers.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot { width: self.width, height: self.height, cells: Arc::from(self.cells.as_slice()) }
    }

    /// Encode in the wire snapshot format.
    #[must_use]
    pub fn to_snapshot_text(&self) -> String {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut out = String::with_capacity(width * (height + 1));
        for x in 0..width {
            for y in 0..height {
                let digit = u32::from(self.cells[y * width + x]);
                out.push(char::from_digit(digit, 32).unwrap_or('?'));
            }
            out.push('\n');
        }
        out
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        cell_index(self.width, self.height, x, y)
    }
}

/// Read-only copy of a loaded board, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub cells: Arc<[u8]>,
}

impl Snapshot {
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> Option<u8> {
        cell_index(self.width, self.height, x, y).and_then(|i| self.cells.get(i).copied())
    }
}

fn cell_index(width: u32, height: u32, x: i32, y: i32) -> Option<usize> {
    let x = u32::try_from(x).ok()?;
    let y = u32::try_from(y).ok()?;
    if x >= width || y >= height {
        return None;
    }
    Some(y as usize * width as usize + x as usize)
}

/// Parse snapshot text into a board, validating every cell against the palette.
///
/// # Errors
///
/// Returns [`SnapshotError`] for empty input, ragged rows, non base-32
/// characters, or colors outside the palette.
pub fn parse_snapshot(text: &str, palette_len: usize) -> Result<Board, SnapshotError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SnapshotError::Empty);
    }
    let rows = trimmed
        .split('\n')
        .map(|row| row.trim_end_matches('\r'))
        .collect::<Vec<_>>();

    let width = rows.len();
    let height = rows[0].chars().count();
    if height == 0 {
        return Err(SnapshotError::Empty);
    }
    let (Ok(width_u32), Ok(height_u32)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(SnapshotError::TooLarge);
    };
    if i32::try_from(width_u32).is_err() || i32::try_from(height_u32).is_err() {
        return Err(SnapshotError::TooLarge);
    }

    let mut cells = vec![0_u8; width * height];
    for (x, row) in rows.iter().enumerate() {
        let actual = row.chars().count();
        if actual != height {
            return Err(SnapshotError::Ragged { row: x, expected: height, actual });
        }
        for (y, found) in row.chars().enumerate() {
            let digit = found
                .to_digit(32)
                .ok_or(SnapshotError::InvalidDigit { x, y, found })?;
            // to_digit(32) is at most 31.
            let color = u8::try_from(digit).unwrap_or(u8::MAX);
            if usize::from(color) >= palette_len {
                return Err(SnapshotError::OutOfPalette { x, y, color, palette_len });
            }
            cells[y * width + x] = color;
        }
    }

    Ok(Board { width: width_u32, height: height_u32, cells })
}

#[cfg(test)]
#[path = "grid_test.rs"]
mod tests;
