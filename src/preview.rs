//! Preview rendering: the current board with the remaining targets drawn
//! over it, written as a PNG at most once per interval.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use tokio::time::Instant;

use crate::board::{Pixel, Snapshot};
use crate::colors::Palette;

/// Minimum time between two preview writes.
pub const PREVIEW_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("failed to write preview {path}: {source}")]
    Write { path: PathBuf, source: image::ImageError },
}

/// Render `snapshot` with `targets` painted over it. Targets outside the
/// board are ignored.
#[must_use]
pub fn render(snapshot: &Snapshot, targets: &[Pixel], palette: &Palette) -> RgbImage {
    let mut image = RgbImage::new(snapshot.width, snapshot.height);
    for (x, y, texel) in image.enumerate_pixels_mut() {
        let cell = snapshot.cells[y as usize * snapshot.width as usize + x as usize];
        *texel = Rgb(palette.rgb(cell).unwrap_or_default());
    }
    for target in targets {
        let (Ok(x), Ok(y)) = (u32::try_from(target.x), u32::try_from(target.y)) else {
            continue;
        };
        if x < snapshot.width && y < snapshot.height {
            image.put_pixel(x, y, Rgb(palette.rgb(target.color).unwrap_or_default()));
        }
    }
    image
}

/// Throttled preview file writer.
pub struct PreviewWriter {
    path: PathBuf,
    interval: Duration,
    last_write: Option<Instant>,
    dirty: bool,
}

impl PreviewWriter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { path: path.into(), interval, last_write: None, dirty: false }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a board change. Returns whether a write is due at `now`.
    pub fn mark_dirty(&mut self, now: Instant) -> bool {
        self.dirty = true;
        self.is_due(now)
    }

    /// Unwritten changes exist and the interval has passed.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.dirty && self.last_write.is_none_or(|at| now.duration_since(at) >= self.interval)
    }

    /// Write `image` as PNG and restart the interval.
    ///
    /// # Errors
    ///
    /// Returns [`PreviewError::Write`] if encoding or the file write fails.
    pub fn write(&mut self, image: &RgbImage, now: Instant) -> Result<(), PreviewError> {
        image
            .save_with_format(&self.path, ImageFormat::Png)
            .map_err(|source| PreviewError::Write { path: self.path.clone(), source })?;
        self.last_write = Some(now);
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
#[path = "preview_test.rs"]
mod tests;
