//! Slicing the shared pattern onto one board's matrix.
//!
//! With `n` live boards the pattern is shrunk to an `8n x 8n` square,
//! centred vertically in the 32-row canvas, and board `rank` shows columns
//! `[8 * rank, 8 * rank + 8)` of it. Side by side, the boards rebuild the
//! whole square.

use core::ops::Range;

use crate::pattern::{Pattern, PATTERN_SIDE};

/// Physical size of one board's matrix.
///
/// `width` runs along the strip (pattern rows), `height` is the band of
/// pattern columns each board owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
}

impl Geometry {
    /// Four cascaded 8x8 segments
    pub const STRIP_32X8: Self = Self {
        width: 32,
        height: 8,
    };

    /// Most boards that still get a distinct band of the canvas
    pub fn max_peers(&self) -> usize {
        (self.width.min(PATTERN_SIDE) / self.height.max(1)).max(1)
    }
}

/// Where the renderer draws. Implemented by the display driver.
pub trait DisplaySurface {
    type Error;

    /// Turn every pixel off in the frame buffer
    fn clear(&mut self);

    /// Set one pixel in the frame buffer. Out of range pixels are ignored.
    fn set_pixel(&mut self, row: usize, col: usize, lit: bool);

    /// Change the display brightness
    fn set_intensity(&mut self, level: u8) -> Result<(), Self::Error>;

    /// Push the frame buffer to the hardware
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Maps logical matrix coordinates to the driver's addressing.
pub trait CoordinateMap {
    fn row(&self, row: usize) -> usize;

    fn col(&self, col: usize) -> usize {
        col
    }
}

/// Row order of the MAX7219 strips: within every block of eight rows the
/// order is reversed (7 -> 0, 15 -> 8, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Max7219Rows;

impl CoordinateMap for Max7219Rows {
    fn row(&self, row: usize) -> usize {
        row ^ 7
    }
}

/// Logical coordinates passed through unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl CoordinateMap for Identity {
    fn row(&self, row: usize) -> usize {
        row
    }
}

/// Rescales a pattern for the live peer count and draws this board's band.
#[derive(Debug, Clone)]
pub struct SliceRenderer<M = Max7219Rows> {
    geometry: Geometry,
    map: M,
}

impl<M: CoordinateMap> SliceRenderer<M> {
    pub fn new(geometry: Geometry, map: M) -> Self {
        Self { geometry, map }
    }

    /// Peer count limited to what the canvas can split
    fn clamp_peers(&self, peer_count: usize) -> usize {
        peer_count.clamp(1, self.geometry.max_peers())
    }

    /// The full canvas for `peer_count` boards: the pattern nearest-neighbour
    /// scaled to `8n x 8n`, shifted down so it sits in the middle rows.
    pub fn scale(&self, pattern: &Pattern, peer_count: usize) -> Pattern {
        let side = (self.geometry.height * self.clamp_peers(peer_count)).min(PATTERN_SIDE);
        let offset = (PATTERN_SIDE - side) / 2;

        let mut canvas = Pattern::blank();
        for x in 0..side {
            for y in 0..side {
                let lit = pattern.get(sample(x, side), sample(y, side));
                canvas.set(x + offset, y, lit);
            }
        }
        canvas
    }

    /// Canvas columns owned by the board at `rank`
    pub fn slice_columns(&self, rank: usize, peer_count: usize) -> Range<usize> {
        let rank = rank.min(self.clamp_peers(peer_count) - 1);
        let start = rank * self.geometry.height;
        start..start + self.geometry.height
    }

    /// Clear `surface` and draw this board's band of `pattern`.
    ///
    /// With no known peers only the clear happens. Rank and peer count beyond
    /// what the canvas can split are clamped.
    pub fn render<S: DisplaySurface>(
        &self,
        pattern: &Pattern,
        rank: usize,
        peer_count: usize,
        surface: &mut S,
    ) {
        surface.clear();
        if peer_count == 0 {
            return;
        }

        let canvas = self.scale(pattern, peer_count);
        let columns = self.slice_columns(rank, peer_count);
        for row in 0..self.geometry.width.min(PATTERN_SIDE) {
            for (local, col) in columns.clone().enumerate() {
                surface.set_pixel(self.map.row(row), self.map.col(local), canvas.get(row, col));
            }
        }
    }
}

impl Default for SliceRenderer<Max7219Rows> {
    fn default() -> Self {
        Self::new(Geometry::STRIP_32X8, Max7219Rows)
    }
}

/// Source index for canvas index `x` when stretching `PATTERN_SIDE` cells
/// over `side`, rounded to nearest.
fn sample(x: usize, side: usize) -> usize {
    if side <= 1 {
        return 0;
    }
    let span = side - 1;
    (2 * x * (PATTERN_SIDE - 1) + span) / (2 * span)
}
