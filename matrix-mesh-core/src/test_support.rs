//! In-memory display used by the unit tests.

use core::convert::Infallible;

use crate::render::DisplaySurface;

/// Records what the renderer drew on a 32x8 strip.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pixels: [[bool; 8]; 32],
    pub clears: usize,
    pub flushes: usize,
    pub intensity: Option<u8>,
}

impl FrameBuffer {
    pub fn pixel(&self, row: usize, col: usize) -> bool {
        self.pixels[row][col]
    }

    pub fn lit_count(&self) -> usize {
        self.pixels.iter().flatten().filter(|&&lit| lit).count()
    }
}

impl DisplaySurface for FrameBuffer {
    type Error = Infallible;

    fn clear(&mut self) {
        self.pixels = [[false; 8]; 32];
        self.clears += 1;
    }

    fn set_pixel(&mut self, row: usize, col: usize, lit: bool) {
        if row < 32 && col < 8 {
            self.pixels[row][col] = lit;
        }
    }

    fn set_intensity(&mut self, level: u8) -> Result<(), Infallible> {
        self.intensity = Some(level);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        self.flushes += 1;
        Ok(())
    }
}
