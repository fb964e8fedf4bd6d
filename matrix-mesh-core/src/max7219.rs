//! MAX7219 driver for cascaded 8x8 LED segments.
//!
//! The chips are daisy-chained on one SPI bus sharing a chip select. Every
//! register write is a 16-bit word `[register, data]`; to address the whole
//! chain one word per segment is shifted out inside a single transaction,
//! farthest segment first.
//!
//! ## Pixel layout
//! - `row` runs along the strip, `0..8 * SEGMENTS`, segment `row / 8`
//! - `col` selects the digit register, `0..8`
//! - within a digit byte, row `8k` is the most significant bit

use embedded_hal::spi::SpiDevice;
use log::debug;

use crate::render::DisplaySurface;

/// Longest supported chain
pub const MAX_SEGMENTS: usize = 8;

/// Highest intensity level the chip accepts
pub const MAX_INTENSITY: u8 = 0x0F;

/// Register addresses
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Noop = 0x00,
    Digit0 = 0x01,
    DecodeMode = 0x09,
    Intensity = 0x0A,
    ScanLimit = 0x0B,
    Shutdown = 0x0C,
    DisplayTest = 0x0F,
}

/// SPI failure while talking to the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Max7219Error<E> {
    Spi(E),
}

/// Driver with an in-memory frame buffer, flushed on demand.
pub struct Max7219<SPI, const SEGMENTS: usize> {
    spi: SPI,
    // [digit][segment]
    frame: [[u8; SEGMENTS]; 8],
    intensity: Option<u8>,
}

impl<SPI: SpiDevice, const SEGMENTS: usize> Max7219<SPI, SEGMENTS> {
    /// Wrap `spi`. Nothing is sent until [`Self::init`].
    pub fn new(spi: SPI) -> Self {
        const { assert!(SEGMENTS > 0 && SEGMENTS <= MAX_SEGMENTS) };
        Self {
            spi,
            frame: [[0; SEGMENTS]; 8],
            intensity: None,
        }
    }

    /// Wake the chain up and blank it
    pub fn init(&mut self) -> Result<(), Max7219Error<SPI::Error>> {
        self.write_all(Register::DisplayTest, 0x00)?;
        self.write_all(Register::ScanLimit, 0x07)?;
        self.write_all(Register::DecodeMode, 0x00)?;
        self.write_all(Register::Shutdown, 0x01)?;
        self.intensity = None;
        self.set_intensity(0)?;
        self.clear();
        self.flush()?;
        debug!("MAX7219 chain of {} segments initialised", SEGMENTS);
        Ok(())
    }

    /// Read back one pixel from the frame buffer
    pub fn pixel(&self, row: usize, col: usize) -> bool {
        if row >= 8 * SEGMENTS || col >= 8 {
            return false;
        }
        self.frame[col][row / 8] & (0x80 >> (row % 8)) != 0
    }

    /// Give the SPI device back
    pub fn release(self) -> SPI {
        self.spi
    }

    fn write_all(&mut self, register: Register, data: u8) -> Result<(), Max7219Error<SPI::Error>> {
        self.write_row(register as u8, &[data; SEGMENTS])
    }

    /// One transaction carrying `data[segment]` for every segment
    fn write_row(&mut self, register: u8, data: &[u8; SEGMENTS]) -> Result<(), Max7219Error<SPI::Error>> {
        let mut words = [Register::Noop as u8; 2 * MAX_SEGMENTS];
        for (word, &byte) in words.chunks_exact_mut(2).zip(data.iter().rev()) {
            word[0] = register;
            word[1] = byte;
        }
        self.spi
            .write(&words[..2 * SEGMENTS])
            .map_err(Max7219Error::Spi)
    }
}

impl<SPI: SpiDevice, const SEGMENTS: usize> DisplaySurface for Max7219<SPI, SEGMENTS> {
    type Error = Max7219Error<SPI::Error>;

    fn clear(&mut self) {
        self.frame = [[0; SEGMENTS]; 8];
    }

    fn set_pixel(&mut self, row: usize, col: usize, lit: bool) {
        if row >= 8 * SEGMENTS || col >= 8 {
            return;
        }
        let mask = 0x80 >> (row % 8);
        let byte = &mut self.frame[col][row / 8];
        if lit {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    fn set_intensity(&mut self, level: u8) -> Result<(), Self::Error> {
        let level = level.min(MAX_INTENSITY);
        if self.intensity == Some(level) {
            return Ok(());
        }
        self.write_all(Register::Intensity, level)?;
        self.intensity = Some(level);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        for digit in 0..8 {
            let row = self.frame[digit];
            self.write_row(Register::Digit0 as u8 + digit as u8, &row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::spi::{ErrorKind, ErrorType, Operation};

    #[derive(Default)]
    struct RecordingSpi {
        writes: Vec<Vec<u8>>,
        fail: bool,
    }

    impl ErrorType for RecordingSpi {
        type Error = ErrorKind;
    }

    impl SpiDevice for RecordingSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            for operation in operations {
                if let Operation::Write(data) = operation {
                    self.writes.push(data.to_vec());
                }
            }
            Ok(())
        }
    }

    fn driver() -> Max7219<RecordingSpi, 4> {
        Max7219::new(RecordingSpi::default())
    }

    #[test]
    fn test_init_sequence() {
        let mut display = driver();
        display.init().unwrap();
        let writes = display.release().writes;

        let registers: Vec<u8> = writes.iter().map(|write| write[0]).collect();
        assert_eq!(
            registers,
            [0x0F, 0x0B, 0x09, 0x0C, 0x0A, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
        assert_eq!(writes[1], [0x0B, 0x07, 0x0B, 0x07, 0x0B, 0x07, 0x0B, 0x07]);
        assert_eq!(writes[3], [0x0C, 0x01, 0x0C, 0x01, 0x0C, 0x01, 0x0C, 0x01]);
        assert!(writes[5..].iter().all(|write| write.len() == 8));
    }

    #[test]
    fn test_flush_sends_farthest_segment_first() {
        let mut display = driver();
        display.set_pixel(0, 0, true);
        display.set_pixel(25, 0, true);
        display.set_pixel(9, 3, true);
        display.flush().unwrap();
        let writes = display.release().writes;

        assert_eq!(writes.len(), 8);
        // digit 0: segment 3 gets 0x40, segment 0 gets 0x80
        assert_eq!(writes[0], [0x01, 0x40, 0x01, 0x00, 0x01, 0x00, 0x01, 0x80]);
        // digit 3: segment 1 gets 0x40
        assert_eq!(writes[3], [0x04, 0x00, 0x04, 0x00, 0x04, 0x40, 0x04, 0x00]);
    }

    #[test]
    fn test_pixels_set_and_cleared() {
        let mut display = driver();
        display.set_pixel(17, 6, true);
        assert!(display.pixel(17, 6));
        display.set_pixel(17, 6, false);
        assert!(!display.pixel(17, 6));
        display.set_pixel(32, 0, true);
        display.set_pixel(0, 8, true);
        assert!((0..32).all(|row| (0..8).all(|col| !display.pixel(row, col))));
    }

    #[test]
    fn test_intensity_is_clamped_and_cached() {
        let mut display = driver();
        display.set_intensity(3).unwrap();
        display.set_intensity(3).unwrap();
        display.set_intensity(200).unwrap();
        let writes = display.release().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0][..2], [0x0A, 3]);
        assert_eq!(writes[1][..2], [0x0A, 0x0F]);
    }

    #[test]
    fn test_spi_failure_is_reported() {
        let mut display = Max7219::<_, 4>::new(RecordingSpi {
            fail: true,
            ..Default::default()
        });
        assert_eq!(display.flush(), Err(Max7219Error::Spi(ErrorKind::Other)));
        // a failed write is not cached
        assert!(display.set_intensity(2).is_err());
        assert_eq!(display.intensity, None);
    }
}
