//! LED matrix strip: four cascaded MAX7219 8x8 segments on SPI2
//!
//! ## Pin Assignment
//! - GPIO6:  CLK
//! - GPIO7:  DIN
//! - GPIO10: CS (load)

use embassy_time::{Duration, Ticker};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::peripherals::{GPIO10, GPIO6, GPIO7, SPI2};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode;
use esp_hal::time::Rate;
use esp_hal::Blocking;
use log::{error, info};
use matrix_mesh_core::Max7219;

use crate::mesh::now;
use crate::SharedNode;

/// Cascaded 8x8 segments in the strip
pub const SEGMENTS: usize = 4;

/// SPI clock; the MAX7219 tops out at 10 MHz
const SPI_FREQUENCY_MHZ: u32 = 1;

pub type Display = Max7219<ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>, SEGMENTS>;

/// Bring up the SPI bus and the display chain
pub fn init(spi: SPI2<'static>, clk: GPIO6<'static>, din: GPIO7<'static>, cs: GPIO10<'static>) -> Display {
    let config = SpiConfig::default()
        .with_frequency(Rate::from_mhz(SPI_FREQUENCY_MHZ))
        .with_mode(Mode::_0);
    let bus = Spi::new(spi, config)
        .expect("Failed to create SPI bus")
        .with_sck(clk)
        .with_mosi(din);
    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let device = ExclusiveDevice::new_no_delay(bus, cs).expect("Failed to claim chip select");

    let mut display = Max7219::new(device);
    if let Err(e) = display.init() {
        error!("Display init failed: {:?}", e);
    }
    info!("LED matrix initialised: {} segments", SEGMENTS);
    display
}

/// Redraws this board's band of the current pattern at the render interval
#[embassy_executor::task]
pub async fn render_task(mut display: Display, node: &'static SharedNode) {
    let interval = node.lock().await.config().render_interval;
    let mut ticker = Ticker::every(Duration::from_millis(interval));
    let mut failing = false;

    loop {
        let result = node.lock().await.tick(now(), &mut display);
        match result {
            Err(e) if !failing => {
                error!("Display refresh error: {:?}", e);
                failing = true;
            }
            Ok(()) if failing => {
                info!("Display refresh recovered");
                failing = false;
            }
            _ => {}
        }
        ticker.next().await;
    }
}
