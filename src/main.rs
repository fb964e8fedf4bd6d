//! ESP32-C3 LED Matrix Mesh
//!
//! Every board drives a 32x8 MAX7219 strip and shows its own band of a shared
//! 32x32 animation. Boards discover each other over ESP-NOW broadcast, order
//! themselves by id and flip patterns together. Each board also runs an open
//! access point with a small web form for pushing a custom pattern to the
//! whole mesh.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

mod config;
mod http_server;
mod led_matrix;
mod mesh;
mod wifi;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::timer::systimer::SystemTimer;
use log::info;
use matrix_mesh_core::{node_id_from_mac, MeshNode};
use static_cell::StaticCell;

use config::FirmwareConfig;

esp_bootloader_esp_idf::esp_app_desc!();

/// Mesh state shared by the render, radio and portal tasks
pub type SharedNode = Mutex<CriticalSectionRawMutex, MeshNode>;

static NODE: StaticCell<SharedNode> = StaticCell::new();

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();

    info!("=== ESP32-C3 LED Matrix Mesh ===");

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    // esp-wifi keeps its buffers on the heap
    esp_alloc::heap_allocator!(size: 72 * 1024);

    let systimer = SystemTimer::new(peripherals.SYSTIMER);
    esp_hal_embassy::init(systimer.alarm0);

    let config = FirmwareConfig::from_env();

    let mac = Efuse::mac_address();
    let id = node_id_from_mac(&mac);
    info!("MAC {:02x?}, node id {}", mac, id);

    let node: &'static SharedNode = NODE.init(Mutex::new(MeshNode::new(id, config.mesh)));

    info!("Initializing LED matrix driver...");
    let display = led_matrix::init(
        peripherals.SPI2,
        peripherals.GPIO6,
        peripherals.GPIO7,
        peripherals.GPIO10,
    );
    spawner.must_spawn(led_matrix::render_task(display, node));

    info!("Starting radio...");
    let radio = wifi::init(
        spawner,
        peripherals.TIMG0,
        peripherals.RNG,
        peripherals.WIFI,
        &config,
    );
    mesh::start(spawner, radio.esp_now, node);
    spawner.must_spawn(http_server::http_server_task(radio.stack, node));

    info!("=== System Ready ===");
    info!(
        "Join '{}' and open http://{}/ to push a pattern",
        config.ap_ssid,
        wifi::AP_ADDRESS
    );
}
