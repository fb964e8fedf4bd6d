//! WiFi soft-AP and radio bring-up using esp-wifi
//!
//! The board runs an open access point for the portal on the same channel it
//! uses for ESP-NOW, so both share one radio without hopping.

use core::net::Ipv4Addr;

use edge_dhcp::server::{Server as DhcpServer, ServerOptions as DhcpServerOptions};
use edge_dhcp::{Options as DhcpOptions, Packet as DhcpPacket};
use embassy_executor::Spawner;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{Ipv4Address, Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_time::{Duration, Timer};
use esp_hal::peripherals::{RNG, TIMG0, WIFI};
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_wifi::esp_now::EspNow;
use esp_wifi::wifi::{
    AccessPointConfiguration, AuthMethod, Configuration, WifiController, WifiDevice,
};
use esp_wifi::EspWifiController;
use log::{debug, info, warn};
use static_cell::StaticCell;

use crate::config::FirmwareConfig;

/// Address of the board on its own access point
pub const AP_ADDRESS: Ipv4Address = Ipv4Address::new(192, 168, 4, 1);

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;

static WIFI_INIT: StaticCell<EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

/// What the rest of the firmware needs from the radio
pub struct Radio {
    pub stack: Stack<'static>,
    pub esp_now: EspNow<'static>,
}

/// Start the radio as an access point and spawn the network tasks.
///
/// Radio bring-up failures are fatal.
pub fn init(
    spawner: Spawner,
    timg0: TIMG0<'static>,
    rng: RNG<'static>,
    wifi: WIFI<'static>,
    config: &FirmwareConfig,
) -> Radio {
    let mut rng = Rng::new(rng);
    let seed = u64::from(rng.random()) << 32 | u64::from(rng.random());
    let wifi_init = WIFI_INIT.init(
        esp_wifi::init(TimerGroup::new(timg0).timer0, rng).expect("Failed to initialise esp-wifi"),
    );

    let (mut controller, interfaces) =
        esp_wifi::wifi::new(wifi_init, wifi).expect("Failed to create WiFi controller");

    let ap_config = Configuration::AccessPoint(AccessPointConfiguration {
        ssid: config.ap_ssid.into(),
        channel: config.channel,
        auth_method: AuthMethod::None,
        ..Default::default()
    });
    controller
        .set_configuration(&ap_config)
        .expect("Failed to configure access point");
    controller.start().expect("Failed to start WiFi");
    info!("Access point '{}' up on channel {}", config.ap_ssid, config.channel);

    let esp_now = interfaces.esp_now;
    esp_now
        .set_channel(config.channel)
        .expect("Failed to set ESP-NOW channel");
    info!("ESP-NOW version {}", esp_now.version().unwrap_or(0));

    let net_config = embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(AP_ADDRESS, 24),
        gateway: Some(AP_ADDRESS),
        dns_servers: Default::default(),
    });
    let (stack, runner) = embassy_net::new(
        interfaces.ap,
        net_config,
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );

    spawner.must_spawn(net_task(runner));
    spawner.must_spawn(controller_task(controller));
    spawner.must_spawn(dhcp_task(stack));

    Radio { stack, esp_now }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Keeps the controller alive and restarts the AP if it stops
#[embassy_executor::task]
async fn controller_task(mut controller: WifiController<'static>) {
    loop {
        match controller.is_started() {
            Ok(true) => {}
            Ok(false) => {
                warn!("Access point stopped, restarting");
                if let Err(e) = controller.start_async().await {
                    warn!("Failed to restart access point: {:?}", e);
                }
            }
            Err(e) => warn!("WiFi status error: {:?}", e),
        }
        Timer::after(Duration::from_secs(5)).await;
    }
}

/// Hands out leases on the portal network
#[embassy_executor::task]
async fn dhcp_task(stack: Stack<'static>) {
    while !stack.is_config_up() {
        Timer::after(Duration::from_millis(100)).await;
    }

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 600];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 600];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buffer, &mut tx_meta, &mut tx_buffer);
    if let Err(e) = socket.bind(DHCP_SERVER_PORT) {
        warn!("DHCP server could not bind: {:?}", e);
        return;
    }
    info!("DHCP server running on port {}", DHCP_SERVER_PORT);

    let server_ip = Ipv4Addr::from(AP_ADDRESS.octets());
    let mut gateways = [Ipv4Addr::UNSPECIFIED; 1];
    let options = DhcpServerOptions::new(server_ip, Some(&mut gateways));
    let mut server = DhcpServer::<_, 8>::new_with_et(server_ip);
    server.range_start = Ipv4Addr::new(192, 168, 4, 50);
    server.range_end = Ipv4Addr::new(192, 168, 4, 200);

    let mut buf = [0u8; 600];
    loop {
        let (len, _) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("DHCP receive error: {:?}", e);
                continue;
            }
        };

        let request = match DhcpPacket::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("DHCP decode error: {:?}", e);
                continue;
            }
        };

        let mut option_buf = DhcpOptions::buf();
        let Some(reply) = server.handle_request(&mut option_buf, &options, &request) else {
            continue;
        };
        let mut out = [0u8; 600];
        match reply.encode(&mut out) {
            Ok(encoded) => {
                let broadcast = (Ipv4Address::new(255, 255, 255, 255), DHCP_CLIENT_PORT);
                if let Err(e) = socket.send_to(encoded, broadcast).await {
                    warn!("DHCP send error: {:?}", e);
                }
            }
            Err(e) => warn!("DHCP encode error: {:?}", e),
        }
    }
}
