//! Build-time configuration
//!
//! Defaults can be overridden when flashing, e.g.
//! `MESH_AP_SSID=hall-b MESH_CHANNEL=6 cargo build -p matrix-mesh --release ...`

use core::str::FromStr;

use log::{info, warn};
use matrix_mesh_core::Config;

/// Soft-AP name used when `MESH_AP_SSID` is not set
const DEFAULT_AP_SSID: &str = "matrix-mesh";

/// Radio channel shared by the soft-AP and ESP-NOW
const DEFAULT_CHANNEL: u8 = 1;

/// Firmware settings: the mesh tunables plus radio setup
#[derive(Debug, Clone, Copy)]
pub struct FirmwareConfig {
    pub mesh: Config,
    pub ap_ssid: &'static str,
    pub channel: u8,
}

impl FirmwareConfig {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let mesh = defaults
            .with_liveness_timeout(parse(
                "MESH_LIVENESS_TIMEOUT_MS",
                option_env!("MESH_LIVENESS_TIMEOUT_MS"),
                defaults.liveness_timeout,
            ))
            .with_transition_period(parse(
                "MESH_TRANSITION_PERIOD_MS",
                option_env!("MESH_TRANSITION_PERIOD_MS"),
                defaults.transition_period,
            ))
            .with_push_repeats(parse(
                "MESH_PUSH_REPEATS",
                option_env!("MESH_PUSH_REPEATS"),
                defaults.push_repeats,
            ));

        let channel = match parse("MESH_CHANNEL", option_env!("MESH_CHANNEL"), DEFAULT_CHANNEL) {
            channel @ 1..=13 => channel,
            other => {
                warn!("MESH_CHANNEL {} out of range, using {}", other, DEFAULT_CHANNEL);
                DEFAULT_CHANNEL
            }
        };

        let config = Self {
            mesh,
            ap_ssid: option_env!("MESH_AP_SSID").unwrap_or(DEFAULT_AP_SSID),
            channel,
        };
        info!(
            "Config: ssid {}, channel {}, timeout {} ms, period {} ms, {} push repeats",
            config.ap_ssid,
            config.channel,
            config.mesh.liveness_timeout,
            config.mesh.transition_period,
            config.mesh.push_repeats
        );
        config
    }
}

fn parse<T: FromStr>(name: &str, value: Option<&'static str>, default: T) -> T {
    let Some(raw) = value else {
        return default;
    };
    match raw.trim().parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            default
        }
    }
}
