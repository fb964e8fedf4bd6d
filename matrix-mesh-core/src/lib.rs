//! Board-agnostic logic for the LED matrix mesh.
//!
//! Every board in the mesh drives a 32x8 LED strip and shows one vertical
//! band of a shared 32x32 pattern. Boards find each other through periodic
//! announcements, rank themselves by id, and agree on when to flip to the
//! next pattern.
//!
//! ```text
//!  announcements ──► PeerTracker ──► rank, peer count ─┐
//!                                                      ├─► SliceRenderer ──► DisplaySurface
//!  logical clock ──► PatternScheduler ──► index, fade ─┘
//!                          ▲
//!  time hints ─────────────┘
//! ```
//!
//! Nothing here touches hardware directly: the firmware feeds in the clock,
//! inbound radio text and a [`render::DisplaySurface`], and asks
//! [`node::MeshNode`] what to broadcast.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod fragment;
pub mod max7219;
pub mod node;
pub mod pattern;
pub mod peers;
pub mod portal;
pub mod protocol;
pub mod render;
pub mod schedule;

#[cfg(test)]
mod test_support;

/// Logical mesh time. Monotonic, unit-agnostic; the firmware feeds milliseconds.
pub type LogicalTime = u64;

/// Board identifier, unique per board for its lifetime.
pub type NodeId = u32;

pub use config::Config;
pub use fragment::{FragmentError, Reassembler};
pub use max7219::{Max7219, Max7219Error};
pub use node::{node_id_from_mac, MeshNode};
pub use pattern::{Pattern, PatternLibrary, PATTERN_SIDE};
pub use peers::PeerTracker;
pub use portal::PortalError;
pub use protocol::{Announcement, Message, ParseError};
pub use render::{CoordinateMap, DisplaySurface, Geometry, Max7219Rows, SliceRenderer};
pub use schedule::PatternScheduler;
