//! One board's view of the mesh: peers, schedule, patterns and the outbound
//! push queue, driven by the firmware's render tick and radio callbacks.

use heapless::String;
use log::{debug, info, warn};

use crate::config::Config;
use crate::pattern::{Pattern, PatternLibrary, PATTERN_SIDE};
use crate::peers::PeerTracker;
use crate::protocol::{self, Announcement, Message, PUSH_TAG};
use crate::render::{CoordinateMap, DisplaySurface, Max7219Rows, SliceRenderer};
use crate::schedule::PatternScheduler;
use crate::{LogicalTime, NodeId};

/// Longest pattern push: tag plus 32 rows of 32 cells and a newline each
pub const MAX_PUSH_LEN: usize = PUSH_TAG.len() + PATTERN_SIDE * (PATTERN_SIDE + 1);

/// Text of the custom pattern without the push tag
pub const MAX_PATTERN_TEXT_LEN: usize = PATTERN_SIDE * (PATTERN_SIDE + 1);

/// Board id from the factory MAC address: its last four bytes, big-endian
pub fn node_id_from_mac(mac: &[u8; 6]) -> NodeId {
    NodeId::from_be_bytes([mac[2], mac[3], mac[4], mac[5]])
}

/// All per-board mesh state, owned in one place.
pub struct MeshNode<M = Max7219Rows> {
    id: NodeId,
    config: Config,
    tracker: PeerTracker,
    scheduler: PatternScheduler,
    library: PatternLibrary,
    renderer: SliceRenderer<M>,
    pending_pushes: u8,
}

impl MeshNode<Max7219Rows> {
    /// Node with the built-in patterns, drawing on a MAX7219 strip
    pub fn new(id: NodeId, config: Config) -> Self {
        Self::with_map(id, config, Max7219Rows)
    }
}

impl<M: CoordinateMap> MeshNode<M> {
    /// Node with the built-in patterns and a custom coordinate map
    pub fn with_map(id: NodeId, config: Config, map: M) -> Self {
        Self::with_library(id, config, PatternLibrary::standard(), map)
    }

    pub fn with_library(id: NodeId, config: Config, library: PatternLibrary, map: M) -> Self {
        let scheduler = PatternScheduler::new(library.builtin_count(), config.transition_period)
            .with_intensity(config.min_intensity, config.max_intensity);
        Self {
            id,
            config,
            tracker: PeerTracker::new(config.liveness_timeout),
            scheduler,
            library,
            renderer: SliceRenderer::new(config.geometry, map),
            pending_pushes: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// This board's position among the live peers
    pub fn rank(&self) -> usize {
        self.tracker.rank_of(self.id)
    }

    /// Live peers, self included once announced
    pub fn peer_count(&self) -> usize {
        self.tracker.count()
    }

    pub fn scheduler(&self) -> &PatternScheduler {
        &self.scheduler
    }

    pub fn tracker(&self) -> &PeerTracker {
        &self.tracker
    }

    /// Render tick: advance the rotation and redraw this board's band.
    ///
    /// The frame on which the rotation advances stays blank unless a custom
    /// pattern is installed.
    pub fn tick<S: DisplaySurface>(&mut self, now: LogicalTime, surface: &mut S) -> Result<(), S::Error> {
        let advanced = self.scheduler.tick(now);
        surface.set_intensity(self.scheduler.brightness(now))?;

        let pattern = match self.library.custom() {
            Some(custom) => Some(custom),
            None if advanced => None,
            None => Some(self.library.current(self.scheduler.current_index())),
        };

        match pattern {
            Some(pattern) => {
                self.renderer
                    .render(pattern, self.rank(), self.tracker.count(), surface)
            }
            None => surface.clear(),
        }
        surface.flush()
    }

    /// Handle one inbound text message. Malformed messages change nothing.
    pub fn on_message(&mut self, from: NodeId, text: &str, now: LogicalTime) {
        match Message::parse(text) {
            Ok(Message::Announce(announcement)) => self.on_announcement(announcement, now),
            Ok(Message::Push(bitmap)) => {
                info!("Custom pattern received from {}", from);
                self.install_custom_pattern(bitmap.split('\n'));
            }
            Err(err) => debug!("Ignoring message from {}: {}", from, err),
        }
    }

    fn on_announcement(&mut self, announcement: Announcement, now: LogicalTime) {
        self.tracker.touch(announcement.sender, now);
        self.tracker.touch(self.id, now);
        self.tracker.prune(now);

        match announcement.countdown {
            Some(_) if announcement.sender == self.id => {
                warn!("Ignoring time hint carrying our own id {}", self.id)
            }
            Some(countdown) => self.scheduler.accept_time_hint(countdown, now),
            None => {}
        }
    }

    /// Install a custom pattern from rows of `*`/space cells
    pub fn install_custom_pattern<'a, I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.library.install_custom(Pattern::from_rows(rows));
    }

    /// Web form path: install `text` and schedule the repeated broadcast
    pub fn submit_custom_pattern(&mut self, text: &str) {
        self.install_custom_pattern(text.split('\n'));
        self.pending_pushes = self.config.push_repeats;
    }

    /// Return to the built-in rotation. Returns whether an override was active.
    pub fn clear_custom_pattern(&mut self) -> bool {
        self.pending_pushes = 0;
        self.library.clear_custom()
    }

    /// Text of the installed custom pattern, empty when none is installed
    pub fn custom_text(&self) -> String<MAX_PATTERN_TEXT_LEN> {
        let mut text = String::new();
        if let Some(pattern) = self.library.custom() {
            // at most 32 rows of 33 bytes
            let _ = pattern.write_text(&mut text);
        }
        text
    }

    /// Outbound liveness announcement for `now`.
    ///
    /// Self is touched first so rank and count include this board. Only the
    /// rank 0 board attaches its countdown.
    pub fn announce(&mut self, now: LogicalTime) -> Announcement {
        self.tracker.touch(self.id, now);
        self.tracker.prune(now);

        let announcement = Announcement::new(self.id);
        if self.rank() != 0 {
            return announcement;
        }
        if self.scheduler.state().is_none() {
            self.scheduler.tick(now);
        }
        match self.scheduler.countdown(now) {
            Some(countdown) => announcement.with_countdown(countdown),
            None => announcement,
        }
    }

    /// Next queued rebroadcast of the custom pattern, if any remain
    pub fn next_push(&mut self) -> Option<String<MAX_PUSH_LEN>> {
        if self.pending_pushes == 0 {
            return None;
        }
        let Some(pattern) = self.library.custom() else {
            self.pending_pushes = 0;
            return None;
        };

        let mut text = String::new();
        if protocol::write_push(pattern, &mut text).is_err() {
            warn!("Custom pattern does not fit a push message");
            self.pending_pushes = 0;
            return None;
        }
        self.pending_pushes -= 1;
        debug!("Pushing custom pattern, {} repeats left", self.pending_pushes);
        Some(text)
    }

    /// Rebroadcasts still queued
    pub fn pending_pushes(&self) -> u8 {
        self.pending_pushes
    }
}

impl<M> core::fmt::Debug for MeshNode<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MeshNode")
            .field("id", &self.id)
            .field("peers", &self.tracker.count())
            .field("schedule", &self.scheduler.state())
            .field("pending_pushes", &self.pending_pushes)
            .finish()
    }
}
