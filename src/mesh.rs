//! ESP-NOW transport for the mesh messages
//!
//! Outbound text is split into fragments and broadcast back to back; inbound
//! frames are reassembled per sender and handed to the shared node.

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker};
use esp_wifi::esp_now::{EspNow, EspNowError, EspNowReceiver, EspNowSender, BROADCAST_ADDRESS};
use log::{debug, info, warn};
use matrix_mesh_core::fragment::{self, FragmentError, Reassembler, MAX_FRAME_LEN};
use matrix_mesh_core::node_id_from_mac;
use static_cell::StaticCell;

use crate::SharedNode;

type SharedBroadcaster = Mutex<CriticalSectionRawMutex, Broadcaster>;

static BROADCASTER: StaticCell<SharedBroadcaster> = StaticCell::new();

#[derive(Debug)]
enum SendError {
    Framing(FragmentError),
    Radio(EspNowError),
}

/// Fragments and broadcasts whole messages
struct Broadcaster {
    sender: EspNowSender<'static>,
    next_message_id: u8,
}

impl Broadcaster {
    /// Send every fragment of `payload`. The caller holds the lock for the
    /// whole message so fragments of two messages never interleave.
    async fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let mut frame = [0u8; MAX_FRAME_LEN];
        for piece in fragment::split(message_id, payload).map_err(SendError::Framing)? {
            let len = piece.encode(&mut frame).map_err(SendError::Framing)?;
            self.sender
                .send_async(&BROADCAST_ADDRESS, &frame[..len])
                .await
                .map_err(SendError::Radio)?;
        }
        Ok(())
    }
}

/// Split the ESP-NOW interface and spawn the mesh tasks
pub fn start(spawner: Spawner, esp_now: EspNow<'static>, node: &'static SharedNode) {
    let (_manager, sender, receiver) = esp_now.split();
    let broadcaster = BROADCASTER.init(Mutex::new(Broadcaster {
        sender,
        next_message_id: 0,
    }));

    spawner.must_spawn(receive_task(receiver, node));
    spawner.must_spawn(announce_task(broadcaster, node));
    spawner.must_spawn(push_task(broadcaster, node));
}

/// Mesh logical time: milliseconds since boot
pub fn now() -> u64 {
    Instant::now().as_millis()
}

#[embassy_executor::task]
async fn receive_task(mut receiver: EspNowReceiver<'static>, node: &'static SharedNode) {
    let mut reassembler = Reassembler::new();
    loop {
        let received = receiver.receive_async().await;
        let source = received.info.src_address;

        let message = match reassembler.feed(source, received.data()) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                debug!("Dropping frame from {:02x?}: {:?}", source, e);
                continue;
            }
        };

        let Ok(text) = core::str::from_utf8(&message) else {
            debug!("Dropping non-UTF-8 message from {:02x?}", source);
            continue;
        };
        node.lock()
            .await
            .on_message(node_id_from_mac(&source), text, now());
    }
}

#[embassy_executor::task]
async fn announce_task(broadcaster: &'static SharedBroadcaster, node: &'static SharedNode) {
    let interval = node.lock().await.config().announce_interval;
    let mut ticker = Ticker::every(Duration::from_millis(interval));
    info!("Announcing every {} ms", interval);

    loop {
        let announcement = node.lock().await.announce(now());
        let text = announcement.encode();
        if let Err(e) = broadcaster.lock().await.send(text.as_bytes()).await {
            warn!("Announcement failed: {:?}", e);
        }
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn push_task(broadcaster: &'static SharedBroadcaster, node: &'static SharedNode) {
    let interval = node.lock().await.config().push_interval;
    let mut ticker = Ticker::every(Duration::from_millis(interval));

    loop {
        ticker.next().await;
        let Some(push) = node.lock().await.next_push() else {
            continue;
        };
        if let Err(e) = broadcaster.lock().await.send(push.as_bytes()).await {
            warn!("Pattern push failed: {:?}", e);
        }
    }
}
