//! Splitting mesh messages into radio frames and joining them back.
//!
//! ESP-NOW frames carry at most 250 bytes, a full pattern push is about a
//! kilobyte. Every frame starts with a small header:
//!
//! ```text
//! ┌───────┬────────────┬───────┬───────┬──────────────┐
//! │ MAGIC │ MESSAGE_ID │ INDEX │ COUNT │ CHUNK        │
//! │ 0xB7  │ 1B         │ 1B    │ 1B    │ 0–246B       │
//! └───────┴────────────┴───────┴───────┴──────────────┘
//! ```
//!
//! Fragments of one message are sent back to back. The receiver only accepts
//! them in order; a gap throws the partial message away and the sender's
//! repeats fill in later.

use heapless::{LinearMap, Vec};
use log::{debug, warn};

/// First byte of every frame
pub const FRAGMENT_MAGIC: u8 = 0xB7;

/// Header size in bytes
pub const HEADER_LEN: usize = 4;

/// Largest radio frame
pub const MAX_FRAME_LEN: usize = 250;

/// Payload bytes per frame
pub const MAX_CHUNK_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Most fragments a message may span
pub const MAX_FRAGMENTS: usize = 8;

/// Largest message that can be sent
pub const MAX_MESSAGE_LEN: usize = MAX_CHUNK_LEN * MAX_FRAGMENTS;

/// Senders with a partial message in flight at the same time
pub const MAX_SENDERS: usize = 4;

/// Radio hardware address of a sender
pub type Address = [u8; 6];

/// A complete reassembled message
pub type MessageBuf = Vec<u8, MAX_MESSAGE_LEN>;

/// Errors that can occur while framing or reassembling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentError {
    /// Frame shorter than the header
    TooShort,
    /// Frame does not start with [`FRAGMENT_MAGIC`]
    BadMagic,
    /// Index or count out of range
    InvalidIndex,
    /// Message needs more than [`MAX_FRAGMENTS`] frames
    MessageTooLarge,
    /// Chunk exceeds [`MAX_CHUNK_LEN`]
    ChunkTooLarge,
    /// Output buffer too small for encoding
    BufferTooSmall,
    /// Fragment does not continue the message in progress
    OutOfOrder,
}

/// One frame's worth of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub message_id: u8,
    pub index: u8,
    pub count: u8,
    pub chunk: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Encode this fragment into `buffer`
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FragmentError> {
        if self.chunk.len() > MAX_CHUNK_LEN {
            return Err(FragmentError::ChunkTooLarge);
        }
        let len = HEADER_LEN + self.chunk.len();
        if buffer.len() < len {
            return Err(FragmentError::BufferTooSmall);
        }

        buffer[0] = FRAGMENT_MAGIC;
        buffer[1] = self.message_id;
        buffer[2] = self.index;
        buffer[3] = self.count;
        buffer[HEADER_LEN..len].copy_from_slice(self.chunk);
        Ok(len)
    }

    /// Decode a received frame
    pub fn decode(frame: &'a [u8]) -> Result<Self, FragmentError> {
        if frame.len() < HEADER_LEN {
            return Err(FragmentError::TooShort);
        }
        if frame[0] != FRAGMENT_MAGIC {
            return Err(FragmentError::BadMagic);
        }
        let (message_id, index, count) = (frame[1], frame[2], frame[3]);
        if count == 0 || count as usize > MAX_FRAGMENTS || index >= count {
            return Err(FragmentError::InvalidIndex);
        }
        let chunk = &frame[HEADER_LEN..];
        if chunk.len() > MAX_CHUNK_LEN {
            return Err(FragmentError::ChunkTooLarge);
        }
        Ok(Self {
            message_id,
            index,
            count,
            chunk,
        })
    }
}

/// Cut `payload` into fragments. An empty payload still yields one fragment.
pub fn split(
    message_id: u8,
    payload: &[u8],
) -> Result<impl Iterator<Item = Fragment<'_>>, FragmentError> {
    let count = payload.len().div_ceil(MAX_CHUNK_LEN).max(1);
    if count > MAX_FRAGMENTS {
        return Err(FragmentError::MessageTooLarge);
    }

    Ok((0..count).map(move |index| {
        let start = index * MAX_CHUNK_LEN;
        let end = (start + MAX_CHUNK_LEN).min(payload.len());
        Fragment {
            message_id,
            index: index as u8,
            count: count as u8,
            chunk: &payload[start..end],
        }
    }))
}

#[derive(Debug)]
struct Partial {
    message_id: u8,
    count: u8,
    next_index: u8,
    data: MessageBuf,
}

/// Joins fragments back into messages, one message in flight per sender.
#[derive(Debug, Default)]
pub struct Reassembler {
    partials: LinearMap<Address, Partial, MAX_SENDERS>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of senders with an unfinished message
    pub fn in_flight(&self) -> usize {
        self.partials.len()
    }

    /// Feed one received frame from `from`.
    ///
    /// Returns `Ok(Some(message))` once the last fragment arrives, `Ok(None)`
    /// while more are expected. Single-frame messages pass straight through
    /// and leave any partial message from the same sender untouched.
    pub fn feed(&mut self, from: Address, frame: &[u8]) -> Result<Option<MessageBuf>, FragmentError> {
        let fragment = Fragment::decode(frame)?;

        if fragment.count == 1 {
            return Ok(Some(to_message(fragment.chunk)?));
        }

        if fragment.index == 0 {
            self.start(from, &fragment)?;
        } else {
            let Some(partial) = self.partials.get_mut(&from) else {
                return Err(FragmentError::OutOfOrder);
            };
            let continues = partial.message_id == fragment.message_id
                && partial.count == fragment.count
                && partial.next_index == fragment.index;
            if !continues {
                debug!(
                    "Dropping partial message {} from {:02x?}: got fragment {}/{} of {}",
                    partial.message_id, from, fragment.index, fragment.count, fragment.message_id
                );
                self.partials.remove(&from);
                return Err(FragmentError::OutOfOrder);
            }
            partial
                .data
                .extend_from_slice(fragment.chunk)
                .map_err(|_| FragmentError::MessageTooLarge)?;
            partial.next_index += 1;
        }

        let complete = self
            .partials
            .get(&from)
            .is_some_and(|partial| partial.next_index == partial.count);
        if complete {
            return Ok(self.partials.remove(&from).map(|partial| partial.data));
        }
        Ok(None)
    }

    fn start(&mut self, from: Address, fragment: &Fragment<'_>) -> Result<(), FragmentError> {
        if !self.partials.contains_key(&from) && self.partials.len() == MAX_SENDERS {
            let evicted = self.partials.keys().next().copied();
            if let Some(evicted) = evicted {
                warn!("Too many partial messages, dropping the one from {:02x?}", evicted);
                self.partials.remove(&evicted);
            }
        }

        let partial = Partial {
            message_id: fragment.message_id,
            count: fragment.count,
            next_index: 1,
            data: to_message(fragment.chunk)?,
        };
        self.partials
            .insert(from, partial)
            .map_err(|_| FragmentError::MessageTooLarge)?;
        Ok(())
    }
}

fn to_message(chunk: &[u8]) -> Result<MessageBuf, FragmentError> {
    MessageBuf::from_slice(chunk).map_err(|_| FragmentError::MessageTooLarge)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = [0x24, 0x0a, 0xc4, 0, 0, 1];
    const BOB: Address = [0x24, 0x0a, 0xc4, 0, 0, 2];

    fn frames(message_id: u8, payload: &[u8]) -> std::vec::Vec<std::vec::Vec<u8>> {
        split(message_id, payload)
            .unwrap()
            .map(|fragment| {
                let mut buffer = [0u8; MAX_FRAME_LEN];
                let len = fragment.encode(&mut buffer).unwrap();
                buffer[..len].to_vec()
            })
            .collect()
    }

    fn push_payload() -> std::vec::Vec<u8> {
        let mut text = b"IMG".to_vec();
        for row in 0..32 {
            for col in 0..32 {
                text.push(if (row + col) % 3 == 0 { b'*' } else { b' ' });
            }
            text.push(b'\n');
        }
        text
    }

    #[test]
    fn test_encode_header() {
        let fragment = Fragment {
            message_id: 9,
            index: 1,
            count: 3,
            chunk: b"abc",
        };
        let mut buffer = [0u8; 16];
        let len = fragment.encode(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[FRAGMENT_MAGIC, 9, 1, 3, b'a', b'b', b'c']);
        assert_eq!(Fragment::decode(&buffer[..len]), Ok(fragment));
    }

    #[test]
    fn test_full_push_spans_five_frames() {
        let payload = push_payload();
        assert_eq!(payload.len(), 3 + 32 * 33);
        let frames = frames(1, &payload);
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|frame| frame.len() <= MAX_FRAME_LEN));

        let mut reassembler = Reassembler::new();
        let mut done = None;
        for frame in &frames {
            done = reassembler.feed(ALICE, frame).unwrap();
        }
        assert_eq!(done.unwrap().as_slice(), payload.as_slice());
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn test_short_message_is_one_frame() {
        let frames = frames(4, b"XYZ 17");
        assert_eq!(frames.len(), 1);
        let mut reassembler = Reassembler::new();
        let message = reassembler.feed(BOB, &frames[0]).unwrap().unwrap();
        assert_eq!(message.as_slice(), b"XYZ 17");
    }

    #[test]
    fn test_empty_payload_still_sends_a_frame() {
        let frames = frames(0, b"");
        assert_eq!(frames, vec![vec![FRAGMENT_MAGIC, 0, 0, 1]]);
    }

    #[test]
    fn test_lost_fragment_drops_message_until_repeat() {
        let payload = push_payload();
        let frames = frames(2, &payload);
        let mut reassembler = Reassembler::new();

        assert_eq!(reassembler.feed(ALICE, &frames[0]), Ok(None));
        assert_eq!(
            reassembler.feed(ALICE, &frames[2]),
            Err(FragmentError::OutOfOrder)
        );
        assert_eq!(reassembler.in_flight(), 0);
        assert_eq!(
            reassembler.feed(ALICE, &frames[3]),
            Err(FragmentError::OutOfOrder)
        );

        let mut done = None;
        for frame in &frames {
            done = reassembler.feed(ALICE, frame).unwrap();
        }
        assert_eq!(done.unwrap().as_slice(), payload.as_slice());
    }

    #[test]
    fn test_senders_are_reassembled_independently() {
        let alice = frames(1, &[b'a'; 600]);
        let bob = frames(1, &[b'b'; 300]);
        let mut reassembler = Reassembler::new();

        assert_eq!(reassembler.feed(ALICE, &alice[0]), Ok(None));
        assert_eq!(reassembler.feed(BOB, &bob[0]), Ok(None));
        // an announcement in between does not disturb the partial push
        assert!(reassembler.feed(ALICE, &frames(7, b"XYZ 1")[0]).unwrap().is_some());
        assert_eq!(reassembler.feed(ALICE, &alice[1]), Ok(None));

        let from_bob = reassembler.feed(BOB, &bob[1]).unwrap().unwrap();
        assert_eq!(from_bob.len(), 300);
        let from_alice = reassembler.feed(ALICE, &alice[2]).unwrap().unwrap();
        assert_eq!(from_alice.len(), 600);
    }

    #[test]
    fn test_restart_replaces_partial() {
        let first = frames(1, &[b'a'; 400]);
        let second = frames(2, &[b'b'; 400]);
        let mut reassembler = Reassembler::new();
        reassembler.feed(ALICE, &first[0]).unwrap();
        reassembler.feed(ALICE, &second[0]).unwrap();
        let message = reassembler.feed(ALICE, &second[1]).unwrap().unwrap();
        assert!(message.iter().all(|&b| b == b'b'));
    }

    #[test]
    fn test_sender_table_evicts_when_full() {
        let payload = [b'x'; 300];
        let frames = frames(1, &payload);
        let mut reassembler = Reassembler::new();
        for last in 0..=MAX_SENDERS as u8 {
            reassembler.feed([0, 0, 0, 0, 0, last], &frames[0]).unwrap();
        }
        assert_eq!(reassembler.in_flight(), MAX_SENDERS);

        let newest = [0, 0, 0, 0, 0, MAX_SENDERS as u8];
        let message = reassembler.feed(newest, &frames[1]).unwrap().unwrap();
        assert_eq!(&message[..], &payload[..]);
        assert_eq!(reassembler.in_flight(), MAX_SENDERS - 1);
    }

    #[test]
    fn test_rejects_bad_frames() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.feed(ALICE, &[FRAGMENT_MAGIC, 0]), Err(FragmentError::TooShort));
        assert_eq!(reassembler.feed(ALICE, &[0x00, 0, 0, 1]), Err(FragmentError::BadMagic));
        assert_eq!(
            reassembler.feed(ALICE, &[FRAGMENT_MAGIC, 0, 2, 2]),
            Err(FragmentError::InvalidIndex)
        );
        assert_eq!(
            reassembler.feed(ALICE, &[FRAGMENT_MAGIC, 0, 0, 9]),
            Err(FragmentError::InvalidIndex)
        );
    }

    #[test]
    fn test_oversize_message_is_refused() {
        let payload = [0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(split(0, &payload), Err(FragmentError::MessageTooLarge)));
        assert_eq!(split(0, &payload[..MAX_MESSAGE_LEN]).unwrap().count(), MAX_FRAGMENTS);
    }
}
