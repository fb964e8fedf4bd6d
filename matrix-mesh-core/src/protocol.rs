//! Text messages exchanged over the mesh broadcast.
//!
//! ```text
//! XYZ <sender_id> [<countdown>]     liveness announcement
//! IMG<row>\n<row>\n...              custom pattern push, '*' lit, ' ' unlit
//! ```
//!
//! The countdown is the time left until the sender's next pattern
//! transition, in logical-time units. A negative countdown means "no hint".

use core::fmt::{self, Write};

use heapless::String;

use crate::pattern::Pattern;
use crate::{LogicalTime, NodeId};

/// Leading token of an announcement
pub const ANNOUNCE_TAG: &str = "XYZ";

/// Prefix of a pattern push
pub const PUSH_TAG: &str = "IMG";

/// Longest encoded announcement: tag, u32 id, u64 countdown and two spaces
pub const MAX_ANNOUNCEMENT_LEN: usize = 40;

/// Why an inbound message was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Neither an announcement nor a push
    UnknownPrefix,
    /// Starts like an announcement but the tag is not a separate token
    MalformedTag,
    /// Announcement without a sender id
    MissingSender,
    /// Sender id is not an unsigned 32-bit number
    InvalidSender,
    /// Countdown is present but not a number
    InvalidCountdown,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ParseError::UnknownPrefix => "unknown prefix",
            ParseError::MalformedTag => "malformed announcement tag",
            ParseError::MissingSender => "missing sender id",
            ParseError::InvalidSender => "invalid sender id",
            ParseError::InvalidCountdown => "invalid countdown",
        };
        f.write_str(reason)
    }
}

/// Periodic "I am alive" message, optionally carrying a timing hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    pub sender: NodeId,
    pub countdown: Option<LogicalTime>,
}

impl Announcement {
    pub fn new(sender: NodeId) -> Self {
        Self {
            sender,
            countdown: None,
        }
    }

    pub fn with_countdown(mut self, countdown: LogicalTime) -> Self {
        self.countdown = Some(countdown);
        self
    }

    /// Wire form of the announcement
    pub fn encode(&self) -> String<MAX_ANNOUNCEMENT_LEN> {
        let mut text = String::new();
        // cannot overflow: MAX_ANNOUNCEMENT_LEN covers the widest numbers
        let _ = write!(text, "{}", self);
        text
    }

    fn parse(text: &str) -> Result<Self, ParseError> {
        let mut tokens = text.split_ascii_whitespace();
        if tokens.next() != Some(ANNOUNCE_TAG) {
            return Err(ParseError::MalformedTag);
        }

        let sender = tokens
            .next()
            .ok_or(ParseError::MissingSender)?
            .parse::<NodeId>()
            .map_err(|_| ParseError::InvalidSender)?;

        let countdown = match tokens.next() {
            None => None,
            Some(token) => {
                let value = token
                    .parse::<i64>()
                    .map_err(|_| ParseError::InvalidCountdown)?;
                LogicalTime::try_from(value).ok()
            }
        };

        Ok(Self { sender, countdown })
    }
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", ANNOUNCE_TAG, self.sender)?;
        if let Some(countdown) = self.countdown {
            write!(f, " {}", countdown)?;
        }
        Ok(())
    }
}

/// A parsed inbound message. Push payloads borrow the received text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    Announce(Announcement),
    Push(&'a str),
}

impl<'a> Message<'a> {
    pub fn parse(text: &'a str) -> Result<Self, ParseError> {
        if let Some(bitmap) = text.strip_prefix(PUSH_TAG) {
            return Ok(Message::Push(bitmap));
        }
        if text.starts_with(ANNOUNCE_TAG) {
            return Announcement::parse(text).map(Message::Announce);
        }
        Err(ParseError::UnknownPrefix)
    }
}

/// Write the push message for `pattern`
pub fn write_push<W: Write>(pattern: &Pattern, out: &mut W) -> fmt::Result {
    out.write_str(PUSH_TAG)?;
    pattern.write_text(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_without_countdown() {
        let announcement = Announcement::new(3_735_928_559);
        assert_eq!(announcement.encode().as_str(), "XYZ 3735928559");
        assert_eq!(
            Message::parse("XYZ 3735928559"),
            Ok(Message::Announce(announcement))
        );
    }

    #[test]
    fn test_announcement_with_countdown() {
        let text = Announcement::new(42).with_countdown(1_500).encode();
        assert_eq!(text.as_str(), "XYZ 42 1500");
        let Ok(Message::Announce(parsed)) = Message::parse(&text) else {
            panic!("not an announcement");
        };
        assert_eq!(parsed.countdown, Some(1_500));
    }

    #[test]
    fn test_widest_announcement_fits() {
        let text = Announcement::new(u32::MAX).with_countdown(u64::MAX).encode();
        assert_eq!(text.len(), 3 + 1 + 10 + 1 + 20);
    }

    #[test]
    fn test_negative_countdown_is_no_hint() {
        assert_eq!(
            Message::parse("XYZ 7 -1"),
            Ok(Message::Announce(Announcement::new(7)))
        );
    }

    #[test]
    fn test_extra_whitespace_is_tolerated() {
        assert_eq!(
            Message::parse("XYZ   7\t 20 \n"),
            Ok(Message::Announce(Announcement::new(7).with_countdown(20)))
        );
    }

    #[test]
    fn test_wrong_prefix_is_rejected() {
        assert_eq!(Message::parse("hello"), Err(ParseError::UnknownPrefix));
        assert_eq!(Message::parse(""), Err(ParseError::UnknownPrefix));
    }

    #[test]
    fn test_malformed_announcements() {
        assert_eq!(Message::parse("XYZ"), Err(ParseError::MissingSender));
        assert_eq!(Message::parse("XYZ12"), Err(ParseError::MalformedTag));
        assert_eq!(Message::parse("XYZ abc"), Err(ParseError::InvalidSender));
        assert_eq!(Message::parse("XYZ -4"), Err(ParseError::InvalidSender));
        assert_eq!(Message::parse("XYZ 4 soon"), Err(ParseError::InvalidCountdown));
    }

    #[test]
    fn test_push_borrows_bitmap() {
        assert_eq!(Message::parse("IMG* *\n *"), Ok(Message::Push("* *\n *")));
        assert_eq!(Message::parse("IMG"), Ok(Message::Push("")));
    }

    #[test]
    fn test_push_text_parses_back() {
        let pattern = Pattern::parse("*\n  **\n*");
        let mut text = std::string::String::new();
        write_push(&pattern, &mut text).unwrap();
        assert!(text.starts_with("IMG"));
        let Ok(Message::Push(bitmap)) = Message::parse(&text) else {
            panic!("not a push");
        };
        assert_eq!(Pattern::parse(bitmap), pattern);
    }
}
