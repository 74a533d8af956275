//! Line framing for the serial message protocol.
//!
//! Every message is one ASCII line, `pub <topic> <payload>\n`, where the
//! payload is a JSON document. The stream carries no other framing, so the
//! receiver accumulates bytes in a fixed buffer until it sees a terminator
//! and resynchronises on the next terminator after any overflow.
//!
//! XON/XOFF bytes share the stream with the lines. They never occur inside a
//! valid line because topics are printable ASCII and JSON escapes control
//! characters.

use serde_json::Value;

/// Receive buffer capacity in bytes.
pub const RX_CAPACITY: usize = 512;
/// Line terminator.
pub const TERMINATOR: u8 = b'\n';
/// Resume transmission.
pub const XON: u8 = 0x11;
/// Pause transmission.
pub const XOFF: u8 = 0x13;
/// Longest accepted topic name.
pub const MAX_TOPIC_LEN: usize = 64;

/// Errors produced while parsing one received line.
#[derive(Debug)]
pub enum FrameError {
    /// No `pub`/`sub` verb anywhere on the line.
    MissingVerb,
    MissingTopic,
    MissingPayload,
    InvalidTopic,
    NotUtf8,
    Payload(serde_json::Error),
}

/// Message verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Pub,
    /// Local registration notation; never acted on when received.
    Sub,
}

/// A parsed line whose payload has been decoded.
#[derive(Debug)]
pub struct Frame<'a> {
    pub verb: Verb,
    pub topic: &'a str,
    pub payload: Value,
}

/// True when `topic` is non-empty, at most [`MAX_TOPIC_LEN`] bytes and made
/// only of printable, non-space ASCII.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && topic.bytes().all(|b| b.is_ascii_graphic())
}

/// Parse one line (terminator already removed).
///
/// Bytes in front of the verb are skipped: the parser tries each `pub `/`sub `
/// token on the line in order and returns the first one that forms a complete
/// message with a decodable payload. When none does, the error from the first
/// candidate is returned.
pub fn decode_line(line: &[u8]) -> Result<Frame<'_>, FrameError> {
    let mut first_error = None;
    for start in verb_positions(line) {
        match decode_at(&line[start..]) {
            Ok(frame) => return Ok(frame),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or(FrameError::MissingVerb))
}

fn verb_positions(line: &[u8]) -> impl Iterator<Item = usize> + '_ {
    line.windows(4)
        .enumerate()
        .filter(|(_, w)| *w == b"pub " || *w == b"sub ")
        .map(|(i, _)| i)
}

fn decode_at(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    let text = core::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
    let text = text.trim_end_matches(|c| c == '\r' || c == ' ' || c == '\t');

    let mut parts = text.splitn(3, ' ');
    let verb = match parts.next() {
        Some("pub") => Verb::Pub,
        Some("sub") => Verb::Sub,
        _ => return Err(FrameError::MissingVerb),
    };
    let topic = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or(FrameError::MissingTopic)?;
    if !is_valid_topic(topic) {
        return Err(FrameError::InvalidTopic);
    }
    let payload = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(FrameError::MissingPayload)?;
    let payload = serde_json::from_str(payload).map_err(FrameError::Payload)?;

    Ok(Frame {
        verb,
        topic,
        payload,
    })
}

/// Outcome of pushing one byte into the [`RxBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Stored,
    /// A terminator arrived; [`RxBuffer::line`] holds the completed line.
    Line,
    /// Byte dropped while skipping the tail of an oversized line.
    Skipped,
    /// The buffer was full: the partial line was dropped and the buffer is
    /// skipping to the next terminator.
    Overflow,
}

/// Fixed-capacity receive buffer with explicit occupancy tracking.
pub struct RxBuffer {
    data: [u8; RX_CAPACITY],
    len: usize,
    discarding: bool,
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RxBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0; RX_CAPACITY],
            len: 0,
            discarding: false,
        }
    }

    /// Append one byte.
    pub fn push(
        &mut self,
        byte: u8,
    ) -> Push {
        if self.discarding {
            if byte == TERMINATOR {
                self.discarding = false;
            }
            return Push::Skipped;
        }
        if byte == TERMINATOR {
            return Push::Line;
        }
        if self.len == RX_CAPACITY {
            self.len = 0;
            self.discarding = true;
            return Push::Overflow;
        }
        self.data[self.len] = byte;
        self.len += 1;
        Push::Stored
    }

    /// Bytes of the line completed by the last [`Push::Line`].
    pub fn line(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Drop the completed line so the next one starts at the front.
    pub fn consume_line(&mut self) {
        self.len = 0;
    }

    pub fn occupancy(&self) -> usize {
        self.len
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding
    }
}

/// Software flow control state for the receive direction.
///
/// Transitions are edge-triggered: [`FlowControl::update`] reports a control
/// byte only when the paused state changes, so repeated asserts or clears
/// put nothing extra on the wire.
#[derive(Debug, Clone, Copy)]
pub struct FlowControl {
    high_water: usize,
    low_water: usize,
    paused: bool,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(RX_CAPACITY * 4 / 5, RX_CAPACITY * 2 / 5)
    }
}

impl FlowControl {
    /// `low_water` is clamped below `high_water`.
    pub fn new(
        high_water: usize,
        low_water: usize,
    ) -> Self {
        Self {
            high_water,
            low_water: low_water.min(high_water.saturating_sub(1)),
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Control byte to send for the given buffer occupancy, if any.
    pub fn update(
        &mut self,
        occupancy: usize,
    ) -> Option<u8> {
        if occupancy >= self.high_water {
            self.assert_pause()
        } else if occupancy <= self.low_water {
            self.release()
        } else {
            None
        }
    }

    /// Ask the sender to pause. Returns `XOFF` only on the first call.
    pub fn assert_pause(&mut self) -> Option<u8> {
        if self.paused {
            return None;
        }
        self.paused = true;
        Some(XOFF)
    }

    /// Let the sender resume. Returns `XON` only when currently paused.
    pub fn release(&mut self) -> Option<u8> {
        if !self.paused {
            return None;
        }
        self.paused = false;
        Some(XON)
    }

    /// Undo a transition whose control byte could not be written.
    pub(crate) fn revert(
        &mut self,
        byte: u8,
    ) {
        self.paused = byte == XON;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(
        rx: &mut RxBuffer,
        bytes: &[u8],
    ) -> Vec<Push> {
        bytes.iter().map(|&b| rx.push(b)).collect()
    }

    #[test]
    fn parses_pub_line() {
        let frame = decode_line(br#"pub arduino/in/target {"rotation":[1,2,3,4,5,6]}"#).unwrap();
        assert_eq!(frame.verb, Verb::Pub);
        assert_eq!(frame.topic, "arduino/in/target");
        assert_eq!(frame.payload["rotation"][5], 6);
    }

    #[test]
    fn strips_carriage_return() {
        let frame = decode_line(b"pub a/b {}\r").unwrap();
        assert_eq!(frame.topic, "a/b");
    }

    #[test]
    fn skips_leading_garbage() {
        let frame = decode_line(b"\xff\x00zz pub a/b {\"x\":1}").unwrap();
        assert_eq!(frame.topic, "a/b");
        assert_eq!(frame.payload["x"], 1);
    }

    #[test]
    fn later_verb_wins_when_earlier_candidates_fail() {
        let frame = decode_line(b"xpub sub q/r {\"n\": pub x { pub a/b {\"x\":2}").unwrap();
        assert_eq!(frame.verb, Verb::Pub);
        assert_eq!(frame.topic, "a/b");
        assert_eq!(frame.payload["x"], 2);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(decode_line(b"hello world"), Err(FrameError::MissingVerb)));
        assert!(matches!(decode_line(b"pub  {}"), Err(FrameError::MissingTopic)));
        assert!(matches!(decode_line(b"pub a/b"), Err(FrameError::MissingPayload)));
        assert!(matches!(decode_line(b"pub a/b {oops"), Err(FrameError::Payload(_))));
    }

    #[test]
    fn overflow_drops_partial_and_resyncs() {
        let mut rx = RxBuffer::new();
        let long = vec![b'x'; RX_CAPACITY];
        assert!(feed(&mut rx, &long).iter().all(|p| *p == Push::Stored));
        assert_eq!(rx.push(b'y'), Push::Overflow);
        assert_eq!(rx.occupancy(), 0);
        assert_eq!(rx.push(b'z'), Push::Skipped);
        assert_eq!(rx.push(TERMINATOR), Push::Skipped);
        assert!(!rx.is_discarding());

        let pushes = feed(&mut rx, b"pub a {}\n");
        assert_eq!(pushes.last(), Some(&Push::Line));
        assert_eq!(rx.line(), b"pub a {}");
    }

    #[test]
    fn terminator_completes_full_buffer() {
        let mut rx = RxBuffer::new();
        feed(&mut rx, &vec![b'x'; RX_CAPACITY]);
        assert_eq!(rx.push(TERMINATOR), Push::Line);
        assert_eq!(rx.line().len(), RX_CAPACITY);
    }

    #[test]
    fn flow_control_is_idempotent() {
        let mut flow = FlowControl::default();
        assert_eq!(flow.assert_pause(), Some(XOFF));
        assert_eq!(flow.assert_pause(), None);
        assert!(flow.is_paused());
        assert_eq!(flow.release(), Some(XON));
        assert_eq!(flow.release(), None);
        assert!(!flow.is_paused());
    }

    #[test]
    fn flow_control_hysteresis() {
        let mut flow = FlowControl::default();
        assert_eq!(flow.update(100), None);
        assert_eq!(flow.update(409), Some(XOFF));
        assert_eq!(flow.update(450), None);
        assert_eq!(flow.update(300), None);
        assert_eq!(flow.update(204), Some(XON));
        assert_eq!(flow.update(0), None);
    }
}
