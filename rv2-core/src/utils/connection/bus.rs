//! Publish/Subscribe Message Bus
//!
//! This module implements the message bus that links the arm board with the
//! computer over a raw byte stream. It reassembles `pub <topic> <payload>`
//! lines, dispatches them to registered subscribers, applies XON/XOFF
//! backpressure and runs the periodic checkup heartbeat.
//!
//! Subscribers are plain functions. The state they mutate is handed to them
//! through [`MessageBus::poll`], together with a [`Publisher`] for replies, so
//! no component needs a global instance pointer.

use alloc::string::String;
use core::fmt;

use embassy_time::{Duration, Instant};
use embedded_io::{Read, ReadReady, Write, WriteReady};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    frame::{self, FlowControl, FrameError, Push, RxBuffer, Verb},
    topics,
};
use crate::utils::context::{Context, LinkStatus};

/// Default number of subscription slots.
pub const DEFAULT_MAX_SUBS: usize = 10;
/// Bytes read from the stream per read call.
const READ_CHUNK: usize = 64;

/// Errors returned by [`MessageBus::subscribe`] and [`Publisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    SubscriptionsFull,
    InvalidTopic,
    /// The payload contains a line terminator.
    InvalidPayload,
    MessageTooLarge,
    /// The peer sent XOFF and has not sent XON yet.
    PeerPaused,
    /// The stream cannot take a write right now.
    NotReady,
    Serialize,
    Io(embedded_io::ErrorKind),
}

impl fmt::Display for BusError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            BusError::SubscriptionsFull => f.write_str("subscription table full"),
            BusError::InvalidTopic => f.write_str("invalid topic"),
            BusError::InvalidPayload => f.write_str("payload contains a line terminator"),
            BusError::MessageTooLarge => f.write_str("message exceeds output limit"),
            BusError::PeerPaused => f.write_str("peer paused transmission"),
            BusError::NotReady => f.write_str("stream not ready for writing"),
            BusError::Serialize => f.write_str("payload serialization failed"),
            BusError::Io(kind) => write!(f, "stream error: {kind:?}"),
        }
    }
}

/// Errors a subscriber callback may report. They are logged by the bus and
/// never stop the remaining subscribers from running.
#[derive(Debug)]
pub enum HandlerError {
    InvalidPayload(serde_json::Error),
    Rejected(&'static str),
    Publish(BusError),
}

impl From<BusError> for HandlerError {
    fn from(e: BusError) -> Self {
        HandlerError::Publish(e)
    }
}

/// A received message as seen by subscribers.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub topic: &'a str,
    pub payload: &'a Value,
}

impl<'a> Message<'a> {
    /// Deserialize the payload into a typed structure.
    pub fn decode<D: Deserialize<'a>>(&self) -> Result<D, HandlerError> {
        D::deserialize(self.payload).map_err(HandlerError::InvalidPayload)
    }
}

/// Something that can put a message on the wire.
pub trait Publisher {
    /// Publish an already serialized payload under `topic`.
    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> Result<(), BusError>;
}

/// Serialize `payload` as JSON and publish it.
pub fn publish_json<M: Serialize + ?Sized>(
    publisher: &mut dyn Publisher,
    topic: &str,
    payload: &M,
) -> Result<(), BusError> {
    let body = serde_json::to_string(payload).map_err(|_| BusError::Serialize)?;
    publisher.publish(topic, &body)
}

/// Subscriber callback: receives the dispatch state, the message and a
/// publisher for replies.
pub type Callback<T> = fn(&mut T, &Message<'_>, &mut dyn Publisher) -> Result<(), HandlerError>;

/// One entry of the subscription table.
pub struct Subscription<T> {
    filter: heapless::String<{ frame::MAX_TOPIC_LEN }>,
    callback: Callback<T>,
}

impl<T> Subscription<T> {
    /// Exact topic match; filters carry no wildcards.
    pub fn matches(
        &self,
        topic: &str,
    ) -> bool {
        self.filter.as_str() == topic
    }
}

/// Tunables for the bus. Defaults follow the board firmware.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Longest line `publish` will write, terminator included.
    pub max_output: usize,
    /// Partial-line occupancy at which XOFF is sent.
    pub high_water: usize,
    /// Occupancy at which XON is sent again, provided no input is left
    /// waiting.
    pub low_water: usize,
    /// Upper bound on bytes drained in one `poll`.
    pub max_drain: usize,
    pub heartbeat_interval: Duration,
    /// Time without an acknowledgment before the link counts as degraded.
    pub ack_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_output: frame::RX_CAPACITY,
            high_water: frame::RX_CAPACITY * 4 / 5,
            low_water: frame::RX_CAPACITY * 2 / 5,
            max_drain: frame::RX_CAPACITY * 4,
            heartbeat_interval: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(3),
        }
    }
}

/// Counters for conditions that are recovered from locally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub dispatched: u32,
    pub malformed: u32,
    pub overflows: u32,
    pub callback_failures: u32,
    pub stream_errors: u32,
}

/// Write side of the bus: the stream plus both directions of flow control.
pub struct Port<S> {
    stream: S,
    max_output: usize,
    rx_flow: FlowControl,
    peer_paused: bool,
}

impl<S> Port<S>
where
    S: Write + WriteReady,
{
    /// Send XON/XOFF for the receive backlog: the partial line held in the
    /// buffer plus whether the stream still had bytes waiting when the drain
    /// budget ran out.
    fn signal_flow(
        &mut self,
        occupancy: usize,
        backlogged: bool,
    ) {
        let control = if backlogged {
            self.rx_flow.assert_pause()
        } else {
            self.rx_flow.update(occupancy)
        };
        if let Some(byte) = control {
            let sent = self
                .stream
                .write_all(&[byte])
                .and_then(|()| self.stream.flush());
            match sent {
                Ok(()) => tracing::debug!(occupancy, backlogged, paused = (byte == frame::XOFF), "flow control"),
                Err(error) => {
                    tracing::warn!(?error, "failed to send flow control byte");
                    self.rx_flow.revert(byte);
                }
            }
        }
    }

    pub fn is_rx_paused(&self) -> bool {
        self.rx_flow.is_paused()
    }

    pub fn is_peer_paused(&self) -> bool {
        self.peer_paused
    }
}

impl<S> Publisher for Port<S>
where
    S: Write + WriteReady,
{
    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> Result<(), BusError> {
        if !frame::is_valid_topic(topic) {
            return Err(BusError::InvalidTopic);
        }
        if payload.bytes().any(|b| b == b'\n' || b == b'\r') {
            return Err(BusError::InvalidPayload);
        }
        let len = "pub ".len() + topic.len() + 1 + payload.len() + 1;
        if len > self.max_output {
            return Err(BusError::MessageTooLarge);
        }
        if self.peer_paused {
            return Err(BusError::PeerPaused);
        }
        let ready = self
            .stream
            .write_ready()
            .map_err(|e| BusError::Io(embedded_io::Error::kind(&e)))?;
        if !ready {
            return Err(BusError::NotReady);
        }

        let mut line = String::with_capacity(len);
        line.push_str("pub ");
        line.push_str(topic);
        line.push(' ');
        line.push_str(payload);
        line.push('\n');

        self.stream
            .write_all(line.as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| BusError::Io(embedded_io::Error::kind(&e)))
    }
}

/// The message bus. `T` is the state handed to subscribers on dispatch and
/// `N` the subscription table capacity.
pub struct MessageBus<S, T, const N: usize = DEFAULT_MAX_SUBS> {
    port: Port<S>,
    rx: RxBuffer,
    subs: Vec<Subscription<T>, N>,
    config: BusConfig,
    stats: BusStats,
    started: Option<Instant>,
}

#[derive(Serialize)]
struct Empty {}

impl<S, T, const N: usize> MessageBus<S, T, N>
where
    S: Read + ReadReady + Write + WriteReady,
    T: AsMut<LinkStatus>,
{
    pub fn new(
        stream: S,
        config: Option<BusConfig>,
    ) -> Self {
        let config = config.unwrap_or_default();
        Self {
            port: Port {
                stream,
                max_output: config.max_output,
                rx_flow: FlowControl::new(config.high_water, config.low_water),
                peer_paused: false,
            },
            rx: RxBuffer::new(),
            subs: Vec::new(),
            config,
            stats: BusStats::default(),
            started: None,
        }
    }

    /// Register `callback` for messages whose topic equals `filter`.
    ///
    /// Duplicate filters are allowed; every matching entry fires in
    /// registration order.
    pub fn subscribe(
        &mut self,
        filter: &str,
        callback: Callback<T>,
    ) -> Result<(), BusError> {
        if !frame::is_valid_topic(filter) {
            return Err(BusError::InvalidTopic);
        }
        let mut f = heapless::String::new();
        f.push_str(filter).map_err(|_| BusError::InvalidTopic)?;
        self.subs
            .push(Subscription {
                filter: f,
                callback,
            })
            .map_err(|_| BusError::SubscriptionsFull)
    }

    /// Drain the stream, dispatch every complete message, then run the
    /// checkup heartbeat.
    ///
    /// At most `max_drain` bytes are read per call. Flow control is settled
    /// once the drain stops: XOFF when input is still waiting or the partial
    /// line reaches the high-water mark, XON once neither holds and the
    /// partial line is at or below the low-water mark.
    pub fn poll(
        &mut self,
        state: &mut T,
        now: Instant,
    ) {
        self.started.get_or_insert(now);
        let mut chunk = [0u8; READ_CHUNK];
        let mut drained = 0;

        while drained < self.config.max_drain {
            match self.port.stream.read_ready() {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    self.stats.stream_errors += 1;
                    tracing::warn!(?error, "stream readiness check failed");
                    break;
                }
            }
            let n = match self.port.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(error) => {
                    self.stats.stream_errors += 1;
                    tracing::warn!(?error, "stream read failed");
                    break;
                }
            };
            drained += n;
            for &byte in &chunk[..n] {
                self.ingest(byte, state, now);
            }
        }

        let backlogged =
            drained >= self.config.max_drain && matches!(self.port.stream.read_ready(), Ok(true));
        if backlogged {
            tracing::debug!(drained, "drain budget spent with input pending");
        }
        self.port.signal_flow(self.rx.occupancy(), backlogged);
        self.checkup(state, now);
    }

    fn ingest(
        &mut self,
        byte: u8,
        state: &mut T,
        now: Instant,
    ) {
        match byte {
            frame::XOFF => {
                self.port.peer_paused = true;
                return;
            }
            frame::XON => {
                self.port.peer_paused = false;
                return;
            }
            _ => {}
        }

        match self.rx.push(byte) {
            Push::Stored | Push::Skipped => {}
            Push::Overflow => {
                self.stats.overflows += 1;
                tracing::warn!(
                    capacity = frame::RX_CAPACITY,
                    "receive buffer full, dropping partial message"
                );
            }
            Push::Line => {
                dispatch_line(
                    self.rx.line(),
                    &self.subs,
                    &mut self.port,
                    &mut self.stats,
                    state,
                    now,
                );
                self.rx.consume_line();
            }
        }
    }

    /// Publish the heartbeat when due and flag the link when acknowledgments
    /// stop arriving.
    fn checkup(
        &mut self,
        state: &mut T,
        now: Instant,
    ) {
        let link = state.as_mut();

        let due = link
            .last_checkup_send
            .is_none_or(|sent| now.saturating_duration_since(sent) >= self.config.heartbeat_interval);
        if due {
            if let Err(error) = publish_json(&mut self.port, topics::CHECKUP, &Empty {}) {
                tracing::debug!(%error, "checkup not sent");
            }
            link.last_checkup_send = Some(now);
        }

        let reference = link.last_checkup_receive.or(self.started).unwrap_or(now);
        if !link.link_degraded && now.saturating_duration_since(reference) >= self.config.ack_timeout {
            link.link_degraded = true;
            tracing::warn!(
                timeout_ms = self.config.ack_timeout.as_millis(),
                "no checkup acknowledgment, link degraded"
            );
        }
    }

    /// Publisher handle for components that report outside of dispatch.
    pub fn publisher(&mut self) -> &mut dyn Publisher {
        &mut self.port
    }

    pub fn port(&self) -> &Port<S> {
        &self.port
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    pub fn subscriptions(&self) -> usize {
        self.subs.len()
    }

    pub fn stream(&self) -> &S {
        &self.port.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.port.stream
    }
}

fn dispatch_line<S, T>(
    line: &[u8],
    subs: &[Subscription<T>],
    port: &mut Port<S>,
    stats: &mut BusStats,
    state: &mut T,
    now: Instant,
) where
    S: Write + WriteReady,
    T: AsMut<LinkStatus>,
{
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return;
    }
    let frame = match frame::decode_line(line) {
        Ok(frame) => frame,
        Err(error) => {
            stats.malformed += 1;
            log_malformed(&error);
            return;
        }
    };
    if frame.verb == Verb::Sub {
        tracing::debug!(topic = frame.topic, "ignoring sub line from peer");
        return;
    }

    if frame.topic == topics::CHECKUP_ACK {
        let link = state.as_mut();
        link.last_checkup_receive = Some(now);
        if link.link_degraded {
            link.link_degraded = false;
            tracing::info!("checkup acknowledged, link restored");
        }
    }

    let message = Message {
        topic: frame.topic,
        payload: &frame.payload,
    };
    for sub in subs.iter().filter(|s| s.matches(frame.topic)) {
        stats.dispatched += 1;
        if let Err(error) = (sub.callback)(state, &message, port) {
            stats.callback_failures += 1;
            tracing::warn!(?error, topic = frame.topic, "subscriber failed");
        }
    }
}

fn log_malformed(error: &FrameError) {
    tracing::debug!(?error, "discarding malformed line");
}

impl AsMut<LinkStatus> for Context {
    fn as_mut(&mut self) -> &mut LinkStatus {
        &mut self.link
    }
}

impl AsMut<LinkStatus> for LinkStatus {
    fn as_mut(&mut self) -> &mut LinkStatus {
        self
    }
}
