//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;

use embedded_io::{ErrorType, Read, ReadReady, Write, WriteReady};
use rv2_core::utils::connection::frame::{XOFF, XON};
use rv2_core::utils::controllers::CommandBus;
use serde_json::Value;

/// In-memory byte stream. Incoming bytes are delivered in the chunks they
/// were queued in, so tests control how messages split across reads.
#[derive(Default)]
pub struct MockStream {
    chunks: VecDeque<Vec<u8>>,
    pub tx: Vec<u8>,
    pub blocked: bool,
}

impl MockStream {
    pub fn feed(
        &mut self,
        bytes: &[u8],
    ) {
        if !bytes.is_empty() {
            self.chunks.push_back(bytes.to_vec());
        }
    }

    pub fn feed_line(
        &mut self,
        topic: &str,
        payload: &str,
    ) {
        self.feed(format!("pub {topic} {payload}\n").as_bytes());
    }

    /// Published lines, control bytes removed.
    pub fn lines(&self) -> Vec<String> {
        let text: Vec<u8> = self
            .tx
            .iter()
            .copied()
            .filter(|b| *b != XON && *b != XOFF)
            .collect();
        String::from_utf8(text)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published(
        &self,
        topic: &str,
    ) -> Vec<Value> {
        let prefix = format!("pub {topic} ");
        self.lines()
            .iter()
            .filter_map(|l| l.strip_prefix(&prefix))
            .map(|p| serde_json::from_str(p).unwrap())
            .collect()
    }

    pub fn count(
        &self,
        byte: u8,
    ) -> usize {
        self.tx.iter().filter(|b| **b == byte).count()
    }
}

impl ErrorType for MockStream {
    type Error = Infallible;
}

impl Read for MockStream {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, Self::Error> {
        let Some(chunk) = self.chunks.front_mut() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Ok(n)
    }
}

impl ReadReady for MockStream {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.chunks.is_empty())
    }
}

impl Write for MockStream {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> Result<usize, Self::Error> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl WriteReady for MockStream {
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.blocked)
    }
}

/// Command bus that records every call.
#[derive(Default)]
pub struct RecordingBus {
    /// `(address, delta_rotation, delta_time)`
    pub moves: Vec<(u8, f32, f32)>,
    pub stops: u32,
    /// Fail every n-th movement command (1-based); 0 never fails.
    pub fail_every: usize,
    calls: usize,
}

impl RecordingBus {
    pub fn moves_for(
        &self,
        address: u8,
    ) -> Vec<(f32, f32)> {
        self.moves
            .iter()
            .filter(|(a, _, _)| *a == address)
            .map(|&(_, d, t)| (d, t))
            .collect()
    }
}

#[derive(Debug)]
pub struct Nack;

impl CommandBus for RecordingBus {
    type Error = Nack;

    fn send_stop(&mut self) -> Result<(), Nack> {
        self.stops += 1;
        Ok(())
    }

    fn send_movement(
        &mut self,
        address: u8,
        delta_rotation: f32,
        delta_time: f32,
    ) -> Result<(), Nack> {
        self.calls += 1;
        if self.fail_every != 0 && self.calls % self.fail_every == 0 {
            return Err(Nack);
        }
        self.moves.push((address, delta_rotation, delta_time));
        Ok(())
    }

    fn request_velocity(
        &mut self,
        _address: u8,
    ) -> Result<f32, Nack> {
        Ok(0.0)
    }
}
