//! Module Exports
//!
//! This file exports the modules that carry messages between the arm board
//! and its peer over the serial link.
//!
//! # Modules
//! - `bus`: the publish/subscribe message bus and its subscription table.
//! - `frame`: line framing, parsing and XON/XOFF flow control.
//! - `link`: association state machine with bounded retry and backoff.
//! - `topics`: topic names shared with the peer.

pub mod bus;
pub mod frame;
pub mod link;
pub mod topics;
