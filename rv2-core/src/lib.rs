//! Core message bus and actuator coordination for the RobotV2 arm on no-std
//! embedded platforms.
//!
//! For a runnable simulated board, see `rv2-app/mock-mega`.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod utils;

pub use utils::{Duration, Instant};

#[doc(hidden)]
pub use static_cell;
