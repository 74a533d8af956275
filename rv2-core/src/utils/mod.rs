//! Utility re-exports and helper macros for the RobotV2 arm.
//!
//! - `context`: shared state partitions read and written by every component
//! - `connection`: line-framed publish/subscribe bus over a byte stream
//! - `controllers`: actuator coordination and the I2C-attached collaborators
//! - `math`: angle wrapping and velocity bounding
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod connection;
pub mod context;
pub mod controllers;
pub mod math;

pub use connection::bus::MessageBus;
pub use context::Context;
pub use controllers::{coordinator::ActuatorCoordinator, ArmController};
pub use embassy_time::{Duration, Instant};

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::static_cell::StaticCell<$t> = $crate::static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
