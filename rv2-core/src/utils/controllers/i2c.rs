//! Hardware command bus for the actuator drivers.
//!
//! Each actuator driver board listens on its own I2C address. Movement and
//! velocity requests are addressed to one driver; stop is a general call so
//! every driver halts from a single transaction.

use embedded_hal::i2c::I2c;

use crate::utils::context::ACTUATOR_COUNT;

/// General-call address all drivers respond to.
pub const GENERAL_CALL: u8 = 0x00;
/// Default driver addresses, actuator 0 first.
pub const DEFAULT_ADDRESSES: [u8; ACTUATOR_COUNT] = [0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D];

/// Opcode: halt immediately.
pub const CMD_STOP: u8 = 0x00;
/// Opcode: move by `f32` degrees over `f32` seconds.
pub const CMD_MOVE: u8 = 0x01;
/// Opcode: report the current velocity as `f32` deg/s.
pub const CMD_VELOCITY: u8 = 0x02;

/// Minimal command interface to the actuator hardware.
///
/// Calls are synchronous and expected to return within a bounded time;
/// failures are reported but callers treat them as transient.
pub trait CommandBus {
    type Error: core::fmt::Debug;

    /// Halt all actuators.
    fn send_stop(&mut self) -> Result<(), Self::Error>;

    /// Move one actuator by `delta_rotation` degrees over `delta_time` seconds.
    fn send_movement(
        &mut self,
        address: u8,
        delta_rotation: f32,
        delta_time: f32,
    ) -> Result<(), Self::Error>;

    /// Read back the velocity an actuator is currently running at.
    fn request_velocity(
        &mut self,
        address: u8,
    ) -> Result<f32, Self::Error>;
}

/// [`CommandBus`] over an `embedded-hal` I2C bus.
pub struct I2cCommandBus<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> I2cCommandBus<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> CommandBus for I2cCommandBus<I2C> {
    type Error = I2C::Error;

    fn send_stop(&mut self) -> Result<(), Self::Error> {
        self.i2c.write(GENERAL_CALL, &[CMD_STOP])
    }

    fn send_movement(
        &mut self,
        address: u8,
        delta_rotation: f32,
        delta_time: f32,
    ) -> Result<(), Self::Error> {
        let mut frame = [0u8; 9];
        frame[0] = CMD_MOVE;
        frame[1..5].copy_from_slice(&delta_rotation.to_le_bytes());
        frame[5..9].copy_from_slice(&delta_time.to_le_bytes());
        self.i2c.write(address, &frame)
    }

    fn request_velocity(
        &mut self,
        address: u8,
    ) -> Result<f32, Self::Error> {
        let mut buf = [0u8; 4];
        self.i2c.write_read(address, &[CMD_VELOCITY], &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}
