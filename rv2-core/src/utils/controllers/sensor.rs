//! Joint angle sensing.
//!
//! Every joint carries an AS5600 magnetic encoder. All encoders share one
//! address, so they sit behind a TCA9548A multiplexer and are selected one
//! channel at a time.

use embedded_hal::i2c::I2c;

use crate::utils::{
    context::{MotionState, Rotation, ACTUATOR_COUNT},
    math::angles::wrap_degrees,
};

/// TCA9548A multiplexer address.
pub const MUX_ADDRESS: u8 = 0x70;
/// AS5600 encoder address.
pub const AS5600_ADDRESS: u8 = 0x36;
/// First of the two raw-angle registers (high nibble, then low byte).
pub const RAW_ANGLE_REGISTER: u8 = 0x0C;
/// Encoder resolution in counts per turn.
const COUNTS_PER_TURN: f32 = 4096.0;

#[derive(Debug)]
pub enum SensorError<E: core::fmt::Debug> {
    Bus(E),
    InvalidActuator(usize),
}

/// Source of absolute joint angles.
pub trait AngleSensor {
    type Error: core::fmt::Debug;

    /// Angle of `actuator` relative to its calibrated zero, in `(-180, 180]`.
    fn read_angle(
        &mut self,
        actuator: usize,
    ) -> Result<f32, Self::Error>;
}

/// AS5600 encoders behind a TCA9548A multiplexer.
pub struct As5600Reader<I2C> {
    i2c: I2C,
    zero_pos: Rotation,
}

impl<I2C, E> As5600Reader<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// `zero_pos` holds the raw angle (degrees) that means 0° per actuator.
    pub fn new(
        i2c: I2C,
        zero_pos: Rotation,
    ) -> Self {
        Self { i2c, zero_pos }
    }

    /// Raw encoder angle in degrees, `[0, 360)`.
    pub fn read_raw(
        &mut self,
        actuator: usize,
    ) -> Result<f32, SensorError<E>> {
        if actuator >= ACTUATOR_COUNT {
            return Err(SensorError::InvalidActuator(actuator));
        }
        self.i2c
            .write(MUX_ADDRESS, &[1 << actuator])
            .map_err(SensorError::Bus)?;
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(AS5600_ADDRESS, &[RAW_ANGLE_REGISTER], &mut buf)
            .map_err(SensorError::Bus)?;
        let counts = u16::from_be_bytes([buf[0] & 0x0F, buf[1]]);
        Ok(f32::from(counts) * 360.0 / COUNTS_PER_TURN)
    }
}

impl<I2C, E> AngleSensor for As5600Reader<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    type Error = SensorError<E>;

    fn read_angle(
        &mut self,
        actuator: usize,
    ) -> Result<f32, Self::Error> {
        let raw = self.read_raw(actuator)?;
        Ok(wrap_degrees(raw - self.zero_pos[actuator]))
    }
}

/// Overwrite the open-loop `current_rotation` with sensed angles.
///
/// Actuators whose read fails keep their accumulated value. Returns the
/// number of actuators updated.
pub fn resync<S: AngleSensor>(
    sensor: &mut S,
    motion: &mut MotionState,
) -> usize {
    let mut updated = 0;
    for (i, current) in motion.current_rotation.iter_mut().enumerate() {
        match sensor.read_angle(i) {
            Ok(angle) => {
                *current = angle;
                updated += 1;
            }
            Err(error) => tracing::warn!(actuator = i, ?error, "angle read failed"),
        }
    }
    updated
}
