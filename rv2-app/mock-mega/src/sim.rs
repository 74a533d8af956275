//! Simulated I2C bus for the arm board.
//!
//! Stands in for everything the firmware talks to: the six actuator driver
//! boards, the encoder multiplexer with its AS5600s, and the gripper PCA9685.
//! Movement commands are applied to the joint immediately, so encoder reads
//! report where the open-loop model says the arm should be.

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use rv2_core::utils::context::{Rotation, ACTUATOR_COUNT};
use rv2_core::utils::controllers::{
    gripper::GRIPPER_PWM_ADDRESS,
    i2c::{CMD_MOVE, CMD_STOP, CMD_VELOCITY, DEFAULT_ADDRESSES, GENERAL_CALL},
    sensor::{AS5600_ADDRESS, MUX_ADDRESS, RAW_ANGLE_REGISTER},
};
use rv2_core::utils::math::angles::wrap_degrees;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Nobody acknowledged the address.
    Nack(u8),
    /// The device did not understand the bytes it was sent.
    Malformed(u8),
}

impl embedded_hal::i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimError::Nack(_) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            SimError::Malformed(_) => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Joint {
    /// Degrees relative to the calibrated zero.
    position: f32,
    /// Velocity of the last accepted movement (deg/s).
    velocity: f32,
}

pub struct SimI2c {
    joints: [Joint; ACTUATOR_COUNT],
    zero_pos: Rotation,
    mux_channel: Option<usize>,
    faulty_sensor: Option<usize>,
    register: u8,
    pwm_writes: usize,
    stops: usize,
}

impl SimI2c {
    /// Joints start at `start`; `zero_pos` is the raw encoder angle for 0°.
    pub fn new(
        start: Rotation,
        zero_pos: Rotation,
        faulty_sensor: Option<usize>,
    ) -> Self {
        let mut joints = [Joint::default(); ACTUATOR_COUNT];
        for (joint, &p) in joints.iter_mut().zip(start.iter()) {
            joint.position = wrap_degrees(p);
        }
        Self {
            joints,
            zero_pos,
            mux_channel: None,
            faulty_sensor,
            register: 0,
            pwm_writes: 0,
            stops: 0,
        }
    }

    pub fn positions(&self) -> Rotation {
        core::array::from_fn(|i| self.joints[i].position)
    }

    pub fn stops(&self) -> usize {
        self.stops
    }

    pub fn pwm_writes(&self) -> usize {
        self.pwm_writes
    }

    fn on_write(
        &mut self,
        address: u8,
        bytes: &[u8],
    ) -> Result<(), SimError> {
        if address == GENERAL_CALL {
            return match bytes {
                [CMD_STOP] => {
                    self.joints.iter_mut().for_each(|j| j.velocity = 0.0);
                    self.stops += 1;
                    info!("all actuators stopped");
                    Ok(())
                }
                _ => Err(SimError::Malformed(address)),
            };
        }
        if let Some(i) = DEFAULT_ADDRESSES.iter().position(|&a| a == address) {
            return self.actuator_write(i, bytes);
        }
        match address {
            MUX_ADDRESS => {
                let [mask] = bytes else {
                    return Err(SimError::Malformed(address));
                };
                self.mux_channel = mask.is_power_of_two().then(|| mask.trailing_zeros() as usize);
                Ok(())
            }
            AS5600_ADDRESS => {
                let channel = self.mux_channel.ok_or(SimError::Nack(address))?;
                if self.faulty_sensor == Some(channel) {
                    return Err(SimError::Nack(address));
                }
                self.register = *bytes.first().ok_or(SimError::Malformed(address))?;
                Ok(())
            }
            GRIPPER_PWM_ADDRESS => {
                self.pwm_writes += 1;
                trace!(?bytes, "pwm write");
                Ok(())
            }
            _ => Err(SimError::Nack(address)),
        }
    }

    fn actuator_write(
        &mut self,
        i: usize,
        bytes: &[u8],
    ) -> Result<(), SimError> {
        let address = DEFAULT_ADDRESSES[i];
        match bytes {
            [CMD_MOVE, rest @ ..] if rest.len() == 8 => {
                let delta = f32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
                let dt = f32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
                let joint = &mut self.joints[i];
                joint.position = wrap_degrees(joint.position + delta);
                joint.velocity = if dt > 0.0 { delta / dt } else { 0.0 };
                debug!(actuator = i, delta, dt, position = joint.position, "move");
                Ok(())
            }
            [CMD_VELOCITY] => {
                self.register = CMD_VELOCITY;
                Ok(())
            }
            _ => Err(SimError::Malformed(address)),
        }
    }

    fn on_read(
        &mut self,
        address: u8,
        buf: &mut [u8],
    ) -> Result<(), SimError> {
        if let Some(i) = DEFAULT_ADDRESSES.iter().position(|&a| a == address) {
            if self.register != CMD_VELOCITY || buf.len() != 4 {
                return Err(SimError::Malformed(address));
            }
            buf.copy_from_slice(&self.joints[i].velocity.to_le_bytes());
            return Ok(());
        }
        match address {
            AS5600_ADDRESS => {
                let channel = self.mux_channel.ok_or(SimError::Nack(address))?;
                if self.faulty_sensor == Some(channel) {
                    return Err(SimError::Nack(address));
                }
                if self.register != RAW_ANGLE_REGISTER || buf.len() != 2 {
                    return Err(SimError::Malformed(address));
                }
                let raw = (self.joints[channel].position + self.zero_pos[channel]).rem_euclid(360.0);
                let counts = ((raw * 4096.0 / 360.0).round() as u16) & 0x0FFF;
                buf.copy_from_slice(&counts.to_be_bytes());
                Ok(())
            }
            GRIPPER_PWM_ADDRESS => {
                buf.fill(0);
                Ok(())
            }
            _ => Err(SimError::Nack(address)),
        }
    }
}

impl ErrorType for SimI2c {
    type Error = SimError;
}

impl I2c for SimI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations {
            match op {
                Operation::Write(bytes) => self.on_write(address, bytes)?,
                Operation::Read(buf) => self.on_read(address, buf)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use rv2_core::utils::connection::bus::{BusError, Publisher};
    use rv2_core::utils::context::{Calibration, Context};
    use rv2_core::utils::controllers::{ArmController, TickOutcome};
    use rv2_core::Instant;

    use super::*;

    #[derive(Default)]
    struct Lines(Vec<String>);

    impl Publisher for Lines {
        fn publish(
            &mut self,
            topic: &str,
            payload: &str,
        ) -> Result<(), BusError> {
            self.0.push(format!("{topic} {payload}"));
            Ok(())
        }
    }

    fn board(faulty: Option<usize>) -> (&'static RefCell<SimI2c>, Context) {
        let calibration = Calibration::default();
        let sim = SimI2c::new(calibration.actuator_resting_pos, calibration.actuator_zero_pos, faulty);
        (Box::leak(Box::new(RefCell::new(sim))), Context::new(calibration))
    }

    #[test]
    fn boot_reads_real_pose_and_reports_health() {
        let (i2c, mut ctx) = board(None);
        let mut arm = ArmController::new(i2c, &ctx, None, None);
        let mut out = Lines::default();
        arm.boot(&mut ctx, &mut out);

        assert!(ctx.health.good_health_check);
        assert!(out.0.iter().any(|l| l.starts_with("arduino/out/health {\"good\":true")));
        for (c, r) in ctx.motion.current_rotation.iter().zip(ctx.calibration.actuator_resting_pos) {
            assert!((c - r).abs() < 0.1, "{c} vs {r}");
        }
        assert_eq!(ctx.motion.target_rotation, ctx.motion.current_rotation);
        assert!(arm.gripper.is_some());
        assert!(i2c.borrow().pwm_writes() > 0);
    }

    #[test]
    fn arm_reaches_target_on_simulated_hardware() {
        let (i2c, mut ctx) = board(None);
        let mut arm = ArmController::new(i2c, &ctx, None, None);
        let mut out = Lines::default();
        arm.boot(&mut ctx, &mut out);
        ctx.motion.set_target([5.0, -5.0, 2.0, 80.0, 1.0, 95.0]);

        let mut finished = false;
        for tick in 0..200 {
            if arm.service(&mut ctx, &mut out, Instant::from_millis(tick * 100)) == TickOutcome::Finished {
                finished = true;
                break;
            }
        }
        assert!(finished);
        let positions = i2c.borrow().positions();
        for (p, t) in positions.iter().zip([5.0, -5.0, 2.0, 80.0, 1.0, 95.0]) {
            assert!((p - t).abs() < 0.2, "{p} vs {t}");
        }
    }

    #[test]
    fn faulty_encoder_blocks_motion() {
        let (i2c, mut ctx) = board(Some(2));
        let mut arm = ArmController::new(i2c, &ctx, None, None);
        let mut out = Lines::default();
        arm.boot(&mut ctx, &mut out);
        assert!(!ctx.health.good_health_check);
        assert_eq!(ctx.health.health_check_results, [0, 0, 1, 0, 0, 0]);

        ctx.motion.set_target([10.0; ACTUATOR_COUNT]);
        let before = i2c.borrow().positions();
        for tick in 0..5 {
            assert_eq!(
                arm.service(&mut ctx, &mut out, Instant::from_millis(tick * 100)),
                TickOutcome::Unhealthy
            );
        }
        assert_eq!(i2c.borrow().positions(), before);
    }

    #[test]
    fn force_stop_reaches_every_driver() {
        let (i2c, mut ctx) = board(None);
        let mut arm = ArmController::new(i2c, &ctx, None, None);
        let mut out = Lines::default();
        arm.boot(&mut ctx, &mut out);
        ctx.safety.force_stop = true;
        arm.service(&mut ctx, &mut out, Instant::from_millis(0));
        arm.service(&mut ctx, &mut out, Instant::from_millis(100));
        assert_eq!(i2c.borrow().stops(), 1);
    }

    #[test]
    fn gripper_request_is_applied() {
        let (i2c, mut ctx) = board(None);
        let mut arm = ArmController::new(i2c, &ctx, None, None);
        let mut out = Lines::default();
        arm.boot(&mut ctx, &mut out);
        let writes = i2c.borrow().pwm_writes();

        ctx.gripper.requested = Some(false);
        arm.service(&mut ctx, &mut out, Instant::from_millis(0));
        assert!(!ctx.gripper.current_gripper_state);
        assert!(ctx.gripper.requested.is_none());
        assert!(i2c.borrow().pwm_writes() > writes);
    }
}
