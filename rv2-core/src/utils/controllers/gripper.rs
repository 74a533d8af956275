//! Gripper control.
//!
//! The gripper is two hobby servos driven from a PCA9685 PWM expander. The
//! fingers are mounted facing each other, so the right finger runs the
//! mirrored angle of the left one.
//!
//! Open/close requests arrive over the bus and are parked in the context;
//! [`GripperController::apply`] drives the servos and updates the mirror that
//! the rest of the firmware reads.

use pwm_pca9685::{Address as PwmAddress, Channel, Error as PwmError, Pca9685};
use serde::{Deserialize, Serialize};

use crate::utils::{
    connection::{
        bus::{publish_json, HandlerError, Message, Publisher},
        topics,
    },
    context::{Context, GripperMirror},
};

/// Default PCA9685 address for the gripper board.
pub const GRIPPER_PWM_ADDRESS: u8 = 0x40;
/// Prescale for a 50 Hz servo frame from the 25 MHz internal oscillator.
const SERVO_PRESCALE: u8 = 121;
const FRAME_US: f32 = 20_000.0;
const PULSE_MIN_US: f32 = 500.0;
const PULSE_MAX_US: f32 = 2_500.0;

/// Two finger servos.
pub trait FingerServos {
    type Error: core::fmt::Debug;

    /// Set both fingers, in servo degrees `[0, 180]`.
    fn set_angles(
        &mut self,
        left: f32,
        right: f32,
    ) -> Result<(), Self::Error>;
}

/// Finger servos on channels of a PCA9685.
pub struct Pca9685Fingers<I2C> {
    pwm: Pca9685<I2C>,
    left: Channel,
    right: Channel,
}

impl<I2C, E> Pca9685Fingers<I2C>
where
    I2C: embedded_hal::i2c::I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Create the driver and configure a 50 Hz servo frame.
    pub fn new(
        i2c: I2C,
        address: Option<u8>,
    ) -> Result<Self, PwmError<E>> {
        let mut pwm = Pca9685::new(i2c, PwmAddress::from(address.unwrap_or(GRIPPER_PWM_ADDRESS)))?;
        pwm.enable()?;
        pwm.set_prescale(SERVO_PRESCALE)?;
        Ok(Self {
            pwm,
            left: Channel::C0,
            right: Channel::C1,
        })
    }
}

/// Off-count within a 4096-step frame for a servo angle.
pub fn servo_counts(angle: f32) -> u16 {
    let angle = angle.clamp(0.0, 180.0);
    let pulse = PULSE_MIN_US + (PULSE_MAX_US - PULSE_MIN_US) * angle / 180.0;
    (pulse * 4096.0 / FRAME_US) as u16
}

impl<I2C, E> FingerServos for Pca9685Fingers<I2C>
where
    I2C: embedded_hal::i2c::I2c<Error = E>,
    E: core::fmt::Debug,
{
    type Error = PwmError<E>;

    fn set_angles(
        &mut self,
        left: f32,
        right: f32,
    ) -> Result<(), Self::Error> {
        self.pwm.set_channel_on_off(self.left, 0, servo_counts(left))?;
        self.pwm.set_channel_on_off(self.right, 0, servo_counts(right))
    }
}

#[derive(Debug, Deserialize)]
struct GripperRequest {
    open: bool,
}

#[derive(Debug, Serialize)]
struct GripperState {
    open: bool,
}

pub struct GripperController<F> {
    fingers: F,
    open_angle: f32,
    closed_angle: f32,
}

impl<F: FingerServos> GripperController<F> {
    pub fn new(fingers: F) -> Self {
        Self {
            fingers,
            open_angle: 90.0,
            closed_angle: 10.0,
        }
    }

    /// Drive the fingers to the mirrored state so hardware and context agree.
    pub fn init(
        &mut self,
        mirror: &mut GripperMirror,
    ) -> Result<(), F::Error> {
        self.drive(mirror.current_gripper_state)
    }

    /// Apply a pending request. The mirror changes only once the servos took
    /// the command.
    pub fn apply(
        &mut self,
        mirror: &mut GripperMirror,
    ) {
        let Some(open) = mirror.requested.take() else {
            return;
        };
        match self.drive(open) {
            Ok(()) => {
                mirror.current_gripper_state = open;
                tracing::info!(open, "gripper moved");
            }
            Err(error) => tracing::warn!(?error, open, "gripper command failed"),
        }
    }

    fn drive(
        &mut self,
        open: bool,
    ) -> Result<(), F::Error> {
        let left = if open {
            self.open_angle
        } else {
            self.closed_angle
        };
        self.fingers.set_angles(left, 180.0 - left)
    }

    pub fn fingers(&self) -> &F {
        &self.fingers
    }
}

/// `arduino/in/gripper/set`: request an open or closed gripper.
pub fn on_gripper_set(
    ctx: &mut Context,
    msg: &Message<'_>,
    _publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    let request: GripperRequest = msg.decode()?;
    ctx.gripper.requested = Some(request.open);
    Ok(())
}

/// `arduino/in/gripper/get`: report the mirrored gripper state.
pub fn on_gripper_get(
    ctx: &mut Context,
    _msg: &Message<'_>,
    publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    publish_json(
        publisher,
        topics::GRIPPER_STATE,
        &GripperState {
            open: ctx.gripper.current_gripper_state,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorded {
        angles: std::vec::Vec<(f32, f32)>,
        fail: bool,
    }

    impl FingerServos for Recorded {
        type Error = ();

        fn set_angles(
            &mut self,
            left: f32,
            right: f32,
        ) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            self.angles.push((left, right));
            Ok(())
        }
    }

    #[test]
    fn servo_counts_span_pulse_range() {
        assert_eq!(servo_counts(0.0), 102);
        assert_eq!(servo_counts(180.0), 512);
        assert_eq!(servo_counts(400.0), 512);
    }

    #[test]
    fn apply_updates_mirror_after_drive() {
        let mut gripper = GripperController::new(Recorded::default());
        let mut mirror = GripperMirror::default();
        mirror.requested = Some(false);
        gripper.apply(&mut mirror);
        assert!(!mirror.current_gripper_state);
        assert!(mirror.requested.is_none());
        assert_eq!(gripper.fingers().angles, vec![(10.0, 170.0)]);
    }

    #[test]
    fn failed_drive_keeps_mirror() {
        let mut gripper = GripperController::new(Recorded {
            fail: true,
            ..Recorded::default()
        });
        let mut mirror = GripperMirror::default();
        mirror.requested = Some(false);
        gripper.apply(&mut mirror);
        assert!(mirror.current_gripper_state);
    }
}
