//! Module Exports
//!
//! This file exports the modules that act on the arm hardware.
//!
//! - `coordinator`: turns motion targets into bounded actuator commands.
//! - `i2c`: the hardware command bus to the actuator drivers.
//! - `sensor`: joint angle encoders.
//! - `gripper`: the two-finger servo gripper.
//! - `health`: joint health checks gating motion.

pub mod coordinator;
pub mod gripper;
pub mod health;
pub mod i2c;
pub mod sensor;

use core::cell::RefCell;

use embassy_time::{Duration, Instant};
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_io::{Read, ReadReady, Write, WriteReady};

use crate::utils::{
    connection::{
        bus::{BusError, MessageBus, Publisher},
        topics,
    },
    context::Context,
};

pub use coordinator::{ActuatorCoordinator, CoordinatorConfig, TickOutcome};
pub use gripper::{GripperController, Pca9685Fingers};
pub use health::HealthMonitor;
pub use i2c::{CommandBus, I2cCommandBus};
pub use sensor::{AngleSensor, As5600Reader};

/// How often open-loop positions are replaced by encoder readings.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Register every arm topic handler on `bus`.
pub fn register<S, const N: usize>(bus: &mut MessageBus<S, Context, N>) -> Result<(), BusError>
where
    S: Read + ReadReady + Write + WriteReady,
{
    bus.subscribe(topics::TARGET, coordinator::on_target)?;
    bus.subscribe(topics::PATH, coordinator::on_path)?;
    bus.subscribe(topics::CLEAR, coordinator::on_clear)?;
    bus.subscribe(topics::FORCE_STOP, coordinator::on_force_stop)?;
    bus.subscribe(topics::POSE, coordinator::on_pose)?;
    bus.subscribe(topics::ACTUATOR_INFO_REQUEST, coordinator::on_actuator_info)?;
    bus.subscribe(topics::GRIPPER_SET, gripper::on_gripper_set)?;
    bus.subscribe(topics::GRIPPER_GET, gripper::on_gripper_get)?;
    bus.subscribe(topics::HEALTH_CHECK, health::on_health_check)?;
    Ok(())
}

/// Device handles sharing the arm board's I2C bus.
pub type Shared<I2C> = RefCellDevice<'static, I2C>;

/// Everything on the arm board that touches hardware.
pub struct ArmController<I2C: 'static> {
    pub coordinator: ActuatorCoordinator<I2cCommandBus<Shared<I2C>>>,
    pub sensor: As5600Reader<Shared<I2C>>,
    pub gripper: Option<GripperController<Pca9685Fingers<Shared<I2C>>>>,
    pub health: HealthMonitor,
    resync_interval: Duration,
    last_resync: Option<Instant>,
}

impl<I2C> ArmController<I2C>
where
    I2C: embedded_hal::i2c::I2c + 'static,
{
    pub fn new(
        i2c_bus: &'static RefCell<I2C>,
        ctx: &Context,
        config: Option<CoordinatorConfig>,
        resync_interval: Option<Duration>,
    ) -> Self {
        let command_bus = I2cCommandBus::new(RefCellDevice::new(i2c_bus));
        let sensor = As5600Reader::new(
            RefCellDevice::new(i2c_bus),
            ctx.calibration.actuator_zero_pos,
        );
        let gripper = match Pca9685Fingers::new(RefCellDevice::new(i2c_bus), None) {
            Ok(fingers) => Some(GripperController::new(fingers)),
            Err(e) => {
                tracing::warn!("gripper PWM init failed, gripper disabled: {:?}", e);
                None
            }
        };

        ArmController {
            coordinator: ActuatorCoordinator::new(command_bus, config),
            sensor,
            gripper,
            health: HealthMonitor::default(),
            resync_interval: resync_interval.unwrap_or(DEFAULT_RESYNC_INTERVAL),
            last_resync: None,
        }
    }

    /// Startup: check joint health, read the real joint angles and put the
    /// gripper in its mirrored state.
    pub fn boot(
        &mut self,
        ctx: &mut Context,
        publisher: &mut dyn Publisher,
    ) {
        self.health.perform_health_check(&mut self.sensor, &mut ctx.health);
        if let Err(error) = HealthMonitor::send_health_status(&ctx.health, publisher) {
            tracing::debug!(%error, "boot health status not sent");
        }
        let updated = sensor::resync(&mut self.sensor, &mut ctx.motion);
        ctx.motion.target_rotation = ctx.motion.current_rotation;
        tracing::info!(updated, current = ?ctx.motion.current_rotation, "joint angles read");

        if let Some(gripper) = self.gripper.as_mut() {
            if let Err(error) = gripper.init(&mut ctx.gripper) {
                tracing::warn!(?error, "gripper init failed");
            }
        }
    }

    /// One loop iteration after message dispatch: serve collaborator
    /// requests, correct drift, then advance motion.
    pub fn service(
        &mut self,
        ctx: &mut Context,
        publisher: &mut dyn Publisher,
        now: Instant,
    ) -> TickOutcome {
        self.health
            .service(&mut self.sensor, &mut ctx.health, publisher);

        match self.gripper.as_mut() {
            Some(gripper) => gripper.apply(&mut ctx.gripper),
            None => {
                if ctx.gripper.requested.take().is_some() {
                    tracing::warn!("gripper request ignored, gripper not initialized");
                }
            }
        }

        let due = self
            .last_resync
            .is_none_or(|at| now.saturating_duration_since(at) >= self.resync_interval);
        if due {
            sensor::resync(&mut self.sensor, &mut ctx.motion);
            self.last_resync = Some(now);
        }

        self.coordinator.tick(ctx, now)
    }
}
