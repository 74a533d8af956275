//! Actuator coordination.
//!
//! Turns the motion targets held in [`MotionState`] into incremental,
//! velocity-bounded commands on a [`CommandBus`], one tick at a time.
//!
//! # Per-tick step
//!
//! For each joint the remaining rotation is taken along the shortest path.
//! The joint accumulates a time budget while it has motion pending; the step
//! allowed this tick is `max_velocity * budget`. Steps smaller than the
//! joint's deadzone are withheld (the budget carries over) unless they finish
//! the move or the budget is at its cap. A sent step always uses the budget as
//! its duration, so `|step| / duration` never exceeds the joint's ceiling, and
//! the last step is the exact remainder, so nothing overshoots.
//!
//! Positions are accumulated open loop on successful commands; the sensor
//! resync in the controller corrects drift.

use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use crate::utils::{
    connection::{
        bus::{publish_json, HandlerError, Message, Publisher},
        topics,
    },
    context::{Calibration, Context, HealthReport, MotionState, Rotation, Safety, ACTUATOR_COUNT},
    controllers::i2c::{CommandBus, DEFAULT_ADDRESSES},
    math::angles::{bound_step, shortest_delta, within_tolerance, wrap_degrees},
};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Command-bus address per actuator.
    pub addresses: [u8; ACTUATOR_COUNT],
    /// Smallest step an actuator executes reliably (deg).
    pub min_step: Rotation,
    /// Cap on one command's duration; also bounds the catch-up after a stall.
    pub max_tick: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            addresses: DEFAULT_ADDRESSES,
            min_step: [0.05; ACTUATOR_COUNT],
            max_tick: Duration::from_millis(250),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to execute.
    Idle,
    /// Force stop is set.
    Stopped,
    /// The health gate is closed.
    Unhealthy,
    /// Still moving; `commands` movement commands were sent.
    Moving { commands: u8 },
    /// Target reached and the next waypoint was loaded.
    NextWaypoint,
    /// Target reached with an empty queue; execution finished.
    Finished,
}

pub struct ActuatorCoordinator<B> {
    bus: B,
    config: CoordinatorConfig,
    last_tick: Option<Instant>,
    /// Seconds of motion each actuator is owed.
    budget: [f32; ACTUATOR_COUNT],
    stop_sent: bool,
}

impl<B: CommandBus> ActuatorCoordinator<B> {
    pub fn new(
        bus: B,
        config: Option<CoordinatorConfig>,
    ) -> Self {
        Self {
            bus,
            config: config.unwrap_or_default(),
            last_tick: None,
            budget: [0.0; ACTUATOR_COUNT],
            stop_sent: false,
        }
    }

    /// Run one motion increment against the context.
    pub fn tick(
        &mut self,
        ctx: &mut Context,
        now: Instant,
    ) -> TickOutcome {
        let Context {
            motion,
            safety,
            calibration,
            health,
            ..
        } = ctx;
        self.step(motion, safety, health, calibration, now)
    }

    /// Run one motion increment. Writes `motion` and clears the stop latch in
    /// `safety` once the stop command is out.
    pub fn step(
        &mut self,
        motion: &mut MotionState,
        safety: &mut Safety,
        health: &HealthReport,
        calibration: &Calibration,
        now: Instant,
    ) -> TickOutcome {
        let elapsed = self
            .last_tick
            .replace(now)
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or(Duration::from_ticks(0));

        if safety.stop_pending || (safety.force_stop && !self.stop_sent) {
            match self.bus.send_stop() {
                Ok(()) => {
                    tracing::warn!("force stop: actuators halted");
                    safety.stop_pending = false;
                    self.stop_sent = true;
                }
                Err(error) => tracing::error!(?error, "force stop: stop command failed"),
            }
        }
        if safety.force_stop || safety.stop_pending {
            self.budget = [0.0; ACTUATOR_COUNT];
            return TickOutcome::Stopped;
        }
        if self.stop_sent {
            tracing::info!(queued = motion.queued(), "force stop cleared");
            self.stop_sent = false;
        }

        if !health.good_health_check {
            self.budget = [0.0; ACTUATOR_COUNT];
            return TickOutcome::Unhealthy;
        }

        if !motion.execute_movement {
            match motion.dequeue() {
                Some(next) => motion.set_target(next),
                None => {
                    self.budget = [0.0; ACTUATOR_COUNT];
                    return TickOutcome::Idle;
                }
            }
        }

        let max_tick = seconds(self.config.max_tick);
        let dt = seconds(elapsed).min(max_tick);
        let tolerance = calibration.actuator_rotation_tolerance;
        let mut commands = 0u8;

        for i in 0..ACTUATOR_COUNT {
            let remaining = shortest_delta(motion.current_rotation[i], motion.target_rotation[i]);
            if libm::fabsf(remaining) <= tolerance {
                self.budget[i] = 0.0;
                continue;
            }

            self.budget[i] = (self.budget[i] + dt).min(max_tick);
            let budget = self.budget[i];
            let step = bound_step(remaining, calibration.max_actuator_velocity[i], budget);
            if step == 0.0 {
                continue;
            }
            let finishes = step == remaining;
            if libm::fabsf(step) < self.config.min_step[i] && !finishes && budget < max_tick {
                continue;
            }

            self.budget[i] = 0.0;
            match self.bus.send_movement(self.config.addresses[i], step, budget) {
                Ok(()) => {
                    motion.current_rotation[i] = wrap_degrees(motion.current_rotation[i] + step);
                    commands += 1;
                }
                Err(error) => tracing::warn!(actuator = i, ?error, "movement command failed"),
            }
        }

        let reached = motion
            .current_rotation
            .iter()
            .zip(motion.target_rotation.iter())
            .all(|(&c, &t)| within_tolerance(c, t, tolerance));
        if !reached {
            return TickOutcome::Moving { commands };
        }

        self.budget = [0.0; ACTUATOR_COUNT];
        match motion.dequeue() {
            Some(next) => {
                tracing::debug!(remaining = motion.queued(), "waypoint reached");
                motion.set_target(next);
                TickOutcome::NextWaypoint
            }
            None => {
                tracing::info!("target reached");
                motion.execute_movement = false;
                TickOutcome::Finished
            }
        }
    }

    /// Velocity readback for one actuator, for diagnostics.
    pub fn actuator_velocity(
        &mut self,
        actuator: usize,
    ) -> Option<f32> {
        let address = *self.config.addresses.get(actuator)?;
        match self.bus.request_velocity(address) {
            Ok(v) => Some(v),
            Err(error) => {
                tracing::warn!(actuator, ?error, "velocity request failed");
                None
            }
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

fn seconds(d: Duration) -> f32 {
    d.as_micros() as f32 / 1_000_000.0
}

#[derive(Debug, Deserialize)]
struct TargetRequest {
    rotation: Rotation,
}

#[derive(Debug, Deserialize)]
struct PathRequest {
    waypoints: alloc::vec::Vec<Rotation>,
}

#[derive(Debug, Deserialize)]
struct ForceStopRequest {
    stop: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PoseName {
    Home,
    Rest,
}

#[derive(Debug, Deserialize)]
struct PoseRequest {
    pose: PoseName,
}

#[derive(Debug, Serialize)]
struct PathAck {
    accepted: usize,
    rejected: usize,
    queued: usize,
}

#[derive(Debug, Serialize)]
struct ActuatorInfo<'a> {
    current: &'a Rotation,
    target: &'a Rotation,
    execute: bool,
    gripper_open: bool,
    queued: usize,
    force_stop: bool,
    healthy: bool,
    link_degraded: bool,
}

fn check_finite(rotation: &Rotation) -> Result<(), HandlerError> {
    if rotation.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(HandlerError::Rejected("rotation must be finite"))
    }
}

/// `arduino/in/target`: replace the active target and start moving.
pub fn on_target(
    ctx: &mut Context,
    msg: &Message<'_>,
    _publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    let request: TargetRequest = msg.decode()?;
    check_finite(&request.rotation)?;
    ctx.motion.set_target(request.rotation);
    tracing::debug!(target = ?request.rotation, "target set");
    Ok(())
}

/// `arduino/in/path`: queue waypoints behind the current target.
pub fn on_path(
    ctx: &mut Context,
    msg: &Message<'_>,
    publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    let request: PathRequest = msg.decode()?;
    for waypoint in &request.waypoints {
        check_finite(waypoint)?;
    }

    let mut accepted = 0;
    for waypoint in &request.waypoints {
        if ctx.motion.enqueue(*waypoint).is_err() {
            break;
        }
        accepted += 1;
    }
    let rejected = request.waypoints.len() - accepted;
    if rejected > 0 {
        tracing::warn!(accepted, rejected, "waypoint queue full");
    }

    publish_json(
        publisher,
        topics::PATH_ACK,
        &PathAck {
            accepted,
            rejected,
            queued: ctx.motion.queued(),
        },
    )?;
    Ok(())
}

/// `arduino/in/clear`: drop queued waypoints and stop interpolating.
pub fn on_clear(
    ctx: &mut Context,
    _msg: &Message<'_>,
    _publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    ctx.motion.clear();
    tracing::info!("motion cleared");
    Ok(())
}

/// `arduino/in/force_stop`: set or clear the emergency halt.
pub fn on_force_stop(
    ctx: &mut Context,
    msg: &Message<'_>,
    _publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    let request: ForceStopRequest = msg.decode()?;
    ctx.safety.request_stop(request.stop);
    Ok(())
}

/// `arduino/in/pose`: target the calibrated home or resting pose.
pub fn on_pose(
    ctx: &mut Context,
    msg: &Message<'_>,
    _publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    let request: PoseRequest = msg.decode()?;
    let pose = match request.pose {
        PoseName::Home => ctx.calibration.actuator_home_pos,
        PoseName::Rest => ctx.calibration.actuator_resting_pos,
    };
    ctx.motion.set_target(pose);
    Ok(())
}

/// `arduino/in/actuator_info`: report the motion state.
pub fn on_actuator_info(
    ctx: &mut Context,
    _msg: &Message<'_>,
    publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    publish_json(
        publisher,
        topics::ACTUATOR_INFO,
        &ActuatorInfo {
            current: &ctx.motion.current_rotation,
            target: &ctx.motion.target_rotation,
            execute: ctx.motion.execute_movement,
            gripper_open: ctx.gripper.current_gripper_state,
            queued: ctx.motion.queued(),
            force_stop: ctx.safety.force_stop,
            healthy: ctx.health.good_health_check,
            link_degraded: ctx.link.link_degraded,
        },
    )?;
    Ok(())
}
