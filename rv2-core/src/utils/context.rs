//! Shared state for one board.
//!
//! The context is built once at boot and lives for the process lifetime. It is
//! split into partitions so each component borrows only what it writes:
//!
//! | Partition | Written by |
//! | --------- | ---------- |
//! | [`MotionState`] | actuator coordinator and its topic handlers |
//! | [`Safety`] | force-stop handler (the coordinator clears the stop latch) |
//! | [`Calibration`] | nobody after boot |
//! | [`GripperMirror`] | gripper controller (requests come from its handler) |
//! | [`HealthReport`] | health monitor |
//! | [`LinkStatus`] | message bus checkup |

use heapless::Deque;

/// Number of rotary actuators on the arm.
pub const ACTUATOR_COUNT: usize = 6;
/// Capacity of the waypoint queue.
pub const WAYPOINT_CAPACITY: usize = 20;

/// One target rotation per actuator, in degrees.
pub type Rotation = [f32; ACTUATOR_COUNT];

/// Process-wide state shared between the bus, the coordinator and the
/// collaborators.
#[derive(Debug, Default)]
pub struct Context {
    pub motion: MotionState,
    pub safety: Safety,
    pub calibration: Calibration,
    pub gripper: GripperMirror,
    pub health: HealthReport,
    pub link: LinkStatus,
}

impl Context {
    /// Build a context with the given calibration; every actuator starts at its
    /// home pose with no movement pending.
    pub fn new(calibration: Calibration) -> Self {
        let home = calibration.actuator_home_pos;
        Self {
            motion: MotionState {
                current_rotation: home,
                target_rotation: home,
                ..MotionState::default()
            },
            calibration,
            ..Self::default()
        }
    }
}

/// Motion targets and the waypoint queue.
#[derive(Debug, Default)]
pub struct MotionState {
    /// True while a target is actively being interpolated toward.
    pub execute_movement: bool,
    pub current_rotation: Rotation,
    pub target_rotation: Rotation,
    waypoints: Deque<Rotation, WAYPOINT_CAPACITY>,
}

impl MotionState {
    /// Replace the active target and start moving toward it.
    pub fn set_target(
        &mut self,
        target: Rotation,
    ) {
        self.target_rotation = target;
        self.execute_movement = true;
    }

    /// Append a waypoint to the back of the queue.
    ///
    /// Returns the waypoint back when the queue is full; queued entries are
    /// never overwritten.
    pub fn enqueue(
        &mut self,
        waypoint: Rotation,
    ) -> Result<(), Rotation> {
        self.waypoints.push_back(waypoint)
    }

    /// Remove and return the oldest waypoint.
    pub fn dequeue(&mut self) -> Option<Rotation> {
        self.waypoints.pop_front()
    }

    /// Empty the queue and stop interpolating, leaving actuators where they are.
    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.execute_movement = false;
    }

    pub fn queued(&self) -> usize {
        self.waypoints.len()
    }

    pub fn queue_is_full(&self) -> bool {
        self.waypoints.is_full()
    }

    /// Queued waypoints, oldest first.
    pub fn waypoints(&self) -> impl Iterator<Item = &Rotation> {
        self.waypoints.iter()
    }
}

/// Hard gates on motion.
#[derive(Debug, Default, Clone, Copy)]
pub struct Safety {
    /// Emergency halt; all motion commands are suppressed until cleared.
    pub force_stop: bool,
    /// A stop command is owed to the actuators. Set when `force_stop` rises
    /// and cleared only once the stop has gone out, so a set and clear pair
    /// landing between two ticks still halts the arm.
    pub stop_pending: bool,
}

impl Safety {
    /// Set or clear the halt.
    pub fn request_stop(
        &mut self,
        stop: bool,
    ) {
        if stop && !self.force_stop {
            self.stop_pending = true;
        }
        self.force_stop = stop;
    }
}

/// Calibration constants, fixed after boot.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    /// Hard velocity ceiling per actuator (deg/s).
    pub max_actuator_velocity: Rotation,
    /// Raw sensor angle that corresponds to 0° for each actuator.
    pub actuator_zero_pos: Rotation,
    /// Pose the arm parks in before shutdown.
    pub actuator_resting_pos: Rotation,
    /// Pose the arm moves to after startup.
    pub actuator_home_pos: Rotation,
    /// Offset below which an actuator counts as reached (deg).
    pub actuator_rotation_tolerance: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            max_actuator_velocity: [6.696, 6.696, 6.696, 9.534, 6.696, 9.534],
            actuator_zero_pos: [57.5, 238.9746, 28.125, 147.832, 353.3203, 3.515625],
            actuator_resting_pos: [0.0, 0.0, 0.0, 90.0, 0.0, 90.0],
            actuator_home_pos: [0.0; ACTUATOR_COUNT],
            actuator_rotation_tolerance: 0.1,
        }
    }
}

/// Gripper open/closed mirror plus the last request that has not been applied.
#[derive(Debug, Clone, Copy)]
pub struct GripperMirror {
    /// True = open.
    pub current_gripper_state: bool,
    pub requested: Option<bool>,
}

impl Default for GripperMirror {
    fn default() -> Self {
        Self {
            current_gripper_state: true,
            requested: None,
        }
    }
}

/// Result of the most recent health check.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthReport {
    /// Per-actuator result code, `0` = ok.
    pub health_check_results: [u8; ACTUATOR_COUNT],
    pub good_health_check: bool,
    /// A check was requested over the bus and has not run yet.
    pub requested: bool,
}

/// Heartbeat bookkeeping for the serial link.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStatus {
    pub last_checkup_send: Option<embassy_time::Instant>,
    pub last_checkup_receive: Option<embassy_time::Instant>,
    /// No checkup acknowledgment arrived within the timeout.
    pub link_degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_rejects_beyond_capacity() {
        let mut motion = MotionState::default();
        for i in 0..WAYPOINT_CAPACITY {
            motion.enqueue([i as f32; ACTUATOR_COUNT]).unwrap();
        }
        assert!(motion.queue_is_full());
        assert_eq!(motion.enqueue([99.0; ACTUATOR_COUNT]), Err([99.0; ACTUATOR_COUNT]));
        assert_eq!(motion.queued(), WAYPOINT_CAPACITY);
        for (i, wp) in motion.waypoints().enumerate() {
            assert_eq!(wp[0], i as f32);
        }
    }

    #[test]
    fn clear_keeps_position() {
        let mut ctx = Context::new(Calibration::default());
        ctx.motion.current_rotation[2] = 12.0;
        ctx.motion.set_target([1.0; ACTUATOR_COUNT]);
        ctx.motion.enqueue([2.0; ACTUATOR_COUNT]).unwrap();
        ctx.motion.clear();
        assert!(!ctx.motion.execute_movement);
        assert_eq!(ctx.motion.queued(), 0);
        assert_eq!(ctx.motion.current_rotation[2], 12.0);
    }
}
