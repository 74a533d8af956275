//! Topic names exchanged with the computer.
//!
//! These are a deployment contract with the peer; `in` topics are consumed
//! by the arm board, `out` topics are produced by it.

pub const TARGET: &str = "arduino/in/target";
pub const PATH: &str = "arduino/in/path";
pub const PATH_ACK: &str = "arduino/out/path";
pub const CLEAR: &str = "arduino/in/clear";
pub const FORCE_STOP: &str = "arduino/in/force_stop";
pub const POSE: &str = "arduino/in/pose";
pub const ACTUATOR_INFO_REQUEST: &str = "arduino/in/actuator_info";
pub const ACTUATOR_INFO: &str = "arduino/out/actuator_info";

pub const GRIPPER_SET: &str = "arduino/in/gripper/set";
pub const GRIPPER_GET: &str = "arduino/in/gripper/get";
pub const GRIPPER_STATE: &str = "arduino/out/gripper";

pub const HEALTH_CHECK: &str = "arduino/in/health/check";
pub const HEALTH_STATUS: &str = "arduino/out/health";

/// Heartbeat published by the board.
pub const CHECKUP: &str = "arduino/out/checkup";
/// Acknowledgment published by the computer in reply to [`CHECKUP`].
pub const CHECKUP_ACK: &str = "computer/out/checkup";
