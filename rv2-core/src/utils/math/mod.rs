//! Math utilities for the RobotV2 arm.
//!
//! This module provides angle normalization and per-tick motion bounding for
//! the six rotary actuators.

pub mod angles;
