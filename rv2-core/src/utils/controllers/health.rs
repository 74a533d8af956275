//! Actuator health check.
//!
//! A joint is healthy when its encoder answers. Each joint gets a few
//! attempts before it is marked failed; the coordinator refuses to move while
//! any joint is failed.

use serde::Serialize;

use crate::utils::{
    connection::{
        bus::{publish_json, BusError, HandlerError, Message, Publisher},
        topics,
    },
    context::{Context, HealthReport, ACTUATOR_COUNT},
    controllers::sensor::AngleSensor,
};

/// Result code for a joint that answered.
pub const RESULT_OK: u8 = 0;
/// Result code for a joint whose encoder never answered.
pub const RESULT_SENSOR_FAILURE: u8 = 1;

#[derive(Serialize)]
struct HealthStatus<'a> {
    good: bool,
    results: &'a [u8; ACTUATOR_COUNT],
}

pub struct HealthMonitor {
    max_repeats: u8,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HealthMonitor {
    /// `max_repeats` defaults to 3 attempts per joint.
    pub fn new(max_repeats: Option<u8>) -> Self {
        Self {
            max_repeats: max_repeats.unwrap_or(3).max(1),
        }
    }

    /// Probe every joint and record the outcome in `report`.
    pub fn perform_health_check<S: AngleSensor>(
        &self,
        sensor: &mut S,
        report: &mut HealthReport,
    ) {
        for (i, result) in report.health_check_results.iter_mut().enumerate() {
            let answered = (0..self.max_repeats).any(|attempt| match sensor.read_angle(i) {
                Ok(_) => true,
                Err(error) => {
                    tracing::debug!(actuator = i, attempt, ?error, "health read failed");
                    false
                }
            });
            *result = if answered {
                RESULT_OK
            } else {
                RESULT_SENSOR_FAILURE
            };
        }
        report.good_health_check = report.health_check_results.iter().all(|&r| r == RESULT_OK);
        if report.good_health_check {
            tracing::info!("health check passed");
        } else {
            tracing::error!(results = ?report.health_check_results, "health check failed");
        }
    }

    /// Publish the last health check outcome.
    pub fn send_health_status(
        report: &HealthReport,
        publisher: &mut dyn Publisher,
    ) -> Result<(), BusError> {
        publish_json(
            publisher,
            topics::HEALTH_STATUS,
            &HealthStatus {
                good: report.good_health_check,
                results: &report.health_check_results,
            },
        )
    }

    /// Run a check requested over the bus, if any, and report it.
    pub fn service<S: AngleSensor>(
        &self,
        sensor: &mut S,
        report: &mut HealthReport,
        publisher: &mut dyn Publisher,
    ) {
        if !core::mem::take(&mut report.requested) {
            return;
        }
        self.perform_health_check(sensor, report);
        if let Err(error) = Self::send_health_status(report, publisher) {
            tracing::warn!(%error, "health status not sent");
        }
    }
}

/// `arduino/in/health/check`: schedule a check for the next service pass.
pub fn on_health_check(
    ctx: &mut Context,
    _msg: &Message<'_>,
    _publisher: &mut dyn Publisher,
) -> Result<(), HandlerError> {
    ctx.health.requested = true;
    Ok(())
}
