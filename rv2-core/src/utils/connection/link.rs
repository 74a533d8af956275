//! Association supervisor.
//!
//! Bringing a link up (joining a network, binding a listener) is driven as a
//! state machine polled from the main loop instead of a blocking wait, so the
//! control loop keeps running while the link is down. Failed attempts back
//! off exponentially; once the attempt budget is spent the supervisor rests
//! for a cooldown and then starts over with a fresh budget.

use embassy_time::{Duration, Instant};

/// Progress of one association attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Pending,
    Connected,
    Failed,
}

/// A link that can be brought up asynchronously.
pub trait Association {
    /// Start a new attempt.
    fn begin(&mut self);
    /// Report on the attempt started by the last `begin`, or on the
    /// established link once connected.
    fn status(&mut self) -> AttemptStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { attempt: u8, started: Instant },
    Backoff { attempt: u8, until: Instant },
    Connected,
    /// Attempts exhausted; a fresh round starts at `retry_at` or on
    /// [`LinkSupervisor::reset`].
    Failed { retry_at: Instant },
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub max_attempts: u8,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// An attempt still pending after this long counts as failed.
    pub attempt_timeout: Duration,
    /// Rest after the attempt budget is spent.
    pub failed_cooldown: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(10),
            failed_cooldown: Duration::from_secs(30),
        }
    }
}

pub struct LinkSupervisor {
    state: LinkState,
    config: SupervisorConfig,
}

impl LinkSupervisor {
    pub fn new(config: Option<SupervisorConfig>) -> Self {
        Self {
            state: LinkState::Idle,
            config: config.unwrap_or_default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Return to `Idle` with a fresh attempt budget.
    pub fn reset(&mut self) {
        self.state = LinkState::Idle;
    }

    /// Delay before the attempt following `attempt`.
    pub fn backoff(
        &self,
        attempt: u8,
    ) -> Duration {
        let shift = u32::from(attempt.saturating_sub(1)).min(16);
        let ms = self.config.base_backoff.as_millis().saturating_mul(1 << shift);
        Duration::from_millis(ms.min(self.config.max_backoff.as_millis()))
    }

    /// Advance the state machine. Never blocks.
    pub fn poll<A: Association>(
        &mut self,
        link: &mut A,
        now: Instant,
    ) -> LinkState {
        self.state = match self.state {
            LinkState::Idle => {
                link.begin();
                LinkState::Connecting {
                    attempt: 1,
                    started: now,
                }
            }
            LinkState::Connecting { attempt, started } => match link.status() {
                AttemptStatus::Connected => {
                    tracing::info!(attempt, "link established");
                    LinkState::Connected
                }
                AttemptStatus::Pending
                    if now.saturating_duration_since(started) < self.config.attempt_timeout =>
                {
                    self.state
                }
                AttemptStatus::Pending | AttemptStatus::Failed => self.fail(attempt, now),
            },
            LinkState::Backoff { attempt, until } => {
                if now >= until {
                    link.begin();
                    LinkState::Connecting {
                        attempt: attempt + 1,
                        started: now,
                    }
                } else {
                    self.state
                }
            }
            LinkState::Connected => match link.status() {
                AttemptStatus::Connected => LinkState::Connected,
                _ => {
                    tracing::warn!("link lost, reconnecting");
                    link.begin();
                    LinkState::Connecting {
                        attempt: 1,
                        started: now,
                    }
                }
            },
            LinkState::Failed { retry_at } => {
                if now >= retry_at {
                    tracing::info!("retrying link after cooldown");
                    link.begin();
                    LinkState::Connecting {
                        attempt: 1,
                        started: now,
                    }
                } else {
                    self.state
                }
            }
        };
        self.state
    }

    fn fail(
        &self,
        attempt: u8,
        now: Instant,
    ) -> LinkState {
        if attempt >= self.config.max_attempts {
            tracing::error!(
                attempt,
                cooldown_ms = self.config.failed_cooldown.as_millis(),
                "link attempts exhausted"
            );
            return LinkState::Failed {
                retry_at: now + self.config.failed_cooldown,
            };
        }
        let delay = self.backoff(attempt);
        tracing::warn!(attempt, delay_ms = delay.as_millis(), "link attempt failed, backing off");
        LinkState::Backoff {
            attempt,
            until: now + delay,
        }
    }
}
