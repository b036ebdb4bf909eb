//! Shared rate/burst/stop state consulted by every sender task.
//!
//! A single [`RateController`] instance is the source of truth for the whole
//! process. All mutations and reads go through one mutex, so a [`Snapshot`]
//! always reflects a fully applied state, never a partial update. The lock is
//! held only for the in-memory change; never across I/O.
//!
//! Burst expiry is lazy: there is no background timer. The first
//! [`snapshot`](RateController::snapshot) taken after the deadline reverts
//! the rate as a side effect of the read. Sender tasks poll on every send
//! cycle, which keeps the staleness window well below any meaningful burst
//! duration.

use crate::engine::error::{Error, Result};
use core::time::Duration;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as a duration since the Unix epoch.
///
/// Abstracted so burst expiry can be driven by a mock clock in tests.
pub trait TimeSource: Send + Sync + 'static {
    fn now(&self) -> Duration;
}

/// System wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug)]
struct ControllerState {
    rate_ms: u64,
    burst_mode: bool,
    burst_end: Duration,
    pre_burst_rate: Option<u64>,
    stopped: bool,
}

impl ControllerState {
    fn clear_burst(&mut self) {
        self.burst_mode = false;
        self.burst_end = Duration::ZERO;
        self.pre_burst_rate = None;
    }
}

/// Immutable copy of the observable controller state.
///
/// `burst_until` and `burst_remaining` are whole seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub rate_ms: u64,
    pub burst_mode: bool,
    pub burst_until: u64,
    pub burst_remaining: u64,
    pub stopped: bool,
}

/// Mutex-guarded pacing state shared by the sender tasks and the control
/// surface.
pub struct RateController {
    state: Mutex<ControllerState>,
    clock: Box<dyn TimeSource>,
    idle_rate_ms: u64,
}

impl RateController {
    /// Controller on the system clock, starting at the idle rate.
    pub fn new(idle_rate_ms: u64) -> Self {
        Self::with_clock(idle_rate_ms, SystemClock)
    }

    pub fn with_clock(idle_rate_ms: u64, clock: impl TimeSource) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                rate_ms: idle_rate_ms,
                burst_mode: false,
                burst_end: Duration::ZERO,
                pre_burst_rate: None,
                stopped: false,
            }),
            clock: Box::new(clock),
            idle_rate_ms,
        }
    }

    /// Permanent rate change. Cancels any active burst and resumes sending.
    ///
    /// # Errors
    ///
    /// Rejects a zero rate; the state is left untouched.
    pub fn set_rate(&self, ms: u64) -> Result<()> {
        if ms == 0 {
            return Err(Error::InvalidRate);
        }

        let mut state = self.state.lock();
        if state.burst_mode {
            state.clear_burst();
            tracing::warn!("manual override: burst cancelled");
        }
        state.rate_ms = ms;
        state.stopped = false;
        tracing::info!(rate_ms = ms, "traffic rate set, sending resumed");
        Ok(())
    }

    /// Temporary override: run at `rate_ms` until `duration_s` from now.
    ///
    /// The pre-burst baseline is captured only when entering burst mode;
    /// re-arming an active burst moves its rate and deadline but keeps the
    /// original baseline for the eventual revert.
    ///
    /// # Errors
    ///
    /// Rejects a zero rate or a zero duration; the state is left untouched.
    pub fn start_burst(&self, rate_ms: u64, duration_s: u64) -> Result<()> {
        if rate_ms == 0 {
            return Err(Error::InvalidRate);
        }
        if duration_s == 0 {
            return Err(Error::InvalidDuration);
        }

        let mut state = self.state.lock();
        if !state.burst_mode {
            state.pre_burst_rate = Some(state.rate_ms);
        }
        state.rate_ms = rate_ms;
        state.burst_mode = true;
        state.burst_end = self.clock.now() + Duration::from_secs(duration_s);
        state.stopped = false;
        tracing::info!(rate_ms, duration_s, "burst started");
        Ok(())
    }

    /// Pauses every sender task until `set_rate` or `start_burst` resumes
    /// them. Cancels any burst and resets the rate to the idle default.
    /// Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.clear_burst();
        state.rate_ms = self.idle_rate_ms;
        tracing::info!("traffic stopped");
    }

    /// Copy of the current state.
    ///
    /// Fast path: when stopped there is no time arithmetic at all. Otherwise
    /// an expired burst is reverted here, as a side effect of the read.
    pub fn snapshot(&self) -> Snapshot {
        let mut state = self.state.lock();
        if state.stopped {
            return Snapshot {
                rate_ms: state.rate_ms,
                burst_mode: false,
                burst_until: 0,
                burst_remaining: 0,
                stopped: true,
            };
        }

        let now = self.clock.now();
        if state.burst_mode && now > state.burst_end {
            let restored = state.pre_burst_rate.unwrap_or(self.idle_rate_ms);
            tracing::info!(rate_ms = restored, "burst ended, reverting");
            state.rate_ms = restored;
            state.clear_burst();
        }

        let burst_remaining = if state.burst_mode {
            state.burst_end.saturating_sub(now).as_secs()
        } else {
            0
        };

        Snapshot {
            rate_ms: state.rate_ms,
            burst_mode: state.burst_mode,
            burst_until: state.burst_end.as_secs(),
            burst_remaining,
            stopped: false,
        }
    }
}
