//! Fixed window counter.

use parking_lot::Mutex;
use std::time::Duration;

use super::algorithm::{Acquisition, AlgorithmKind, Limiter};

/// Counts admissions within fixed, back-to-back windows.
///
/// Windows are anchored at the instant the limiter was created and advance by
/// whole window lengths, so an idle gap never shifts the boundaries. Up to
/// twice `permit_limit` requests can pass across a boundary; callers wanting a
/// smoother limit should use the sliding window.
pub struct FixedWindowLimiter {
    /// Maximum admissions per window
    permit_limit: u64,
    /// Length of each window
    window: Duration,
    state: Mutex<FixedWindowState>,
}

struct FixedWindowState {
    /// When the current window started
    window_start: Duration,
    /// Admissions in the current window
    count: u64,
    /// Latest instant observed, so late callers cannot rewind the window
    latest: Duration,
}

impl FixedWindowLimiter {
    /// Create a new limiter whose first window opens at `now`.
    pub fn new(permit_limit: u64, window: Duration, now: Duration) -> Self {
        assert!(!window.is_zero(), "window must be greater than 0");

        Self {
            permit_limit,
            window,
            state: Mutex::new(FixedWindowState {
                window_start: now,
                count: 0,
                latest: now,
            }),
        }
    }

    /// Get the limit for this counter.
    pub fn permit_limit(&self) -> u64 {
        self.permit_limit
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl FixedWindowState {
    fn roll(&mut self, now: Duration, window: Duration) {
        let elapsed = now.saturating_sub(self.window_start);
        if elapsed < window {
            return;
        }

        let windows = elapsed.as_nanos() / window.as_nanos();
        let advance = window.as_nanos() * windows;
        self.window_start += Duration::from_nanos(advance as u64);
        self.count = 0;
    }
}

impl Limiter for FixedWindowLimiter {
    fn try_acquire(&self, now: Duration) -> Acquisition {
        let mut state = self.state.lock();
        let now = now.max(state.latest);
        state.latest = now;

        state.roll(now, self.window);

        if state.count < self.permit_limit {
            state.count += 1;
            Acquisition::admitted(self.permit_limit - state.count)
        } else {
            let reset_at = state.window_start + self.window;
            Acquisition::rejected(Some(reset_at - now))
        }
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FixedWindow
    }

    fn is_idle(&self, now: Duration) -> bool {
        let state = self.state.lock();
        let now = now.max(state.latest);
        state.count == 0 || now >= state.window_start + self.window
    }
}
