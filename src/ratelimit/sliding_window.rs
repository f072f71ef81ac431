//! Segmented sliding window counter.

use parking_lot::Mutex;
use std::time::Duration;

use super::algorithm::{Acquisition, AlgorithmKind, Limiter};

/// Approximates a sliding window with a ring of segment counters.
///
/// Time is cut into segments of `window / segments` aligned to the clock's
/// origin. The window covers the current segment and the `segments - 1`
/// before it. Segments that fall out of the window are zeroed lazily on the
/// next call, so state stays O(segments) and the admitted count over any
/// trailing window exceeds `permit_limit` by at most `permit_limit / segments`.
pub struct SlidingWindowLimiter {
    /// Maximum admissions within the window
    permit_limit: u64,
    /// Total window length
    window: Duration,
    /// Length of one segment
    segment: Duration,
    state: Mutex<SlidingWindowState>,
}

struct SlidingWindowState {
    /// Ring of segments indexed by `(now / segment) % segments`
    slots: Vec<Segment>,
    /// Sum of all slot counts
    total: u64,
    /// Latest instant observed
    latest: Duration,
}

#[derive(Clone, Copy, Default)]
struct Segment {
    start: Duration,
    count: u64,
}

impl SlidingWindowLimiter {
    /// Create a new limiter.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is zero or does not divide `window` evenly.
    pub fn new(permit_limit: u64, window: Duration, segments: u32, now: Duration) -> Self {
        assert!(segments > 0, "segments must be greater than 0");
        assert!(
            window.as_nanos() % u128::from(segments) == 0 && !window.is_zero(),
            "window must divide evenly into segments"
        );

        Self {
            permit_limit,
            window,
            segment: window / segments,
            state: Mutex::new(SlidingWindowState {
                slots: vec![Segment::default(); segments as usize],
                total: 0,
                latest: now,
            }),
        }
    }

    /// Get the limit for this window.
    pub fn permit_limit(&self) -> u64 {
        self.permit_limit
    }

    /// Get the number of segments.
    pub fn segments(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Start of the segment containing `now`, and that segment's ring index.
    fn locate(&self, now: Duration, slots: usize) -> (Duration, usize) {
        let segment_nanos = self.segment.as_nanos();
        let ordinal = now.as_nanos() / segment_nanos;
        let start = Duration::from_nanos((ordinal * segment_nanos) as u64);
        (start, (ordinal % slots as u128) as usize)
    }
}

impl SlidingWindowState {
    /// Zero every segment that has rotated out of the window ending in the
    /// segment starting at `current_start`.
    fn expire(&mut self, current_start: Duration, window: Duration) {
        for slot in self.slots.iter_mut() {
            if slot.count > 0 && slot.start + window <= current_start {
                assert!(self.total >= slot.count, "segment count exceeds window total");
                self.total -= slot.count;
                slot.count = 0;
            }
        }
    }

    fn oldest_active_start(&self) -> Option<Duration> {
        self.slots
            .iter()
            .filter(|slot| slot.count > 0)
            .map(|slot| slot.start)
            .min()
    }
}

impl Limiter for SlidingWindowLimiter {
    fn try_acquire(&self, now: Duration) -> Acquisition {
        let mut state = self.state.lock();
        let now = now.max(state.latest);
        state.latest = now;

        let (current_start, index) = self.locate(now, state.slots.len());

        state.expire(current_start, self.window);

        let slot = &mut state.slots[index];
        if slot.start != current_start {
            // Anything left here belongs to a rotated-out segment and was zeroed above
            debug_assert_eq!(slot.count, 0);
            slot.start = current_start;
        }

        if state.total < self.permit_limit {
            state.slots[index].count += 1;
            state.total += 1;
            Acquisition::admitted(self.permit_limit - state.total)
        } else {
            let retry_after = state
                .oldest_active_start()
                .map(|start| (start + self.window).saturating_sub(now));
            Acquisition::rejected(retry_after)
        }
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindow
    }

    fn is_idle(&self, now: Duration) -> bool {
        let state = self.state.lock();
        let now = now.max(state.latest);
        let (current_start, _) = self.locate(now, state.slots.len());
        state
            .slots
            .iter()
            .all(|slot| slot.count == 0 || slot.start + self.window <= current_start)
    }
}
