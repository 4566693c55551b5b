//! Abuse mitigation for the authentication surface.
//!
//! Two tiers, evaluated per client key:
//! 1. an escalation map `key -> blocked_until`, checked first and cheaply;
//! 2. a windowed [`RateCounter`]. The hit that overflows the window promotes
//!    the key to the escalation map for `block_for`.
//!
//! While a key is blocked the counter is not consulted at all, so a window
//! reset never shortens a block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Result of counting one event against a key's window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateSample {
    pub limit: u32,
    pub remaining: u32,
    pub exceeded: bool,
    pub reset_after: Duration,
}

/// Generic capacity-N-per-window-W counting primitive.
pub trait RateCounter: Send + Sync {
    fn hit(&self, key: &str, now: Instant) -> RateSample;

    /// Window capacity, reported to clients.
    fn limit(&self) -> u32;
}

#[derive(Debug, Copy, Clone)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Default)]
struct Windows {
    by_key: HashMap<String, Window>,
    last_sweep: Option<Instant>,
}

/// In-process fixed-window counter.
///
/// Expired windows are swept at most once per window length, so the map
/// holds only keys seen within roughly the last two windows.
#[derive(Debug)]
pub struct FixedWindowCounter {
    capacity: u32,
    window: Duration,
    windows: Mutex<Windows>,
}

impl FixedWindowCounter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).by_key.len()
    }

    fn sweep(&self, windows: &mut Windows, now: Instant) {
        let due = windows
            .last_sweep
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window);
        if !due {
            return;
        }
        let window = self.window;
        let before = windows.by_key.len();
        windows
            .by_key
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
        windows.last_sweep = Some(now);
        let pruned = before - windows.by_key.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = windows.by_key.len(), "expired rate windows pruned");
        }
    }
}

impl RateCounter for FixedWindowCounter {
    fn hit(&self, key: &str, now: Instant) -> RateSample {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut windows, now);

        let entry = windows
            .by_key
            .entry(key.to_owned())
            .or_insert(Window { started: now, count: 0 });

        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }
        entry.count = entry.count.saturating_add(1);

        RateSample {
            limit: self.capacity,
            remaining: self.capacity.saturating_sub(entry.count),
            exceeded: entry.count > self.capacity,
            reset_after: (entry.started + self.window).saturating_duration_since(now),
        }
    }

    fn limit(&self) -> u32 {
        self.capacity
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// `reset_after` is the time left in the current window.
    Allowed { limit: u32, remaining: u32, reset_after: Duration },
    Rejected { limit: u32, retry_after: Duration },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed { .. })
    }
}

/// Rate counter plus escalating temporary blocks.
///
/// Constructed explicitly and shared by `Arc`; there is no process-global
/// instance.
pub struct AbuseGate {
    counter: Arc<dyn RateCounter>,
    blocked_until: Mutex<HashMap<String, Instant>>,
    block_for: Duration,
}

impl core::fmt::Debug for AbuseGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AbuseGate")
            .field("block_for", &self.block_for)
            .finish_non_exhaustive()
    }
}

impl AbuseGate {
    pub fn new(counter: Arc<dyn RateCounter>, block_for: Duration) -> Self {
        Self {
            counter,
            blocked_until: Mutex::new(HashMap::new()),
            block_for,
        }
    }

    /// Fixed-window gate with `capacity` events per `window`.
    pub fn fixed_window(capacity: u32, window: Duration, block_for: Duration) -> Self {
        Self::new(Arc::new(FixedWindowCounter::new(capacity, window)), block_for)
    }

    pub fn check(&self, key: &str) -> GateDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> GateDecision {
        let active_block = {
            let mut blocked = self.blocked_until.lock().unwrap_or_else(PoisonError::into_inner);
            match blocked.get(key).copied() {
                Some(until) if now < until => Some(until),
                Some(_) => {
                    blocked.remove(key);
                    None
                }
                None => None,
            }
        };
        if let Some(until) = active_block {
            return GateDecision::Rejected {
                limit: self.counter.limit(),
                retry_after: until - now,
            };
        }

        let sample = self.counter.hit(key, now);
        if sample.exceeded {
            {
                let mut blocked = self.blocked_until.lock().unwrap_or_else(PoisonError::into_inner);
                blocked.retain(|_, until| now < *until);
                blocked.insert(key.to_owned(), now + self.block_for);
            }
            tracing::warn!(client = key, block_secs = self.block_for.as_secs(), "rate limit exceeded; client blocked");
            return GateDecision::Rejected {
                limit: sample.limit,
                retry_after: self.block_for,
            };
        }

        GateDecision::Allowed {
            limit: sample.limit,
            remaining: sample.remaining,
            reset_after: sample.reset_after,
        }
    }

    /// Number of keys with a recorded block, expired or not.
    pub fn blocked_keys(&self) -> usize {
        self.blocked_until.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
