//! In-memory per-key admission control.
//!
//! Two checks per key: a sliding window capping admissions, and a flood
//! guard rejecting bursts whose average spacing is too short. Rejected
//! requests leave no trace in the window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use rag_core::{RagError, RateLimitConfig};

/// Admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    /// `Err(RateLimited)` when rejected.
    pub fn into_result(self) -> rag_core::Result<()> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Rejected { retry_after_secs } => {
                Err(RagError::RateLimited { retry_after_secs })
            }
        }
    }
}

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    burst_samples: usize,
    min_interval: Duration,
    windows: DashMap<String, Window>,
}

type Window = Arc<Mutex<VecDeque<Instant>>>;

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            burst_samples: config.burst_samples,
            min_interval: Duration::from_millis(config.min_interval_ms),
            windows: DashMap::new(),
        }
    }

    pub fn admit(&self, key: &str) -> Admission {
        self.admit_all_at(&[key], Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        self.admit_all_at(&[key], now)
    }

    /// Admit only if every key passes; nothing is recorded on rejection.
    pub fn admit_all(&self, keys: &[&str]) -> Admission {
        self.admit_all_at(keys, Instant::now())
    }

    pub fn admit_all_at(&self, keys: &[&str], now: Instant) -> Admission {
        // fixed lock order for callers sharing keys
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        loop {
            // clone the entries out so no map shard is held while we work
            let entries: Vec<Window> = keys
                .iter()
                .map(|key| self.windows.entry(key.to_string()).or_default().clone())
                .collect();
            let mut windows: Vec<_> = entries.iter().map(|entry| entry.lock()).collect();

            // prune may have dropped an entry between the clone and the lock
            if !keys
                .iter()
                .zip(&entries)
                .all(|(key, entry)| self.is_current(key, entry))
            {
                continue;
            }

            let mut retry_after: Option<u64> = None;
            for (key, stamps) in keys.iter().zip(windows.iter_mut()) {
                if let Some(wait) = self.check(key, stamps, now) {
                    retry_after = Some(retry_after.map_or(wait, |w| w.max(wait)));
                }
            }
            if let Some(retry_after_secs) = retry_after {
                return Admission::Rejected { retry_after_secs };
            }

            for stamps in windows.iter_mut() {
                stamps.push_back(now);
            }
            return Admission::Allowed;
        }
    }

    fn is_current(&self, key: &str, entry: &Window) -> bool {
        self.windows
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    /// Expire old stamps and return the wait in seconds if `key` is over a limit.
    fn check(&self, key: &str, stamps: &mut VecDeque<Instant>, now: Instant) -> Option<u64> {
        while let Some(&oldest) = stamps.front() {
            if now.duration_since(oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.max_requests {
            let wait = stamps
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(self.window);
            debug!("Rate limit window full for {}", key);
            return Some(ceil_secs(wait));
        }

        let prior = self.burst_samples.saturating_sub(1);
        if prior > 0 && stamps.len() >= prior {
            let first = stamps[stamps.len() - prior];
            let elapsed = now.duration_since(first);
            let required = self.min_interval.saturating_mul(prior as u32);
            if elapsed < required {
                debug!("Flood guard tripped for {}", key);
                return Some(ceil_secs(required - elapsed));
            }
        }

        None
    }

    /// Drop keys with no admissions inside the window.
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    pub fn prune_at(&self, now: Instant) {
        let window = self.window;
        // a window locked by an admission in flight is kept
        self.windows.retain(|_, stamps| match stamps.try_lock() {
            Some(stamps) => stamps
                .back()
                .is_some_and(|&last| now.duration_since(last) < window),
            None => true,
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
