// Shared rate-limit budget for all pollers.
// Tracks the headers GitHub returns and refuses calls once the low-water mark is hit.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

use crate::error::{Result, StatusError};

/// Requests kept in reserve before the gate closes.
pub const DEFAULT_LOW_WATER: u64 = 5;

/// Rate limit information from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Reset time as a unix timestamp.
    pub reset: u64,
    /// False until the first response carrying rate-limit headers.
    pub known: bool,
}

impl RateLimit {
    pub fn reset_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.reset as i64, 0).unwrap_or_else(Utc::now)
    }

    /// Parse the `x-ratelimit-*` headers, if all three are present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let number = |name: &str| -> Option<u64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };

        Some(Self {
            limit: number("x-ratelimit-limit")?,
            remaining: number("x-ratelimit-remaining")?,
            reset: number("x-ratelimit-reset")?,
            known: true,
        })
    }
}

/// Budget shared by every caller of one client.
///
/// Each call reserves a request before it is sent, so concurrent pollers
/// cannot collectively spend past the low-water mark between two responses.
#[derive(Debug)]
pub struct RateLimitGate {
    state: Mutex<RateLimit>,
    low_water: u64,
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_WATER)
    }
}

impl RateLimitGate {
    pub fn new(low_water: u64) -> Self {
        Self {
            state: Mutex::new(RateLimit::default()),
            low_water,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateLimit> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current view of the budget.
    pub fn current(&self) -> RateLimit {
        self.lock().clone()
    }

    /// When the gate is closed, the time it reopens.
    pub fn limited_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let state = self.lock();
        if state.known && state.remaining <= self.low_water && state.reset_at() > now {
            Some(state.reset_at())
        } else {
            None
        }
    }

    /// Reserve one request, or report when the budget resets.
    pub fn acquire(&self, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        if !state.known {
            return Ok(());
        }

        if state.remaining <= self.low_water {
            let reset_at = state.reset_at();
            if reset_at > now {
                return Err(StatusError::RateLimited { reset_at });
            }
            // Window rolled over; trust the old limit until the next response says otherwise.
            state.remaining = state.limit;
        }

        state.remaining = state.remaining.saturating_sub(1);
        Ok(())
    }

    /// Record the budget reported by a response.
    ///
    /// Within one reset window the remaining count only ever goes down, so a
    /// late response from an earlier request cannot reopen the gate.
    pub fn update(&self, observed: RateLimit) {
        let mut state = self.lock();
        if state.known && state.reset == observed.reset {
            state.limit = observed.limit;
            state.remaining = state.remaining.min(observed.remaining);
        } else if !state.known || observed.reset > state.reset {
            *state = observed;
        }
    }

    /// Close the gate until `reset_at`, after the server refused a request.
    pub fn exhaust(&self, reset_at: DateTime<Utc>) {
        let mut state = self.lock();
        state.known = true;
        state.remaining = 0;
        state.reset = reset_at.timestamp().max(0) as u64;
    }
}
