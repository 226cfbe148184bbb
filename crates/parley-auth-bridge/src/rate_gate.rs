//! Per-endpoint-class request pacing.
//!
//! Upstream enforces request budgets per method tier. The gate hands out
//! send slots spaced by the tier's minimum interval and lets the transport
//! push a tier's next slot out when upstream answers with a retry-after hint.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ParleyError, Result};

/// Rate tier of an upstream method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// ~20 requests per minute (directory listings, search).
    Tier2,
    /// ~50 requests per minute (history, replies).
    Tier3,
    /// ~100 requests per minute.
    Tier4,
    /// Identity checks; not paced.
    Unpaced,
}

impl EndpointClass {
    pub fn per_minute(&self) -> Option<u32> {
        match self {
            EndpointClass::Tier2 => Some(20),
            EndpointClass::Tier3 => Some(50),
            EndpointClass::Tier4 => Some(100),
            EndpointClass::Unpaced => None,
        }
    }

    /// Minimum spacing between two requests of this class.
    pub fn spacing(&self) -> Duration {
        match self.per_minute() {
            Some(budget) => Duration::from_millis(60_000 / u64::from(budget)),
            None => Duration::ZERO,
        }
    }
}

pub struct RateGate {
    next_slot: Mutex<HashMap<EndpointClass, Instant>>,
    paced: bool,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGate {
    pub fn new() -> Self {
        Self {
            next_slot: Mutex::new(HashMap::new()),
            paced: true,
        }
    }

    /// A gate that only honours explicit back-off, never tier spacing.
    pub fn unpaced() -> Self {
        Self {
            next_slot: Mutex::new(HashMap::new()),
            paced: false,
        }
    }

    fn spacing(&self, class: EndpointClass) -> Duration {
        if self.paced {
            class.spacing()
        } else {
            Duration::ZERO
        }
    }

    /// Wait until `class` admits another request, or until `cancel` fires.
    pub async fn admit(&self, class: EndpointClass, cancel: &CancellationToken) -> Result<()> {
        let slot = self.reserve(class);
        if slot <= Instant::now() {
            return Ok(());
        }

        debug!(?class, wait_ms = (slot - Instant::now()).as_millis() as u64, "rate gate holding request");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ParleyError::Cancelled),
            _ = sleep_until(slot) => Ok(()),
        }
    }

    /// Record an upstream retry-after signal for `class`.
    pub fn back_off(&self, class: EndpointClass, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = slots.entry(class).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    fn reserve(&self, class: EndpointClass) -> Instant {
        let now = Instant::now();
        let spacing = self.spacing(class);
        let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = slots.entry(class).or_insert(now);
        let slot = (*entry).max(now);
        *entry = slot + spacing;
        slot
    }
}
