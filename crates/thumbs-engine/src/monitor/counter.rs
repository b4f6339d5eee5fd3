use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sysinfo::Networks;

/// Source of the cumulative number of bytes sent by this host.
pub trait EgressCounter: Send + 'static {
    /// Current total, or `None` when it cannot be read right now.
    fn total_transmitted(&mut self) -> Option<u64>;
}

/// Sums transmitted bytes over every network interface.
pub struct SystemEgressCounter {
    networks: Networks,
}

impl SystemEgressCounter {
    /// `None` on platforms without interface statistics or when no
    /// interface is visible.
    pub fn new() -> Option<Self> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let networks = Networks::new_with_refreshed_list();
        if networks.list().is_empty() {
            return None;
        }
        Some(Self { networks })
    }
}

impl EgressCounter for SystemEgressCounter {
    fn total_transmitted(&mut self) -> Option<u64> {
        self.networks.refresh(true);
        let list = self.networks.list();
        if list.is_empty() {
            return None;
        }
        Some(list.values().map(|data| data.total_transmitted()).sum())
    }
}

/// Bytes sent during the last sampling window.
///
/// Written by the sampler only, read by the decision loop.
#[derive(Debug, Clone, Default)]
pub struct RateEstimate(Arc<AtomicU64>);

impl RateEstimate {
    pub fn bytes(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn store(&self, bytes: u64) {
        self.0.store(bytes, Ordering::Relaxed);
    }

    /// Throughput in megabits per second for a window of `window`.
    pub fn mbps(&self, window: Duration) -> f64 {
        let secs = window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes() as f64 * 8.0 / 1_000_000.0 / secs
    }
}
