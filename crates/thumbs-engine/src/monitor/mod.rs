//! Upstream health monitor.
//!
//! A sampler measures how many bytes the host sent in each one-second
//! window. After a startup grace period, a decision loop checks that figure
//! once per cooldown and, when throughput has collapsed (the usual symptom
//! of the upstream blocking our IP), asks the [`Remediator`] for a new one.

mod counter;
mod remediation;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub use self::counter::{EgressCounter, RateEstimate, SystemEgressCounter};
pub use self::remediation::{GluetunRemediator, RemediationError, Remediator};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("egress statistics unavailable: {0}")]
    Unavailable(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthMonitorConfig {
    pub sample_interval: Duration,
    /// Startup delay before the first decision is made.
    pub grace_period: Duration,
    /// Time between decisions, and so between remediation calls.
    pub cooldown: Duration,
    /// Throughput in Mbit/s below which the upstream counts as blocked.
    pub threshold_mbps: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
            threshold_mbps: 2.0,
        }
    }
}

impl HealthMonitorConfig {
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Handle to the two running monitor loops.
pub struct HealthMonitor {
    rate: RateEstimate,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Primes `counter` and spawns the sampler and decision loops.
    ///
    /// Both loops stop when `cancel` fires. Fails without spawning anything
    /// when the counter cannot be read.
    pub fn start<C: EgressCounter>(
        config: HealthMonitorConfig,
        mut counter: C,
        remediator: Arc<dyn Remediator>,
        cancel: CancellationToken,
    ) -> Result<Self, MonitorError> {
        let primed = counter
            .total_transmitted()
            .ok_or(MonitorError::Unavailable("cannot read transmitted bytes"))?;

        let rate = RateEstimate::default();
        let tracker = TaskTracker::new();

        tracker.spawn(sample_loop(
            counter,
            primed,
            config.sample_interval,
            rate.clone(),
            cancel.clone(),
        ));
        tracker.spawn(decision_loop(config, rate.clone(), remediator, cancel.clone()));
        tracker.close();

        info!(
            grace_period = ?config.grace_period,
            cooldown = ?config.cooldown,
            threshold_mbps = config.threshold_mbps,
            "Upstream health monitor started"
        );

        Ok(Self {
            rate,
            tracker,
            cancel,
        })
    }

    pub fn rate(&self) -> &RateEstimate {
        &self.rate
    }

    /// Cancels both loops and waits for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

async fn sample_loop<C: EgressCounter>(
    mut counter: C,
    mut last_total: u64,
    period: Duration,
    rate: RateEstimate,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Egress sampler shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(total) = counter.total_transmitted() else {
                    warn!("Egress counter unreadable; keeping previous sample");
                    continue;
                };
                // Counters can reset when an interface goes away.
                if total >= last_total {
                    rate.store(total - last_total);
                }
                last_total = total;
            }
        }
    }
}

async fn decision_loop(
    config: HealthMonitorConfig,
    rate: RateEstimate,
    remediator: Arc<dyn Remediator>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(config.grace_period) => {}
    }

    let mut ticker = interval_at(Instant::now() + config.cooldown, config.cooldown);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Health decision loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let mbps = rate.mbps(config.sample_interval);
                if mbps >= config.threshold_mbps {
                    debug!(mbps, "Egress throughput healthy");
                    continue;
                }

                warn!(
                    mbps,
                    threshold_mbps = config.threshold_mbps,
                    "Egress throughput below threshold; requesting a new upstream IP"
                );
                match remediator.request_ip_change().await {
                    Ok(status) if status.is_success() => {
                        info!(%status, "IP change requested");
                    }
                    Ok(status) => {
                        warn!(%status, "Controller rejected the IP change request");
                    }
                    Err(e) => {
                        error!(error = %e, "IP change request failed");
                    }
                }
            }
        }
    }
}
