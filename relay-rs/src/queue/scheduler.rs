//! Periodic retry loop
//!
//! Every `retry_interval` the scheduler loads the whole queue and attempts
//! each due message once, in sequence. Success deletes the record; failure
//! rewrites it with linear backoff (`attempts * backoff_step`).

use crate::config::DeliveryConfig;
use crate::error::Result;
use crate::queue::{QueueStore, QueuedMessage};
use crate::smtp::Deliver;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Outcome counts of one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub delivered: usize,
    pub deferred: usize,
    pub abandoned: usize,
    pub not_due: usize,
}

pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    deliverer: Arc<dyn Deliver>,
    interval: Duration,
    backoff_step: chrono::Duration,
    max_attempts: Option<u32>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        deliverer: Arc<dyn Deliver>,
        config: &DeliveryConfig,
    ) -> Self {
        let backoff_step = chrono::Duration::from_std(config.backoff_step()).unwrap_or_else(|_| {
            warn!(
                "backoff_step_secs {} out of range, using 15 minutes",
                config.backoff_step_secs
            );
            chrono::Duration::minutes(15)
        });

        Self {
            store,
            deliverer,
            interval: config.retry_interval(),
            backoff_step,
            max_attempts: config.max_attempts,
        }
    }

    /// Run cycles forever, sleeping `interval` between them
    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting delivery scheduler (interval {:?}, backoff step {}s)",
            self.interval,
            self.backoff_step.num_seconds()
        );

        loop {
            match self.run_cycle().await {
                Ok(report) if report == CycleReport::default() => {}
                Ok(report) => info!(
                    "Delivery cycle: {} delivered, {} deferred, {} abandoned, {} not due",
                    report.delivered, report.deferred, report.abandoned, report.not_due
                ),
                Err(e) => error!("Delivery cycle failed: {}", e),
            }

            sleep(self.interval).await;
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One pass over the queue, treating `now` as the current time
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let messages = self.store.list_all().await?;
        let mut report = CycleReport::default();

        for message in messages {
            if !message.is_due(now) {
                report.not_due += 1;
                continue;
            }

            match self.deliverer.deliver(&message).await {
                Ok(()) => {
                    info!("Delivered {}", message.id);
                    if let Err(e) = self.store.delete(&message.id).await {
                        // The record stays and will be delivered again next cycle
                        error!("Failed to remove delivered message {}: {}", message.id, e);
                    }
                    report.delivered += 1;
                }
                Err(e) => {
                    if self.handle_failure(message, &e.to_string(), now).await {
                        report.abandoned += 1;
                    } else {
                        report.deferred += 1;
                    }
                }
            }
        }

        debug!("Cycle finished: {:?}", report);
        Ok(report)
    }

    /// Record a failed attempt. Returns true if the message was given up on.
    async fn handle_failure(
        &self,
        mut message: QueuedMessage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> bool {
        message.record_failure(reason, now, self.backoff_step);

        if let Some(max) = self.max_attempts {
            if message.attempts >= max {
                warn!(
                    "Abandoning {} after {} attempts: {}",
                    message.id, message.attempts, reason
                );
                if let Err(e) = self.store.delete(&message.id).await {
                    error!("Failed to remove abandoned message {}: {}", message.id, e);
                }
                return true;
            }
        }

        warn!(
            "Delivery of {} failed (attempt {}), next attempt at {}: {}",
            message.id, message.attempts, message.next_attempt_at, reason
        );

        if let Err(e) = self.store.update(&message).await {
            // On-disk state keeps its previous attempt count
            error!("Failed to persist retry state for {}: {}", message.id, e);
        }
        false
    }
}
