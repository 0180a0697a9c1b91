//! Engine runner.
//!
//! Wraps the delivery scheduler and escalation engine behind a single
//! `tick` entry point for an external timer/cron trigger, plus a self-timed
//! polling loop for processes that own their own clock. Stopping means
//! "stop accepting new ticks"; an in-flight cycle always finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::escalation::{EscalationEngine, EscalationStats};
use crate::scheduler::{CycleStats, DeliveryScheduler};

/// Outcome of one runner tick.
#[derive(Debug)]
pub struct TickReport {
    /// `None` when the scheduler dropped the trigger (stopped or busy).
    pub cycle: Option<CycleStats>,
    pub escalation: EscalationStats,
}

pub struct EngineRunner {
    scheduler: Arc<DeliveryScheduler>,
    escalation: Arc<EscalationEngine>,
    poll_interval: Duration,
    escalation_interval: Duration,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl EngineRunner {
    pub fn new(
        scheduler: Arc<DeliveryScheduler>,
        escalation: Arc<EscalationEngine>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            scheduler,
            escalation,
            poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs.max(1)),
            escalation_interval: Duration::from_secs(
                config.escalation.check_interval_secs.max(1),
            ),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// Run one scheduler cycle and one escalation check against `now`.
    /// The single entry point for an external timer/cron trigger.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let cycle = self.scheduler.run_cycle(now).await?;
        let escalation = self.escalation.run_check(now).await?;
        Ok(TickReport { cycle, escalation })
    }

    /// Stop accepting new ticks. The current cycle, if any, finishes.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Self-timed polling loop. The scheduler and escalation engine run on
    /// independent cadences with no ordering guarantee between them.
    pub async fn run(&self) {
        let mut scheduler_timer = tokio::time::interval(self.poll_interval);
        let mut escalation_timer = tokio::time::interval(self.escalation_interval);
        // The first interval tick fires immediately; consume both.
        scheduler_timer.tick().await;
        escalation_timer.tick().await;

        loop {
            if self.is_stopped() {
                return;
            }
            tokio::select! {
                _ = self.stop_notify.notified() => return,
                _ = scheduler_timer.tick() => {
                    if let Err(e) = self.scheduler.run_cycle(Utc::now()).await {
                        warn!(error = %e, "scheduler cycle failed");
                    }
                }
                _ = escalation_timer.tick() => {
                    if let Err(e) = self.escalation.run_check(Utc::now()).await {
                        warn!(error = %e, "escalation check failed");
                    }
                }
            }
        }
    }
}
