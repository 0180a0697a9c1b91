//! Polling delivery scheduler.
//!
//! One cycle: query due reminders, partition into batches, fan out delivery
//! attempts bounded by a concurrency cap, retry transient failures within
//! the cycle, advance recurrence on success. The scheduler is single-flight
//! against itself; an overlapping trigger is dropped and logged, never
//! queued.
//!
//! "Create delivery" and "update reminder" are two independent atomic
//! writes. A crash between them is recovered by re-derivation on the next
//! cycle, not by rollback.

pub mod health;

pub use health::{HealthReport, HealthStatus};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{HealthConfig, SchedulerConfig};
use crate::error::Result;
use crate::events::{EventSink, InteractionEvent};
use crate::model::{Delivery, DeliveryStatus, Reminder, ReminderStatus};
use crate::notify::{Notifier, NotifyOutcome};
use crate::recurrence;
use crate::store::ReminderStore;

/// Statistics for one completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub due: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl CycleStats {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[derive(Default)]
struct Totals {
    last_cycle_at: Option<DateTime<Utc>>,
    cycles: u64,
    delivered: u64,
    failed: u64,
}

enum Attempt {
    Delivered,
    Failed,
    Skipped,
}

/// The delivery scheduler service. Constructed with injected store,
/// notifier, and event sink; no global state.
pub struct DeliveryScheduler {
    store: Arc<dyn ReminderStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    config: SchedulerConfig,
    health_config: HealthConfig,
    running: AtomicBool,
    busy: AtomicBool,
    totals: Mutex<Totals>,
}

impl DeliveryScheduler {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
        config: SchedulerConfig,
        health_config: HealthConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            events,
            config,
            health_config,
            running: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            totals: Mutex::new(Totals::default()),
        }
    }

    /// Resume accepting cycle triggers.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stop accepting cycle triggers. An in-flight cycle finishes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one delivery cycle against `now`.
    ///
    /// Returns `None` when the trigger was dropped: the scheduler is
    /// stopped, or another cycle is already in flight.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<Option<CycleStats>> {
        if !self.is_running() {
            info!("scheduler stopped; cycle trigger dropped");
            return Ok(None);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("cycle already in flight; concurrent trigger dropped");
            return Ok(None);
        }

        let result = self.cycle(now).await;
        self.busy.store(false, Ordering::SeqCst);

        let stats = result?;
        if let Ok(mut totals) = self.totals.lock() {
            totals.last_cycle_at = Some(now);
            totals.cycles += 1;
            totals.delivered += stats.delivered as u64;
            totals.failed += stats.failed as u64;
        }
        info!(
            due = stats.due,
            delivered = stats.delivered,
            failed = stats.failed,
            skipped = stats.skipped,
            duration_ms = stats.duration_ms(),
            "cycle finished"
        );
        Ok(Some(stats))
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleStats> {
        let started_at = Utc::now();
        let cutoff = now + Duration::seconds(self.config.grace_secs);
        let due = self.store.due_reminders(cutoff)?;

        let mut stats = CycleStats {
            started_at,
            finished_at: started_at,
            due: due.len(),
            delivered: 0,
            failed: 0,
            skipped: 0,
        };

        for batch in due.chunks(self.config.batch_size.max(1)) {
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
            let attempts = batch.iter().map(|reminder| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await;
                    self.process_reminder(reminder.clone(), now).await
                }
            });
            for outcome in join_all(attempts).await {
                match outcome {
                    Ok(Attempt::Delivered) => stats.delivered += 1,
                    Ok(Attempt::Failed) => stats.failed += 1,
                    Ok(Attempt::Skipped) => stats.skipped += 1,
                    // Storage failures are isolated per reminder; the rest
                    // of the batch proceeds.
                    Err(e) => {
                        stats.failed += 1;
                        warn!(error = %e, "reminder attempt aborted");
                    }
                }
            }
        }

        stats.finished_at = Utc::now();
        Ok(stats)
    }

    async fn process_reminder(&self, reminder: Reminder, now: DateTime<Utc>) -> Result<Attempt> {
        // At most one open non-escalation delivery per reminder.
        if self.store.open_delivery(&reminder.id)?.is_some() {
            debug!(reminder_id = %reminder.id, "open delivery exists; skipping");
            return Ok(Attempt::Skipped);
        }

        let mut delivery = Delivery::sending(&reminder, now);
        self.store.create_delivery(&delivery)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            delivery.attempt_count = attempt;
            match self.notifier.send(&reminder, &reminder.recipient).await {
                NotifyOutcome::Delivered { .. } => {
                    self.finish_delivered(reminder, delivery, now)?;
                    return Ok(Attempt::Delivered);
                }
                NotifyOutcome::Retryable { error } if attempt <= self.config.max_retries => {
                    debug!(
                        reminder_id = %reminder.id,
                        attempt,
                        error = %error,
                        "transient failure; retrying"
                    );
                    delivery.status = DeliveryStatus::Retrying;
                    self.store.update_delivery(&delivery)?;
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config.retry_delay_ms,
                    ))
                    .await;
                    delivery.status = DeliveryStatus::Sending;
                }
                NotifyOutcome::Retryable { error } => {
                    self.finish_failed(reminder, delivery, &error)?;
                    return Ok(Attempt::Failed);
                }
                NotifyOutcome::Permanent { error } => {
                    self.finish_failed(reminder, delivery, &error)?;
                    return Ok(Attempt::Failed);
                }
            }
        }
    }

    fn finish_delivered(
        &self,
        mut reminder: Reminder,
        mut delivery: Delivery,
        now: DateTime<Utc>,
    ) -> Result<()> {
        delivery.status = DeliveryStatus::Delivered;
        delivery.delivered_at = Some(now);
        self.store.update_delivery(&delivery)?;

        reminder.occurrence_count += 1;
        reminder.last_delivered_at = Some(now);
        reminder.consecutive_failures = 0;
        // A fresh occurrence starts a fresh escalation chain.
        reminder.escalation.anchor_to(&delivery.id);

        let tz = reminder.tz()?;
        match recurrence::next_due(
            &reminder.schedule,
            tz,
            now,
            Some(now),
            reminder.occurrence_count,
        ) {
            Some(next) => reminder.next_due_at = Some(next),
            None => {
                reminder.status = ReminderStatus::Completed;
                reminder.next_due_at = None;
            }
        }
        reminder.updated_at = Utc::now();
        self.store.update_reminder(&reminder)?;

        self.events.emit(InteractionEvent::Delivered {
            reminder_id: reminder.id.clone(),
            delivery_id: delivery.id.clone(),
            recipient: delivery.recipient.clone(),
            attempt_count: delivery.attempt_count,
            at: now,
        });
        if reminder.status == ReminderStatus::Completed {
            self.events.emit(InteractionEvent::Completed {
                reminder_id: reminder.id,
                actor: "scheduler".to_string(),
                at: now,
            });
        }
        Ok(())
    }

    fn finish_failed(
        &self,
        mut reminder: Reminder,
        mut delivery: Delivery,
        error: &str,
    ) -> Result<()> {
        delivery.status = DeliveryStatus::Failed;
        self.store.update_delivery(&delivery)?;

        // next_due_at stays untouched: the reminder remains due and is
        // retried wholesale on the next cycle.
        reminder.consecutive_failures += 1;
        if reminder.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                reminder_id = %reminder.id,
                failures = reminder.consecutive_failures,
                "failure ceiling reached; promoting to failed"
            );
            reminder.status = ReminderStatus::Failed;
            reminder.next_due_at = None;
        }
        reminder.updated_at = Utc::now();
        self.store.update_reminder(&reminder)?;

        warn!(
            reminder_id = %reminder.id,
            attempts = delivery.attempt_count,
            error = %error,
            "delivery failed"
        );
        Ok(())
    }

    /// Produce the health snapshot for the external health surface.
    pub fn health(&self, now: DateTime<Utc>) -> Result<HealthReport> {
        let overdue = self.store.due_reminders(now)?.len();
        let due = self
            .store
            .due_reminders(now + Duration::seconds(self.config.grace_secs))?
            .len();

        let (last_cycle_at, cycles, delivered, failed) = match self.totals.lock() {
            Ok(t) => (t.last_cycle_at, t.cycles, t.delivered, t.failed),
            Err(_) => (None, 0, 0, 0),
        };
        let attempts = delivered + failed;
        let failure_rate = if attempts == 0 {
            0.0
        } else {
            failed as f64 / attempts as f64
        };

        let running = self.is_running();
        let status = health::classify(running, last_cycle_at, failure_rate, now, &self.health_config);
        Ok(HealthReport {
            status,
            running,
            last_cycle_at,
            cycles,
            delivered_total: delivered,
            failed_total: failed,
            due,
            overdue,
            failure_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::model::{EscalationPolicy, ScheduleSpec, ScheduleType};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Notifier that replays a scripted outcome sequence, then delivers.
    struct ScriptedNotifier {
        outcomes: Mutex<VecDeque<NotifyOutcome>>,
        delay_ms: u64,
    }

    impl ScriptedNotifier {
        fn new(outcomes: Vec<NotifyOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                delay_ms: 0,
            }
        }

        fn delivering() -> Self {
            Self::new(Vec::new())
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                outcomes: Mutex::new(VecDeque::new()),
                delay_ms,
            }
        }
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send(&self, _reminder: &Reminder, _recipient: &str) -> NotifyOutcome {
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(NotifyOutcome::Delivered { message_ref: None })
        }

        async fn send_escalation(
            &self,
            _reminder: &Reminder,
            _original: &Delivery,
            _level: u32,
            targets: &[String],
        ) -> Vec<(String, NotifyOutcome)> {
            targets
                .iter()
                .map(|t| (t.clone(), NotifyOutcome::Delivered { message_ref: None }))
                .collect()
        }
    }

    fn make_reminder(id: &str, due: DateTime<Utc>) -> Reminder {
        let now = Utc::now();
        Reminder {
            id: id.to_string(),
            owner: "owner-1".to_string(),
            recipient: "user-1".to_string(),
            title: format!("Reminder {id}"),
            body: String::new(),
            schedule: ScheduleSpec::daily("09:00"),
            timezone: "UTC".to_string(),
            status: ReminderStatus::Active,
            escalation: EscalationPolicy::default(),
            next_due_at: Some(due),
            last_delivered_at: None,
            occurrence_count: 0,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn scheduler_with(
        store: Arc<MemoryStore>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> DeliveryScheduler {
        DeliveryScheduler::new(
            store,
            notifier,
            Arc::new(MemoryEventSink::new()),
            config,
            HealthConfig::default(),
        )
    }

    #[tokio::test]
    async fn delivers_due_reminder_and_advances_recurrence() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();

        let scheduler = scheduler_with(
            Arc::clone(&store),
            Arc::new(ScriptedNotifier::delivering()),
            fast_config(),
        );
        let stats = scheduler.run_cycle(now).await.unwrap().unwrap();
        assert_eq!(stats.delivered, 1);

        let reminder = store.get_reminder("r1").unwrap().unwrap();
        assert_eq!(reminder.occurrence_count, 1);
        assert_eq!(reminder.status, ReminderStatus::Active);
        assert!(reminder.next_due_at.unwrap() > now);
        assert_eq!(reminder.last_delivered_at, Some(now));

        let deliveries = store.deliveries_for_reminder("r1").unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);
        // The chain is anchored to the new delivery.
        assert_eq!(
            reminder.escalation.anchor_delivery_id.as_deref(),
            Some(deliveries[0].id.as_str())
        );
    }

    #[tokio::test]
    async fn exhausted_recurrence_completes_reminder() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut reminder = make_reminder("r1", now);
        reminder.schedule = ScheduleSpec {
            schedule_type: ScheduleType::Daily,
            max_occurrences: Some(1),
            ..ScheduleSpec::daily("09:00")
        };
        store.create_reminder(&reminder).unwrap();

        let scheduler = scheduler_with(
            Arc::clone(&store),
            Arc::new(ScriptedNotifier::delivering()),
            fast_config(),
        );
        scheduler.run_cycle(now).await.unwrap().unwrap();

        let reminder = store.get_reminder("r1").unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Completed);
        assert!(reminder.next_due_at.is_none());
    }

    #[tokio::test]
    async fn transient_failure_retries_within_cycle() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();

        let notifier = Arc::new(ScriptedNotifier::new(vec![NotifyOutcome::Retryable {
            error: "429".to_string(),
        }]));
        let scheduler = scheduler_with(Arc::clone(&store), notifier, fast_config());
        let stats = scheduler.run_cycle(now).await.unwrap().unwrap();
        assert_eq!(stats.delivered, 1);

        let deliveries = store.deliveries_for_reminder("r1").unwrap();
        assert_eq!(deliveries[0].attempt_count, 2);
    }

    #[tokio::test]
    async fn retry_exhaustion_leaves_reminder_due() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();

        let notifier = Arc::new(ScriptedNotifier::new(vec![
            NotifyOutcome::Retryable {
                error: "timeout".to_string(),
            };
            5
        ]));
        let config = SchedulerConfig {
            max_retries: 1,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let scheduler = scheduler_with(Arc::clone(&store), notifier, config);
        let stats = scheduler.run_cycle(now).await.unwrap().unwrap();
        assert_eq!(stats.failed, 1);

        let reminder = store.get_reminder("r1").unwrap().unwrap();
        // Still due: next cycle retries wholesale.
        assert_eq!(reminder.next_due_at, Some(now));
        assert_eq!(reminder.status, ReminderStatus::Active);
        assert_eq!(reminder.consecutive_failures, 1);

        let deliveries = store.deliveries_for_reminder("r1").unwrap();
        assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
        assert_eq!(deliveries[0].attempt_count, 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();

        let notifier = Arc::new(ScriptedNotifier::new(vec![NotifyOutcome::Permanent {
            error: "unknown recipient".to_string(),
        }]));
        let scheduler = scheduler_with(Arc::clone(&store), notifier, fast_config());
        scheduler.run_cycle(now).await.unwrap().unwrap();

        let deliveries = store.deliveries_for_reminder("r1").unwrap();
        assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
        assert_eq!(deliveries[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn repeated_failures_promote_to_terminal_failed() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();

        let notifier = Arc::new(ScriptedNotifier::new(vec![
            NotifyOutcome::Permanent {
                error: "rejected".to_string(),
            };
            10
        ]));
        let config = SchedulerConfig {
            max_retries: 0,
            retry_delay_ms: 1,
            max_consecutive_failures: 2,
            ..Default::default()
        };
        let scheduler = scheduler_with(Arc::clone(&store), notifier, config);

        scheduler.run_cycle(now).await.unwrap().unwrap();
        assert_eq!(
            store.get_reminder("r1").unwrap().unwrap().status,
            ReminderStatus::Active
        );
        scheduler.run_cycle(now).await.unwrap().unwrap();

        let reminder = store.get_reminder("r1").unwrap().unwrap();
        assert_eq!(reminder.status, ReminderStatus::Failed);
        assert!(reminder.next_due_at.is_none());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();

        let scheduler = scheduler_with(
            Arc::clone(&store),
            Arc::new(ScriptedNotifier::slow(100)),
            fast_config(),
        );
        let (a, b) = futures_util::join!(scheduler.run_cycle(now), scheduler.run_cycle(now));
        let completed = [a.unwrap(), b.unwrap()];
        assert_eq!(completed.iter().filter(|s| s.is_some()).count(), 1);

        // Exactly one delivery despite two triggers.
        assert_eq!(store.deliveries_for_reminder("r1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_delivery_blocks_second_claim() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let reminder = make_reminder("r1", now);
        store.create_reminder(&reminder).unwrap();
        store
            .create_delivery(&Delivery::sending(&reminder, now))
            .unwrap();

        let scheduler = scheduler_with(
            Arc::clone(&store),
            Arc::new(ScriptedNotifier::delivering()),
            fast_config(),
        );
        let stats = scheduler.run_cycle(now).await.unwrap().unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.deliveries_for_reminder("r1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stopped_scheduler_drops_triggers() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(
            Arc::clone(&store),
            Arc::new(ScriptedNotifier::delivering()),
            fast_config(),
        );
        scheduler.stop();
        assert!(scheduler.run_cycle(Utc::now()).await.unwrap().is_none());
        scheduler.start();
        assert!(scheduler.run_cycle(Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn health_reflects_counters_and_due_backlog() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.create_reminder(&make_reminder("r1", now)).unwrap();
        store
            .create_reminder(&make_reminder("r2", now + Duration::hours(2)))
            .unwrap();

        let scheduler = scheduler_with(
            Arc::clone(&store),
            Arc::new(ScriptedNotifier::delivering()),
            fast_config(),
        );
        let report = scheduler.health(now).unwrap();
        assert_eq!(report.overdue, 1);
        assert_eq!(report.status, HealthStatus::Degraded); // never cycled

        scheduler.run_cycle(now).await.unwrap().unwrap();
        let report = scheduler.health(now).unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.delivered_total, 1);
        assert_eq!(report.overdue, 0);
    }
}
