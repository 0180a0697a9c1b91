//! Health classification for the delivery scheduler.
//!
//! Produced for an external health collaborator; failed deliveries are not
//! visible to reminder owners in real time and surface only here and in the
//! audit stream.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot of the scheduler's operational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub running: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub delivered_total: u64,
    pub failed_total: u64,
    /// Reminders due within the grace window.
    pub due: usize,
    /// Reminders whose due instant is already past.
    pub overdue: usize,
    pub failure_rate: f64,
}

/// Classify scheduler health.
///
/// Healthy: running, recent cycle, failure rate under the soft threshold.
/// Degraded: stale cycle or soft threshold crossed.
/// Unhealthy: stopped, severely stale (twice the allowed cycle age), or
/// failure rate over the hard threshold.
pub fn classify(
    running: bool,
    last_cycle_at: Option<DateTime<Utc>>,
    failure_rate: f64,
    now: DateTime<Utc>,
    config: &HealthConfig,
) -> HealthStatus {
    if !running {
        return HealthStatus::Unhealthy;
    }
    let max_age = Duration::seconds(config.max_cycle_age_secs);
    let age = last_cycle_at.map(|t| now - t);
    let severely_stale = age.map_or(false, |a| a > max_age * 2);
    if severely_stale || failure_rate >= config.unhealthy_failure_rate {
        return HealthStatus::Unhealthy;
    }
    let stale = age.map_or(true, |a| a > max_age);
    if stale || failure_rate >= config.degraded_failure_rate {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig::default()
    }

    #[test]
    fn recent_cycle_and_low_failures_is_healthy() {
        let now = Utc::now();
        let status = classify(true, Some(now - Duration::seconds(30)), 0.0, now, &config());
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn stopped_is_unhealthy() {
        let now = Utc::now();
        let status = classify(false, Some(now), 0.0, now, &config());
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn stale_cycle_is_degraded() {
        let now = Utc::now();
        let last = now - Duration::seconds(config().max_cycle_age_secs + 10);
        assert_eq!(classify(true, Some(last), 0.0, now, &config()), HealthStatus::Degraded);
    }

    #[test]
    fn severely_stale_cycle_is_unhealthy() {
        let now = Utc::now();
        let last = now - Duration::seconds(config().max_cycle_age_secs * 2 + 10);
        assert_eq!(
            classify(true, Some(last), 0.0, now, &config()),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn never_ran_is_degraded_not_unhealthy() {
        let now = Utc::now();
        assert_eq!(classify(true, None, 0.0, now, &config()), HealthStatus::Degraded);
    }

    #[test]
    fn failure_rate_thresholds() {
        let now = Utc::now();
        let recent = Some(now - Duration::seconds(5));
        assert_eq!(
            classify(true, recent, 0.3, now, &config()),
            HealthStatus::Degraded
        );
        assert_eq!(
            classify(true, recent, 0.6, now, &config()),
            HealthStatus::Unhealthy
        );
    }
}
