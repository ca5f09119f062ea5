//! Per-module execution counters and health derivation

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::config::HealthConfig;
use crate::types::{HealthStatus, ModuleHealth};

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    total: u64,
    successful: u64,
    failed: u64,
    average_latency_ms: f64,
    initialized_at: Option<Instant>,
    last_used: Option<DateTime<Utc>>,
    forced_unhealthy: bool,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            total: 0,
            successful: 0,
            failed: 0,
            average_latency_ms: 0.0,
            initialized_at: None,
            last_used: None,
            forced_unhealthy: false,
        }
    }

    pub fn set_config(&mut self, config: HealthConfig) {
        self.config = config;
    }

    pub fn mark_initialized(&mut self) {
        self.initialized_at = Some(Instant::now());
        self.forced_unhealthy = false;
    }

    pub fn mark_disposed(&mut self) {
        self.initialized_at = None;
        self.forced_unhealthy = true;
    }

    /// Catastrophic initialization failure
    pub fn mark_failed(&mut self) {
        self.initialized_at = None;
        self.forced_unhealthy = true;
    }

    pub fn record(&mut self, latency: Duration, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }

        // Incremental mean: avg += (x - avg) / n
        let sample = latency.as_secs_f64() * 1000.0;
        self.average_latency_ms += (sample - self.average_latency_ms) / self.total as f64;
        self.last_used = Some(Utc::now());
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    pub fn uptime(&self) -> Duration {
        self.initialized_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn status(&self) -> HealthStatus {
        if self.forced_unhealthy || self.initialized_at.is_none() {
            return HealthStatus::Unhealthy;
        }
        if self.total >= self.config.min_samples
            && self.error_rate() > self.config.degraded_error_rate
        {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }

    pub fn snapshot(&self) -> ModuleHealth {
        ModuleHealth {
            status: self.status(),
            last_check: Utc::now(),
            average_response_time_ms: self.average_latency_ms,
            error_rate: self.error_rate(),
            uptime_ms: self.uptime().as_millis() as u64,
            total_executions: self.total,
            successful_executions: self.successful,
            failed_executions: self.failed,
            last_used: self.last_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean() {
        let mut monitor = HealthMonitor::new(HealthConfig::default());
        monitor.mark_initialized();
        monitor.record(Duration::from_millis(10), true);
        monitor.record(Duration::from_millis(20), true);
        monitor.record(Duration::from_millis(30), false);

        let health = monitor.snapshot();
        assert!((health.average_response_time_ms - 20.0).abs() < 1e-6);
        assert_eq!(health.total_executions, 3);
        assert_eq!(health.failed_executions, 1);
        assert!(health.last_used.is_some());
    }

    #[test]
    fn test_status_transitions() {
        let mut monitor = HealthMonitor::new(HealthConfig {
            degraded_error_rate: 0.5,
            min_samples: 4,
        });
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);

        monitor.mark_initialized();
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        for _ in 0..3 {
            monitor.record(Duration::from_millis(1), false);
        }
        // Below the sample floor the error rate is ignored
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        monitor.record(Duration::from_millis(1), false);
        assert_eq!(monitor.status(), HealthStatus::Degraded);

        monitor.mark_disposed();
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);
        assert_eq!(monitor.uptime(), Duration::ZERO);
    }
}
