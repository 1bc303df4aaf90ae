use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Task bodies that ran to completion, successfully or not.
    pub tasks_executed: u64,
    /// Task bodies that returned a genuine failure or panicked.
    pub tasks_failed: u64,
    /// Tasks that were cancelled or observed cancellation.
    pub tasks_cancelled: u64,
    /// Jobs handed to the scheduler.
    pub jobs_scheduled: u64,
    /// Rolling average task duration.
    pub avg_task_duration: Duration,
    /// Last time a task body finished.
    pub last_run: Option<DateTime<Utc>>,
    /// Tasks waiting in the priority queue when the snapshot was taken.
    pub tasks_pending: usize,
    /// Dedicated worker threads.
    pub worker_threads: usize,
}

impl SchedulerMetrics {
    /// Record a task execution.
    pub fn record_execution(&mut self, duration: Duration) {
        self.tasks_executed += 1;
        self.last_run = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.tasks_executed;
        self.avg_task_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_task_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    pub fn record_cancellation(&mut self) {
        self.tasks_cancelled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(Duration::from_millis(100));

        assert_eq!(m.tasks_executed, 1);
        assert!(m.last_run.is_some());
        assert_eq!(m.avg_task_duration, Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution(Duration::from_millis(100));
        m.record_execution(Duration::from_millis(200));

        assert_eq!(m.tasks_executed, 2);
        // Average of 100ms and 200ms = 150ms
        let avg = m.avg_task_duration.as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.tasks_executed, 0);
        assert_eq!(m.tasks_pending, 0);
        assert!(m.last_run.is_none());
    }

    #[test]
    fn serializes_for_dashboards() {
        let mut m = SchedulerMetrics::default();
        m.record_failure();
        m.record_cancellation();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["tasks_failed"], 1);
        assert_eq!(json["tasks_cancelled"], 1);
    }
}
