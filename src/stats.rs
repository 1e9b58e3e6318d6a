//! Per-phase performance statistics

use crate::job::PhaseTimes;
use serde::Serialize;
use std::time::Duration;

/// Cumulative counters for the engine's workers. Times are seconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PerformanceStats {
    pub classification_jobs_processed: u32,
    pub classification_wait_time: f32,
    pub training_time: f32,
    pub calculating_time: f32,
    pub classifying_time: f32,
    pub tags_classified: u32,
    pub items_classified: u32,

    pub insertion_jobs_processed: u32,
    pub insertion_wait_time: f32,
    pub insertion_time: f32,
}

impl PerformanceStats {
    pub fn record_classification(&mut self, times: PhaseTimes, tags: u32, items: u32) {
        self.classification_jobs_processed += 1;
        self.classification_wait_time += times.waiting.as_secs_f32();
        self.training_time += times.training.as_secs_f32();
        self.calculating_time += times.calculating.as_secs_f32();
        self.classifying_time += times.classifying.as_secs_f32();
        self.tags_classified += tags;
        self.items_classified += items;
    }

    pub fn record_insertion(&mut self, waited: Duration, took: Duration) {
        self.insertion_jobs_processed += 1;
        self.insertion_wait_time += waited.as_secs_f32();
        self.insertion_time += took.as_secs_f32();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_counters_accumulate() {
        let mut stats = PerformanceStats::default();
        let times = PhaseTimes {
            waiting: Duration::from_millis(100),
            training: Duration::from_millis(200),
            calculating: Duration::from_millis(0),
            classifying: Duration::from_millis(300),
        };
        stats.record_classification(times, 1, 13);
        stats.record_classification(times, 2, 7);

        assert_eq!(stats.classification_jobs_processed, 2);
        assert_eq!(stats.tags_classified, 3);
        assert_eq!(stats.items_classified, 20);
        assert!((stats.classifying_time - 0.6).abs() < 1e-6);
    }

    #[test]
    fn insertion_counters_accumulate() {
        let mut stats = PerformanceStats::default();
        stats.record_insertion(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(stats.insertion_jobs_processed, 1);
        assert!(stats.insertion_wait_time > 0.0);
    }
}
