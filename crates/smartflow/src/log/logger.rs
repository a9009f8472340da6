//! Metric logger trait and in-process backends.

use ndarray::ArrayView1;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Scalars describing one finished episode.
#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeSummary {
    pub episode: u64,
    pub length: u64,
    pub global_step: u64,
    pub mean_return: f64,
    pub min_return: f64,
    pub max_return: f64,
}

impl EpisodeSummary {
    /// Summarize the per-agent returns of an episode.
    pub fn from_returns(episode: u64, length: u64, global_step: u64, returns: ArrayView1<f32>) -> Self {
        let n = returns.len().max(1) as f64;
        let (mut sum, mut min, mut max) = (0.0, f64::INFINITY, f64::NEG_INFINITY);
        for &r in returns.iter() {
            let r = f64::from(r);
            sum += r;
            min = min.min(r);
            max = max.max(r);
        }
        if returns.is_empty() {
            (min, max) = (0.0, 0.0);
        }
        Self {
            episode,
            length,
            global_step,
            mean_return: sum / n,
            min_return: min,
            max_return: max,
        }
    }

    pub fn to_metrics(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("episode/length".to_string(), self.length as f64),
            ("episode/mean_return".to_string(), self.mean_return),
            ("episode/min_return".to_string(), self.min_return),
            ("episode/max_return".to_string(), self.max_return),
        ])
    }
}

/// Trait for logging metrics to various backends.
pub trait MetricLogger: Send + Sync {
    /// Log a scalar value (e.g. mean reward).
    fn log_scalar(&self, name: &str, value: f64, step: u64);

    /// Log a set of metrics collected in a map.
    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64);

    /// Log the summary of a finished episode at its global step.
    fn log_episode(&self, summary: &EpisodeSummary) {
        self.log_metrics(&summary.to_metrics(), summary.global_step);
    }

    /// Close the logger and flush any pending writes.
    fn close(&self) {}
}

/// A logger that does nothing (default).
pub struct NoOpLogger;

impl MetricLogger for NoOpLogger {
    fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {}
    fn log_metrics(&self, _metrics: &HashMap<String, f64>, _step: u64) {}
}

/// Keeps every logged value as `(name, value, step)`.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(String, f64, u64)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, f64, u64)> {
        self.records.lock().clone()
    }

    /// Values logged under `name`, in logging order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricLogger for MemoryLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        self.records.lock().push((name.to_string(), value, step));
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        let mut records = self.records.lock();
        let mut names: Vec<_> = metrics.keys().collect();
        names.sort();
        for name in names {
            records.push((name.clone(), metrics[name], step));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_summary_from_returns() {
        let summary = EpisodeSummary::from_returns(2, 10, 30, array![-1.0, 0.0, 4.0].view());
        assert_relative_eq!(summary.mean_return, 1.0);
        assert_relative_eq!(summary.min_return, -1.0);
        assert_relative_eq!(summary.max_return, 4.0);

        let empty = EpisodeSummary::from_returns(0, 0, 0, ndarray::Array1::<f32>::zeros(0).view());
        assert_eq!(empty.mean_return, 0.0);
        assert_eq!(empty.min_return, 0.0);
    }

    #[test]
    fn test_memory_logger_episode() {
        let logger = MemoryLogger::new();
        let summary = EpisodeSummary::from_returns(0, 5, 5, array![2.0, 2.0].view());
        logger.log_episode(&summary);
        logger.log_scalar("custom", 1.5, 6);

        assert_eq!(logger.values("episode/length"), vec![5.0]);
        assert_eq!(logger.values("episode/mean_return"), vec![2.0]);
        assert_eq!(logger.records().last(), Some(&("custom".to_string(), 1.5, 6)));
    }

    #[test]
    fn test_loggers_behind_trait_objects() {
        let memory = MemoryLogger::new();
        let loggers: Vec<&dyn MetricLogger> = vec![&NoOpLogger, &memory];
        let summary = EpisodeSummary::from_returns(1, 3, 8, array![1.0].view());
        for logger in &loggers {
            logger.log_episode(&summary);
            logger.close();
        }
        assert_eq!(memory.records().len(), 4);
        assert!(memory.records().iter().all(|(_, _, step)| *step == 8));
    }
}
