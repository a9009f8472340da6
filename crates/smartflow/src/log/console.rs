//! Console logging backend.

use super::MetricLogger;
use std::collections::HashMap;

/// Logger that prints metrics via tracing.
pub struct ConsoleLogger {
    prefix: String,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    /// Prepend `prefix` to every line, e.g. the run mode.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// One line with the metrics sorted by name.
    pub fn format_metrics(&self, metrics: &HashMap<String, f64>, step: u64) -> String {
        let mut names: Vec<_> = metrics.keys().collect();
        names.sort();
        let fields: Vec<String> = names
            .iter()
            .map(|name| format!("{}={:.4}", name, metrics[*name]))
            .collect();
        format!("{}Step {}: {}", self.prefix, step, fields.join(", "))
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("{}Step {}: {} = {:.4}", self.prefix, step, name, value);
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        // Group output to avoid spamming lines
        tracing::info!("{}", self.format_metrics(metrics, step));
    }
}
