//! Destinations for logged epoch metrics

/// Receives `(key, value)` pairs such as `"ava/val/accuracy_epoch"`
pub trait MetricSink {
    fn log(&mut self, key: &str, value: f64);
}

/// Forwards every metric to the `log` facade at info level
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn log(&mut self, key: &str, value: f64) {
        log::info!("{} = {:.6}", key, value);
    }
}

/// Keeps every logged pair in order
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<(String, f64)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value logged under `key`
    pub fn last(&self, key: &str) -> Option<f64> {
        self.records
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    /// Every value logged under `key`, oldest first
    pub fn values(&self, key: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.records.iter().map(|(k, _)| k.as_str()).collect()
    }
}

impl MetricSink for MemorySink {
    fn log(&mut self, key: &str, value: f64) {
        self.records.push((key.to_string(), value));
    }
}
