//! Metric samples, families and the exposition-format renderer.

use std::collections::HashMap;
use std::io::Write;

use parking_lot::RwLock;
use tracing::warn;

use crate::mapping::{PrometheusType, escape_help, format_labels, format_value, sanitize_label_name};

/// A single sample of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// The full Prometheus metric name.
    pub name: String,
    /// Sorted, de-duplicated label pairs.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl MetricSample {
    /// Build a sample, sanitizing label names.
    ///
    /// Earlier labels win over later ones with the same name, so request
    /// labels should come before configured defaults.
    pub fn new(name: impl Into<String>, labels: Vec<(String, String)>, value: f64) -> Self {
        let mut unique: Vec<(String, String)> = Vec::with_capacity(labels.len());
        for (k, v) in labels {
            let key = sanitize_label_name(&k);
            if !unique.iter().any(|(uk, _)| uk == &key) {
                unique.push((key, v));
            }
        }

        // Sort for stable output
        unique.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            name: name.into(),
            labels: unique,
            value,
        }
    }

    /// Look up a label value.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Format labels for Prometheus exposition format.
    pub fn format_labels(&self) -> String {
        format_labels(&self.labels)
    }
}

/// Samples sharing a name, help text and type.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: PrometheusType,
    pub samples: Vec<MetricSample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: PrometheusType) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            samples: Vec::new(),
        }
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, PrometheusType::Gauge)
    }

    /// Append a sample carrying the family's name.
    pub fn push(&mut self, labels: Vec<(String, String)>, value: f64) {
        let sample = MetricSample::new(self.name.clone(), labels, value);
        self.samples.push(sample);
    }

    pub fn with_sample(mut self, labels: Vec<(String, String)>, value: f64) -> Self {
        self.push(labels, value);
        self
    }
}

/// Render families in Prometheus text exposition format.
///
/// Families are written in the given order; empty families are skipped.
pub fn render(families: &[MetricFamily]) -> String {
    let mut output = Vec::with_capacity(families.len() * 200);

    for family in families {
        if family.samples.is_empty() {
            continue;
        }

        writeln!(output, "# HELP {} {}", family.name, escape_help(&family.help)).ok();
        writeln!(output, "# TYPE {} {}", family.name, family.kind.as_str()).ok();

        for sample in &family.samples {
            writeln!(
                output,
                "{}{} {}",
                sample.name,
                sample.format_labels(),
                format_value(sample.value)
            )
            .ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Process-wide counter of failed node queries, keyed by query and target.
///
/// The number of distinct series is capped; increments for new series
/// beyond the cap are dropped and counted separately.
pub struct ScrapeErrors {
    series: RwLock<HashMap<(String, String), u64>>,
    max_series: usize,
    dropped: RwLock<u64>,
}

impl ScrapeErrors {
    pub fn new(max_series: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_series,
            dropped: RwLock::new(0),
        }
    }

    /// Count one failure of `query` for `target`.
    pub fn increment(&self, query: &str, target: &str) {
        let key = (query.to_string(), target.to_string());
        let mut series = self.series.write();

        if let Some(count) = series.get_mut(&key) {
            *count += 1;
            return;
        }

        if series.len() >= self.max_series {
            drop(series);
            *self.dropped.write() += 1;
            warn!(
                max_series = self.max_series,
                query, target, "Max error series reached, dropping new series"
            );
            return;
        }

        series.insert(key, 1);
    }

    /// Current count for a query/target pair.
    pub fn count(&self, query: &str, target: &str) -> u64 {
        self.series
            .read()
            .get(&(query.to_string(), target.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over all series.
    pub fn total(&self) -> u64 {
        self.series.read().values().sum()
    }

    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    pub fn dropped(&self) -> u64 {
        *self.dropped.read()
    }

    /// Snapshot as metric families named after `prefix`.
    pub fn families(&self, prefix: &str) -> Vec<MetricFamily> {
        let mut errors = MetricFamily::new(
            format!("{}_exporter_scrape_errors_total", prefix),
            "Failed node queries by query type and target.",
            PrometheusType::Counter,
        );

        let series = self.series.read();
        let mut keys: Vec<_> = series.keys().collect();
        keys.sort();

        for key in keys {
            errors.push(
                vec![
                    ("query".to_string(), key.0.clone()),
                    ("target".to_string(), key.1.clone()),
                ],
                series[key] as f64,
            );
        }

        let dropped = self.dropped();
        let mut families = vec![errors];
        if dropped > 0 {
            families.push(
                MetricFamily::new(
                    format!("{}_exporter_error_series_dropped_total", prefix),
                    "Scrape errors not recorded because the series limit was reached.",
                    PrometheusType::Counter,
                )
                .with_sample(Vec::new(), dropped as f64),
            );
        }

        families
    }
}
