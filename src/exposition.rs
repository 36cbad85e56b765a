//! Prometheus text exposition of collected samples.
//!
//! Each render builds a throwaway `prometheus::Registry`, so families only
//! ever contain the samples of the current cycle.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::registry::{MetricDescriptor, MetricKind};
use crate::sample::MetricSample;

/// Content type of [`render`] output.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Error type for rendering.
#[derive(Debug)]
pub enum ExpositionError {
    Prometheus(prometheus::Error),
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for ExpositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpositionError::Prometheus(e) => write!(f, "exposition: {}", e),
            ExpositionError::Utf8(e) => write!(f, "exposition: {}", e),
        }
    }
}

impl std::error::Error for ExpositionError {}

impl From<prometheus::Error> for ExpositionError {
    fn from(e: prometheus::Error) -> Self {
        ExpositionError::Prometheus(e)
    }
}

impl From<std::string::FromUtf8Error> for ExpositionError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        ExpositionError::Utf8(e)
    }
}

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

struct RenderedFamily<'a> {
    descriptor: &'a MetricDescriptor,
    family: Family,
}

impl<'a> RenderedFamily<'a> {
    fn register(registry: &Registry, descriptor: &'a MetricDescriptor) -> Result<Self, ExpositionError> {
        let opts = Opts::new(descriptor.name.as_str(), descriptor.help.as_str());
        let labels: Vec<&str> = descriptor.labels.iter().map(String::as_str).collect();
        let family = match descriptor.kind {
            MetricKind::Gauge => {
                let vec = GaugeVec::new(opts, &labels)?;
                registry.register(Box::new(vec.clone()))?;
                Family::Gauge(vec)
            }
            MetricKind::Counter => {
                let vec = CounterVec::new(opts, &labels)?;
                registry.register(Box::new(vec.clone()))?;
                Family::Counter(vec)
            }
        };
        Ok(Self { descriptor, family })
    }

    /// Sets the child for the sample's labels. A later sample with the same
    /// label values overwrites an earlier one.
    fn observe(&self, sample: &MetricSample) -> Result<(), ExpositionError> {
        let values: Vec<&str> = self
            .descriptor
            .labels
            .iter()
            .map(|key| sample.label(key).unwrap_or(""))
            .collect();
        match &self.family {
            Family::Gauge(vec) => vec.get_metric_with_label_values(&values)?.set(sample.value),
            Family::Counter(vec) => {
                if sample.value.is_nan() || sample.value < 0.0 {
                    warn!(metric = %sample.name(), value = sample.value, "skipping invalid counter value");
                    return Ok(());
                }
                let counter = vec.get_metric_with_label_values(&values)?;
                counter.reset();
                counter.inc_by(sample.value);
            }
        }
        Ok(())
    }
}

/// Renders samples in the Prometheus text format, families sorted by name.
pub fn render(samples: &[MetricSample]) -> Result<String, ExpositionError> {
    let registry = Registry::new();
    let mut families: BTreeMap<&str, RenderedFamily<'_>> = BTreeMap::new();

    for sample in samples {
        let family = match families.entry(sample.name()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(RenderedFamily::register(&registry, &sample.descriptor)?),
        };
        family.observe(sample)?;
    }

    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;

    fn pool_status() -> Arc<MetricDescriptor> {
        Arc::new(
            MetricDescriptor::new(
                "proxysql_connection_pool_status",
                MetricKind::Gauge,
                "The status of the backend server.",
            )
            .with_labels(&["hostgroup", "endpoint"]),
        )
    }

    fn pool_labels(hostgroup: &str, endpoint: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("hostgroup".to_string(), hostgroup.to_string()),
            ("endpoint".to_string(), endpoint.to_string()),
        ])
    }

    fn line<'a>(text: &'a str, prefix: &str) -> Vec<&'a str> {
        text.lines().filter(|l| l.starts_with(prefix)).collect()
    }

    #[test]
    fn test_render_gauge_with_labels() {
        let d = pool_status();
        let samples = vec![
            MetricSample::new(d.clone(), pool_labels("0", "10.91.142.80:3306"), 1.0),
            MetricSample::new(d, pool_labels("1", "10.91.142.82:3306"), 2.0),
        ];
        let text = render(&samples).unwrap();

        assert!(text.contains("# HELP proxysql_connection_pool_status The status of the backend server."));
        assert!(text.contains("# TYPE proxysql_connection_pool_status gauge"));
        let lines = line(&text, "proxysql_connection_pool_status{");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.contains("hostgroup=\"0\"")
            && l.contains("endpoint=\"10.91.142.80:3306\"")
            && l.ends_with(" 1")));
        assert!(lines.iter().any(|l| l.contains("hostgroup=\"1\"") && l.ends_with(" 2")));
    }

    #[test]
    fn test_render_counter() {
        let d = Arc::new(MetricDescriptor::new(
            "proxysql_mysql_status_questions",
            MetricKind::Counter,
            "Questions.",
        ));
        let text = render(&[MetricSample::unlabeled(d, 321063484988.0)]).unwrap();
        assert!(text.contains("# TYPE proxysql_mysql_status_questions counter"));
        assert_eq!(
            line(&text, "proxysql_mysql_status_questions"),
            vec!["proxysql_mysql_status_questions 321063484988"]
        );
    }

    #[test]
    fn test_negative_counter_is_skipped() {
        let d = Arc::new(MetricDescriptor::new("x_total", MetricKind::Counter, "x"));
        let text = render(&[MetricSample::unlabeled(d, -1.0)]).unwrap();
        assert!(line(&text, "x_total").is_empty());
    }

    #[test]
    fn test_repeated_labels_collapse() {
        let d = Arc::new(
            MetricDescriptor::new("proxysql_processlist_client_connection_list", MetricKind::Gauge, "x")
                .with_labels(&["client_host"]),
        );
        let labels = BTreeMap::from([("client_host".to_string(), "app1".to_string())]);
        let samples = vec![
            MetricSample::new(d.clone(), labels.clone(), 1.0),
            MetricSample::new(d, labels, 1.0),
        ];
        let text = render(&samples).unwrap();
        assert_eq!(
            line(&text, "proxysql_processlist_client_connection_list{"),
            vec!["proxysql_processlist_client_connection_list{client_host=\"app1\"} 1"]
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render(&[]).unwrap(), "");
    }
}
