//! Metric samples produced by one scrape cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::registry::MetricDescriptor;

/// One labeled value of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub descriptor: Arc<MetricDescriptor>,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(descriptor: Arc<MetricDescriptor>, labels: BTreeMap<String, String>, value: f64) -> Self {
        Self {
            descriptor,
            labels,
            value,
        }
    }

    /// Sample without labels.
    pub fn unlabeled(descriptor: Arc<MetricDescriptor>, value: f64) -> Self {
        Self::new(descriptor, BTreeMap::new(), value)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
