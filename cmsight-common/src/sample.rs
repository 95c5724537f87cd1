use std::sync::Arc;

use crate::descriptor::MetricDescriptor;
use crate::error::{Error, Result};

/// One gauge observation conforming to a [`MetricDescriptor`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Descriptor this sample belongs to.
    pub descriptor: Arc<MetricDescriptor>,
    /// Label values, in the descriptor's label order.
    pub label_values: Vec<String>,
    /// Observed value.
    pub value: f64,
}

impl Sample {
    /// Create a sample, checking the label count against the descriptor.
    pub fn new(
        descriptor: Arc<MetricDescriptor>,
        label_values: Vec<String>,
        value: f64,
    ) -> Result<Self> {
        if label_values.len() != descriptor.label_count() {
            return Err(Error::LabelCardinality {
                metric: descriptor.name.clone(),
                expected: descriptor.label_count(),
                actual: label_values.len(),
            });
        }

        Ok(Self {
            descriptor,
            label_values,
            value,
        })
    }

    /// Metric name of this sample.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Label name/value pairs in declared order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.descriptor
            .label_names
            .iter()
            .map(String::as_str)
            .zip(self.label_values.iter().map(String::as_str))
    }
}
