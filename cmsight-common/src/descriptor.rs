//! Metric descriptors and the registration-time descriptor registry.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Static schema for one exposed metric family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricDescriptor {
    /// Fully-qualified metric name, unique across all modules.
    pub name: String,
    /// Help text.
    pub help: String,
    /// Label names, in the order label values are supplied at emission.
    pub label_names: Vec<String>,
}

impl MetricDescriptor {
    /// Create a descriptor.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names: label_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of label values a sample of this metric must carry.
    pub fn label_count(&self) -> usize {
        self.label_names.len()
    }
}

/// Registration-time builder for the process-wide descriptor set.
///
/// Every descriptor is registered exactly once while modules are being
/// built; a second registration under the same name is rejected. After
/// startup the registry is only read.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: Vec<Arc<MetricDescriptor>>,
    names: HashSet<String>,
}

impl DescriptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new descriptor and return a shared handle to it.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Arc<MetricDescriptor>> {
        let descriptor = MetricDescriptor::new(name, help, label_names);

        if !self.names.insert(descriptor.name.clone()) {
            return Err(Error::DuplicateDescriptor(descriptor.name));
        }

        let descriptor = Arc::new(descriptor);
        self.descriptors.push(descriptor.clone());
        Ok(descriptor)
    }

    /// Whether a descriptor with this name has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Look up a descriptor by fully-qualified name.
    pub fn get(&self, name: &str) -> Option<&Arc<MetricDescriptor>> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// All registered descriptors, in registration order.
    pub fn descriptors(&self) -> &[Arc<MetricDescriptor>] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Build a fully-qualified metric name from namespace, subsystem and name.
///
/// Empty components are skipped, the rest are joined with `_`.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}
