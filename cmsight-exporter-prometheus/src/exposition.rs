//! Prometheus text exposition format (version 0.0.4).

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use cmsight_common::{MetricDescriptor, Sample};

use crate::mapping::{escape_help, escape_label_value, format_value};

/// Content type of the rendered output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render samples grouped under their descriptors.
///
/// Families are written in descriptor order; descriptors without samples
/// in this scrape are omitted. Samples for names not in `descriptors` are
/// ignored.
pub fn render(descriptors: &[Arc<MetricDescriptor>], samples: &[Sample]) -> String {
    let mut by_name: HashMap<&str, Vec<&Sample>> = HashMap::new();
    for sample in samples {
        by_name.entry(sample.name()).or_default().push(sample);
    }

    let mut output = Vec::with_capacity(samples.len() * 100);

    for descriptor in descriptors {
        let Some(series) = by_name.get(descriptor.name.as_str()) else {
            continue;
        };

        writeln!(
            output,
            "# HELP {} {}",
            descriptor.name,
            escape_help(&descriptor.help)
        )
        .ok();
        writeln!(output, "# TYPE {} gauge", descriptor.name).ok();

        for sample in series {
            writeln!(
                output,
                "{}{} {}",
                descriptor.name,
                format_labels(sample),
                format_value(sample.value)
            )
            .ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Format a sample's labels, in declared order.
fn format_labels(sample: &Sample) -> String {
    if sample.label_values.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = sample
        .labels()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
