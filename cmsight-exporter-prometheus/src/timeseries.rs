//! Cloudera Manager timeseries response model and normalizer.
//!
//! The upstream answers a query with
//! `{items: [{timeSeries: [{metadata: {...}, data: [{timestamp, value}, ...]}]}]}`.
//! [`normalize`] flattens that into one [`SeriesRecord`] per series that has
//! at least one data point.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

/// Top-level body of a `/timeseries` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSeriesResponse {
    pub items: Vec<TimeSeriesItem>,
}

/// Result of one query statement.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesItem {
    #[serde(default)]
    pub time_series: Vec<TimeSeries>,
    /// Non-fatal warnings reported by the upstream for this statement.
    #[serde(default)]
    pub warnings: Vec<Value>,
}

/// A single timeseries with its identifying metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub metadata: TimeSeriesMetadata,
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesMetadata {
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl TimeSeriesMetadata {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Cluster the series belongs to, empty when unknown.
    pub fn cluster_name(&self) -> &str {
        self.attribute("clusterDisplayName")
            .or_else(|| self.attribute("clusterName"))
            .unwrap_or_default()
    }

    /// Entity the series describes, empty for aggregate series.
    pub fn entity_name(&self) -> &str {
        self.attribute("entityName")
            .or_else(|| self.entity_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPoint {
    #[serde(default)]
    pub timestamp: Option<String>,
    /// `None` when the upstream sent `null` or a non-numeric value.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
}

/// Accept numbers and numeric strings; anything else becomes `None` so a
/// single bad point does not fail the whole response.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// A normalized series: identity plus the selected current value.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRecord {
    /// Cluster identity, empty when the metadata does not carry one.
    pub cluster_name: String,
    /// Entity identity, empty for aggregate series.
    pub entity_name: String,
    /// Upstream metric name, empty when absent.
    pub metric_name: String,
    /// Value of the last data point.
    pub value: f64,
}

impl TimeSeries {
    /// The current value of this series.
    ///
    /// Data points arrive sorted by time, so the last one in the list is
    /// the most recent. Selection is positional and does not look at the
    /// timestamps. A last point without a usable value yields `None`.
    pub fn current_value(&self) -> Option<f64> {
        self.data.last().and_then(|point| point.value)
    }
}

/// Flatten a response into records, one per non-empty series.
///
/// Series without data points, or whose last point has no usable value,
/// are skipped. No aggregation across series happens here.
pub fn normalize(response: &TimeSeriesResponse) -> impl Iterator<Item = SeriesRecord> + '_ {
    response
        .items
        .iter()
        .flat_map(|item| item.time_series.iter())
        .filter_map(|series| {
            let Some(value) = series.current_value() else {
                if !series.data.is_empty() {
                    debug!(
                        metric = series.metadata.metric_name.as_deref().unwrap_or_default(),
                        entity = series.metadata.entity_name(),
                        "Skipping series without a usable current value"
                    );
                }
                return None;
            };
            Some(SeriesRecord {
                cluster_name: series.metadata.cluster_name().to_string(),
                entity_name: series.metadata.entity_name().to_string(),
                metric_name: series.metadata.metric_name.clone().unwrap_or_default(),
                value,
            })
        })
}
