//! Module catalog: binding tables as data.
//!
//! A [`ModuleSpec`] describes a scraper module declaratively. Specs come
//! from the built-in catalog ([`builtin_modules`]) or from the `modules`
//! section of the configuration file, and are turned into
//! [`ScraperModule`]s once at startup.

use serde::{Deserialize, Serialize};

use cmsight_common::{DescriptorRegistry, Error, Result};

use crate::mapping::{build_metric_name, default_help};
use crate::scraper::{BindingKind, QueryBinding, ScraperModule};

/// One query-to-metric pairing of a module spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    /// Query expression in the upstream query language.
    pub query: String,
    /// Metric name within the module (without namespace and module prefix).
    pub metric: String,
    /// Help text; derived from the metric name when empty.
    #[serde(default)]
    pub help: String,
    /// Per-entity or aggregate emission.
    #[serde(default)]
    pub kind: BindingKind,
}

/// Declarative description of a scraper module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Unique module name, used as the metric subsystem.
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default = "default_version")]
    pub version: f64,
    pub bindings: Vec<BindingSpec>,
}

fn default_version() -> f64 {
    1.0
}

impl ModuleSpec {
    /// Register this module's descriptors and build the scraper.
    ///
    /// Bindings whose fully-qualified metric name is rejected by `keep`
    /// are left out. Fails if any descriptor name is already registered.
    pub fn build(
        &self,
        namespace: &str,
        registry: &mut DescriptorRegistry,
        keep: impl Fn(&str) -> bool,
    ) -> Result<ScraperModule> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Module name must not be empty".into()));
        }

        let mut bindings = Vec::with_capacity(self.bindings.len());
        for spec in &self.bindings {
            let name = build_metric_name(namespace, &self.name, &spec.metric);
            if !keep(&name) {
                continue;
            }

            let help = if spec.help.is_empty() {
                default_help(&spec.metric)
            } else {
                spec.help.clone()
            };

            let descriptor = registry.register(name, help, spec.kind.label_names().iter().copied())?;
            bindings.push(QueryBinding {
                query: spec.query.clone(),
                kind: spec.kind,
                descriptor,
            });
        }

        Ok(ScraperModule::new(
            self.name.clone(),
            self.help.clone(),
            self.version,
            bindings,
        ))
    }
}

/// Modules shipped with the exporter.
pub fn builtin_modules() -> Vec<ModuleSpec> {
    vec![zookeeper()]
}

const ZOOKEEPER_SERVICE_FILTER: &str = r#"WHERE category="SERVICE" AND serviceName="ZOOKEEPER""#;

/// (upstream metric, exposed metric, help) for per-entity ZooKeeper metrics.
const ZOOKEEPER_METRICS: &[(&str, &str, &str)] = &[
    (
        "alerts_rate",
        "alerts_rate",
        "Number of ZooKeeper alerts (events per second)",
    ),
    (
        "canary_duration",
        "canary_duration_ms",
        "Duration of the last or currently running canary job (ms)",
    ),
    (
        "current_epoch_rate",
        "current_epoch_rate",
        "The current epoch (epoch per second)",
    ),
    ("current_xid", "current_xid", "The current ZooKeeper XID"),
    (
        "events_critical_rate",
        "events_critical_rate",
        "The number of critical events (events per second)",
    ),
    (
        "events_important_rate",
        "events_important_rate",
        "The number of important events (events per second)",
    ),
    (
        "events_informational_rate",
        "events_informational_rate",
        "The number of informational events (events per second)",
    ),
    (
        "health_bad_rate",
        "health_bad_rate",
        "Percentage of Time with Bad Health (s/s)",
    ),
    (
        "health_concerning_rate",
        "health_concerning_rate",
        "Percentage of Time with Concerning Health (s/s)",
    ),
    (
        "health_disabled_rate",
        "health_disabled_rate",
        "Percentage of Time with Disabled Health (s/s)",
    ),
    (
        "health_good_rate",
        "health_good_rate",
        "Percentage of Time with Good Health (s/s)",
    ),
    (
        "health_unknown_rate",
        "health_unknown_rate",
        "Percentage of Time with Unknown Health (s/s)",
    ),
];

/// The ZooKeeper service module.
pub fn zookeeper() -> ModuleSpec {
    let mut bindings: Vec<BindingSpec> = ZOOKEEPER_METRICS
        .iter()
        .map(|(upstream, metric, help)| BindingSpec {
            query: format!("SELECT LAST({}) {}", upstream, ZOOKEEPER_SERVICE_FILTER),
            metric: metric.to_string(),
            help: help.to_string(),
            kind: BindingKind::PerEntity,
        })
        .collect();

    bindings.push(BindingSpec {
        query: "SELECT LAST(alerts_rate_across_clusters)".to_string(),
        metric: "alerts_rate_across_servers".to_string(),
        help: "Alerts rate aggregated across all clusters".to_string(),
        kind: BindingKind::Aggregate,
    });
    bindings.push(BindingSpec {
        query: "SELECT LAST(total_alerts_rate_across_clusters)".to_string(),
        metric: "total_alerts_rate_across_servers".to_string(),
        help: "Total alerts rate aggregated across all clusters".to_string(),
        kind: BindingKind::Aggregate,
    });

    ModuleSpec {
        name: "zookeeper".to_string(),
        help: "Collects ZooKeeper metrics from Cloudera Manager".to_string(),
        version: 1.0,
        bindings,
    }
}
