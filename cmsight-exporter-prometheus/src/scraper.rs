//! Scraper contract and the generic binding-table scraper.
//!
//! Every monitored service is a [`ScraperModule`]: an ordered table of
//! [`QueryBinding`]s run through the same fetch, normalize and emit steps.
//! A failed query is counted and skipped; it never aborts the module.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use cmsight_common::{MetricDescriptor, Sample};

use crate::client::{FetchError, TimeSeriesQuery, TimeSeriesSource};
use crate::timeseries::{SeriesRecord, TimeSeriesResponse, normalize};

/// Label schema of per-entity metrics.
pub const PER_ENTITY_LABELS: [&str; 2] = ["cluster", "entityName"];

/// Output stream shared by all modules of one scrape.
pub type SampleSender = mpsc::Sender<Sample>;

/// How the records of one query become samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// One sample per series, labelled with cluster and entity.
    #[default]
    PerEntity,
    /// One unlabelled sample holding the sum over all series.
    Aggregate,
}

impl BindingKind {
    /// Label names a descriptor of this kind declares.
    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            BindingKind::PerEntity => &PER_ENTITY_LABELS,
            BindingKind::Aggregate => &[],
        }
    }
}

/// One query expression paired with the descriptor it populates.
#[derive(Debug, Clone)]
pub struct QueryBinding {
    pub query: String,
    pub kind: BindingKind,
    pub descriptor: Arc<MetricDescriptor>,
}

/// Per-scrape inputs shared by every module.
#[derive(Debug, Clone, Default)]
pub struct ScrapeContext {
    /// Fires when the scrape deadline passes or the caller gives up.
    pub cancel: CancellationToken,
    /// Cluster scope appended to every query, if any.
    pub scope: Option<String>,
}

impl ScrapeContext {
    pub fn new(cancel: CancellationToken, scope: Option<String>) -> Self {
        Self { cancel, scope }
    }
}

/// Success/error tally of one module invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeOutcome {
    /// Queries that were answered.
    pub success: usize,
    /// Queries that failed.
    pub errors: usize,
    /// Whether the scrape stopped early on cancellation.
    pub cancelled: bool,
}

impl ScrapeOutcome {
    pub fn total(&self) -> usize {
        self.success + self.errors
    }
}

/// Errors that invalidate a whole module scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Module {module} cannot scrape: {reason}")]
    Fatal { module: String, reason: String },
}

/// Contract every scraper module implements.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Unique module name.
    fn name(&self) -> &str;

    /// What the module collects.
    fn help(&self) -> &str;

    /// Module version.
    fn version(&self) -> f64;

    /// Every descriptor this module can ever emit. Stable across calls.
    fn describe(&self) -> &[Arc<MetricDescriptor>];

    /// Run all queries and write samples to `out`.
    ///
    /// Per-query failures are counted in the returned outcome; only
    /// conditions that make every query impossible return an error.
    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        source: &dyn TimeSeriesSource,
        out: &SampleSender,
    ) -> Result<ScrapeOutcome, ScrapeError>;
}

/// Scraper driven entirely by a binding table.
#[derive(Debug)]
pub struct ScraperModule {
    name: String,
    help: String,
    version: f64,
    bindings: Vec<QueryBinding>,
    descriptors: Vec<Arc<MetricDescriptor>>,
}

enum Emit {
    Sent,
    Stopped,
}

impl ScraperModule {
    /// Create a module from an already-registered binding table.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        version: f64,
        bindings: Vec<QueryBinding>,
    ) -> Self {
        let descriptors = bindings.iter().map(|b| b.descriptor.clone()).collect();
        Self {
            name: name.into(),
            help: help.into(),
            version,
            bindings,
            descriptors,
        }
    }

    /// The binding table, in execution order.
    pub fn bindings(&self) -> &[QueryBinding] {
        &self.bindings
    }

    /// Turn one response into samples according to the binding kind.
    fn samples_for(
        &self,
        binding: &QueryBinding,
        scope: Option<&str>,
        response: &TimeSeriesResponse,
    ) -> cmsight_common::Result<Vec<Sample>> {
        let records = normalize(response);

        match binding.kind {
            BindingKind::PerEntity => {
                // One sample per label set; a later series replaces an earlier
                // one with the same labels.
                let mut samples: Vec<Sample> = Vec::new();
                let mut seen: HashMap<Vec<String>, usize> = HashMap::new();

                for record in records {
                    let labels = entity_labels(record_cluster(&record, scope), &record);
                    let sample =
                        Sample::new(binding.descriptor.clone(), labels.clone(), record.value)?;

                    match seen.entry(labels) {
                        Entry::Occupied(slot) => {
                            warn!(
                                module = %self.name,
                                metric = %binding.descriptor.name,
                                upstream_metric = %record.metric_name,
                                labels = ?slot.key(),
                                "Duplicate series for label set, keeping the last one"
                            );
                            samples[*slot.get()] = sample;
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(samples.len());
                            samples.push(sample);
                        }
                    }
                }

                Ok(samples)
            }
            BindingKind::Aggregate => {
                let mut records = records.peekable();
                if records.peek().is_none() {
                    return Ok(Vec::new());
                }
                let total: f64 = records.map(|r| r.value).sum();
                Ok(vec![Sample::new(
                    binding.descriptor.clone(),
                    Vec::new(),
                    total,
                )?])
            }
        }
    }

    /// Write one sample, giving up if the scrape is cancelled while the
    /// consumer is not keeping up.
    async fn emit(&self, ctx: &ScrapeContext, out: &SampleSender, sample: Sample) -> Emit {
        tokio::select! {
            biased;
            sent = out.send(sample) => match sent {
                Ok(()) => Emit::Sent,
                Err(_) => {
                    debug!(module = %self.name, "Sample consumer closed");
                    Emit::Stopped
                }
            },
            _ = ctx.cancel.cancelled() => Emit::Stopped,
        }
    }
}

fn record_cluster<'a>(record: &'a SeriesRecord, scope: Option<&'a str>) -> &'a str {
    if record.cluster_name.is_empty() {
        scope.unwrap_or_default()
    } else {
        &record.cluster_name
    }
}

fn entity_labels(cluster: &str, record: &SeriesRecord) -> Vec<String> {
    vec![cluster.to_string(), record.entity_name.clone()]
}

#[async_trait]
impl Scraper for ScraperModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn version(&self) -> f64 {
        self.version
    }

    fn describe(&self) -> &[Arc<MetricDescriptor>] {
        &self.descriptors
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        source: &dyn TimeSeriesSource,
        out: &SampleSender,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        debug!(module = %self.name, "Executing scraper");

        let scope = ctx.scope.as_deref();
        let mut outcome = ScrapeOutcome::default();

        'bindings: for binding in &self.bindings {
            if ctx.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let query = TimeSeriesQuery::new(&binding.query).with_scope(scope);
            let response = match source.fetch(&ctx.cancel, &query).await {
                Ok(response) => response,
                Err(FetchError::Cancelled) => {
                    outcome.cancelled = true;
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(module = %self.name, error = %e, "Scraper cannot reach upstream");
                    return Err(ScrapeError::Fatal {
                        module: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        module = %self.name,
                        metric = %binding.descriptor.name,
                        query = %binding.query,
                        kind = e.kind(),
                        error = %e,
                        "Query failed"
                    );
                    outcome.errors += 1;
                    continue;
                }
            };

            for item in &response.items {
                for warning in &item.warnings {
                    debug!(module = %self.name, query = %binding.query, warning = %warning, "Upstream warning");
                }
            }

            let samples = match self.samples_for(binding, scope, &response) {
                Ok(samples) => samples,
                Err(e) => {
                    error!(module = %self.name, error = %e, "Invalid sample");
                    outcome.errors += 1;
                    continue;
                }
            };

            for sample in samples {
                if let Emit::Stopped = self.emit(ctx, out, sample).await {
                    outcome.cancelled = true;
                    break 'bindings;
                }
            }

            outcome.success += 1;
        }

        debug!(
            module = %self.name,
            total = outcome.total(),
            success = outcome.success,
            errors = outcome.errors,
            cancelled = outcome.cancelled,
            "Scraper finished"
        );

        Ok(outcome)
    }
}
