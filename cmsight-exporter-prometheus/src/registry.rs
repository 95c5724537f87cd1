//! Module registry: owns the scraper modules and runs them on each scrape.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ /metrics req │──>│  ModuleRegistry  │──>│  Scraper 1  │──┐
//! └──────────────┘   │ (bounded, async) │   │  Scraper N  │──┤ mpsc<Sample>
//!                    └──────────────────┘   └─────────────┘  │
//!                             ^──────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use cmsight_common::{DescriptorRegistry, Error, MetricDescriptor, Result, Sample};

use crate::catalog::{ModuleSpec, builtin_modules};
use crate::client::TimeSeriesSource;
use crate::config::{ExporterConfig, FilterConfig};
use crate::mapping::build_metric_name;
use crate::scraper::{ScrapeContext, ScrapeOutcome, Scraper};

/// Capacity of the sample channel shared by all modules of one scrape.
const SAMPLE_BUFFER: usize = 1024;

/// Decides which modules and metrics are registered.
pub struct ModuleFilter {
    include_modules: Vec<String>,
    exclude_modules: Vec<String>,
    exclude_metrics: Vec<glob::Pattern>,
}

impl ModuleFilter {
    /// Create a new filter from configuration.
    pub fn new(config: &FilterConfig) -> Self {
        let exclude_metrics = config
            .exclude_metrics
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        Self {
            include_modules: config.include_modules.clone(),
            exclude_modules: config.exclude_modules.clone(),
            exclude_metrics,
        }
    }

    /// Check if a module should be registered.
    pub fn include_module(&self, name: &str) -> bool {
        if !self.include_modules.is_empty() && !self.include_modules.iter().any(|m| m == name) {
            return false;
        }
        !self.exclude_modules.iter().any(|m| m == name)
    }

    /// Check if a fully-qualified metric should be registered.
    pub fn include_metric(&self, name: &str) -> bool {
        !self.exclude_metrics.iter().any(|p| p.matches(name))
    }
}

impl Default for ModuleFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// Descriptors of the exporter's own per-module health metrics.
struct HealthDescriptors {
    success: Arc<MetricDescriptor>,
    duration: Arc<MetricDescriptor>,
    queries_succeeded: Arc<MetricDescriptor>,
    queries_failed: Arc<MetricDescriptor>,
    samples: Arc<MetricDescriptor>,
}

impl HealthDescriptors {
    fn register(namespace: &str, registry: &mut DescriptorRegistry) -> Result<Self> {
        let name = |metric: &str| build_metric_name(namespace, "exporter", metric);

        Ok(Self {
            success: registry.register(
                name("scrape_success"),
                "Whether the module scrape completed without a fatal error",
                ["module"],
            )?,
            duration: registry.register(
                name("scrape_duration_seconds"),
                "Duration of the module scrape",
                ["module"],
            )?,
            queries_succeeded: registry.register(
                name("queries_succeeded"),
                "Queries answered by the upstream during the last scrape",
                ["module"],
            )?,
            queries_failed: registry.register(
                name("queries_failed"),
                "Queries that failed during the last scrape",
                ["module"],
            )?,
            samples: registry.register(
                name("scrape_samples"),
                "Samples emitted by all modules during the last scrape",
                Vec::<String>::new(),
            )?,
        })
    }

    fn samples(&self, reports: &[ModuleReport], total_samples: usize) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(reports.len() * 4 + 1);

        for report in reports {
            let module = vec![report.module.clone()];
            let (succeeded, failed) = report
                .outcome
                .map(|o| (o.success, o.errors))
                .unwrap_or_default();

            let values = [
                (&self.success, if report.is_success() { 1.0 } else { 0.0 }),
                (&self.duration, report.duration.as_secs_f64()),
                (&self.queries_succeeded, succeeded as f64),
                (&self.queries_failed, failed as f64),
            ];
            for (descriptor, value) in values {
                if let Ok(sample) = Sample::new(descriptor.clone(), module.clone(), value) {
                    samples.push(sample);
                }
            }
        }

        if let Ok(sample) = Sample::new(self.samples.clone(), Vec::new(), total_samples as f64) {
            samples.push(sample);
        }

        samples
    }
}

/// What happened to one module during a scrape.
#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub module: String,
    /// Query tally; `None` when the module failed fatally or never ran.
    pub outcome: Option<ScrapeOutcome>,
    pub duration: Duration,
    /// Fatal error message, if any.
    pub error: Option<String>,
}

impl ModuleReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_some() && self.error.is_none()
    }
}

/// Result of one scrape across all modules.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub samples: Vec<Sample>,
    pub modules: Vec<ModuleReport>,
}

impl ScrapeReport {
    /// Queries answered across all modules.
    pub fn queries_succeeded(&self) -> usize {
        self.modules
            .iter()
            .filter_map(|m| m.outcome)
            .map(|o| o.success)
            .sum()
    }

    /// Queries failed across all modules.
    pub fn queries_failed(&self) -> usize {
        self.modules
            .iter()
            .filter_map(|m| m.outcome)
            .map(|o| o.errors)
            .sum()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Scrapes run since startup.
    pub scrapes: u64,
    /// Queries answered during the last scrape.
    pub last_queries_succeeded: usize,
    /// Queries failed during the last scrape.
    pub last_queries_failed: usize,
    /// Samples emitted during the last scrape.
    pub last_samples: usize,
    /// Whether any scrape so far had at least one answered query.
    pub has_succeeded: bool,
}

/// Builder for [`ModuleRegistry`].
pub struct ModuleRegistryBuilder {
    namespace: String,
    filter: ModuleFilter,
    descriptors: DescriptorRegistry,
    modules: Vec<Arc<dyn Scraper>>,
    names: HashSet<String>,
    max_concurrency: usize,
    expose_module_stats: bool,
}

impl ModuleRegistryBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filter: ModuleFilter::default(),
            descriptors: DescriptorRegistry::new(),
            modules: Vec::new(),
            names: HashSet::new(),
            max_concurrency: 4,
            expose_module_stats: true,
        }
    }

    /// Apply module and metric filters to subsequently added modules.
    pub fn filters(mut self, config: &FilterConfig) -> Self {
        self.filter = ModuleFilter::new(config);
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn expose_module_stats(mut self, expose: bool) -> Self {
        self.expose_module_stats = expose;
        self
    }

    /// Build a module from its spec and register it.
    pub fn spec(mut self, spec: &ModuleSpec) -> Result<Self> {
        if !self.filter.include_module(&spec.name) {
            debug!(module = %spec.name, "Module filtered out");
            return Ok(self);
        }
        self.claim_name(&spec.name)?;

        let filter = &self.filter;
        let module = spec.build(&self.namespace, &mut self.descriptors, |name| {
            filter.include_metric(name)
        })?;
        self.modules.push(Arc::new(module));
        Ok(self)
    }

    /// Register a hand-written scraper.
    ///
    /// Its descriptors join the global set, so their names must be unique
    /// as well.
    pub fn scraper(mut self, scraper: Arc<dyn Scraper>) -> Result<Self> {
        if !self.filter.include_module(scraper.name()) {
            debug!(module = %scraper.name(), "Module filtered out");
            return Ok(self);
        }
        self.claim_name(scraper.name())?;

        for descriptor in scraper.describe() {
            self.descriptors.register(
                descriptor.name.clone(),
                descriptor.help.clone(),
                descriptor.label_names.iter().cloned(),
            )?;
        }
        self.modules.push(scraper);
        Ok(self)
    }

    fn claim_name(&mut self, name: &str) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(Error::DuplicateModule(name.to_string()));
        }
        Ok(())
    }

    pub fn build(mut self) -> Result<ModuleRegistry> {
        let health = if self.expose_module_stats {
            Some(HealthDescriptors::register(
                &self.namespace,
                &mut self.descriptors,
            )?)
        } else {
            None
        };

        let declared = self
            .descriptors
            .descriptors()
            .iter()
            .map(|d| d.name.clone())
            .collect();

        Ok(ModuleRegistry {
            modules: self.modules,
            descriptors: self.descriptors,
            declared,
            health,
            max_concurrency: self.max_concurrency,
            stats: RwLock::new(RegistryStats::default()),
        })
    }
}

/// The set of scraper modules served by this exporter.
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Scraper>>,
    descriptors: DescriptorRegistry,
    declared: HashSet<String>,
    health: Option<HealthDescriptors>,
    max_concurrency: usize,
    stats: RwLock<RegistryStats>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<ModuleRegistry>;

impl ModuleRegistry {
    pub fn builder(namespace: impl Into<String>) -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::new(namespace)
    }

    /// Build the registry from the built-in catalog plus configured modules.
    pub fn from_config(config: &ExporterConfig) -> Result<Self> {
        let mut builder = Self::builder(config.prometheus.namespace.clone())
            .filters(&config.filters)
            .max_concurrency(config.scrape.max_concurrency)
            .expose_module_stats(config.scrape.expose_module_stats);

        for spec in builtin_modules().iter().chain(config.modules.iter()) {
            builder = builder.spec(spec)?;
        }

        let registry = builder.build()?;
        info!(
            modules = registry.modules.len(),
            descriptors = registry.descriptors.len(),
            "Module registry ready"
        );
        Ok(registry)
    }

    /// Every descriptor any module (or the exporter itself) can emit.
    pub fn describe(&self) -> &[Arc<MetricDescriptor>] {
        self.descriptors.descriptors()
    }

    /// Registered modules, in registration order.
    pub fn modules(&self) -> &[Arc<dyn Scraper>] {
        &self.modules
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Run every module once and gather their samples.
    ///
    /// Modules run concurrently, at most `max_concurrency` at a time. A
    /// module failing, fatally or not, never fails the scrape.
    pub async fn scrape(
        &self,
        ctx: &ScrapeContext,
        source: Arc<dyn TimeSeriesSource>,
    ) -> ScrapeReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let (tx, mut rx) = mpsc::channel(SAMPLE_BUFFER);
        let mut tasks = JoinSet::new();

        for module in &self.modules {
            let module = module.clone();
            let source = source.clone();
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let name = module.name().to_string();

                let permit = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return ModuleReport {
                        module: name,
                        outcome: Some(ScrapeOutcome {
                            cancelled: true,
                            ..Default::default()
                        }),
                        duration: Duration::ZERO,
                        error: None,
                    };
                };

                let started = Instant::now();
                let result = module.scrape(&ctx, source.as_ref(), &tx).await;
                let duration = started.elapsed();

                match result {
                    Ok(outcome) => ModuleReport {
                        module: name,
                        outcome: Some(outcome),
                        duration,
                        error: None,
                    },
                    Err(e) => {
                        warn!(module = %name, error = %e, "Module scrape failed");
                        ModuleReport {
                            module: name,
                            outcome: None,
                            duration,
                            error: Some(e.to_string()),
                        }
                    }
                }
            });
        }
        drop(tx);

        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            if self.declared.contains(sample.name()) {
                samples.push(sample);
            } else {
                error!(metric = %sample.name(), "Dropping sample for undeclared metric");
            }
        }

        let mut modules = Vec::with_capacity(self.modules.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => modules.push(report),
                Err(e) => error!(error = %e, "Module task panicked"),
            }
        }
        modules.sort_by(|a, b| a.module.cmp(&b.module));

        let mut report = ScrapeReport { samples, modules };

        {
            let mut stats = self.stats.write();
            stats.scrapes += 1;
            stats.last_queries_succeeded = report.queries_succeeded();
            stats.last_queries_failed = report.queries_failed();
            stats.last_samples = report.samples.len();
            stats.has_succeeded |= stats.last_queries_succeeded > 0;
        }

        debug!(
            modules = report.modules.len(),
            samples = report.samples.len(),
            queries_succeeded = report.queries_succeeded(),
            queries_failed = report.queries_failed(),
            "Scrape finished"
        );

        if let Some(health) = &self.health {
            let extra = health.samples(&report.modules, report.samples.len());
            report.samples.extend(extra);
        }

        report
    }
}
