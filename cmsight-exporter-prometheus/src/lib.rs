//! Prometheus exporter for Cloudera Manager timeseries metrics.
//!
//! Every request to the `/metrics` endpoint runs each registered scraper
//! module once. Modules query the Cloudera Manager timeseries API, flatten
//! the answer into records and emit one gauge sample per record.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Cloudera Manager│<────│ Scraper modules │────>│   HTTP Server   │
//! │ /timeseries API │────>│ (module reg.)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! cmsight-exporter-prometheus --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod catalog;
pub mod client;
pub mod config;
pub mod exposition;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod scraper;
pub mod timeseries;

pub use catalog::{BindingSpec, ModuleSpec};
pub use client::{FetchError, QueryClient, TimeSeriesQuery, TimeSeriesSource};
pub use config::ExporterConfig;
pub use http::{HttpServer, ScrapeSettings};
pub use registry::{ModuleRegistry, ScrapeReport, SharedRegistry};
pub use scraper::{ScrapeContext, ScrapeOutcome, Scraper, ScraperModule};
pub use timeseries::{SeriesRecord, TimeSeriesResponse, normalize};
