//! cmsight Common Library
//!
//! Shared types for the cmsight Cloudera Manager exporter:
//!
//! - [`config`] - Connection and logging configuration
//! - [`descriptor`] - Metric descriptors and the registration-time registry
//! - [`sample`] - Label-checked metric samples
//! - [`error`] - Error types

pub mod config;
pub mod descriptor;
pub mod error;
pub mod sample;

// Re-export commonly used types at the crate root
pub use config::{ConnectionConfig, LogFormat, LoggingConfig};
pub use descriptor::{DescriptorRegistry, MetricDescriptor, build_fq_name};
pub use error::{Error, Result};
pub use sample::Sample;

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
