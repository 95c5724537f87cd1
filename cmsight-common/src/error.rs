use thiserror::Error;

/// Common error type for cmsight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate metric descriptor: {0}")]
    DuplicateDescriptor(String),

    #[error("Duplicate scraper module: {0}")]
    DuplicateModule(String),

    #[error("Metric {metric} declares {expected} labels but {actual} values were supplied")]
    LabelCardinality {
        metric: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type alias using cmsight's Error.
pub type Result<T> = std::result::Result<T, Error>;
