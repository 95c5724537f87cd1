use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Connection settings for the Cloudera Manager REST API.
///
/// Built once at startup and shared read-only by every query for the
/// lifetime of the process.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// URL scheme: "http" or "https".
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Cloudera Manager host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Cloudera Manager API port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// API version path segment (e.g., "v19").
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Basic auth user.
    #[serde(default = "default_username")]
    pub username: String,

    /// Basic auth password.
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7180
}

fn default_api_version() -> String {
    "v19".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            api_version: default_api_version(),
            username: default_username(),
            password: default_password(),
        }
    }
}

impl ConnectionConfig {
    /// Base URL of the timeseries endpoint, without the query string.
    pub fn timeseries_endpoint(&self) -> String {
        format!(
            "{}://{}:{}/api/{}/timeseries",
            self.scheme, self.host, self.port, self.api_version
        )
    }

    /// Check that the settings can produce a usable endpoint.
    pub fn validate(&self) -> Result<()> {
        if self.scheme != "http" && self.scheme != "https" {
            return Err(Error::Config(format!(
                "Unsupported scheme '{}', expected http or https",
                self.scheme
            )));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("Connection host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("Connection port must be > 0".into()));
        }
        if self.api_version.trim().is_empty() || self.api_version.contains('/') {
            return Err(Error::Config(format!(
                "Invalid API version '{}'",
                self.api_version
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_version", &self.api_version)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        connection: ConnectionConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_parse_connection_config() {
        let content = r#"
        {
            connection: {
                host: "cm.example.com",
                port: 7183,
                scheme: "https",
                api_version: "v41",
                username: "monitor",
                password: "s3cret",
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: TestConfig = json5::from_str(content).unwrap();

        assert_eq!(config.connection.host, "cm.example.com");
        assert_eq!(config.connection.port, 7183);
        assert_eq!(config.connection.api_version, "v41");
        assert_eq!(config.connection.username, "monitor");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.connection.timeseries_endpoint(),
            "https://cm.example.com:7183/api/v41/timeseries"
        );
    }

    #[test]
    fn test_default_config() {
        let config: TestConfig = json5::from_str("{}").unwrap();

        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 7180);
        assert_eq!(config.connection.api_version, "v19");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.connection.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_validate_rejects_bad_connection() {
        let empty_host = ConnectionConfig {
            host: "  ".to_string(),
            ..Default::default()
        };
        assert!(empty_host.validate().is_err());

        let zero_port = ConnectionConfig {
            port: 0,
            ..Default::default()
        };
        assert!(zero_port.validate().is_err());

        let bad_scheme = ConnectionConfig {
            scheme: "ftp".to_string(),
            ..Default::default()
        };
        assert!(bad_scheme.validate().is_err());

        let bad_version = ConnectionConfig {
            api_version: "v1/../x".to_string(),
            ..Default::default()
        };
        assert!(bad_version.validate().is_err());
    }

    #[test]
    fn test_json_logging_format() {
        let content = r#"{ logging: { level: "debug", format: "json" } }"#;

        let config: TestConfig = json5::from_str(content).unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
