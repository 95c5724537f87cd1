//! Integration tests for cmsight-common library.

use cmsight_common::{
    ConnectionConfig, DescriptorRegistry, Error, LogFormat, LoggingConfig, Sample, build_fq_name,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    connection: ConnectionConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_register_then_emit_workflow() {
    let mut registry = DescriptorRegistry::new();

    let xid = registry
        .register(
            build_fq_name("cloudera", "zookeeper", "current_xid"),
            "The current ZooKeeper XID",
            ["cluster", "entityName"],
        )
        .unwrap();
    let total = registry
        .register(
            build_fq_name("cloudera", "zookeeper", "total_alerts_rate_across_servers"),
            "Total alerts rate",
            Vec::<String>::new(),
        )
        .unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.descriptors()[0].name, "cloudera_zookeeper_current_xid");

    let sample = Sample::new(
        xid.clone(),
        vec!["Cluster 1".to_string(), "zookeeper-1".to_string()],
        42.0,
    )
    .unwrap();
    let labels: Vec<_> = sample.labels().collect();
    assert_eq!(
        labels,
        vec![("cluster", "Cluster 1"), ("entityName", "zookeeper-1")]
    );

    // Aggregate descriptors take no label values
    assert!(Sample::new(total.clone(), Vec::new(), 0.0).is_ok());
    let err = Sample::new(total, vec!["c1".to_string()], 0.0).unwrap_err();
    assert!(matches!(
        err,
        Error::LabelCardinality {
            expected: 0,
            actual: 1,
            ..
        }
    ));

    // Same name again is rejected, even with a different schema
    let dup = registry.register("cloudera_zookeeper_current_xid", "other", ["x"]);
    assert!(matches!(dup, Err(Error::DuplicateDescriptor(_))));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_config_sections_from_json5() {
    let config: FileConfig = json5::from_str(
        r#"{
            // JSON5 allows comments
            connection: { scheme: "https", host: "cm.example.com", port: 7183, password: "s3cret" },
            logging: { level: "debug", format: "json" },
        }"#,
    )
    .unwrap();

    assert_eq!(
        config.connection.timeseries_endpoint(),
        "https://cm.example.com:7183/api/v19/timeseries"
    );
    assert!(config.connection.validate().is_ok());
    assert_eq!(config.logging.format, LogFormat::Json);

    // Credentials never show up in debug output
    let debug = format!("{:?}", config.connection);
    assert!(!debug.contains("s3cret"));
}

#[test]
fn test_invalid_connection_is_a_config_error() {
    let config: FileConfig = json5::from_str(r#"{ connection: { scheme: "ftp" } }"#).unwrap();

    assert!(matches!(config.connection.validate(), Err(Error::Config(_))));
}
