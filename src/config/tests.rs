use std::collections::HashMap;
use std::time::Duration;

use super::*;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The minimum set of variables for an uploading relay.
fn base() -> Vec<(&'static str, &'static str)> {
    vec![
        ("S3_METRICS_RELAY_BUCKET", "metrics"),
        ("S3_METRICS_RELAY_ACCESS_KEY_ID", "AKID"),
        ("S3_METRICS_RELAY_SECRET_ACCESS_KEY", "secret"),
    ]
}

fn with(extra: &[(&'static str, &'static str)]) -> HashMap<String, String> {
    let mut pairs = base();
    pairs.extend_from_slice(extra);
    vars(&pairs)
}

#[test]
fn applies_defaults() {
    let config = Config::parse(&with(&[])).unwrap();
    assert_eq!(config.bucket, "metrics");
    assert_eq!(config.region, "us-east-1");
    assert_eq!(config.endpoint.as_str(), "https://s3.us-east-1.amazonaws.com/");
    assert_eq!(config.key_prefix, "");
    assert_eq!(config.namespace, "stats");
    assert!(!config.sparse);
    assert_eq!(config.precision, 0);
    assert_eq!(config.num_buffered_intervals, 1);
    assert_eq!(config.max_upload_attempts, 3);
    assert_eq!(config.failed_upload_delay, Duration::from_millis(15_000));
    assert_eq!(config.upload_timeout, Duration::from_millis(10_000));
    assert!(!config.no_upload);
    assert!(!config.debug);
    assert_eq!(config.listener_port, 8126);
}

#[test]
fn overrides_pipeline_settings() {
    let config = Config::parse(&with(&[
        ("S3_METRICS_RELAY_NAMESPACE", "prod.web"),
        ("S3_METRICS_RELAY_SPARSE", "true"),
        ("S3_METRICS_RELAY_PRECISION", "3"),
        ("S3_METRICS_RELAY_NUM_BUFFERED_INTERVALS", "6"),
        ("S3_METRICS_RELAY_MAX_UPLOAD_ATTEMPTS", "5"),
        ("S3_METRICS_RELAY_FAILED_UPLOAD_DELAY_MS", "250"),
        ("S3_METRICS_RELAY_KEY_PREFIX", "raw/"),
    ]))
    .unwrap();
    assert_eq!(config.namespace, "prod.web");
    assert!(config.sparse);
    assert_eq!(config.precision, 3);
    assert_eq!(config.num_buffered_intervals, 6);
    assert_eq!(config.max_upload_attempts, 5);
    assert_eq!(config.failed_upload_delay, Duration::from_millis(250));
    assert_eq!(config.key_prefix, "raw/");
}

#[test]
fn region_shapes_default_endpoint() {
    let config = Config::parse(&with(&[("S3_METRICS_RELAY_REGION", "eu-west-1")])).unwrap();
    assert_eq!(
        config.endpoint.host_str(),
        Some("s3.eu-west-1.amazonaws.com")
    );
}

#[test]
fn falls_back_to_aws_region() {
    let config = Config::parse(&with(&[("AWS_REGION", "ap-south-1")])).unwrap();
    assert_eq!(config.region, "ap-south-1");
}

#[test]
fn custom_endpoint() {
    let config = Config::parse(&with(&[(
        "S3_METRICS_RELAY_ENDPOINT",
        "http://localhost:9000",
    )]))
    .unwrap();
    assert_eq!(config.endpoint.host_str(), Some("localhost"));
    assert_eq!(config.endpoint.port(), Some(9000));
}

#[test]
fn rejects_invalid_endpoint() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_ENDPOINT", "not a url")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl(_, _)));
}

#[test]
fn rejects_missing_bucket() {
    let err = Config::parse(&vars(&[
        ("S3_METRICS_RELAY_ACCESS_KEY_ID", "AKID"),
        ("S3_METRICS_RELAY_SECRET_ACCESS_KEY", "secret"),
    ]))
    .unwrap_err();
    assert!(
        matches!(err, ConfigError::Missing(ref name) if name == "S3_METRICS_RELAY_BUCKET"),
        "should require bucket, got {err}"
    );
}

#[test]
fn empty_bucket_counts_as_missing() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_BUCKET", "")])).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)));
}

#[test]
fn rejects_missing_credentials() {
    let err = Config::parse(&vars(&[("S3_METRICS_RELAY_BUCKET", "metrics")])).unwrap_err();
    assert!(
        matches!(err, ConfigError::Missing(ref name) if name == "S3_METRICS_RELAY_ACCESS_KEY_ID")
    );
}

#[test]
fn rejects_key_id_without_secret() {
    let err = Config::parse(&vars(&[
        ("S3_METRICS_RELAY_BUCKET", "metrics"),
        ("S3_METRICS_RELAY_ACCESS_KEY_ID", "AKID"),
    ]))
    .unwrap_err();
    assert!(
        matches!(err, ConfigError::Missing(ref name) if name == "S3_METRICS_RELAY_SECRET_ACCESS_KEY")
    );
}

#[test]
fn falls_back_to_aws_credentials() {
    let config = Config::parse(&vars(&[
        ("S3_METRICS_RELAY_BUCKET", "metrics"),
        ("AWS_ACCESS_KEY_ID", "AKID"),
        ("AWS_SECRET_ACCESS_KEY", "secret"),
        ("AWS_SESSION_TOKEN", "token"),
    ]))
    .unwrap();
    let creds = config.credentials.unwrap();
    assert_eq!(creds.access_key_id, "AKID");
    assert_eq!(creds.session_token.as_deref(), Some("token"));
}

#[test]
fn prefixed_credentials_win_over_aws() {
    let config = Config::parse(&with(&[("AWS_ACCESS_KEY_ID", "OTHER")])).unwrap();
    assert_eq!(config.credentials.unwrap().access_key_id, "AKID");
}

#[test]
fn no_upload_needs_neither_bucket_nor_credentials() {
    let config = Config::parse(&vars(&[("S3_METRICS_RELAY_NO_UPLOAD", "true")])).unwrap();
    assert!(config.no_upload);
    assert!(config.credentials.is_none());
    assert_eq!(config.bucket, "");
}

#[test]
fn rejects_invalid_bool() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_SPARSE", "yes")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBool(_, _)));
}

#[test]
fn accepts_numeric_bools() {
    let config = Config::parse(&with(&[("S3_METRICS_RELAY_DEBUG", "1")])).unwrap();
    assert!(config.debug);
}

#[test]
fn rejects_non_numeric_precision() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_PRECISION", "two")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidNumeric(_, _)));
}

#[test]
fn rejects_negative_delay() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_FAILED_UPLOAD_DELAY_MS", "-5")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidNumeric(_, _)));
}

#[test]
fn rejects_zero_buffered_intervals() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_NUM_BUFFERED_INTERVALS", "0")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::OutOfRange { min: 1, value: 0, .. }
    ));
}

#[test]
fn rejects_zero_upload_attempts() {
    let err =
        Config::parse(&with(&[("S3_METRICS_RELAY_MAX_UPLOAD_ATTEMPTS", "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::OutOfRange { .. }));
}

#[test]
fn rejects_non_numeric_port() {
    let err = Config::parse(&with(&[("S3_METRICS_RELAY_LISTENER_PORT", "abc")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidNumeric(_, _)));
}

#[test]
fn debug_output_redacts_secrets() {
    let config = Config::parse(&with(&[("S3_METRICS_RELAY_SESSION_TOKEN", "tok3n")])).unwrap();
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("\"secret\""));
    assert!(!rendered.contains("tok3n"));
    assert!(rendered.contains("AKID"));
}
