use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const PREFIX: &str = "S3_METRICS_RELAY_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required but not set")]
    Missing(String),

    #[error("{0} has invalid value: {1}")]
    InvalidNumeric(String, String),

    #[error("{0} has invalid value: {1} (expected \"true\" or \"false\")")]
    InvalidBool(String, String),

    #[error("{0} is not a valid URL: {1}")]
    InvalidUrl(String, String),

    #[error("{name} must be at least {min}, got {value}")]
    OutOfRange { name: String, min: u64, value: u64 },
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Url,
    pub key_prefix: String,
    pub namespace: String,
    pub sparse: bool,
    pub precision: usize,
    pub num_buffered_intervals: usize,
    pub max_upload_attempts: u32,
    pub failed_upload_delay: Duration,
    pub upload_timeout: Duration,
    pub no_upload: bool,
    pub debug: bool,
    pub listener_port: u16,
    /// `None` only in `no_upload` mode.
    pub credentials: Option<S3Credentials>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(PREFIX) || k.starts_with("AWS_"))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let no_upload = parse_bool(vars, "NO_UPLOAD", false)?;
        let bucket = match get(vars, "BUCKET") {
            Some(b) => b.to_owned(),
            None if no_upload => String::new(),
            None => return Err(ConfigError::Missing(var("BUCKET"))),
        };
        let region = get(vars, "REGION")
            .or_else(|| non_empty(vars, "AWS_REGION"))
            .unwrap_or("us-east-1")
            .to_owned();
        let endpoint = parse_endpoint(vars, &region)?;
        let credentials = parse_credentials(vars, no_upload)?;

        Ok(Self {
            bucket,
            endpoint,
            region,
            key_prefix: get(vars, "KEY_PREFIX").unwrap_or_default().to_owned(),
            namespace: get(vars, "NAMESPACE").unwrap_or("stats").to_owned(),
            sparse: parse_bool(vars, "SPARSE", false)?,
            precision: parse_num(vars, "PRECISION", 0)?,
            num_buffered_intervals: parse_at_least::<u32>(vars, "NUM_BUFFERED_INTERVALS", 1, 1)? as usize,
            max_upload_attempts: parse_at_least(vars, "MAX_UPLOAD_ATTEMPTS", 3, 1)?,
            failed_upload_delay: parse_duration_ms(vars, "FAILED_UPLOAD_DELAY_MS", 15_000)?,
            upload_timeout: parse_duration_ms(vars, "UPLOAD_TIMEOUT_MS", 10_000)?,
            no_upload,
            debug: parse_bool(vars, "DEBUG", false)?,
            listener_port: parse_num(vars, "LISTENER_PORT", 8126)?,
            credentials,
        })
    }
}

fn var(name: &str) -> String {
    format!("{PREFIX}{name}")
}

fn non_empty<'a>(vars: &'a HashMap<String, String>, full_name: &str) -> Option<&'a str> {
    vars.get(full_name)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Look up a prefixed variable, treating an empty value as unset.
fn get<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    non_empty(vars, &var(name))
}

fn parse_endpoint(vars: &HashMap<String, String>, region: &str) -> Result<Url, ConfigError> {
    match get(vars, "ENDPOINT") {
        Some(raw) => {
            Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(var("ENDPOINT"), raw.to_owned()))
        }
        None => {
            let raw = format!("https://s3.{region}.amazonaws.com");
            Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl(var("REGION"), raw))
        }
    }
}

fn parse_credentials(
    vars: &HashMap<String, String>,
    no_upload: bool,
) -> Result<Option<S3Credentials>, ConfigError> {
    let lookup = |name: &str| get(vars, name).or_else(|| non_empty(vars, &format!("AWS_{name}")));

    let access_key_id = lookup("ACCESS_KEY_ID");
    let secret_access_key = lookup("SECRET_ACCESS_KEY");
    match (access_key_id, secret_access_key) {
        (Some(id), Some(secret)) => Ok(Some(S3Credentials {
            access_key_id: id.to_owned(),
            secret_access_key: secret.to_owned(),
            session_token: lookup("SESSION_TOKEN").map(str::to_owned),
        })),
        _ if no_upload => Ok(None),
        (None, _) => Err(ConfigError::Missing(var("ACCESS_KEY_ID"))),
        (Some(_), None) => Err(ConfigError::Missing(var("SECRET_ACCESS_KEY"))),
    }
}

fn parse_bool(vars: &HashMap<String, String>, name: &str, default: bool) -> Result<bool, ConfigError> {
    match get(vars, name) {
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidBool(var(name), other.to_owned())),
        None => Ok(default),
    }
}

fn parse_num<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match get(vars, name) {
        Some(val) => val
            .parse()
            .map_err(|_| ConfigError::InvalidNumeric(var(name), val.to_owned())),
        None => Ok(default),
    }
}

fn parse_at_least<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
    min: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Into<u64> + Copy,
{
    let value = parse_num(vars, name, default)?;
    if value < min {
        return Err(ConfigError::OutOfRange {
            name: var(name),
            min: min.into(),
            value: value.into(),
        });
    }
    Ok(value)
}

fn parse_duration_ms(
    vars: &HashMap<String, String>,
    name: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_num(vars, name, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests;
