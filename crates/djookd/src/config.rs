use djook_core::{SearchOptions, DEFAULT_SIMILARITY_THRESHOLD};
use djook_rekognition::{Credentials, RekognitionConfig, DEFAULT_REGION};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Daemon configuration, loaded once from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0).
    pub bind_addr: IpAddr,
    /// Listen port (default: 3000).
    pub port: u16,
    /// Reference dataset manifest.
    pub dataset_path: PathBuf,
    /// Similarity (0–100) for a positive match.
    pub similarity_threshold: f32,
    pub max_concurrent_per_request: usize,
    /// 0 = unbounded.
    pub max_concurrent_global: usize,
    /// Whole-search deadline for one HTTP request.
    pub search_timeout: Duration,
    /// Deadline for a single CompareFaces call.
    pub service_timeout: Duration,
    pub body_limit_bytes: usize,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: Credentials,
}

impl Config {
    /// Load configuration from `PORT`, `AWS_*` and `DJOOK_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let similarity_threshold: f32 = parse_or(
            &get,
            "DJOOK_SIMILARITY_THRESHOLD",
            DEFAULT_SIMILARITY_THRESHOLD,
        )?;
        if !(0.0..=100.0).contains(&similarity_threshold) {
            return Err(ConfigError::Invalid {
                key: "DJOOK_SIMILARITY_THRESHOLD",
                value: similarity_threshold.to_string(),
                reason: "must be within 0..=100".into(),
            });
        }

        let max_concurrent_per_request =
            concurrency_limit(&get, "DJOOK_MAX_CONCURRENT_PER_REQUEST", 8)?;
        let max_concurrent_global = concurrency_limit(&get, "DJOOK_MAX_CONCURRENT_GLOBAL", 0)?;

        let mut credentials = Credentials::new(
            required(&get, "AWS_ACCESS_KEY_ID")?,
            required(&get, "AWS_SECRET_ACCESS_KEY")?,
        );
        if let Some(token) = non_empty(&get, "AWS_SESSION_TOKEN") {
            credentials = credentials.with_session_token(token);
        }

        Ok(Self {
            bind_addr: parse_or(&get, "DJOOK_BIND_ADDR", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse_or(&get, "PORT", 3000)?,
            dataset_path: non_empty(&get, "DJOOK_DATASET")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dataset/persons.toml")),
            similarity_threshold,
            max_concurrent_per_request,
            max_concurrent_global,
            search_timeout: Duration::from_secs(parse_or(&get, "DJOOK_SEARCH_TIMEOUT_SECS", 30)?),
            service_timeout: Duration::from_secs(parse_or(&get, "DJOOK_SERVICE_TIMEOUT_SECS", 10)?),
            body_limit_bytes: parse_or(&get, "DJOOK_BODY_LIMIT_BYTES", 50 * 1024 * 1024)?,
            region: non_empty(&get, "AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: non_empty(&get, "DJOOK_REKOGNITION_ENDPOINT"),
            credentials,
        })
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            similarity_threshold: self.similarity_threshold,
            max_concurrent_per_request: self.max_concurrent_per_request,
            max_concurrent_global: self.max_concurrent_global,
        }
    }

    pub fn rekognition(&self) -> RekognitionConfig {
        RekognitionConfig {
            region: self.region.clone(),
            credentials: self.credentials.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.service_timeout,
        }
    }
}

fn non_empty(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    get(key).filter(|v| !v.trim().is_empty())
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_empty(get, key).ok_or(ConfigError::Missing(key))
}

/// Semaphore sizes; tokio panics above `Semaphore::MAX_PERMITS`.
fn concurrency_limit(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    let limit: usize = parse_or(get, key, default)?;
    if limit > Semaphore::MAX_PERMITS {
        return Err(ConfigError::Invalid {
            key,
            value: limit.to_string(),
            reason: format!("must be at most {}", Semaphore::MAX_PERMITS),
        });
    }
    Ok(limit)
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(get, key) {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
