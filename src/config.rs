// src/config.rs

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;

use crate::aggregate::{
    pagination::DEFAULT_PAGINATION_CEILING, AggregationLimits, PaginationOptions, SandboxOptions,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.3xpl.com";
pub const SANDBOX_API_BASE_URL: &str = "https://sandbox-api.3xpl.com";

// A struct to hold all configuration, loaded once at startup from the .env file.
#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub port: u16,

    /// 3xpl API token. Without it every request goes to the sandbox API.
    pub api_key: Option<SecretString>,
    pub api_base_url: String,
    pub request_timeout: Duration,

    // Aggregation settings
    /// Highest page index fetched per aggregation (inclusive).
    pub pagination_limit: u32,
    pub max_records: Option<usize>,
    pub aggregation_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            api_key: None,
            api_base_url: SANDBOX_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(5),
            pagination_limit: DEFAULT_PAGINATION_CEILING,
            max_records: Some(100_000),
            aggregation_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_millis(2000),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load variables from the .env file into the environment
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let api_key = lookup("THREEXPL_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new);

        // Only keyed clients may talk to the production API
        let api_base_url = match api_key {
            Some(_) => lookup("THREEXPL_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            None => SANDBOX_API_BASE_URL.to_string(),
        };

        let max_records = match lookup("MAX_RECORDS") {
            Some(v) => {
                let n: usize = v.parse().context("MAX_RECORDS must be a valid number")?;
                (n > 0).then_some(n)
            }
            None => defaults.max_records,
        };

        Ok(Config {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            api_key,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            pagination_limit: parse_or(&lookup, "PAGINATION_LIMIT", defaults.pagination_limit)?,
            max_records,
            aggregation_timeout: Duration::from_secs(parse_or(
                &lookup,
                "AGGREGATION_TIMEOUT_SECS",
                defaults.aggregation_timeout.as_secs(),
            )?),
            query_timeout: Duration::from_millis(parse_or(
                &lookup,
                "QUERY_TIMEOUT_MS",
                defaults.query_timeout.as_millis() as u64,
            )?),
        })
    }

    pub fn aggregation_limits(&self) -> AggregationLimits {
        AggregationLimits {
            pagination: PaginationOptions {
                ceiling: self.pagination_limit,
                max_records: self.max_records,
            },
            sandbox: SandboxOptions {
                timeout: self.query_timeout,
                validate: true,
            },
            timeout: self.aggregation_timeout,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}
