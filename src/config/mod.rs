//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Connection strings are wrapped in `secrecy::SecretString`
//! since they usually embed credentials.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use crate::client::{ClientOptions, DEFAULT_QUEUE};
use crate::error::{Error, Result};
use crate::processor::{DEFAULT_CONCURRENCY, ProcessorConfig};

#[derive(Debug)]
pub struct Config {
    /// Audit store connection (postgres://, mysql:// or sqlite:).
    pub database_url: SecretString,
    /// Postgres database hosting the pgmq queues, when it differs from
    /// the audit store.
    pub queue_database_url: Option<SecretString>,
    pub default_queue: String,
    pub concurrency: usize,
    pub queues: HashMap<String, u32>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            queue_database_url: std::env::var("QUEUE_DATABASE_URL")
                .ok()
                .map(SecretString::from),
            default_queue: std::env::var("TASKTRAIL_QUEUE")
                .unwrap_or_else(|_| DEFAULT_QUEUE.to_string()),
            concurrency: match std::env::var("TASKTRAIL_CONCURRENCY") {
                Ok(raw) => raw.trim().parse().map_err(|_| {
                    Error::Config(format!("TASKTRAIL_CONCURRENCY must be a number, got {raw:?}"))
                })?,
                Err(_) => DEFAULT_CONCURRENCY,
            },
            queues: match std::env::var("TASKTRAIL_QUEUES") {
                Ok(raw) => parse_queue_weights(&raw)?,
                Err(_) => HashMap::new(),
            },
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Connection string for the pgmq database.
    pub fn queue_url(&self) -> &str {
        self.queue_database_url
            .as_ref()
            .unwrap_or(&self.database_url)
            .expose_secret()
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            default_queue: self.default_queue.clone(),
        }
    }

    /// Worker settings. Without `TASKTRAIL_QUEUES` the processor polls
    /// only the default queue.
    pub fn processor_config(&self) -> ProcessorConfig {
        let queues = if self.queues.is_empty() {
            HashMap::from([(self.default_queue.clone(), 1)])
        } else {
            self.queues.clone()
        };
        ProcessorConfig {
            concurrency: self.concurrency,
            queues,
            ..Default::default()
        }
    }
}

/// Parse `name=weight` pairs separated by commas, e.g.
/// `critical=6,default=3,low=1`.
pub fn parse_queue_weights(raw: &str) -> Result<HashMap<String, u32>> {
    let mut weights = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, weight) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("queue weight {pair:?} is not name=weight")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config(format!("queue weight {pair:?} has no name")));
        }
        let weight: u32 = weight
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("queue weight {pair:?} is not a number")))?;
        weights.insert(name.to_string(), weight);
    }
    Ok(weights)
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
