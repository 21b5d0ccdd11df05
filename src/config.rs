//! Configuration for the demo server
//!
//! Defaults can be overridden with `APP__`-prefixed environment variables,
//! e.g. `APP__PORT=9000` or `APP__METRICS__ACCOUNTS__PROM=secret`. Nested keys
//! are lowercased by the environment source, usernames included.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::collections::HashMap;

use crate::api::middleware::DEFAULT_METRICS_PATH;
use crate::auth::BasicAuthAccounts;
use crate::metrics::MetricsRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prefix of every request metric name
    pub subsystem: String,
    /// Scrape endpoint path
    pub path: String,
    /// Summary quantiles; exporter defaults when empty
    #[serde(default)]
    pub quantiles: Vec<f64>,
    /// Basic auth accounts for the scrape endpoint; open when empty
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

impl AppConfig {
    /// Load from defaults and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("APP"))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("port", 8080)?
            .set_default("metrics.subsystem", "http")?
            .set_default("metrics.path", DEFAULT_METRICS_PATH)?
            .add_source(
                env.separator("__")
                    .list_separator(",")
                    .with_list_parse_key("metrics.quantiles")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl MetricsConfig {
    pub fn registry(&self) -> crate::Result<MetricsRegistry> {
        if self.quantiles.is_empty() {
            Ok(MetricsRegistry::new())
        } else {
            MetricsRegistry::with_quantiles(&self.quantiles)
        }
    }

    /// `None` when the scrape endpoint should stay open
    pub fn accounts(&self) -> crate::Result<Option<BasicAuthAccounts>> {
        if self.accounts.is_empty() {
            return Ok(None);
        }
        BasicAuthAccounts::new(self.accounts.clone()).map(Some)
    }
}
