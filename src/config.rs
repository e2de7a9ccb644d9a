//! Start-up configuration.
//!
//! Merge order, later wins: field defaults, `dispatcher.toml` in the working
//! directory, the bare `MONGODB_URI` / `SPARKPOST_API_KEY` variables, then
//! any `DISPATCHER_*` variable (e.g. `DISPATCHER_TICK_INTERVAL_SECS`).

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::dispatch::DispatchOptions;
use crate::error::Error;
use crate::mailer::sparkpost::DEFAULT_BASE_URL;

pub const CONFIG_FILE: &str = "dispatcher.toml";

#[derive(Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(deserialize_with = "secret")]
    pub sparkpost_api_key: SecretString,
    #[serde(default = "default_sparkpost_base_url")]
    pub sparkpost_base_url: String,
    #[serde(default = "default_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub pacing_interval_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database_name() -> String {
    "campaigns".to_string()
}

fn default_sparkpost_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl DispatcherConfig {
    pub fn load() -> Result<DispatcherConfig, Error> {
        DispatcherConfig::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<DispatcherConfig, Error> {
        DispatcherConfig::from_figment(DispatcherConfig::figment(path))
    }

    /// The merge chain before extraction, so callers can add providers.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::raw().only(&["MONGODB_URI", "SPARKPOST_API_KEY"]))
            .merge(Env::prefixed("DISPATCHER_"))
    }

    pub fn from_figment(figment: Figment) -> Result<DispatcherConfig, Error> {
        let config: DispatcherConfig = figment.extract()?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        use secrecy::ExposeSecret;

        let problem = if self.sparkpost_api_key.expose_secret().trim().is_empty() {
            Some("sparkpost_api_key must not be empty")
        } else if self.tick_interval_secs == 0 {
            Some("tick_interval_secs must be greater than zero")
        } else if self.pacing_interval_secs == 0 {
            Some("pacing_interval_secs must be greater than zero")
        } else if self.http_timeout_secs == 0 {
            Some("http_timeout_secs must be greater than zero")
        } else {
            None
        };

        match problem {
            Some(problem) => Err(figment::Error::from(problem.to_string()).into()),
            None => Ok(()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            pacing_interval: Duration::from_secs(self.pacing_interval_secs),
        }
    }
}

impl Debug for DispatcherConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        // the mongodb uri may carry credentials too
        f.debug_struct("DispatcherConfig")
            .field("database_name", &self.database_name)
            .field("sparkpost_base_url", &self.sparkpost_base_url)
            .field("tick_interval_secs", &self.tick_interval_secs)
            .field("pacing_interval_secs", &self.pacing_interval_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}
