use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_FILE: &str = "contrib-census.toml";
/// Prefix of environment overrides, e.g. `CENSUS_MAX_RETRIES=6`.
pub const ENV_PREFIX: &str = "CENSUS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub graphql_url: String,
    pub user_agent: String,
    pub per_page: u32,
    pub max_retries: usize,
    pub request_timeout_secs: u64,
    pub repo_attempts: usize,
    pub repo_retry_delay_secs: u64,
    pub start_year: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            graphql_url: "https://api.github.com/graphql".to_string(),
            user_agent: "contrib-census".to_string(),
            per_page: 100,
            max_retries: 4,
            request_timeout_secs: 30,
            repo_attempts: 2,
            repo_retry_delay_secs: 5,
            start_year: 2017,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file, then `CENSUS_*` environment variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.per_page) {
            bail!("per_page must be between 1 and 100, got {}", self.per_page);
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.repo_attempts == 0 {
            bail!("repo_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn repo_retry_delay(&self) -> Duration {
        Duration::from_secs(self.repo_retry_delay_secs)
    }
}
