//! Runner configuration.
//!
//! Loaded from YAML, adjusted by CLI flags, then overridden per scenario by
//! its `setup` block.

use crate::browser::BrowserConfig;
use crate::http::DEFAULT_HTTP_TIMEOUT_MS;
use crate::locator::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
use crate::result::{EnsayoError, EnsayoResult};
use crate::scenario::{ExecutionMode, ScenarioSetup};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the bearer token by default
pub const DEFAULT_TOKEN_ENV: &str = "ENSAYO_API_TOKEN";

/// Configuration shared by every scenario in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Application URL; relative navigations resolve against it
    pub base_url: String,
    /// API URL (None = same as `base_url`)
    pub api_url: Option<String>,
    /// Environment variable holding the bearer token
    pub token_env: String,
    /// Step timeout in milliseconds
    pub default_timeout_ms: u64,
    /// DOM assertion timeout in milliseconds
    pub assertion_timeout_ms: u64,
    /// Navigation timeout in milliseconds
    pub navigation_timeout_ms: u64,
    /// HTTP request timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Window a gate condition gets to become true
    pub gate_timeout_ms: u64,
    /// Poll interval for every wait
    pub poll_interval_ms: u64,
    /// Scenarios run concurrently
    pub concurrency: usize,
    /// Browser launch options
    pub browser: BrowserConfig,
    /// Where screenshots and DOM snapshots are written
    pub artifacts_dir: Option<PathBuf>,
    /// Forces every scenario into one execution mode
    pub mode_override: Option<ExecutionMode>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_url: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            assertion_timeout_ms: DEFAULT_TIMEOUT_MS,
            navigation_timeout_ms: 10_000,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            gate_timeout_ms: 1000,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            concurrency: 4,
            browser: BrowserConfig::default(),
            artifacts_dir: None,
            mode_override: None,
        }
    }
}

impl RunnerConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load_file(path: &Path) -> EnsayoResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .map_err(|e| EnsayoError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the application URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the API URL
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    /// Set the token environment variable
    #[must_use]
    pub fn with_token_env(mut self, name: impl Into<String>) -> Self {
        self.token_env = name.into();
        self
    }

    /// Set the step timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the DOM assertion timeout
    #[must_use]
    pub const fn with_assertion_timeout(mut self, timeout_ms: u64) -> Self {
        self.assertion_timeout_ms = timeout_ms;
        self
    }

    /// Set the HTTP timeout
    #[must_use]
    pub const fn with_http_timeout(mut self, timeout_ms: u64) -> Self {
        self.http_timeout_ms = timeout_ms;
        self
    }

    /// Set the gate window
    #[must_use]
    pub const fn with_gate_timeout(mut self, timeout_ms: u64) -> Self {
        self.gate_timeout_ms = timeout_ms;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set suite concurrency
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set browser options
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserConfig) -> Self {
        self.browser = browser;
        self
    }

    /// Set the artifacts directory
    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    /// Force an execution mode on every scenario
    #[must_use]
    pub const fn with_mode_override(mut self, mode: ExecutionMode) -> Self {
        self.mode_override = Some(mode);
        self
    }

    /// Base URL for HTTP steps
    #[must_use]
    pub fn api_base(&self) -> &str {
        self.api_url.as_deref().unwrap_or(&self.base_url)
    }

    /// Step timeout as a duration
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Poll interval as a duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject configurations that cannot run
    ///
    /// # Errors
    ///
    /// Returns a config error naming the offending field
    pub fn validate(&self) -> EnsayoResult<()> {
        for (field, url) in [("base_url", Some(&self.base_url)), ("api_url", self.api_url.as_ref())] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(EnsayoError::config(format!(
                        "{field} must be an http(s) URL, got {url:?}"
                    )));
                }
            }
        }
        if self.concurrency == 0 {
            return Err(EnsayoError::config("concurrency must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(EnsayoError::config("poll_interval_ms must be at least 1"));
        }
        if self.token_env.trim().is_empty() {
            return Err(EnsayoError::config("token_env must name a variable"));
        }
        Ok(())
    }

    /// Apply a scenario's setup overrides
    #[must_use]
    pub fn merged(&self, setup: &ScenarioSetup) -> Self {
        let mut config = self.clone();
        if let Some(ref url) = setup.base_url {
            config.base_url.clone_from(url);
        }
        if let Some(ref url) = setup.api_url {
            config.api_url = Some(url.clone());
        }
        if let Some(headless) = setup.headless {
            config.browser.headless = headless;
        }
        if let Some(ms) = setup.default_timeout_ms {
            config.default_timeout_ms = ms;
        }
        if let Some(ms) = setup.assertion_timeout_ms {
            config.assertion_timeout_ms = ms;
        }
        if let Some(ms) = setup.http_timeout_ms {
            config.http_timeout_ms = ms;
        }
        config
    }

    /// Bearer token from the environment; empty counts as unset
    #[must_use]
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}
