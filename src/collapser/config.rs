//! Configuration for a request collapser.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, ErrorContext, Result};

/// Lifetime and visibility of a collapser instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One collapser per request context, torn down with the context.
    Request,
    /// One collapser for the whole process (or registry) lifetime.
    Global,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Request
    }
}

impl std::str::FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(Scope::Request),
            "global" => Ok(Scope::Global),
            other => Err(Error::configuration_with_context(
                format!("unknown collapser scope '{}'", other),
                ErrorContext::new()
                    .with_field_path("scope")
                    .with_details("expected 'request' or 'global'"),
            )),
        }
    }
}

/// Identity of one logical collapser: a key name within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollapsingKey {
    pub name: String,
    pub scope: Scope,
}

impl CollapsingKey {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }
}

impl std::fmt::Display for CollapsingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Configuration for the request collapser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapserConfig {
    /// Explicit collapser key; empty means "use the default key"
    pub collapser_key: String,

    /// Lifetime policy of the collapser instance
    pub scope: Scope,

    /// Time after the first submission at which an open window seals
    pub window_duration_ms: u64,

    /// Seal a window as soon as it holds this many requests (unbounded if unset)
    pub max_batch_size: Option<usize>,

    /// Allow the batch command to substitute a fallback result on failure
    pub fallback_enabled: bool,
}

impl Default for CollapserConfig {
    fn default() -> Self {
        Self {
            collapser_key: String::new(),
            scope: Scope::Request,
            window_duration_ms: 10,
            max_batch_size: None,
            fallback_enabled: false,
        }
    }
}

impl CollapserConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            collapser_key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the window length, rounded up to whole milliseconds.
    pub fn with_window_duration(mut self, window: Duration) -> Self {
        self.window_duration_ms = window.as_nanos().div_ceil(1_000_000) as u64;
        self
    }

    pub fn with_window_duration_ms(mut self, ms: u64) -> Self {
        self.window_duration_ms = ms;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }

    /// Resolve the effective key name.
    ///
    /// The explicit key wins, then `default_key`; if both are empty a unique
    /// key is generated so unrelated call sites never collapse together.
    pub fn resolve_key(&self, default_key: &str) -> String {
        if !self.collapser_key.is_empty() {
            self.collapser_key.clone()
        } else if !default_key.is_empty() {
            default_key.to_string()
        } else {
            format!("collapser-{}", uuid::Uuid::new_v4())
        }
    }

    /// Check the config for values the collapser cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.window_duration_ms == 0 {
            return Err(Error::configuration_with_context(
                "window duration must be positive",
                ErrorContext::new()
                    .with_field_path("window_duration_ms")
                    .with_source("collapser_config"),
            ));
        }
        if self.max_batch_size == Some(0) {
            return Err(Error::configuration_with_context(
                "max batch size must be at least 1",
                ErrorContext::new()
                    .with_field_path("max_batch_size")
                    .with_source("collapser_config"),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid JSON collapser config: {}", e),
                ErrorContext::new().with_source("collapser_config"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid YAML collapser config: {}", e),
                ErrorContext::new().with_source("collapser_config"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COLLAPSER_KEY") {
            config.collapser_key = val;
        }

        if let Ok(val) = std::env::var("COLLAPSER_SCOPE") {
            config.scope = val.parse()?;
        }

        if let Ok(val) = std::env::var("COLLAPSER_WINDOW_MS") {
            config.window_duration_ms = parse_env("COLLAPSER_WINDOW_MS", &val)?;
        }

        if let Ok(val) = std::env::var("COLLAPSER_MAX_BATCH_SIZE") {
            config.max_batch_size = Some(parse_env("COLLAPSER_MAX_BATCH_SIZE", &val)?);
        }

        if let Ok(val) = std::env::var("COLLAPSER_FALLBACK_ENABLED") {
            config.fallback_enabled = parse_env("COLLAPSER_FALLBACK_ENABLED", &val)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| {
        Error::configuration_with_context(
            format!("invalid value '{}' for {}", val, name),
            ErrorContext::new()
                .with_field_path(name)
                .with_details(e.to_string()),
        )
    })
}
