//! Rate Limit Configuration
//!
//! Limits and durations for the two per-identity admission windows.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default short-window capacity (admissions per short window)
pub const DEFAULT_SHORT_WINDOW_LIMIT: u32 = 1;
/// Default short-window duration in milliseconds
pub const DEFAULT_SHORT_WINDOW_MS: u64 = 1_000;
/// Default long-window capacity (admissions per long window)
pub const DEFAULT_LONG_WINDOW_LIMIT: u32 = 20;
/// Default long-window duration in milliseconds
pub const DEFAULT_LONG_WINDOW_MS: u64 = 60_000;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admissions allowed per short window
    pub short_window_limit: u32,

    /// Short window length in milliseconds
    pub short_window_duration_ms: u64,

    /// Admissions allowed per long window
    pub long_window_limit: u32,

    /// Long window length in milliseconds
    pub long_window_duration_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_window_limit: DEFAULT_SHORT_WINDOW_LIMIT,
            short_window_duration_ms: DEFAULT_SHORT_WINDOW_MS,
            long_window_limit: DEFAULT_LONG_WINDOW_LIMIT,
            long_window_duration_ms: DEFAULT_LONG_WINDOW_MS,
        }
    }
}

impl RateLimitConfig {
    /// Apply `TASKGATE_*` environment overrides, ignoring unparseable or zero values
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup` instead of the process environment
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = positive(&lookup, "TASKGATE_SHORT_WINDOW_LIMIT") {
            self.short_window_limit = limit;
        }
        if let Some(ms) = positive(&lookup, "TASKGATE_SHORT_WINDOW_MS") {
            self.short_window_duration_ms = ms;
        }
        if let Some(limit) = positive(&lookup, "TASKGATE_LONG_WINDOW_LIMIT") {
            self.long_window_limit = limit;
        }
        if let Some(ms) = positive(&lookup, "TASKGATE_LONG_WINDOW_MS") {
            self.long_window_duration_ms = ms;
        }
        self
    }

    /// Validate limits and durations
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.short_window_limit == 0 {
            anyhow::bail!("Short window limit must be > 0");
        }
        if self.long_window_limit == 0 {
            anyhow::bail!("Long window limit must be > 0");
        }
        if self.short_window_duration_ms == 0 {
            anyhow::bail!("Short window duration must be > 0 ms");
        }
        if self.long_window_duration_ms == 0 {
            anyhow::bail!("Long window duration must be > 0 ms");
        }
        Ok(())
    }

    pub fn short_window_duration(&self) -> Duration {
        Duration::from_millis(self.short_window_duration_ms)
    }

    pub fn long_window_duration(&self) -> Duration {
        Duration::from_millis(self.long_window_duration_ms)
    }
}

fn positive<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)?.parse::<T>().ok()?;
    (value > T::default()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.short_window_limit, 1);
        assert_eq!(config.long_window_limit, 20);
        assert_eq!(config.short_window_duration(), Duration::from_secs(1));
        assert_eq!(config.long_window_duration(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero() {
        let mut config = RateLimitConfig::default();
        config.short_window_limit = 0;
        assert!(config.validate().is_err());

        let mut config = RateLimitConfig::default();
        config.long_window_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: RateLimitConfig = toml::from_str("long_window_limit = 5").unwrap();
        assert_eq!(config.long_window_limit, 5);
        assert_eq!(config.short_window_limit, DEFAULT_SHORT_WINDOW_LIMIT);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TASKGATE_LONG_WINDOW_LIMIT", "7"),
            ("TASKGATE_SHORT_WINDOW_MS", "0"), // ignored
            ("TASKGATE_SHORT_WINDOW_LIMIT", "many"), // ignored
        ]
        .into_iter()
        .collect();

        let config = RateLimitConfig::default()
            .apply_overrides_from(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.long_window_limit, 7);
        assert_eq!(config.short_window_duration_ms, DEFAULT_SHORT_WINDOW_MS);
        assert_eq!(config.short_window_limit, DEFAULT_SHORT_WINDOW_LIMIT);
    }
}
