use serde::{Deserialize, Serialize};

use crate::error::{Result, RotaError};

/// Rotation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationMethod {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
    RateLimited,
}

impl RotationMethod {
    /// Parse a method name. Underscore spellings are accepted as equivalent
    /// to the canonical hyphenated form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "round-robin" | "round_robin" | "roundrobin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "least-connections" | "least_connections" | "least_conn" => {
                Some(Self::LeastConnections)
            }
            "rate-limited" | "rate_limited" | "ratelimited" => Some(Self::RateLimited),
            _ => None,
        }
    }

    /// Canonical (hyphenated) method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Random => "random",
            Self::LeastConnections => "least-connections",
            Self::RateLimited => "rate-limited",
        }
    }
}

impl std::fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rate-limited method parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitedSettings {
    /// Maximum successful requests per upstream within the window.
    /// Zero pauses the method: every select reports all-at-limit.
    pub max_requests_per_window: i64,
    /// Trailing window length in seconds. Must be positive.
    pub window_seconds: i64,
}

impl Default for RateLimitedSettings {
    fn default() -> Self {
        Self {
            max_requests_per_window: 30,
            window_seconds: 60,
        }
    }
}

/// Proxy rotation configuration, stored as a single JSONB settings row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationSettings {
    /// Rotation method: round-robin, random, least-connections, rate-limited
    pub method: String,
    /// Rate-limited method parameters
    #[serde(default)]
    pub rate_limited: RateLimitedSettings,
    /// Demote upstreams to unhealthy on connect/timeout failures
    pub remove_unhealthy: bool,
    /// Retry the next upstream on failure instead of surfacing the error
    pub fallback: bool,
    /// Per-attempt timeout in seconds
    pub timeout: i64,
    /// Attempt budget per dispatch
    pub retries: u32,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            method: RotationMethod::RoundRobin.as_str().to_string(),
            rate_limited: RateLimitedSettings::default(),
            remove_unhealthy: true,
            fallback: true,
            timeout: 30,
            retries: 3,
        }
    }
}

impl RotationSettings {
    /// Parse the configured method
    pub fn method_enum(&self) -> Option<RotationMethod> {
        RotationMethod::parse(&self.method)
    }

    /// Validate the settings, returning the parsed method.
    ///
    /// Rejected: unknown methods, non-positive window, negative limit,
    /// non-positive timeout, zero retries. A zero limit is allowed (it pauses
    /// the rate-limited method without stopping the process).
    pub fn validate(&self) -> Result<RotationMethod> {
        let method = self
            .method_enum()
            .ok_or_else(|| RotaError::InvalidSettings(format!("unknown method: {}", self.method)))?;

        if method == RotationMethod::RateLimited {
            if self.rate_limited.window_seconds <= 0 {
                return Err(RotaError::InvalidSettings(
                    "window_seconds must be positive".to_string(),
                ));
            }
            if self.rate_limited.max_requests_per_window < 0 {
                return Err(RotaError::InvalidSettings(
                    "max_requests_per_window must not be negative".to_string(),
                ));
            }
        }

        if self.timeout <= 0 {
            return Err(RotaError::InvalidSettings(
                "timeout must be positive".to_string(),
            ));
        }
        if self.retries == 0 {
            return Err(RotaError::InvalidSettings(
                "retries must be positive".to_string(),
            ));
        }

        Ok(method)
    }

    /// Rewrite the method to its canonical spelling
    pub fn canonicalize(&mut self) {
        if let Some(method) = self.method_enum() {
            self.method = method.as_str().to_string();
        }
    }

    /// True when a settings change requires rebuilding the active selector
    pub fn selector_changed(&self, other: &RotationSettings) -> bool {
        self.method_enum() != other.method_enum() || self.rate_limited != other.rate_limited
    }
}

/// Settings database record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SettingsRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Settings key constants
pub mod keys {
    pub const ROTATION: &str = "rotation";
}
