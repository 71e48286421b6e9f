//! Runtime database configuration
//!
//! `DatabaseConfig` is built once, before the [`Database`](crate::services::Database)
//! is created, and stays immutable for the database lifetime. Values come
//! from the defaults below or from environment variables via
//! [`DatabaseConfig::from_env`].

use std::env;

/// Environment variable overriding [`DatabaseConfig::propagate_on_update`]
pub const ENV_PROPAGATE_ON_UPDATE: &str = "DENORM_PROPAGATE_ON_UPDATE";

/// Environment variable overriding [`DatabaseConfig::event_capacity`]
pub const ENV_EVENT_CAPACITY: &str = "DENORM_EVENT_CAPACITY";

/// Broadcast capacity used when nothing else is configured
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Whether `update` refreshes embedded copies unless the call says otherwise
    pub propagate_on_update: bool,

    /// Domain event channel capacity (lagging subscribers lose older events)
    pub event_capacity: usize,

    /// Reject stored fields unknown to the schema when lazily validating
    pub strict_lazy_validation: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            propagate_on_update: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            strict_lazy_validation: true,
        }
    }
}

impl DatabaseConfig {
    /// Defaults overridden by the `DENORM_*` environment variables.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PROPAGATE_ON_UPDATE) {
            match parse_flag(&raw) {
                Some(flag) => config.propagate_on_update = flag,
                None => tracing::warn!(
                    "Ignoring {}={:?}: expected true/false",
                    ENV_PROPAGATE_ON_UPDATE,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(ENV_EVENT_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.event_capacity = capacity,
                _ => tracing::warn!(
                    "Ignoring {}={:?}: expected a positive integer",
                    ENV_EVENT_CAPACITY,
                    raw
                ),
            }
        }

        config
    }

    pub fn with_propagate_on_update(mut self, propagate: bool) -> Self {
        self.propagate_on_update = propagate;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_strict_lazy_validation(mut self, strict: bool) -> Self {
        self.strict_lazy_validation = strict;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
