//! # Runtime Configuration Module
//!
//! Environment variable-based configuration of the binding engine.
//!
//! ## Environment Variables
//!
//! ### `BRRTR_BIND_TIP`
//!
//! Whether request-time errors carry a tip naming the handler, parameter and
//! source. Disable it for deployments that must not leak internal field names;
//! the structured error fields stay available either way.
//!
//! Default: on
//!
//! ### `BRRTR_SCHEMA_CACHE`
//!
//! Share compiled validators between parameters with identical schemas.
//!
//! Default: on
//!
//! ### `BRRTR_PLAN_CACHE`
//!
//! Cache signature analyses and dependency plans by callable identity.
//!
//! Default: on
//!
//! `off`, `false`, `no` and `0` (any case) disable a flag; anything else
//! enables it.
//!
//! ## Usage
//!
//! ```rust
//! use brrtbind::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("tips: {}", config.tip);
//! ```
//!
//! Routes can override the tip flag with `BindConfig::tip`.

use std::env;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Attach tips to request-time errors (default: true)
    pub tip: bool,
    /// Deduplicate compiled validators (default: true)
    pub schema_cache: bool,
    /// Cache signature analyses and dependency plans (default: true)
    pub plan_cache: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            tip: true,
            schema_cache: true,
            plan_cache: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map_or(true, |v| parse_flag(&v));
        RuntimeConfig {
            tip: flag("BRRTR_BIND_TIP"),
            schema_cache: flag("BRRTR_SCHEMA_CACHE"),
            plan_cache: flag("BRRTR_PLAN_CACHE"),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "off" | "false" | "no" | "0"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> RuntimeConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_enable_everything() {
        assert_eq!(from(&[]), RuntimeConfig::default());
        assert!(RuntimeConfig::default().tip);
    }

    #[test]
    fn test_disable_values() {
        let config = from(&[
            ("BRRTR_BIND_TIP", "off"),
            ("BRRTR_SCHEMA_CACHE", "FALSE"),
            ("BRRTR_PLAN_CACHE", " 0 "),
        ]);
        assert!(!config.tip);
        assert!(!config.schema_cache);
        assert!(!config.plan_cache);
    }

    #[test]
    fn test_other_values_enable() {
        let config = from(&[("BRRTR_BIND_TIP", "yes"), ("BRRTR_PLAN_CACHE", "1")]);
        assert!(config.tip);
        assert!(config.plan_cache);
    }
}
