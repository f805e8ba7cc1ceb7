//! # Schema Validator Cache Module
//!
//! Thread-safe cache of compiled JSON Schema validators.
//!
//! ## Overview
//!
//! Every scalar or model rule in a resolution plan validates its value against a
//! schema derived from the declared type and the field's constraints. Schemas are
//! compiled while the plan is built and shared through this cache, so identical
//! schemas (the same `{"type": "integer", "minimum": 1}` declared on many
//! routes) are compiled once. Nothing is compiled while a request is served.
//!
//! ## Cache Key Structure
//!
//! The key is the canonical JSON text of the schema. `serde_json` keeps object
//! keys sorted, so structurally equal schemas share a key.
//!
//! ## Configuration
//!
//! The cache can be disabled via `BRRTR_SCHEMA_CACHE=off`; each rule then owns
//! its own compiled validator.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::Validator;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ConfigurationError, ValidationIssue};

/// A compiled validator together with the schema it was built from.
pub struct CompiledSchema {
    schema: Value,
    validator: Validator,
}

impl CompiledSchema {
    /// Compile `schema`.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidSchema`] naming `param` when the schema is invalid.
    pub fn compile(param: &str, schema: Value) -> Result<Self, ConfigurationError> {
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| ConfigurationError::InvalidSchema {
                param: param.to_string(),
                reason: e.to_string(),
            })?;
        Ok(CompiledSchema { schema, validator })
    }

    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    #[must_use]
    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }

    /// Validate `value`, reporting every failure at `location`.
    #[must_use]
    pub fn issues(&self, value: &Value, location: &[String]) -> Vec<ValidationIssue> {
        self.validator
            .iter_errors(value)
            .map(|e| ValidationIssue::new(location.to_vec(), e.to_string()))
            .collect()
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Thread-safe cache for compiled JSON Schema validators
///
/// # Example
///
/// ```rust
/// use brrtbind::validator_cache::SchemaCache;
/// use serde_json::json;
///
/// let cache = SchemaCache::new(true);
/// let a = cache.get_or_compile("uid", &json!({"type": "integer"})).unwrap();
/// let b = cache.get_or_compile("age", &json!({"type": "integer"})).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// assert_eq!(cache.size(), 1);
/// ```
#[derive(Clone)]
pub struct SchemaCache {
    cache: Arc<RwLock<HashMap<String, Arc<CompiledSchema>>>>,
    enabled: bool,
}

impl SchemaCache {
    /// Create a new validator cache
    ///
    /// # Arguments
    ///
    /// * `enabled` - Whether the cache should be active (from RuntimeConfig)
    pub fn new(enabled: bool) -> Self {
        info!(enabled = enabled, "Initializing JSON Schema validator cache");
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            enabled,
        }
    }

    /// Get a cached validator or compile and cache a new one
    ///
    /// # Arguments
    ///
    /// * `param` - Parameter the schema belongs to, used in errors and logs
    /// * `schema` - JSON Schema definition to compile (if not cached)
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidSchema`] when compilation fails.
    pub fn get_or_compile(
        &self,
        param: &str,
        schema: &Value,
    ) -> Result<Arc<CompiledSchema>, ConfigurationError> {
        if !self.enabled {
            return CompiledSchema::compile(param, schema.clone()).map(Arc::new);
        }

        let key = schema.to_string();
        if let Some(hit) = self.cache.read().get(&key) {
            debug!(param = param, cache_key = %key, "Schema validator cache hit");
            return Ok(Arc::clone(hit));
        }

        let compiled = Arc::new(CompiledSchema::compile(param, schema.clone())?);
        let mut cache = self.cache.write();
        // Another thread may have compiled while we waited for the write lock
        if let Some(existing) = cache.get(&key) {
            return Ok(Arc::clone(existing));
        }
        cache.insert(key.clone(), Arc::clone(&compiled));
        debug!(
            param = param,
            cache_key = %key,
            cache_size = cache.len(),
            "Schema validator compiled and cached"
        );
        Ok(compiled)
    }

    /// Number of validators currently cached
    #[must_use]
    pub fn size(&self) -> usize {
        self.cache.read().len()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Clear all cached validators
    pub fn clear(&self) {
        let mut cache = self.cache.write();
        let dropped = cache.len();
        cache.clear();
        info!(dropped = dropped, "Schema validator cache cleared");
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disabled_cache_compiles_each_time() {
        let cache = SchemaCache::new(false);
        let a = cache.get_or_compile("uid", &json!({"type": "integer"})).unwrap();
        let b = cache.get_or_compile("uid", &json!({"type": "integer"})).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_invalid_schema_is_configuration_error() {
        let cache = SchemaCache::default();
        let err = cache
            .get_or_compile("uid", &json!({"type": "integer", "minimum": "one"}))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSchema { ref param, .. } if param == "uid"));
    }

    #[test]
    fn test_issues_carry_location() {
        let compiled =
            CompiledSchema::compile("age", json!({"type": "integer", "minimum": 0})).unwrap();
        assert!(compiled.is_valid(&json!(3)));
        let loc = vec!["query".to_string(), "age".to_string()];
        let issues = compiled.issues(&json!(-1), &loc);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path(), "query.age");
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = SchemaCache::default();
        cache.get_or_compile("a", &json!({"type": "string"})).unwrap();
        assert_eq!(cache.size(), 1);
        cache.clear();
        assert_eq!(cache.size(), 0);
    }
}
