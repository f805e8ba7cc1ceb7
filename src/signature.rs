//! # Signature Module
//!
//! Declared parameter lists and the registration-time analyzer that checks them.
//!
//! ## Overview
//!
//! A [`Signature`] is the ordered list of `(name, type, field)` triples a
//! callable declares. [`SignatureAnalyzer::analyze`] validates it once per
//! callable and caches the result by [`CallableId`]:
//!
//! - a parameter without a field must be a request or handler-instance parameter
//! - request and instance parameters must not carry a field
//! - parameter names are unique, class attributes included
//! - multi-valued sources need a list-compatible type
//! - `sync_to_thread` is only meaningful on a synchronous body
//!
//! For class-based handlers the declaring class's attributes are appended as
//! implicit parameters that are resolved once per request and attached to the
//! handler instance.
//!
//! ```rust
//! use brrtbind::field::Field;
//! use brrtbind::signature::Signature;
//! use brrtbind::types::ParamType;
//!
//! let sig = Signature::new()
//!     .request("req")
//!     .param("uid", ParamType::Integer, Field::query().ge(1).build().unwrap());
//! assert_eq!(sig.params().len(), 2);
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::callable::{Callable, CallableId};
use crate::error::ConfigurationError;
use crate::field::Field;
use crate::types::ParamType;

/// One declared parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
    pub field: Option<Field>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: ParamType, field: Option<Field>) -> Self {
        Param {
            name: name.into(),
            ty,
            field,
        }
    }
}

/// Ordered parameter list of a callable.
#[derive(Clone, Debug, Default)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parameter described by `field`.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, ty: ParamType, field: Field) -> Self {
        self.params.push(Param::new(name, ty, Some(field)));
        self
    }

    /// A parameter receiving the framework request object.
    #[must_use]
    pub fn request(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::new(name, ParamType::Request, None));
        self
    }

    /// A parameter receiving the handler instance of the current request.
    #[must_use]
    pub fn instance(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::new(name, ParamType::HandlerInstance, None));
        self
    }

    /// A parameter with no field descriptor. Only valid for the special types.
    #[must_use]
    pub fn bare(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(Param::new(name, ty, None));
        self
    }

    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

/// Validated view of a callable's signature.
#[derive(Debug)]
pub struct AnalyzedSignature {
    pub params: Vec<Param>,
    /// Class attributes of a class-based handler, empty otherwise.
    pub class_attributes: Vec<Param>,
}

/// Validates signatures and caches the result per callable.
pub struct SignatureAnalyzer {
    cache: DashMap<CallableId, Arc<AnalyzedSignature>>,
    enabled: bool,
}

impl SignatureAnalyzer {
    /// # Arguments
    ///
    /// * `enabled` - Cache analyses by callable identity
    pub fn new(enabled: bool) -> Self {
        SignatureAnalyzer {
            cache: DashMap::new(),
            enabled,
        }
    }

    /// Analyze `callable`, reusing a previous result for the same identity.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found in the parameter list.
    pub fn analyze(&self, callable: &Callable) -> Result<Arc<AnalyzedSignature>, ConfigurationError> {
        if self.enabled {
            if let Some(hit) = self.cache.get(&callable.id()) {
                return Ok(Arc::clone(hit.value()));
            }
        }
        let analyzed = Arc::new(analyze_uncached(callable)?);
        debug!(
            callable = %callable.name(),
            params = analyzed.params.len(),
            class_attributes = analyzed.class_attributes.len(),
            "Signature analyzed"
        );
        if self.enabled {
            self.cache.insert(callable.id(), Arc::clone(&analyzed));
        }
        Ok(analyzed)
    }

    /// Number of cached analyses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl Default for SignatureAnalyzer {
    fn default() -> Self {
        Self::new(true)
    }
}

fn analyze_uncached(callable: &Callable) -> Result<AnalyzedSignature, ConfigurationError> {
    let name = callable.name();
    if callable.is_sync_to_thread() && (callable.is_async() || callable.is_scoped()) {
        return Err(ConfigurationError::SyncToThreadOnAsync {
            callable: name.to_string(),
        });
    }

    let params = callable.signature().params().to_vec();
    let class_attributes = callable
        .class()
        .map(|c| c.attributes().to_vec())
        .unwrap_or_default();

    let mut seen: Vec<&str> = Vec::with_capacity(params.len() + class_attributes.len());
    for param in params.iter().chain(class_attributes.iter()) {
        if seen.contains(&param.name.as_str()) {
            return Err(ConfigurationError::DuplicateParameter {
                callable: name.to_string(),
                param: param.name.clone(),
            });
        }
        seen.push(&param.name);
        check_param(name, param)?;
    }

    Ok(AnalyzedSignature {
        params,
        class_attributes,
    })
}

fn check_param(callable: &str, param: &Param) -> Result<(), ConfigurationError> {
    match (&param.ty, &param.field) {
        (ParamType::Request, Some(_)) => Err(ConfigurationError::FieldOnSpecialParameter {
            callable: callable.to_string(),
            param: param.name.clone(),
            what: "request",
        }),
        (ParamType::HandlerInstance, Some(_)) => Err(ConfigurationError::FieldOnSpecialParameter {
            callable: callable.to_string(),
            param: param.name.clone(),
            what: "instance",
        }),
        (ParamType::Request | ParamType::HandlerInstance, None) => Ok(()),
        (_, None) => Err(ConfigurationError::UnresolvableParameter {
            callable: callable.to_string(),
            param: param.name.clone(),
        }),
        (ty, Some(field)) => {
            if field.kind().is_multi() && !accepts_list(ty) {
                return Err(ConfigurationError::InvalidFieldType {
                    callable: callable.to_string(),
                    param: param.name.clone(),
                    kind: field.kind(),
                    ty: ty.type_name(),
                });
            }
            Ok(())
        }
    }
}

fn accepts_list(ty: &ParamType) -> bool {
    match ty {
        ParamType::Any | ParamType::Array(_) | ParamType::Model(_) => true,
        ParamType::Optional(inner) => accepts_list(inner),
        _ => false,
    }
}
