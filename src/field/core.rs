use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::callable::Callable;
use crate::error::ConfigurationError;
use crate::request::Mapping;

/// Request source (or dependency) a parameter value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Query,
    Header,
    Body,
    Cookie,
    Path,
    Form,
    MultiForm,
    MultiQuery,
    File,
    Depends,
}

impl FieldKind {
    /// Lowercase name used in error locations.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Query => "query",
            FieldKind::Header => "header",
            FieldKind::Body => "body",
            FieldKind::Cookie => "cookie",
            FieldKind::Path => "path",
            FieldKind::Form => "form",
            FieldKind::MultiForm => "multiform",
            FieldKind::MultiQuery => "multiquery",
            FieldKind::File => "file",
            FieldKind::Depends => "depends",
        }
    }

    /// Whether values of this kind come from the request adapter.
    #[must_use]
    pub fn is_request_source(&self) -> bool {
        !matches!(self, FieldKind::Depends)
    }

    /// Whether the source yields a list of values per key.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, FieldKind::MultiQuery | FieldKind::MultiForm)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces a fresh default value each time it is called.
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Builds the error raised when a value is missing. Receives the parameter name
/// and the source kind.
pub type NotFoundHandler = Arc<dyn Fn(&str, FieldKind) -> anyhow::Error + Send + Sync>;

/// Result of looking a field up in a raw request mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The key was present in the request.
    Value(Value),
    /// The key was absent and the default (or default factory) applied.
    Default(Value),
    /// The key was absent and no default applies. Distinct from `null`.
    Missing,
}

impl Lookup {
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }
}

/// Target of a `Depends` field.
#[derive(Clone)]
pub enum DependsTarget {
    Direct(Callable),
    /// Resolved when the plan is built; lets dependencies refer to each other.
    Lazy(fn() -> Callable),
}

impl DependsTarget {
    #[must_use]
    pub fn callable(&self) -> Callable {
        match self {
            DependsTarget::Direct(c) => c.clone(),
            DependsTarget::Lazy(f) => f(),
        }
    }
}

impl fmt::Debug for DependsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependsTarget::Direct(c) => f.debug_tuple("Direct").field(&c.name()).finish(),
            DependsTarget::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

#[derive(Clone, Default)]
enum DefaultValue {
    #[default]
    None,
    Value(Value),
    Factory(DefaultFactory),
}

/// Immutable field descriptor attached to a parameter.
#[derive(Clone)]
pub struct Field {
    kind: FieldKind,
    alias: Option<String>,
    default: DefaultValue,
    constraints: Map<String, Value>,
    description: Option<String>,
    example: Option<Value>,
    raw_return: bool,
    openapi_include: bool,
    not_found: Option<NotFoundHandler>,
    target: Option<DependsTarget>,
}

impl Field {
    pub fn query() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Query)
    }

    pub fn header() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Header)
    }

    pub fn body() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Body)
    }

    pub fn cookie() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Cookie)
    }

    pub fn path() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Path)
    }

    pub fn form() -> FieldBuilder {
        FieldBuilder::new(FieldKind::Form)
    }

    pub fn multi_form() -> FieldBuilder {
        FieldBuilder::new(FieldKind::MultiForm)
    }

    pub fn multi_query() -> FieldBuilder {
        FieldBuilder::new(FieldKind::MultiQuery)
    }

    pub fn file() -> FieldBuilder {
        FieldBuilder::new(FieldKind::File)
    }

    /// Builder of a field with an arbitrary request kind.
    pub fn of(kind: FieldKind) -> FieldBuilder {
        FieldBuilder::new(kind)
    }

    /// A field whose value is the return value of `callable`.
    pub fn depends(callable: &Callable) -> Field {
        Field::depends_on(DependsTarget::Direct(callable.clone()))
    }

    /// A `Depends` field whose target is looked up when the plan is built.
    pub fn depends_lazy(target: fn() -> Callable) -> Field {
        Field::depends_on(DependsTarget::Lazy(target))
    }

    fn depends_on(target: DependsTarget) -> Field {
        Field {
            kind: FieldKind::Depends,
            alias: None,
            default: DefaultValue::None,
            constraints: Map::new(),
            description: None,
            example: None,
            raw_return: false,
            openapi_include: true,
            not_found: None,
            target: Some(target),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    #[must_use]
    pub fn constraints(&self) -> &Map<String, Value> {
        &self.constraints
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn example(&self) -> Option<&Value> {
        self.example.as_ref()
    }

    #[must_use]
    pub fn raw_return(&self) -> bool {
        self.raw_return
    }

    #[must_use]
    pub fn openapi_include(&self) -> bool {
        self.openapi_include
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        !matches!(self.default, DefaultValue::None)
    }

    pub fn not_found_handler(&self) -> Option<&NotFoundHandler> {
        self.not_found.as_ref()
    }

    pub fn depends_target(&self) -> Option<&DependsTarget> {
        self.target.as_ref()
    }

    /// A fresh default value, if one is configured.
    #[must_use]
    pub fn default_value(&self) -> Option<Value> {
        match &self.default {
            DefaultValue::None => None,
            DefaultValue::Value(v) => Some(v.clone()),
            DefaultValue::Factory(f) => Some(f()),
        }
    }

    /// Key read from the request mapping for parameter `param`.
    ///
    /// The alias wins when set. Header keys default to the parameter name with
    /// underscores turned into dashes (`user_agent` → `user-agent`).
    #[must_use]
    pub fn request_key(&self, param: &str) -> String {
        match (&self.alias, self.kind) {
            (Some(alias), _) => alias.clone(),
            (None, FieldKind::Header) => param.replace('_', "-"),
            (None, _) => param.to_string(),
        }
    }

    /// Look `key` up in the raw mapping, falling back to the default.
    ///
    /// Header lookups ignore ASCII case.
    #[must_use]
    pub fn request_value_handle(&self, raw: &Mapping, key: &str) -> Lookup {
        match self.raw_value(raw, key) {
            Some(value) => Lookup::Value(value),
            None => self.default_value().map_or(Lookup::Missing, Lookup::Default),
        }
    }

    /// The value stored under `key`, ignoring any default.
    #[must_use]
    pub fn raw_value(&self, raw: &Mapping, key: &str) -> Option<Value> {
        match self.kind {
            FieldKind::Header => raw
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone()),
            _ => raw.get(key).cloned(),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let default = match &self.default {
            DefaultValue::None => "none",
            DefaultValue::Value(_) => "value",
            DefaultValue::Factory(_) => "factory",
        };
        f.debug_struct("Field")
            .field("kind", &self.kind)
            .field("alias", &self.alias)
            .field("default", &default)
            .field("constraints", &self.constraints)
            .field("raw_return", &self.raw_return)
            .field("openapi_include", &self.openapi_include)
            .field("not_found", &self.not_found.is_some())
            .field("target", &self.target)
            .finish()
    }
}

/// Builder for request fields. Conflicting options are reported by [`build`](Self::build).
#[derive(Clone)]
pub struct FieldBuilder {
    kind: FieldKind,
    alias: Option<String>,
    default: Option<Value>,
    default_factory: Option<DefaultFactory>,
    constraints: Map<String, Value>,
    description: Option<String>,
    example: Option<Value>,
    raw_return: bool,
    openapi_include: bool,
    not_found: Option<NotFoundHandler>,
}

impl FieldBuilder {
    fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            alias: None,
            default: None,
            default_factory: None,
            constraints: Map::new(),
            description: None,
            example: None,
            raw_return: false,
            openapi_include: true,
            not_found: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default_factory = Some(Arc::new(factory));
        self
    }

    /// Custom error raised instead of the value-not-found error.
    pub fn not_found<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, FieldKind) -> anyhow::Error + Send + Sync + 'static,
    {
        self.not_found = Some(Arc::new(handler));
        self
    }

    /// Shorthand for a not-found handler that raises a fixed message.
    pub fn not_found_message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.not_found(move |_, _| anyhow::anyhow!(message.clone()))
    }

    /// Hand the whole source mapping to the declared type instead of
    /// extracting it key by key.
    pub fn raw_return(mut self) -> Self {
        self.raw_return = true;
        self
    }

    pub fn openapi_include(mut self, include: bool) -> Self {
        self.openapi_include = include;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    /// Add a raw JSON Schema keyword.
    pub fn constraint(mut self, keyword: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(keyword.into(), value);
        self
    }

    pub fn ge(self, n: impl Into<serde_json::Number>) -> Self {
        self.constraint("minimum", Value::Number(n.into()))
    }

    pub fn gt(self, n: impl Into<serde_json::Number>) -> Self {
        self.constraint("exclusiveMinimum", Value::Number(n.into()))
    }

    pub fn le(self, n: impl Into<serde_json::Number>) -> Self {
        self.constraint("maximum", Value::Number(n.into()))
    }

    pub fn lt(self, n: impl Into<serde_json::Number>) -> Self {
        self.constraint("exclusiveMaximum", Value::Number(n.into()))
    }

    pub fn multiple_of(self, n: impl Into<serde_json::Number>) -> Self {
        self.constraint("multipleOf", Value::Number(n.into()))
    }

    pub fn min_length(self, n: u64) -> Self {
        self.constraint("minLength", Value::from(n))
    }

    pub fn max_length(self, n: u64) -> Self {
        self.constraint("maxLength", Value::from(n))
    }

    pub fn pattern(self, regex: impl Into<String>) -> Self {
        self.constraint("pattern", Value::String(regex.into()))
    }

    /// Restrict the value to the given set.
    pub fn one_of(self, values: Vec<Value>) -> Self {
        self.constraint("enum", Value::Array(values))
    }

    /// Finish the descriptor.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::ConflictingDefaults`] when both `default` and
    ///   `default_factory` are set.
    /// - [`ConfigurationError::DefaultWithNotFound`] when a default of either
    ///   form is combined with a not-found handler.
    pub fn build(self) -> Result<Field, ConfigurationError> {
        let default = match (self.default, self.default_factory) {
            (Some(_), Some(_)) => return Err(ConfigurationError::ConflictingDefaults),
            (Some(v), None) => DefaultValue::Value(v),
            (None, Some(f)) => DefaultValue::Factory(f),
            (None, None) => DefaultValue::None,
        };
        if self.not_found.is_some() && !matches!(default, DefaultValue::None) {
            return Err(ConfigurationError::DefaultWithNotFound);
        }
        Ok(Field {
            kind: self.kind,
            alias: self.alias,
            default,
            constraints: self.constraints,
            description: self.description,
            example: self.example,
            raw_return: self.raw_return,
            openapi_include: self.openapi_include,
            not_found: self.not_found,
            target: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> Mapping {
        match value {
            Value::Object(m) => m,
            _ => Mapping::new(),
        }
    }

    #[test]
    fn test_default_and_factory_conflict() {
        let err = Field::query()
            .default(json!(1))
            .default_factory(|| json!(2))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigurationError::ConflictingDefaults);
    }

    #[test]
    fn test_default_with_not_found_conflict() {
        let err = Field::query()
            .default(json!(1))
            .not_found_message("uid is required")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DefaultWithNotFound);

        let err = Field::header()
            .default_factory(|| json!("x"))
            .not_found_message("missing")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DefaultWithNotFound);
    }

    #[test]
    fn test_request_value_handle() {
        let raw = mapping(json!({"uid": "7"}));
        let field = Field::query().build().unwrap();
        assert_eq!(field.request_value_handle(&raw, "uid"), Lookup::Value(json!("7")));
        assert_eq!(field.request_value_handle(&raw, "age"), Lookup::Missing);

        let with_default = Field::query().default(json!(5)).build().unwrap();
        assert_eq!(
            with_default.request_value_handle(&raw, "age"),
            Lookup::Default(json!(5))
        );

        let with_null = Field::query().default(Value::Null).build().unwrap();
        assert_eq!(
            with_null.request_value_handle(&raw, "age"),
            Lookup::Default(Value::Null)
        );
    }

    #[test]
    fn test_default_factory_called_per_lookup() {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let field = Field::query()
            .default_factory(move || {
                json!(c.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
            })
            .build()
            .unwrap();
        let raw = Mapping::new();
        assert_eq!(field.request_value_handle(&raw, "n"), Lookup::Default(json!(0)));
        assert_eq!(field.request_value_handle(&raw, "n"), Lookup::Default(json!(1)));
    }

    #[test]
    fn test_header_key_and_case() {
        let field = Field::header().build().unwrap();
        assert_eq!(field.request_key("user_agent"), "user-agent");
        let raw = mapping(json!({"User-Agent": "curl"}));
        assert_eq!(
            field.request_value_handle(&raw, "user-agent"),
            Lookup::Value(json!("curl"))
        );

        let aliased = Field::header().alias("X-Token").build().unwrap();
        assert_eq!(aliased.request_key("token"), "X-Token");
    }

    #[test]
    fn test_constraints_are_schema_keywords() {
        let field = Field::query()
            .ge(1)
            .lt(100)
            .max_length(3)
            .pattern("^[0-9]+$")
            .build()
            .unwrap();
        let c = field.constraints();
        assert_eq!(c.get("minimum"), Some(&json!(1)));
        assert_eq!(c.get("exclusiveMaximum"), Some(&json!(100)));
        assert_eq!(c.get("maxLength"), Some(&json!(3)));
        assert_eq!(c.get("pattern"), Some(&json!("^[0-9]+$")));
    }
}
