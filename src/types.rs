//! # Types Module
//!
//! Declared parameter types and structured (nested) models.
//!
//! A [`ParamType`] plays two roles. For value types it describes the JSON
//! Schema a resolved value must satisfy, plus a lax coercion from the textual
//! form request sources deliver (`"5"` for an integer query parameter). The
//! two special types, [`ParamType::Request`] and [`ParamType::HandlerInstance`],
//! mark parameters the engine fills from the [`Context`](crate::context::Context)
//! instead of from a field descriptor.
//!
//! A [`Model`] is a named list of fields. Model parameters are resolved either
//! field by field (each field becoming its own rule) or, with `raw_return`,
//! by handing the whole source mapping to the model constructor.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::field::Field;
use crate::request::Mapping;

/// Builds a model value from a mapping.
pub type ModelConstructor = Arc<dyn Fn(Mapping) -> anyhow::Result<Value> + Send + Sync>;

/// Declared type of a parameter.
#[derive(Clone, Debug)]
pub enum ParamType {
    /// Anything; validation accepts every value.
    Any,
    String,
    Integer,
    Number,
    Boolean,
    /// A JSON object with arbitrary keys.
    Map,
    Array(Box<ParamType>),
    /// The inner type or `null`.
    Optional(Box<ParamType>),
    Model(Model),
    /// The framework request object, passed through verbatim.
    Request,
    /// The class-based handler instance of the current request.
    HandlerInstance,
}

impl ParamType {
    pub fn array(item: ParamType) -> Self {
        ParamType::Array(Box::new(item))
    }

    pub fn optional(inner: ParamType) -> Self {
        ParamType::Optional(Box::new(inner))
    }

    /// Whether the type is filled from the Context rather than a field.
    #[must_use]
    pub fn is_special(&self) -> bool {
        matches!(self, ParamType::Request | ParamType::HandlerInstance)
    }

    /// The model behind this type, looking through `Optional`.
    #[must_use]
    pub fn as_model(&self) -> Option<&Model> {
        match self {
            ParamType::Model(m) => Some(m),
            ParamType::Optional(inner) => inner.as_model(),
            _ => None,
        }
    }

    /// Short type name used in plan shapes and logs.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            ParamType::Any => "any".to_string(),
            ParamType::String => "string".to_string(),
            ParamType::Integer => "integer".to_string(),
            ParamType::Number => "number".to_string(),
            ParamType::Boolean => "boolean".to_string(),
            ParamType::Map => "map".to_string(),
            ParamType::Array(item) => format!("array<{}>", item.type_name()),
            ParamType::Optional(inner) => format!("optional<{}>", inner.type_name()),
            ParamType::Model(m) => m.name().to_string(),
            ParamType::Request => "request".to_string(),
            ParamType::HandlerInstance => "instance".to_string(),
        }
    }

    /// JSON Schema of the type.
    #[must_use]
    pub fn schema(&self) -> Value {
        self.schema_with(&Map::new())
    }

    /// JSON Schema of the type with field constraints merged in. For
    /// `Optional` the constraints apply to the non-null branch.
    #[must_use]
    pub fn schema_with(&self, constraints: &Map<String, Value>) -> Value {
        let mut schema = match self {
            ParamType::Any | ParamType::Request | ParamType::HandlerInstance => json!({}),
            ParamType::String => json!({"type": "string"}),
            ParamType::Integer => json!({"type": "integer"}),
            ParamType::Number => json!({"type": "number"}),
            ParamType::Boolean => json!({"type": "boolean"}),
            ParamType::Map => json!({"type": "object"}),
            ParamType::Array(item) => json!({"type": "array", "items": item.schema()}),
            ParamType::Optional(inner) => {
                return json!({"anyOf": [inner.schema_with(constraints), {"type": "null"}]});
            }
            ParamType::Model(m) => m.schema(),
        };
        if let Value::Object(obj) = &mut schema {
            for (k, v) in constraints {
                obj.insert(k.clone(), v.clone());
            }
        }
        schema
    }

    /// Best-effort conversion of request text into the declared shape.
    ///
    /// Values that cannot be converted are returned unchanged so the validator
    /// reports them.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (ParamType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(s),
            },
            (ParamType::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                    Value::from(f as i64)
                }
                _ => Value::Number(n),
            },
            (ParamType::Number, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) => serde_json::Number::from_f64(f).map_or(Value::String(s), Value::Number),
                Err(_) => Value::String(s),
            },
            (ParamType::Boolean, Value::String(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Value::Bool(true),
                    "false" | "0" | "no" | "off" => Value::Bool(false),
                    _ => Value::String(s),
                }
            }
            (ParamType::String, Value::Number(n)) => Value::String(n.to_string()),
            (ParamType::String, Value::Bool(b)) => Value::String(b.to_string()),
            (ParamType::Array(item), Value::Array(items)) => {
                Value::Array(items.into_iter().map(|v| item.coerce(v)).collect())
            }
            (ParamType::Array(_), Value::Null) => Value::Null,
            (ParamType::Array(item), scalar) => Value::Array(vec![item.coerce(scalar)]),
            (ParamType::Optional(_), Value::Null) => Value::Null,
            (ParamType::Optional(inner), v) => inner.coerce(v),
            (ParamType::Model(m), Value::Object(obj)) => Value::Object(m.coerce(obj)),
            (_, v) => v,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// One field of a structured model.
#[derive(Clone, Debug)]
pub struct ModelField {
    pub name: String,
    pub ty: ParamType,
    /// Overrides the source kind (and key/default) inherited from the outer field.
    pub field: Option<Field>,
}

impl ModelField {
    /// Whether the field must be present when the model is built from a mapping.
    #[must_use]
    pub fn is_required(&self) -> bool {
        let has_default = self.field.as_ref().is_some_and(Field::has_default);
        !has_default && !matches!(self.ty, ParamType::Optional(_))
    }
}

struct ModelInner {
    name: String,
    fields: Vec<ModelField>,
    constructor: Option<ModelConstructor>,
}

/// A structured, named model. Cheap to clone.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            fields: Vec::new(),
            constructor: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn fields(&self) -> &[ModelField] {
        &self.inner.fields
    }

    #[must_use]
    pub fn has_constructor(&self) -> bool {
        self.inner.constructor.is_some()
    }

    /// Object schema with one property per field.
    #[must_use]
    pub fn schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for f in &self.inner.fields {
            let constraints = f
                .field
                .as_ref()
                .map(|fd| fd.constraints().clone())
                .unwrap_or_default();
            properties.insert(f.name.clone(), f.ty.schema_with(&constraints));
            if f.is_required() {
                required.push(Value::String(f.name.clone()));
            }
        }
        json!({
            "type": "object",
            "title": self.inner.name,
            "properties": properties,
            "required": required,
        })
    }

    /// Coerce every declared field present in `obj`; other keys pass through.
    #[must_use]
    pub fn coerce(&self, mut obj: Mapping) -> Mapping {
        for f in &self.inner.fields {
            if let Some(v) = obj.remove(&f.name) {
                obj.insert(f.name.clone(), f.ty.coerce(v));
            }
        }
        obj
    }

    /// Build the model value from `mapping`.
    ///
    /// A custom constructor receives the mapping verbatim. The default keeps
    /// declared fields, fills defaults of absent ones and returns an object.
    ///
    /// # Errors
    ///
    /// Whatever the custom constructor returns.
    pub fn construct(&self, mapping: Mapping) -> anyhow::Result<Value> {
        if let Some(ctor) = &self.inner.constructor {
            return ctor(mapping);
        }
        let mut out = Map::new();
        for f in &self.inner.fields {
            let value = mapping
                .get(&f.name)
                .cloned()
                .or_else(|| f.field.as_ref().and_then(Field::default_value));
            if let Some(v) = value {
                out.insert(f.name.clone(), v);
            }
        }
        Ok(Value::Object(out))
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.inner.name)
            .field("fields", &self.inner.fields)
            .field("constructor", &self.inner.constructor.is_some())
            .finish()
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    name: String,
    fields: Vec<ModelField>,
    constructor: Option<ModelConstructor>,
}

impl ModelBuilder {
    /// Field inheriting the source kind of the parameter it is nested in.
    pub fn field(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.fields.push(ModelField {
            name: name.into(),
            ty,
            field: None,
        });
        self
    }

    /// Field with its own descriptor (kind, alias, default, constraints).
    pub fn field_with(mut self, name: impl Into<String>, ty: ParamType, field: Field) -> Self {
        self.fields.push(ModelField {
            name: name.into(),
            ty,
            field: Some(field),
        });
        self
    }

    pub fn constructor<F>(mut self, ctor: F) -> Self
    where
        F: Fn(Mapping) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(ctor));
        self
    }

    pub fn build(self) -> Model {
        Model {
            inner: Arc::new(ModelInner {
                name: self.name,
                fields: self.fields,
                constructor: self.constructor,
            }),
        }
    }
}
