//! Property and cardinality types shared by entity and relation definitions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::Record;

/// Semantic type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    /// Arbitrary JSON document.
    Json,
}

impl PropertyType {
    /// Whether a (non-null) JSON value is acceptable for this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Json => true,
        }
    }

    /// Infer a type from a sample value (used for computation-owned columns).
    pub fn infer(value: &Value) -> PropertyType {
        match value {
            Value::Bool(_) => PropertyType::Boolean,
            Value::Number(_) => PropertyType::Number,
            Value::String(_) => PropertyType::String,
            Value::Null | Value::Array(_) | Value::Object(_) => PropertyType::Json,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Json => "json",
        };
        write!(f, "{}", name)
    }
}

/// Rule producing a value for a property omitted at creation time.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value.
    Value(Value),
    /// Computed from the payload being created.
    Computed(Arc<dyn Fn(&Record) -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Evaluate the rule against the payload being created.
    pub fn evaluate(&self, payload: &Record) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Computed(f) => f(payload),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// A named, typed property of an entity or relation.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub ty: PropertyType,
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// Owned by a computation rather than declared by the application.
    pub computed: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
            computed: false,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Json)
    }

    /// Reject creates that omit this property (and have no default).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_fn(mut self, f: impl Fn(&Record) -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultValue::Computed(Arc::new(f)));
        self
    }

    pub(crate) fn computed(mut self) -> Self {
        self.computed = true;
        self
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.ty == other.ty && self.required == other.required
    }
}

/// Relation cardinality, read as `source : target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:n")]
    OneToMany,
    #[serde(rename = "n:1")]
    ManyToOne,
    #[serde(rename = "n:n")]
    ManyToMany,
}

impl Cardinality {
    /// Reverse the cardinality (swap source/target sides).
    pub fn reverse(self) -> Self {
        match self {
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToOne => Cardinality::OneToMany,
            other => other,
        }
    }

    /// A source links to many targets.
    pub fn target_is_many(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }

    /// A target links to many sources.
    pub fn source_is_many(&self) -> bool {
        matches!(self, Cardinality::ManyToOne | Cardinality::ManyToMany)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cardinality::OneToOne => "1:1",
            Cardinality::OneToMany => "1:n",
            Cardinality::ManyToOne => "n:1",
            Cardinality::ManyToMany => "n:n",
        };
        write!(f, "{}", s)
    }
}
