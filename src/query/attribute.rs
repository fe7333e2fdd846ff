//! Attribute queries: which fields a read hydrates.
//!
//! JSON shape:
//!
//! ```json
//! ["name", "capacity", ["beds", {"attributeQuery": ["label", ["occupant", {"attributeQuery": ["name"]}]]}]]
//! ```
//!
//! `"*"` selects every own property. `id` is always returned.

use serde::{Deserialize, Serialize};

/// One entry of an attribute query.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeItem {
    /// An own property (or `*`).
    Field(String),
    /// A navigation (or `&`, `source`, `target`) with its own attribute query.
    Nested(String, AttributeQuery),
}

/// Ordered list of fields and nested queries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(from = "Vec<RawItem>", into = "Vec<RawItem>")]
pub struct AttributeQuery(pub Vec<AttributeItem>);

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum RawItem {
    Field(String),
    Nested(String, RawNested),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawNested {
    #[serde(rename = "attributeQuery", default)]
    attribute_query: Vec<RawItem>,
}

impl From<Vec<RawItem>> for AttributeQuery {
    fn from(items: Vec<RawItem>) -> Self {
        AttributeQuery(items.into_iter().map(AttributeItem::from).collect())
    }
}

impl From<RawItem> for AttributeItem {
    fn from(item: RawItem) -> Self {
        match item {
            RawItem::Field(name) => AttributeItem::Field(name),
            RawItem::Nested(name, nested) => {
                AttributeItem::Nested(name, AttributeQuery::from(nested.attribute_query))
            }
        }
    }
}

impl From<AttributeQuery> for Vec<RawItem> {
    fn from(query: AttributeQuery) -> Self {
        query
            .0
            .into_iter()
            .map(|item| match item {
                AttributeItem::Field(name) => RawItem::Field(name),
                AttributeItem::Nested(name, nested) => RawItem::Nested(
                    name,
                    RawNested {
                        attribute_query: nested.into(),
                    },
                ),
            })
            .collect()
    }
}

impl AttributeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the listed fields.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeQuery(
            fields
                .into_iter()
                .map(|f| AttributeItem::Field(f.into()))
                .collect(),
        )
    }

    /// Every own property.
    pub fn all() -> Self {
        Self::fields(["*"])
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(AttributeItem::Field(name.into()));
        self
    }

    /// Add a nested query.
    pub fn nest(mut self, name: impl Into<String>, query: AttributeQuery) -> Self {
        self.0.push(AttributeItem::Nested(name.into(), query));
        self
    }

    /// Parse the JSON shape.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, crate::error::QueryError> {
        serde_json::from_value(value.clone())
            .map_err(|e| crate::error::QueryError::InvalidAttributeQuery(e.to_string()))
    }

    /// Plain field names, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|item| match item {
            AttributeItem::Field(name) => Some(name.as_str()),
            AttributeItem::Nested(..) => None,
        })
    }

    /// Nested entries, in order.
    pub fn nested(&self) -> impl Iterator<Item = (&str, &AttributeQuery)> {
        self.0.iter().filter_map(|item| match item {
            AttributeItem::Nested(name, query) => Some((name.as_str(), query)),
            AttributeItem::Field(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
