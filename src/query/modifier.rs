//! Result modifiers: ordering, limit and offset.

use serde::{Deserialize, Serialize};

use crate::sql::SortDir;

/// Ordering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl From<Order> for SortDir {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => SortDir::Asc,
            Order::Desc => SortDir::Desc,
        }
    }
}

/// One ordering key. `key` may be a dotted path across x:1 relations;
/// a path through an x:n navigation is rejected.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderBy {
    pub key: String,
    #[serde(default)]
    pub order: Order,
}

/// Ordering and pagination of a read. Results are ordered by id when no key is given.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Modifier {
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Modifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, key: impl Into<String>, order: Order) -> Self {
        self.order_by.push(OrderBy {
            key: key.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}
