pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde_json::Value;

use crate::choice::Record;
use crate::error::StoreError;

pub const VERSIONS: &str = "versions";
pub const BOOKS: &str = "books";
pub const VERSES: &str = "verses";

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    NotNull(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// Projected columns; empty means every column.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    /// Column to sort ascending by.
    pub order: Option<String>,
}

impl Query {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
        }
    }

    /// Comma separated column list, `*` for all columns.
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != "*")
            .map(str::to_string)
            .collect();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn not_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::NotNull(column.to_string()));
        self
    }

    pub fn order(mut self, column: &str) -> Self {
        self.order = Some(column.to_string());
        self
    }

    /// Value of the equality filter on `column`, if any.
    pub fn eq_value(&self, column: &str) -> Option<&Value> {
        self.filters.iter().find_map(|filter| match filter {
            Filter::Eq(c, v) if c == column => Some(v),
            _ => None,
        })
    }
}

/// Filter value for an id or number held as a string key.
///
/// Ids are integers in the store, so numeric keys are sent as numbers.
pub fn id_value(key: &str) -> Value {
    key.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(key.to_string()))
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Zero or one row; more than one is an error.
    async fn maybe_single(&self, query: &Query) -> Result<Option<Record>, StoreError> {
        let mut rows = self.select(query).await?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            count => Err(StoreError::MultipleRows {
                table: query.table.clone(),
                count,
            }),
        }
    }
}
