use thiserror::Error;

use crate::resolver::{Level, RowId};

/// A query against the remote tabular store failed.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The request never produced a response.
    #[error("request to {table} failed: {message}")]
    Transport { table: String, message: String },

    /// The store answered with a non-success status.
    #[error("{message}")]
    Status {
        table: String,
        status: u16,
        message: String,
    },

    /// The response body was not a list of rows.
    #[error("could not decode {table} response: {message}")]
    Decode { table: String, message: String },

    /// A single-row lookup matched more than one row.
    #[error("expected at most one row from {table}, got {count}")]
    MultipleRows { table: String, count: usize },

    /// The store refused the query outright.
    #[error("{0}")]
    Rejected(String),
}

/// Either of the two top-level lists (versions, books) failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ReferenceDataError {
    pub message: String,
}

impl ReferenceDataError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for ReferenceDataError {
    fn default() -> Self {
        Self::new("Failed to load reference data")
    }
}

/// Fetching the options behind one cache key failed.
#[derive(Debug, Clone, Error)]
pub enum OptionFetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reference(#[from] ReferenceDataError),
}

/// An edit to a row was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no row with id {0}")]
    UnknownRow(RowId),

    #[error("{level} is disabled until a {missing} is selected")]
    Disabled { level: Level, missing: Level },

    #[error("{value:?} is not an available {level}")]
    NotOffered { level: Level, value: String },

    #[error("the first row cannot be deleted")]
    TemplateRow,
}

/// Generation was attempted while a row was still incomplete.
///
/// `position` is 1-based; `missing` lists levels in Version, Book, Chapter,
/// Verse order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Row {position}: please complete {}.", join_levels(.missing))]
pub struct ValidationError {
    pub position: usize,
    pub missing: Vec<Level>,
}

fn join_levels(levels: &[Level]) -> String {
    levels
        .iter()
        .map(|level| level.name())
        .collect::<Vec<_>>()
        .join(", ")
}
