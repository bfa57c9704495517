use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::choice::value_text;
use crate::error::{StoreError, ValidationError};
use crate::resolver::{Reference, RowState};
use crate::store::{id_value, Query, TableStore, VERSES};

/// One line per row, in row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub lines: Vec<String>,
}

/// Resolves a batch of complete rows into text, one lookup per row.
#[derive(Clone)]
pub struct GenerationEngine {
    store: Arc<dyn TableStore>,
}

impl GenerationEngine {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// The reference of every row, or the first incomplete row.
    pub fn validate(rows: &[RowState]) -> Result<Vec<Reference>, ValidationError> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                row.reference().ok_or_else(|| ValidationError {
                    position: index + 1,
                    missing: row.missing(),
                })
            })
            .collect()
    }

    /// Validate, then look every row up concurrently.
    ///
    /// Nothing is fetched unless every row is complete. A failed lookup only
    /// affects its own line.
    pub async fn generate(&self, rows: &[RowState]) -> Result<GenerationResult, ValidationError> {
        let references = Self::validate(rows)?;
        Ok(self.resolve(&references).await)
    }

    pub async fn resolve(&self, references: &[Reference]) -> GenerationResult {
        info!(rows = references.len(), "generating verses");
        let lines = join_all(references.iter().map(|r| self.line(r))).await;
        GenerationResult { lines }
    }

    async fn line(&self, reference: &Reference) -> String {
        match self.lookup(reference).await {
            Ok(text) => format!("{} — {}", reference, text),
            Err(err) => {
                warn!(%reference, error = %err, "verse lookup failed");
                format!("{} — {}", reference, err)
            }
        }
    }

    /// Text of one verse; empty when the store has no such verse.
    async fn lookup(&self, reference: &Reference) -> Result<String, StoreError> {
        let query = Query::from(VERSES)
            .select("text")
            .eq("version_id", id_value(&reference.version.key))
            .eq("book_id", id_value(&reference.book.key))
            .eq("chapter", id_value(&reference.chapter))
            .eq("verse", id_value(&reference.verse));

        let row = self.store.maybe_single(&query).await?;
        Ok(row
            .and_then(|row| row.get("text").and_then(value_text))
            .unwrap_or_default())
    }
}
