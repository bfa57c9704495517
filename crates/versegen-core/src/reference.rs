use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::choice::{choices_from_records, Choice};
use crate::error::ReferenceDataError;
use crate::store::{Query, TableStore, BOOKS, VERSIONS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceLists {
    pub versions: Vec<Choice>,
    pub books: Vec<Choice>,
}

/// Loads versions and books at most once. A failed load is only retried by
/// building a fresh store.
pub struct ReferenceDataStore {
    store: Arc<dyn TableStore>,
    loaded: OnceCell<Result<ReferenceLists, ReferenceDataError>>,
}

impl ReferenceDataStore {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            loaded: OnceCell::new(),
        }
    }

    /// Fetch both lists. Callers that arrive while the first load is in
    /// flight wait on that same attempt; later callers get its outcome.
    pub async fn load(&self) -> Result<&ReferenceLists, ReferenceDataError> {
        self.loaded
            .get_or_init(|| self.fetch())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    async fn fetch(&self) -> Result<ReferenceLists, ReferenceDataError> {
        // Every column is requested so the label fallback has something to
        // fall back to when `name` is absent.
        let versions_query = Query::from(VERSIONS).select("*");
        let books_query = Query::from(BOOKS).select("*");

        let (versions, books) = tokio::join!(
            self.store.select(&versions_query),
            self.store.select(&books_query)
        );

        match (versions, books) {
            (Ok(versions), Ok(books)) => {
                let lists = ReferenceLists {
                    versions: choices_from_records(&versions),
                    books: choices_from_records(&books),
                };
                info!(
                    versions = lists.versions.len(),
                    books = lists.books.len(),
                    "loaded reference data"
                );
                Ok(lists)
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "failed to load reference data");
                Err(ReferenceDataError::new(err.to_string()))
            }
        }
    }

    fn lists(&self) -> Option<&ReferenceLists> {
        self.loaded.get().and_then(|outcome| outcome.as_ref().ok())
    }

    /// Loaded versions; empty while loading or after a failure.
    pub fn versions(&self) -> &[Choice] {
        self.lists().map(|l| l.versions.as_slice()).unwrap_or(&[])
    }

    /// Loaded books; empty while loading or after a failure.
    pub fn books(&self) -> &[Choice] {
        self.lists().map(|l| l.books.as_slice()).unwrap_or(&[])
    }

    pub fn error(&self) -> Option<&ReferenceDataError> {
        self.loaded.get().and_then(|outcome| outcome.as_ref().err())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }
}
