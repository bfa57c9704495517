use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::choice::{distinct_column, Choice};
use crate::error::OptionFetchError;
use crate::reference::ReferenceDataStore;
use crate::store::{id_value, Query, TableStore, VERSES};

/// Callback run after a fetch has written its entry.
pub type SettledHook = Box<dyn Fn(&CacheKey) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    Versions,
    Books {
        version: String,
    },
    Chapters {
        version: String,
        book: String,
    },
    Verses {
        version: String,
        book: String,
        chapter: String,
    },
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Versions => write!(f, "versions"),
            CacheKey::Books { version } => write!(f, "books({})", version),
            CacheKey::Chapters { version, book } => write!(f, "chapters({}, {})", version, book),
            CacheKey::Verses {
                version,
                book,
                chapter,
            } => write!(f, "verses({}, {}, {})", version, book, chapter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: CacheStatus,
    /// Ordered and unique; only non-empty when `Ready`.
    pub options: Vec<Choice>,
}

impl CacheEntry {
    fn pending(key: CacheKey) -> Self {
        Self {
            key,
            status: CacheStatus::Pending,
            options: Vec::new(),
        }
    }
}

/// Shared handle; clones see the same entries.
#[derive(Clone)]
pub struct OptionCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<dyn TableStore>,
    reference: Arc<ReferenceDataStore>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    on_settled: Option<SettledHook>,
}

impl OptionCache {
    pub fn new(store: Arc<dyn TableStore>, reference: Arc<ReferenceDataStore>) -> Self {
        Self::build(store, reference, None)
    }

    /// Like [`OptionCache::new`], calling `hook` every time a fetch settles.
    pub fn with_hook(
        store: Arc<dyn TableStore>,
        reference: Arc<ReferenceDataStore>,
        hook: SettledHook,
    ) -> Self {
        Self::build(store, reference, Some(hook))
    }

    fn build(
        store: Arc<dyn TableStore>,
        reference: Arc<ReferenceDataStore>,
        on_settled: Option<SettledHook>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                reference,
                entries: Mutex::new(HashMap::new()),
                on_settled,
            }),
        }
    }

    /// Current state for `key`; an unknown key reads as `Pending` and empty.
    pub fn get(&self, key: &CacheKey) -> CacheEntry {
        self.inner
            .entries()
            .get(key)
            .cloned()
            .unwrap_or_else(|| CacheEntry::pending(key.clone()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.entries().contains_key(key)
    }

    /// Start a fetch for `key` unless one is pending or has succeeded.
    ///
    /// Returns the fetch task when one was started. Dropping the handle does
    /// not cancel the fetch.
    pub fn ensure(&self, key: &CacheKey) -> Option<JoinHandle<()>> {
        {
            let mut entries = self.inner.entries();
            match entries.get(key).map(|entry| entry.status) {
                Some(CacheStatus::Pending) | Some(CacheStatus::Ready) => return None,
                Some(CacheStatus::Failed) => debug!(%key, "retrying failed fetch"),
                None => {}
            }
            entries.insert(key.clone(), CacheEntry::pending(key.clone()));
        }

        debug!(%key, "fetching options");
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        Some(tokio::spawn(async move { inner.fetch_and_store(key).await }))
    }
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_and_store(&self, key: CacheKey) {
        let entry = match self.fetch(&key).await {
            Ok(options) => CacheEntry {
                key: key.clone(),
                status: CacheStatus::Ready,
                options,
            },
            // A version whose book ids cannot be fetched just offers no books.
            Err(err) if matches!(key, CacheKey::Books { .. }) => {
                warn!(%key, error = %err, "book lookup failed, offering no books");
                CacheEntry {
                    key: key.clone(),
                    status: CacheStatus::Ready,
                    options: Vec::new(),
                }
            }
            Err(err) => {
                warn!(%key, error = %err, "option fetch failed");
                CacheEntry {
                    key: key.clone(),
                    status: CacheStatus::Failed,
                    options: Vec::new(),
                }
            }
        };

        self.entries().insert(key.clone(), entry);

        if let Some(hook) = &self.on_settled {
            hook(&key);
        }
    }

    async fn fetch(&self, key: &CacheKey) -> Result<Vec<Choice>, OptionFetchError> {
        let (column, query) = match key {
            CacheKey::Versions => {
                let lists = self.reference.load().await?;
                return Ok(lists.versions.clone());
            }
            CacheKey::Books { version } => (
                "book_id",
                Query::from(VERSES).eq("version_id", id_value(version)),
            ),
            CacheKey::Chapters { version, book } => (
                "chapter",
                Query::from(VERSES)
                    .eq("version_id", id_value(version))
                    .eq("book_id", id_value(book)),
            ),
            CacheKey::Verses {
                version,
                book,
                chapter,
            } => (
                "verse",
                Query::from(VERSES)
                    .eq("version_id", id_value(version))
                    .eq("book_id", id_value(book))
                    .eq("chapter", id_value(chapter)),
            ),
        };

        let query = query.select(column).not_null(column).order(column);
        let rows = self.store.select(&query).await?;
        Ok(distinct_column(&rows, column)
            .into_iter()
            .map(Choice::plain)
            .collect())
    }
}
