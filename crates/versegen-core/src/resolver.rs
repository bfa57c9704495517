use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{CacheKey, CacheStatus, OptionCache};
use crate::choice::Choice;
use crate::error::SelectionError;
use crate::reference::ReferenceDataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Version,
    Book,
    Chapter,
    Verse,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Version, Level::Book, Level::Chapter, Level::Verse];

    pub fn name(self) -> &'static str {
        match self {
            Level::Version => "Version",
            Level::Book => "Book",
            Level::Chapter => "Chapter",
            Level::Verse => "Verse",
        }
    }

    /// Levels strictly above this one.
    pub fn upstream(self) -> impl Iterator<Item = Level> {
        Self::ALL.into_iter().filter(move |level| *level < self)
    }

    /// Levels strictly below this one.
    pub fn downstream(self) -> impl Iterator<Item = Level> {
        Self::ALL.into_iter().filter(move |level| *level > self)
    }

    pub fn next(self) -> Option<Level> {
        self.downstream().next()
    }

    pub fn prev(self) -> Option<Level> {
        self.upstream().last()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable row identity, unrelated to position or content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row-{}", self.0)
    }
}

/// A fully specified (version, book, chapter, verse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub version: Choice,
    pub book: Choice,
    pub chapter: String,
    pub verse: String,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}:{}",
            self.version.label, self.book.label, self.chapter, self.verse
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowState {
    pub id: RowId,
    pub version: Option<Choice>,
    pub book: Option<Choice>,
    pub chapter: Option<String>,
    pub verse: Option<String>,
    /// Levels whose options were still being fetched at the last refresh.
    loading: BTreeSet<Level>,
}

impl RowState {
    fn new(id: RowId) -> Self {
        Self {
            id,
            version: None,
            book: None,
            chapter: None,
            verse: None,
            loading: BTreeSet::new(),
        }
    }

    /// Key of the current value at `level`.
    pub fn value(&self, level: Level) -> Option<&str> {
        match level {
            Level::Version => self.version.as_ref().map(|c| c.key.as_str()),
            Level::Book => self.book.as_ref().map(|c| c.key.as_str()),
            Level::Chapter => self.chapter.as_deref(),
            Level::Verse => self.verse.as_deref(),
        }
    }

    pub fn is_set(&self, level: Level) -> bool {
        self.value(level).is_some()
    }

    /// Unset levels, in level order.
    pub fn missing(&self) -> Vec<Level> {
        Level::ALL
            .into_iter()
            .filter(|level| !self.is_set(*level))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn reference(&self) -> Option<Reference> {
        Some(Reference {
            version: self.version.clone()?,
            book: self.book.clone()?,
            chapter: self.chapter.clone()?,
            verse: self.verse.clone()?,
        })
    }

    /// A level is disabled while any level above it is unset.
    pub fn is_disabled(&self, level: Level) -> bool {
        self.first_unset_upstream(level).is_some()
    }

    fn first_unset_upstream(&self, level: Level) -> Option<Level> {
        level.upstream().find(|up| !self.is_set(*up))
    }

    pub fn is_loading(&self, level: Level) -> bool {
        self.loading.contains(&level)
    }

    /// Cache key behind the options for `level`; `None` while disabled.
    pub fn key_for(&self, level: Level) -> Option<CacheKey> {
        let version = || self.version.as_ref().map(|c| c.key.clone());
        let book = || self.book.as_ref().map(|c| c.key.clone());
        match level {
            Level::Version => Some(CacheKey::Versions),
            Level::Book => Some(CacheKey::Books { version: version()? }),
            Level::Chapter => Some(CacheKey::Chapters {
                version: version()?,
                book: book()?,
            }),
            Level::Verse => Some(CacheKey::Verses {
                version: version()?,
                book: book()?,
                chapter: self.chapter.clone()?,
            }),
        }
    }

    /// Keys for every level that is currently enabled.
    pub fn live_keys(&self) -> Vec<(Level, CacheKey)> {
        Level::ALL
            .into_iter()
            .filter_map(|level| self.key_for(level).map(|key| (level, key)))
            .collect()
    }

    fn assign(&mut self, level: Level, choice: Choice) {
        match level {
            Level::Version => self.version = Some(choice),
            Level::Book => self.book = Some(choice),
            Level::Chapter => self.chapter = Some(choice.key),
            Level::Verse => self.verse = Some(choice.key),
        }
    }

    fn clear(&mut self, level: Level) {
        match level {
            Level::Version => self.version = None,
            Level::Book => self.book = None,
            Level::Chapter => self.chapter = None,
            Level::Verse => self.verse = None,
        }
    }
}

/// What a picker needs to render one level of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picker {
    pub level: Level,
    pub label: &'static str,
    pub options: Vec<Choice>,
    pub value: Option<String>,
    pub disabled: bool,
    pub loading: bool,
}

impl Picker {
    /// Display text of the current value.
    pub fn selected_label(&self) -> Option<&str> {
        let value = self.value.as_deref()?;
        self.options
            .iter()
            .find(|choice| choice.key == value)
            .map(|choice| choice.label.as_str())
    }
}

pub struct SelectionResolver {
    cache: OptionCache,
    reference: Arc<ReferenceDataStore>,
    rows: Vec<RowState>,
    next_id: u64,
}

impl SelectionResolver {
    /// Starts with one empty row. Nothing is fetched until [`refresh_all`]
    /// or an edit.
    ///
    /// [`refresh_all`]: SelectionResolver::refresh_all
    pub fn new(cache: OptionCache, reference: Arc<ReferenceDataStore>) -> Self {
        let mut resolver = Self {
            cache,
            reference,
            rows: Vec::new(),
            next_id: 0,
        };
        let id = resolver.allocate_id();
        resolver.rows.push(RowState::new(id));
        resolver
    }

    fn allocate_id(&mut self) -> RowId {
        let id = RowId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn rows(&self) -> &[RowState] {
        &self.rows
    }

    pub fn row(&self, id: RowId) -> Option<&RowState> {
        self.rows.iter().find(|row| row.id == id)
    }

    fn position(&self, id: RowId) -> Result<usize, SelectionError> {
        self.rows
            .iter()
            .position(|row| row.id == id)
            .ok_or(SelectionError::UnknownRow(id))
    }

    /// Append an empty row.
    pub fn add_row(&mut self) -> (RowId, Vec<JoinHandle<()>>) {
        let id = self.allocate_id();
        self.rows.push(RowState::new(id));
        let fetches = self.refresh(self.rows.len() - 1);
        (id, fetches)
    }

    /// The first row is the template row and is never deletable.
    pub fn can_delete(&self, id: RowId) -> bool {
        matches!(self.position(id), Ok(index) if index > 0)
    }

    /// Remove a row. Fetches started on its behalf keep running and only
    /// land in the shared cache.
    pub fn delete_row(&mut self, id: RowId) -> Result<RowState, SelectionError> {
        let index = self.position(id)?;
        if index == 0 {
            return Err(SelectionError::TemplateRow);
        }
        debug!(row = %id, "deleting row");
        Ok(self.rows.remove(index))
    }

    /// Set `level` on row `id` to the option keyed `value`, clearing every
    /// level below it.
    ///
    /// Refused while the level is disabled, or when `value` is not among the
    /// level's current options. Returns any fetches the edit started.
    pub fn set_field(
        &mut self,
        id: RowId,
        level: Level,
        value: &str,
    ) -> Result<Vec<JoinHandle<()>>, SelectionError> {
        let index = self.position(id)?;
        let row = &self.rows[index];

        if let Some(missing) = row.first_unset_upstream(level) {
            return Err(SelectionError::Disabled { level, missing });
        }

        let choice = self
            .options_for(row, level)
            .into_iter()
            .find(|choice| choice.key == value)
            .ok_or_else(|| SelectionError::NotOffered {
                level,
                value: value.to_string(),
            })?;

        let row = &mut self.rows[index];
        row.assign(level, choice);
        for below in level.downstream() {
            row.clear(below);
        }
        debug!(row = %id, %level, value, "selection changed");

        Ok(self.refresh(index))
    }

    /// Options currently offered at `level` of row `id`.
    pub fn options(&self, id: RowId, level: Level) -> Vec<Choice> {
        self.row(id)
            .map(|row| self.options_for(row, level))
            .unwrap_or_default()
    }

    fn options_for(&self, row: &RowState, level: Level) -> Vec<Choice> {
        let Some(key) = row.key_for(level) else {
            return Vec::new();
        };
        let entry = self.cache.get(&key);
        if entry.status != CacheStatus::Ready {
            return Vec::new();
        }

        match level {
            // Book ids present for the version, shown in the book list's order.
            Level::Book => self
                .reference
                .books()
                .iter()
                .filter(|book| entry.options.iter().any(|id| id.key == book.key))
                .cloned()
                .collect(),
            _ => entry.options,
        }
    }

    pub fn picker(&self, id: RowId, level: Level) -> Option<Picker> {
        let row = self.row(id)?;
        Some(Picker {
            level,
            label: level.name(),
            options: self.options_for(row, level),
            value: row.value(level).map(str::to_string),
            disabled: row.is_disabled(level),
            loading: row.is_loading(level),
        })
    }

    /// Ensure every live key of every row.
    pub fn refresh_all(&mut self) -> Vec<JoinHandle<()>> {
        (0..self.rows.len())
            .flat_map(|index| self.refresh(index))
            .collect()
    }

    fn refresh(&mut self, index: usize) -> Vec<JoinHandle<()>> {
        let cache = &self.cache;
        let row = &mut self.rows[index];
        let mut fetches = Vec::new();
        row.loading.clear();

        for (level, key) in row.live_keys() {
            if let Some(fetch) = cache.ensure(&key) {
                fetches.push(fetch);
            }
            if cache.get(&key).status == CacheStatus::Pending {
                row.loading.insert(level);
            }
        }
        fetches
    }

    /// A fetch for `key` has settled. Rows still showing that key stop
    /// loading; rows that were deleted or have moved on are left alone.
    /// Returns how many rows were updated.
    pub fn settle(&mut self, key: &CacheKey) -> usize {
        let mut updated = 0;
        for row in &mut self.rows {
            let levels: Vec<Level> = row
                .loading
                .iter()
                .copied()
                .filter(|level| row.key_for(*level).as_ref() == Some(key))
                .collect();
            if !levels.is_empty() {
                for level in levels {
                    row.loading.remove(&level);
                }
                updated += 1;
            }
        }
        if updated == 0 {
            debug!(%key, "settled fetch has no live rows");
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{Gate, MemoryStore};
    use crate::store::{Query, BOOKS, VERSES, VERSIONS};
    use serde_json::json;

    fn store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_rows(
                    VERSIONS,
                    vec![
                        json!({"id": 1, "name": "KJV"}),
                        json!({"id": 2, "name": "ASV"}),
                    ],
                )
                .with_rows(
                    BOOKS,
                    vec![
                        json!({"id": 10, "name": "Genesis"}),
                        json!({"id": 20, "name": "Exodus"}),
                        json!({"id": 30, "name": "Leviticus"}),
                    ],
                )
                .with_rows(
                    VERSES,
                    vec![
                        json!({"version_id": 1, "book_id": 20, "chapter": 3, "verse": 1, "text": "Now Moses"}),
                        json!({"version_id": 1, "book_id": 10, "chapter": 1, "verse": 1, "text": "In the beginning"}),
                        json!({"version_id": 1, "book_id": 10, "chapter": 1, "verse": 2, "text": "And the earth"}),
                        json!({"version_id": 1, "book_id": 10, "chapter": 2, "verse": 1, "text": "Thus the heavens"}),
                        json!({"version_id": 2, "book_id": 30, "chapter": 1, "verse": 1, "text": "And Jehovah called"}),
                    ],
                ),
        )
    }

    fn resolver(store: &Arc<MemoryStore>) -> SelectionResolver {
        let reference = Arc::new(ReferenceDataStore::new(store.clone()));
        let cache = OptionCache::new(store.clone(), Arc::clone(&reference));
        SelectionResolver::new(cache, reference)
    }

    async fn join(fetches: Vec<JoinHandle<()>>) {
        for fetch in fetches {
            fetch.await.unwrap();
        }
    }

    async fn select(resolver: &mut SelectionResolver, id: RowId, level: Level, value: &str) {
        let fetches = resolver.set_field(id, level, value).unwrap();
        join(fetches).await;
    }

    /// Row 0 set to KJV / Genesis / 1 / 1.
    async fn filled(store: &Arc<MemoryStore>) -> (SelectionResolver, RowId) {
        let mut resolver = resolver(store);
        join(resolver.refresh_all()).await;
        let id = resolver.rows()[0].id;
        select(&mut resolver, id, Level::Version, "1").await;
        select(&mut resolver, id, Level::Book, "10").await;
        select(&mut resolver, id, Level::Chapter, "1").await;
        select(&mut resolver, id, Level::Verse, "1").await;
        (resolver, id)
    }

    fn book_queries(store: &MemoryStore, version: i64) -> usize {
        store.dispatch_count(|q: &Query| {
            q.columns == ["book_id"] && q.eq_value("version_id") == Some(&json!(version))
        })
    }

    #[test]
    fn test_level_ordering() {
        assert_eq!(
            Level::Book.downstream().collect::<Vec<_>>(),
            vec![Level::Chapter, Level::Verse]
        );
        assert_eq!(
            Level::Chapter.upstream().collect::<Vec<_>>(),
            vec![Level::Version, Level::Book]
        );
        assert_eq!(Level::Verse.next(), None);
        assert_eq!(Level::Book.prev(), Some(Level::Version));
    }

    #[tokio::test]
    async fn test_initial_state_is_one_unset_row() {
        let store = store();
        let resolver = resolver(&store);
        assert_eq!(resolver.rows().len(), 1);
        let row = &resolver.rows()[0];
        assert_eq!(row.missing(), Level::ALL.to_vec());
        assert!(!row.is_disabled(Level::Version));
        assert!(row.is_disabled(Level::Book));
        assert!(row.is_disabled(Level::Chapter));
        assert!(row.is_disabled(Level::Verse));
    }

    #[tokio::test]
    async fn test_setting_each_level_resets_everything_below() {
        let store = store();
        for level in Level::ALL {
            let (mut resolver, id) = filled(&store).await;
            let value = match level {
                Level::Version => "2",
                Level::Book => "20",
                Level::Chapter => "2",
                Level::Verse => "2",
            };
            resolver.set_field(id, level, value).unwrap();

            let row = resolver.row(id).unwrap();
            assert_eq!(row.value(level), Some(value));
            for up in level.upstream() {
                assert!(row.is_set(up), "{} should survive a {} edit", up, level);
            }
            for down in level.downstream() {
                assert!(!row.is_set(down), "{} should reset after a {} edit", down, level);
            }
        }
    }

    #[tokio::test]
    async fn test_disabled_levels_cannot_be_assigned() {
        let store = store();
        let mut resolver = resolver(&store);
        join(resolver.refresh_all()).await;
        let id = resolver.rows()[0].id;

        let err = resolver.set_field(id, Level::Chapter, "1").unwrap_err();
        assert_eq!(
            err,
            SelectionError::Disabled {
                level: Level::Chapter,
                missing: Level::Version
            }
        );

        select(&mut resolver, id, Level::Version, "1").await;
        let err = resolver.set_field(id, Level::Verse, "1").unwrap_err();
        assert_eq!(
            err,
            SelectionError::Disabled {
                level: Level::Verse,
                missing: Level::Book
            }
        );
    }

    #[tokio::test]
    async fn test_values_must_be_offered() {
        let store = store();
        let mut resolver = resolver(&store);
        join(resolver.refresh_all()).await;
        let id = resolver.rows()[0].id;

        let err = resolver.set_field(id, Level::Version, "99").unwrap_err();
        assert!(matches!(err, SelectionError::NotOffered { .. }));

        select(&mut resolver, id, Level::Version, "1").await;
        // Leviticus exists, but not in version 1.
        let err = resolver.set_field(id, Level::Book, "30").unwrap_err();
        assert!(matches!(err, SelectionError::NotOffered { level: Level::Book, .. }));
    }

    #[tokio::test]
    async fn test_book_options_follow_book_list_order() {
        let store = store();
        let mut resolver = resolver(&store);
        join(resolver.refresh_all()).await;
        let id = resolver.rows()[0].id;
        select(&mut resolver, id, Level::Version, "1").await;

        // Occurrence order in the verses table is Exodus then Genesis.
        assert_eq!(
            resolver.options(id, Level::Book),
            vec![Choice::new("10", "Genesis"), Choice::new("20", "Exodus")]
        );

        select(&mut resolver, id, Level::Version, "2").await;
        assert_eq!(
            resolver.options(id, Level::Book),
            vec![Choice::new("30", "Leviticus")]
        );
    }

    #[tokio::test]
    async fn test_rows_with_same_upstream_share_fetches() {
        let store = store();
        let mut resolver = resolver(&store);
        join(resolver.refresh_all()).await;
        let (second, fetches) = resolver.add_row();
        join(fetches).await;
        let first = resolver.rows()[0].id;

        // Both rows pick KJV in the same tick, before either fetch runs.
        let mut fetches = resolver.set_field(first, Level::Version, "1").unwrap();
        fetches.extend(resolver.set_field(second, Level::Version, "1").unwrap());
        join(fetches).await;
        assert_eq!(book_queries(&store, 1), 1);

        select(&mut resolver, first, Level::Book, "10").await;
        select(&mut resolver, second, Level::Book, "10").await;
        select(&mut resolver, first, Level::Chapter, "1").await;
        select(&mut resolver, second, Level::Chapter, "1").await;

        assert_eq!(store.dispatch_count(|q| q.columns == ["chapter"]), 1);
        assert_eq!(store.dispatch_count(|q| q.columns == ["verse"]), 1);
        assert_eq!(
            resolver.options(second, Level::Verse),
            vec![Choice::plain("1"), Choice::plain("2")]
        );
    }

    #[tokio::test]
    async fn test_template_row_cannot_be_deleted() {
        let store = store();
        let mut resolver = resolver(&store);
        let first = resolver.rows()[0].id;
        let (second, _) = resolver.add_row();

        assert!(!resolver.can_delete(first));
        assert!(resolver.can_delete(second));
        assert_eq!(resolver.delete_row(first), Err(SelectionError::TemplateRow));

        let removed = resolver.delete_row(second).unwrap();
        assert_eq!(removed.id, second);
        assert_eq!(
            resolver.delete_row(second),
            Err(SelectionError::UnknownRow(second))
        );
        assert_eq!(resolver.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_row_ids_are_never_reused() {
        let store = store();
        let mut resolver = resolver(&store);
        let (second, _) = resolver.add_row();
        resolver.delete_row(second).unwrap();
        let (third, _) = resolver.add_row();
        assert_ne!(second, third);
    }

    #[tokio::test]
    async fn test_picker_reflects_row_and_cache() {
        let store = store();
        let gate: Gate = store.hold_when(|q| q.columns == ["chapter"]);
        let mut resolver = resolver(&store);
        join(resolver.refresh_all()).await;
        let id = resolver.rows()[0].id;
        select(&mut resolver, id, Level::Version, "1").await;

        let fetches = resolver.set_field(id, Level::Book, "10").unwrap();
        let picker = resolver.picker(id, Level::Chapter).unwrap();
        assert_eq!(picker.label, "Chapter");
        assert!(!picker.disabled);
        assert!(picker.loading);
        assert!(picker.options.is_empty());
        assert!(resolver.picker(id, Level::Verse).unwrap().disabled);

        gate.open();
        join(fetches).await;
        let key = resolver.row(id).unwrap().key_for(Level::Chapter).unwrap();
        assert_eq!(resolver.settle(&key), 1);

        let picker = resolver.picker(id, Level::Chapter).unwrap();
        assert!(!picker.loading);
        assert_eq!(picker.options.len(), 2);

        let book = resolver.picker(id, Level::Book).unwrap();
        assert_eq!(book.selected_label(), Some("Genesis"));
    }

    #[tokio::test]
    async fn test_settle_ignores_deleted_rows() {
        let store = store();
        let gate = store.hold_when(|q| q.columns == ["chapter"]);
        let mut resolver = resolver(&store);
        join(resolver.refresh_all()).await;
        let (id, _) = resolver.add_row();
        select(&mut resolver, id, Level::Version, "1").await;

        let fetches = resolver.set_field(id, Level::Book, "10").unwrap();
        let key = resolver.row(id).unwrap().key_for(Level::Chapter).unwrap();
        resolver.delete_row(id).unwrap();

        gate.open();
        join(fetches).await;
        assert_eq!(resolver.settle(&key), 0);
        assert!(resolver.row(id).is_none());
        assert_eq!(resolver.rows().len(), 1);
    }
}
