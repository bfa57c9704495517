use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::cache::{CacheKey, OptionCache, SettledHook};
use crate::error::{SelectionError, ValidationError};
use crate::generate::{GenerationEngine, GenerationResult};
use crate::reference::ReferenceDataStore;
use crate::resolver::{Level, RowId, SelectionResolver};
use crate::store::TableStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The cache entry for this key was written.
    OptionsSettled(CacheKey),
    /// A generation batch finished. `ticket` identifies the edit state it
    /// was started from.
    Generated {
        ticket: u64,
        result: GenerationResult,
    },
}

/// Lives as long as the screen that mounted it. Background results reach the
/// screen only through its event channel, which closes when it is dropped.
pub struct Session {
    reference: Arc<ReferenceDataStore>,
    resolver: SelectionResolver,
    engine: GenerationEngine,
    sender: UnboundedSender<SessionEvent>,
    events: UnboundedReceiver<SessionEvent>,
    /// Bumped on every edit and every generate, so a batch result can tell
    /// whether the rows it was built from are still current.
    ticket: u64,
    generating: bool,
    result: Option<GenerationResult>,
    generate_error: Option<ValidationError>,
}

impl Session {
    /// Build a fresh, isolated session over `store` and start loading the
    /// reference lists. Must be called from within a tokio runtime.
    pub fn mount(store: Arc<dyn TableStore>) -> Self {
        let (sender, events) = mpsc::unbounded_channel();

        let reference = Arc::new(ReferenceDataStore::new(Arc::clone(&store)));
        let cache = OptionCache::with_hook(
            Arc::clone(&store),
            Arc::clone(&reference),
            settled_hook(sender.clone()),
        );

        let mut resolver = SelectionResolver::new(cache, Arc::clone(&reference));
        resolver.refresh_all();
        info!("session mounted");

        Self {
            reference,
            resolver,
            engine: GenerationEngine::new(store),
            sender,
            events,
            ticket: 0,
            generating: false,
            result: None,
            generate_error: None,
        }
    }

    pub fn resolver(&self) -> &SelectionResolver {
        &self.resolver
    }

    pub fn is_loading_reference(&self) -> bool {
        !self.reference.is_loaded()
    }

    pub fn reference_error(&self) -> Option<String> {
        self.reference.error().map(ToString::to_string)
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    pub fn generate_error(&self) -> Option<&ValidationError> {
        self.generate_error.as_ref()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /// Any edit invalidates the last result and any batch still running.
    fn touch(&mut self) {
        self.ticket += 1;
        self.result = None;
        self.generating = false;
    }

    pub fn set_field(&mut self, id: RowId, level: Level, value: &str) -> Result<(), SelectionError> {
        self.resolver.set_field(id, level, value)?;
        self.touch();
        Ok(())
    }

    pub fn add_row(&mut self) -> RowId {
        let (id, _) = self.resolver.add_row();
        self.touch();
        id
    }

    pub fn delete_row(&mut self, id: RowId) -> Result<(), SelectionError> {
        self.resolver.delete_row(id)?;
        self.touch();
        Ok(())
    }

    /// Validate the rows and start the lookups in the background.
    ///
    /// An incomplete row is reported here and no lookup is started. The
    /// result arrives later as [`SessionEvent::Generated`].
    pub fn generate(&mut self) -> Result<(), ValidationError> {
        self.result = None;
        self.generate_error = None;

        let references = match GenerationEngine::validate(self.resolver.rows()) {
            Ok(references) => references,
            Err(err) => {
                info!(error = %err, "generation refused");
                self.generate_error = Some(err.clone());
                return Err(err);
            }
        };

        self.ticket += 1;
        self.generating = true;
        let ticket = self.ticket;
        let engine = self.engine.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = engine.resolve(&references).await;
            if sender.send(SessionEvent::Generated { ticket, result }).is_err() {
                debug!(ticket, "session gone, dropping generation result");
            }
        });
        Ok(())
    }

    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::OptionsSettled(key) => {
                self.resolver.settle(&key);
            }
            SessionEvent::Generated { ticket, result } => {
                if ticket == self.ticket {
                    self.result = Some(result);
                    self.generating = false;
                } else {
                    debug!(ticket, current = self.ticket, "discarding stale generation");
                }
            }
        }
    }

    /// Wait for the next background result and apply it.
    pub async fn process_next(&mut self) {
        // The session holds a sender itself, so the channel never closes here.
        if let Some(event) = self.events.recv().await {
            self.apply(event);
        }
    }

    /// Apply every result that has already arrived. Returns how many.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Tear the session down. Fetches still in flight finish into their
    /// cache entries, and their results go nowhere.
    pub fn unmount(self) {
        info!(rows = self.resolver.rows().len(), "session unmounted");
    }
}

/// Forwards settled cache keys to the session. Once the session is gone the
/// cache entry is still written; only the notification is dropped.
fn settled_hook(sender: UnboundedSender<SessionEvent>) -> SettledHook {
    Box::new(move |key| {
        if sender.send(SessionEvent::OptionsSettled(key.clone())).is_err() {
            debug!(%key, "session gone, dropping settled options");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStatus;
    use crate::choice::Choice;
    use crate::store::memory::MemoryStore;
    use crate::store::{Query, BOOKS, VERSES, VERSIONS};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_rows(VERSIONS, vec![json!({"id": "1", "name": "KJV"})])
                .with_rows(BOOKS, vec![json!({"id": "10", "name": "Genesis"})])
                .with_rows(
                    VERSES,
                    vec![json!({
                        "version_id": 1,
                        "book_id": 10,
                        "chapter": 1,
                        "verse": 1,
                        "text": "In the beginning..."
                    })],
                ),
        )
    }

    async fn pump_until<F>(session: &mut Session, done: F)
    where
        F: Fn(&Session) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            while !done(session) {
                session.process_next().await;
            }
        })
        .await
        .expect("session never reached the expected state");
    }

    async fn select(session: &mut Session, id: RowId, level: Level, value: &str) {
        pump_until(session, |s| {
            s.resolver()
                .options(id, level)
                .iter()
                .any(|choice| choice.key == value)
        })
        .await;
        session.set_field(id, level, value).unwrap();
    }

    async fn fill(session: &mut Session, id: RowId) {
        select(session, id, Level::Version, "1").await;
        select(session, id, Level::Book, "10").await;
        select(session, id, Level::Chapter, "1").await;
        select(session, id, Level::Verse, "1").await;
    }

    #[tokio::test]
    async fn test_select_and_generate_one_reference() {
        let store = store();
        let mut session = Session::mount(store.clone());
        assert!(session.is_loading_reference());

        let id = session.resolver().rows()[0].id;
        fill(&mut session, id).await;
        assert!(!session.is_loading_reference());

        session.generate().unwrap();
        assert!(session.is_generating());
        pump_until(&mut session, |s| s.result().is_some()).await;

        assert!(!session.is_generating());
        assert_eq!(
            session.result().unwrap().lines,
            vec!["KJV Genesis 1:1 — In the beginning..."]
        );
    }

    #[tokio::test]
    async fn test_two_rows_share_the_book_fetch() {
        let store = store();
        let mut session = Session::mount(store.clone());
        let first = session.resolver().rows()[0].id;
        let second = session.add_row();

        select(&mut session, first, Level::Version, "1").await;
        select(&mut session, second, Level::Version, "1").await;
        select(&mut session, first, Level::Book, "10").await;
        select(&mut session, second, Level::Book, "10").await;

        let book_queries = store.dispatch_count(|q: &Query| q.columns == ["book_id"]);
        assert_eq!(book_queries, 1);
    }

    #[tokio::test]
    async fn test_deleting_row_with_pending_chapters() {
        let store = store();
        let gate = store.hold_when(|q| q.columns == ["chapter"]);
        let mut session = Session::mount(store.clone());
        let doomed = session.add_row();

        select(&mut session, doomed, Level::Version, "1").await;
        select(&mut session, doomed, Level::Book, "10").await;
        assert!(session
            .resolver()
            .picker(doomed, Level::Chapter)
            .unwrap()
            .loading);

        session.delete_row(doomed).unwrap();
        gate.open();

        // Let the held fetch finish and deliver its event.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.drain(), 1);

        let chapters = CacheKey::Chapters {
            version: "1".to_string(),
            book: "10".to_string(),
        };
        assert_eq!(session.resolver.settle(&chapters), 0);
        assert_eq!(store.dispatch_count(|q| q.columns == ["chapter"]), 1);
        assert!(session.resolver().row(doomed).is_none());
        assert_eq!(session.resolver().rows().len(), 1);
        let template = &session.resolver().rows()[0];
        assert!(!template.is_set(Level::Version));
    }

    #[tokio::test]
    async fn test_edit_discards_running_generation() {
        let store = store();
        let mut session = Session::mount(store.clone());
        let id = session.resolver().rows()[0].id;
        fill(&mut session, id).await;

        let gate = store.hold_when(|q| q.columns == ["text"]);
        session.generate().unwrap();
        session.add_row();
        assert!(!session.is_generating());

        gate.open();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        session.drain();
        assert!(session.result().is_none());
    }

    #[tokio::test]
    async fn test_unmount_during_generation() {
        let store = store();
        let mut session = Session::mount(store.clone());
        let id = session.resolver().rows()[0].id;
        fill(&mut session, id).await;

        let gate = store.hold_when(|q| q.columns == ["text"]);
        session.generate().unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        session.unmount();

        gate.open();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.dispatch_count(|q| q.columns == ["text"]), 1);
    }

    #[tokio::test]
    async fn test_incomplete_rows_report_first_gap() {
        let store = store();
        let mut session = Session::mount(store.clone());
        let id = session.resolver().rows()[0].id;
        fill(&mut session, id).await;
        session.add_row();

        let err = session.generate().unwrap_err();
        assert_eq!(err.to_string(), "Row 2: please complete Version, Book, Chapter, Verse.");
        assert_eq!(session.generate_error(), Some(&err));
        assert!(!session.is_generating());
        assert_eq!(store.dispatch_count(|q| q.columns == ["text"]), 0);
    }

    #[tokio::test]
    async fn test_reference_failure_is_surfaced() {
        let store = store();
        store.fail_when(|q| q.table == VERSIONS, "permission denied for table versions");
        let mut session = Session::mount(store.clone());

        pump_until(&mut session, |s| !s.is_loading_reference()).await;
        assert_eq!(
            session.reference_error().as_deref(),
            Some("permission denied for table versions")
        );
        let id = session.resolver().rows()[0].id;
        assert!(session.resolver().options(id, Level::Version).is_empty());
        assert!(session.reference.books().is_empty());
    }

    #[tokio::test]
    async fn test_results_after_unmount_only_reach_the_cache() {
        let store = store();
        let gate = store.hold_when(|q| q.table == VERSIONS);
        let reference = Arc::new(ReferenceDataStore::new(store.clone()));

        let (sender, events) = mpsc::unbounded_channel();
        let cache = OptionCache::with_hook(store.clone(), Arc::clone(&reference), settled_hook(sender));
        let fetch = cache.ensure(&CacheKey::Versions).unwrap();
        drop(events);

        gate.open();
        fetch.await.expect("a closed session must not fail the fetch");

        let entry = cache.get(&CacheKey::Versions);
        assert_eq!(entry.status, CacheStatus::Ready);
        assert_eq!(entry.options, vec![Choice::new("1", "KJV")]);
        assert!(reference.is_loaded());
        assert_eq!(store.dispatch_count(|q| q.table == VERSIONS), 1);
    }

    #[tokio::test]
    async fn test_unmount_with_fetches_in_flight() {
        let store = store();
        let gate = store.hold_when(|q| q.table == VERSIONS);
        let session = Session::mount(store.clone());
        session.unmount();

        gate.open();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.dispatch_count(|q| q.table == VERSIONS), 1);
        assert_eq!(store.dispatch_count(|q| q.table == BOOKS), 1);
    }
}
