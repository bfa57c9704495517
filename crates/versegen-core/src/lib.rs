pub mod cache;
pub mod choice;
pub mod config;
pub mod error;
pub mod generate;
pub mod reference;
pub mod resolver;
pub mod session;
pub mod store;

// Re-export main types for convenience
pub use cache::{CacheEntry, CacheKey, CacheStatus, OptionCache};
pub use choice::{Choice, Record};
pub use config::Config;
pub use error::{ReferenceDataError, SelectionError, StoreError, ValidationError};
pub use generate::{GenerationEngine, GenerationResult};
pub use reference::{ReferenceDataStore, ReferenceLists};
pub use resolver::{Level, Picker, Reference, RowId, RowState, SelectionResolver};
pub use session::{Session, SessionEvent};
pub use store::{memory::MemoryStore, postgrest::PostgrestClient, Query, TableStore};
