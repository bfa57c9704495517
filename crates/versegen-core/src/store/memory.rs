use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

use super::{Filter, Query, TableStore};
use crate::choice::Record;
use crate::error::StoreError;

type Matcher = Box<dyn Fn(&Query) -> bool + Send + Sync>;

struct Failure {
    matches: Matcher,
    message: String,
}

struct Hold {
    matches: Matcher,
    gate: Arc<Semaphore>,
}

/// Releases every query held by [`MemoryStore::hold_when`].
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn open(&self) {
        // Closing wakes every waiter and lets later arrivals straight through.
        self.0.close();
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Record>>,
    dispatched: Mutex<Vec<Query>>,
    failures: Mutex<Vec<Failure>>,
    holds: Mutex<Vec<Hold>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows to `table`; non-object values are ignored.
    pub fn with_rows(mut self, table: &str, rows: Vec<Value>) -> Self {
        let records = rows.into_iter().filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        });
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend(records);
        self
    }

    /// Parse a fixture of the form `{ "<table>": [ {..}, .. ], .. }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let tables: HashMap<String, Vec<Record>> = serde_json::from_str(json)?;
        Ok(Self {
            tables,
            ..Self::default()
        })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    /// Make every matching query fail with `message`.
    pub fn fail_when<F>(&self, matches: F, message: &str)
    where
        F: Fn(&Query) -> bool + Send + Sync + 'static,
    {
        lock(&self.failures).push(Failure {
            matches: Box::new(matches),
            message: message.to_string(),
        });
    }

    /// Hold every matching query pending until the returned gate opens.
    pub fn hold_when<F>(&self, matches: F) -> Gate
    where
        F: Fn(&Query) -> bool + Send + Sync + 'static,
    {
        let gate = Arc::new(Semaphore::new(0));
        lock(&self.holds).push(Hold {
            matches: Box::new(matches),
            gate: Arc::clone(&gate),
        });
        Gate(gate)
    }

    /// Every query dispatched so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<Query> {
        lock(&self.dispatched).clone()
    }

    pub fn dispatch_count<F>(&self, matches: F) -> usize
    where
        F: Fn(&Query) -> bool,
    {
        lock(&self.dispatched).iter().filter(|q| matches(q)).count()
    }

    fn run(&self, query: &Query) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(column) = &query.order {
            rows.sort_by(|a, b| compare_values(a.get(column), b.get(column)));
        }

        if !query.columns.is_empty() {
            for row in &mut rows {
                row.retain(|column, _| query.columns.contains(column));
            }
        }
        rows
    }
}

fn matches_filter(row: &Record, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => row.get(column).is_some_and(|v| loosely_equal(v, value)),
        Filter::NotNull(column) => row.get(column).is_some_and(|v| !v.is_null()),
    }
}

/// Numbers compare numerically, so `1` matches `1.0` and `"1"` matches `1`.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

/// Ascending, nulls last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        lock(&self.dispatched).push(query.clone());

        let gates: Vec<Arc<Semaphore>> = lock(&self.holds)
            .iter()
            .filter(|hold| (hold.matches)(query))
            .map(|hold| Arc::clone(&hold.gate))
            .collect();
        for gate in gates {
            // Only ever resolves by the gate closing.
            let _ = gate.acquire().await;
        }

        // Every fetch is a suspend point, even without a gate.
        tokio::task::yield_now().await;

        let failure = lock(&self.failures)
            .iter()
            .find(|failure| (failure.matches)(query))
            .map(|failure| failure.message.clone());
        if let Some(message) = failure {
            return Err(StoreError::Rejected(message));
        }

        Ok(self.run(query))
    }
}
