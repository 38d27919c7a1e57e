use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{DocumentStore, Item, Key, QueryRequest, StoreError, StoreOperation, UpdateRequest};
use crate::schema::assign_path;

type Partition = BTreeMap<(String, String), Item>;

/// In-process [`DocumentStore`] for tests and local development
///
/// Items are kept per table, ordered by `(Type, ID)`. Clones share the same
/// data. Each operation counts its calls and can be told to fail, which lets
/// tests assert how many round trips a chain performed.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Partition>>>,
    calls: Arc<[AtomicUsize; 5]>,
    failures: Arc<[AtomicBool; 5]>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let calls: HashMap<String, usize> = StoreOperation::ALL
            .iter()
            .map(|op| (op.to_string(), self.call_count(*op)))
            .collect();
        f.debug_struct("MemoryStore").field("calls", &calls).finish()
    }
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `operation` fail (or succeed again)
    pub fn fail_operation(&self, operation: StoreOperation, fail: bool) {
        self.failures[operation.index()].store(fail, Ordering::SeqCst);
    }

    /// Number of calls made for `operation`, including failed ones
    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.calls[operation.index()].load(Ordering::SeqCst)
    }

    /// Reset every call counter to zero
    pub fn reset_call_counts(&self) {
        for counter in self.calls.iter() {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Stored item exactly as written, bypassing decoding
    pub async fn raw_item(&self, table: &str, key: &Key) -> Option<Item> {
        let tables = self.tables.read().await;
        tables
            .get(table)?
            .get(&(key.type_name.clone(), key.id.clone()))
            .cloned()
    }

    /// Number of items stored in `table`
    pub async fn len(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map_or(0, BTreeMap::len)
    }

    /// Whether `table` holds no items
    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }

    fn begin(&self, operation: StoreOperation) -> Result<(), StoreError> {
        let _ = self.calls[operation.index()].fetch_add(1, Ordering::SeqCst);
        if self.failures[operation.index()].load(Ordering::SeqCst) {
            tracing::debug!(%operation, "memory store refusing operation");
            return Err(StoreError::Unavailable { operation });
        }
        Ok(())
    }
}

fn item_key(item: &Item) -> Result<(String, String), StoreError> {
    let attribute = |name: &str| match item.get(name) {
        Some(aws_sdk_dynamodb::types::AttributeValue::S(value)) if !value.is_empty() => {
            Ok(value.clone())
        }
        _ => Err(StoreError::InvalidPath(name.to_string())),
    };
    Ok((
        attribute(crate::model::TYPE_ATTRIBUTE)?,
        attribute(crate::model::ID_ATTRIBUTE)?,
    ))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put_item(&self, table: &str, item: Item) -> Result<(), StoreError> {
        self.begin(StoreOperation::Put)?;
        let key = item_key(&item)?;
        let mut tables = self.tables.write().await;
        let _ = tables.entry(table.to_string()).or_default().insert(key, item);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError> {
        self.begin(StoreOperation::Get)?;
        Ok(self.raw_item(table, key).await)
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        self.begin(StoreOperation::Delete)?;
        let mut tables = self.tables.write().await;
        if let Some(partition) = tables.get_mut(table) {
            let _ = partition.remove(&(key.type_name.clone(), key.id.clone()));
        }
        Ok(())
    }

    async fn update_item(&self, table: &str, update: UpdateRequest) -> Result<(), StoreError> {
        self.begin(StoreOperation::Update)?;
        let mut tables = self.tables.write().await;
        let partition = tables.entry(table.to_string()).or_default();
        let key = (update.key.type_name.clone(), update.key.id.clone());

        let existing = partition.get(&key).cloned();
        if let Some(condition) = &update.condition {
            let current = existing.clone().unwrap_or_default();
            if !condition.matches(&current) {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }

        let mut item = existing.unwrap_or_else(|| update.key.to_item());
        for (path, value) in update.set {
            assign_path(&mut item, &path, value).map_err(|_| StoreError::InvalidPath(path))?;
        }
        let _ = partition.insert(key, item);
        Ok(())
    }

    async fn query(&self, table: &str, query: &QueryRequest) -> Result<Vec<Item>, StoreError> {
        self.begin(StoreOperation::Query)?;
        let tables = self.tables.read().await;
        let Some(partition) = tables.get(table) else {
            return Ok(Vec::new());
        };

        Ok(partition
            .iter()
            .filter(|((type_name, _), _)| *type_name == query.type_name)
            .map(|(_, item)| item)
            .filter(|item| query.filter.as_ref().is_none_or(|filter| filter.matches(item)))
            .cloned()
            .collect())
    }
}
