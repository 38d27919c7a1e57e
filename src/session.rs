//! Stateful session over a document store
//!
//! Every operation returns the session so calls can be chained. The first
//! failure is kept and turns every later call into a no-op until the caller
//! takes it with [`Session::take_error`] or [`Session::result`].
//!
//! ```rust,no_run
//! use dynamo_model::{Model, Session, SessionConfig, impl_record};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Dog {
//!     #[serde(rename = "Breed")]
//!     breed: String,
//!     #[serde(rename = "Age")]
//!     age: u32,
//!     #[serde(flatten)]
//!     model: Model,
//! }
//! impl_record!(Dog, model);
//!
//! # async fn run() -> Result<(), dynamo_model::Error> {
//! let mut session = Session::connect(&SessionConfig::from_env()).await?;
//!
//! let mut dog = Dog { breed: "Beagle".to_string(), age: 3, ..Dog::default() };
//! session.create(&mut dog).await.result()?;
//!
//! // One query for both conditions
//! let mut dogs: Vec<Dog> = Vec::new();
//! session
//!     .where_in(true, &mut dogs, "Breed", &["Beagle", "Dalmatian"])
//!     .await
//!     .where_in(false, &mut dogs, "Age", &[2, 3, 4])
//!     .await
//!     .result()?;
//! # Ok(())
//! # }
//! ```

use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use serde_dynamo::{from_item, to_attribute_value, to_item};
use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::chain::{AccumulateStep, ChainState, NarrowStep};
use crate::codec::{KeyManagement, RecordCodec};
use crate::config::{SessionConfig, aws_config_defaults};
use crate::error::Error;
use crate::filter::{FilterExecutor, match_mask, retain_by_mask};
use crate::identity::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::kms::KmsKeyManagement;
use crate::model::{
    CREATED_AT_ATTRIBUTE, DELETED_AT_ATTRIBUTE, ID_ATTRIBUTE, Model, Record, TYPE_ATTRIBUTE,
    UPDATED_AT_ATTRIBUTE,
};
use crate::predicate::{self, Condition, Expr};
use crate::schema::{Schema, SchemaRegistry, assign_path, resolve_path};
use crate::setup;
use crate::store::{DocumentStore, DynamoStore, Item, Key, UpdateRequest};

/// Attributes the session manages and callers may not update
const MANAGED_ATTRIBUTES: [&str; 5] = [
    ID_ATTRIBUTE,
    TYPE_ATTRIBUTE,
    CREATED_AT_ATTRIBUTE,
    UPDATED_AT_ATTRIBUTE,
    DELETED_AT_ATTRIBUTE,
];

/// Record session bound to one table
pub struct Session {
    store: Arc<dyn DocumentStore>,
    table: String,
    codec: RecordCodec,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    registry: SchemaRegistry,
    chain: ChainState,
    error: Option<Error>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("table", &self.table)
            .field("codec", &self.codec)
            .field("registry", &self.registry)
            .field("chain", &self.chain)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session over `store`, keeping every record type in `table`
    pub fn new(store: Arc<dyn DocumentStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            codec: RecordCodec::new(),
            ids: Arc::new(UuidGenerator),
            clock: Arc::new(SystemClock),
            registry: SchemaRegistry::default(),
            chain: ChainState::default(),
            error: None,
        }
    }

    /// Encrypt sensitive fields with `keys` under `key_id`
    pub fn with_key_management(mut self, keys: Arc<dyn KeyManagement>, key_id: impl Into<String>) -> Self {
        self.codec = RecordCodec::with_key_management(keys, key_id);
        self
    }

    /// Generate record identities with `ids`
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Stamp lifecycle timestamps from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Connect to DynamoDB (and KMS when a key id is configured)
    pub async fn connect(config: &SessionConfig) -> Result<Self, Error> {
        let sdk_config = aws_config_defaults(config.endpoint_url.as_deref()).await;
        let store = DynamoStore::new(&sdk_config);

        if config.create_table {
            setup::create_table(store.client(), &config.table_name)
                .await
                .map_err(Error::backend("Connect"))?;
        }

        tracing::debug!(
            table = %config.table_name,
            encryption = config.kms_key_id.is_some(),
            "connected model session"
        );

        let session = Session::new(Arc::new(store), config.table_name.clone());
        Ok(match &config.kms_key_id {
            Some(key_id) => {
                session.with_key_management(Arc::new(KmsKeyManagement::new(&sdk_config)), key_id)
            }
            None => session,
        })
    }

    /// Table every record is stored in
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Chained query state
    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    /// First error hit by the session, if any
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Take the pending error, making the session usable again
    ///
    /// Any chain in progress when the error was hit is dropped.
    pub fn take_error(&mut self) -> Option<Error> {
        let err = self.error.take();
        if err.is_some() {
            self.chain.reset();
        }
        err
    }

    /// Take the pending error as a `Result`
    pub fn result(&mut self) -> Result<(), Error> {
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn keep(&mut self, result: Result<(), Error>) -> &mut Self {
        if let Err(err) = result {
            tracing::debug!(error = %err, "session operation failed");
            self.error = Some(err);
        }
        self
    }

    /// Persist a new record, assigning its identity and timestamps
    ///
    /// A record that already has an identity is refused without a write.
    pub async fn create<T: Record>(&mut self, record: &mut T) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_create(record).await;
        self.keep(result)
    }

    /// Persist a record in full, creating it when it has no identity
    pub async fn save<T: Record>(&mut self, record: &mut T) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_save(record).await;
        self.keep(result)
    }

    /// Load the record with identity `id` into `record`
    ///
    /// Soft-deleted records are returned like any other.
    pub async fn find<T: Record>(&mut self, record: &mut T, id: &str) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_find(record, id).await;
        self.keep(result)
    }

    /// Write a single field of a persisted record
    ///
    /// `field` may be a dot-separated path into nested maps. The new value
    /// and the refreshed `UpdatedAt` are reflected into `record` once the
    /// write succeeds.
    pub async fn update<T, V>(&mut self, record: &mut T, field: &str, value: &V) -> &mut Self
    where
        T: Record,
        V: Serialize + ?Sized,
    {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_update(record, field, value).await;
        self.keep(result)
    }

    /// Remove a persisted record
    pub async fn delete<T: Record>(&mut self, record: &T) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_delete(record).await;
        self.keep(result)
    }

    /// Mark a persisted record as deleted without removing it
    ///
    /// A record that is already soft-deleted is left untouched.
    pub async fn soft_delete<T: Record>(&mut self, record: &mut T) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_soft_delete(record).await;
        self.keep(result)
    }

    /// Load every record of the type that is not soft-deleted
    pub async fn all<T: Record>(&mut self, records: &mut Vec<T>) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_all(records).await;
        self.keep(result)
    }

    /// Add an accumulating condition `field IN values`
    ///
    /// With `open` set, the condition is kept and nothing is executed. The
    /// first link with `open` unset runs a single query combining every
    /// condition of the chain and replaces `records` with the result.
    pub async fn where_in<T, V>(
        &mut self,
        open: bool,
        records: &mut Vec<T>,
        field: &str,
        values: &V,
    ) -> &mut Self
    where
        T: Record,
        V: Serialize + ?Sized,
    {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_where_in(open, records, field, values).await;
        self.keep(result)
    }

    /// Add a narrowing condition `field = value`
    ///
    /// When `records` already holds results they are filtered in memory;
    /// otherwise the store is queried. A chain whose earlier link matched
    /// nothing stays empty without querying again.
    pub async fn where_narrow<T, V>(
        &mut self,
        open: bool,
        records: &mut Vec<T>,
        field: &str,
        value: &V,
    ) -> &mut Self
    where
        T: Record,
        V: Serialize + ?Sized,
    {
        if self.error.is_some() {
            return self;
        }
        let result = self.try_where_narrow(open, records, field, value).await;
        self.keep(result)
    }

    fn executor(&self) -> FilterExecutor<'_> {
        FilterExecutor {
            store: self.store.as_ref(),
            table: &self.table,
            codec: &self.codec,
        }
    }

    async fn try_create<T: Record>(&mut self, record: &mut T) -> Result<(), Error> {
        let schema = self.registry.register::<T>("Create")?;
        let model = record.model();
        if model.has_identity() {
            return Err(Error::AlreadyExists {
                operation: "Create",
                type_name: schema.type_name().to_string(),
                id: model.id.clone(),
            });
        }
        self.insert(&schema, "Create", record).await
    }

    async fn try_save<T: Record>(&mut self, record: &mut T) -> Result<(), Error> {
        let schema = self.registry.register::<T>("Save")?;
        if !record.model().has_identity() {
            return self.insert(&schema, "Save", record).await;
        }

        let stored_type = &record.model().type_name;
        if !stored_type.is_empty() && stored_type != schema.type_name() {
            return Err(Error::usage(
                "Save",
                format!(
                    "record type `{stored_type}` does not match `{}`",
                    schema.type_name()
                ),
            ));
        }

        let previous = record.model().clone();
        let model = record.model_mut();
        model.type_name = schema.type_name().to_string();
        model.updated_at = self.clock.now();

        if let Err(err) = self.put(&schema, "Save", record).await {
            *record.model_mut() = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Stamp a fresh identity, write, and roll the stamp back on failure
    async fn insert<T: Record>(&self, schema: &Schema, operation: &'static str, record: &mut T) -> Result<(), Error> {
        let now = self.clock.now();
        let stamped = Model {
            id: self.ids.generate(),
            type_name: schema.type_name().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let previous = mem::replace(record.model_mut(), stamped);

        if let Err(err) = self.put(schema, operation, record).await {
            *record.model_mut() = previous;
            return Err(err);
        }
        tracing::debug!(
            table = %self.table,
            type_name = %schema.type_name(),
            id = %record.model().id,
            "created record"
        );
        Ok(())
    }

    async fn put<T: Record>(&self, schema: &Schema, operation: &'static str, record: &T) -> Result<(), Error> {
        let item = self.codec.encode(schema, record).await?;
        self.store
            .put_item(&self.table, item)
            .await
            .map_err(Error::backend(operation))
    }

    async fn try_find<T: Record>(&mut self, record: &mut T, id: &str) -> Result<(), Error> {
        let schema = self.registry.register::<T>("Find")?;
        let not_found = || Error::NotFound {
            operation: "Find",
            type_name: schema.type_name().to_string(),
            id: id.to_string(),
        };
        if id.is_empty() {
            return Err(not_found());
        }

        let key = Key::new(schema.type_name(), id);
        let item = self
            .store
            .get_item(&self.table, &key)
            .await
            .map_err(Error::backend("Find"))?
            .ok_or_else(not_found)?;

        *record = self.codec.decode(&schema, item).await?;
        Ok(())
    }

    async fn try_update<T, V>(&mut self, record: &mut T, field: &str, value: &V) -> Result<(), Error>
    where
        T: Record,
        V: Serialize + ?Sized,
    {
        let schema = self.registry.register::<T>("Update")?;
        let key = identity(&schema, "Update", record)?;

        let root = field.split('.').next().unwrap_or(field);
        if MANAGED_ATTRIBUTES.iter().any(|attribute| *attribute == root) {
            return Err(Error::usage(
                "Update",
                format!("`{field}` is managed by the session and cannot be updated"),
            ));
        }

        let mut item: Item = to_item(&*record)?;
        if resolve_path(&item, field).is_none() {
            return Err(Error::usage(
                "Update",
                format!("`{field}` is not a field of {}", schema.type_name()),
            ));
        }

        let value: AttributeValue = to_attribute_value(value)?;
        let now = self.clock.now();
        let stamp: AttributeValue = to_attribute_value(now)?;

        assign_path(&mut item, field, value.clone()).map_err(|detail| Error::usage("Update", detail))?;
        assign_path(&mut item, UPDATED_AT_ATTRIBUTE, stamp.clone())
            .map_err(|detail| Error::usage("Update", detail))?;
        let updated: T = from_item(item).map_err(|e| Error::InvalidShape {
            operation: "Update",
            detail: format!("`{field}` cannot hold the given value: {e}"),
        })?;

        let stored = self.codec.encode_value(&schema, field, value).await?;
        let request = UpdateRequest {
            key,
            set: vec![
                (field.to_string(), stored),
                (UPDATED_AT_ATTRIBUTE.to_string(), stamp),
            ],
            condition: Some(Expr::exists(ID_ATTRIBUTE)),
        };

        self.store
            .update_item(&self.table, request)
            .await
            .map_err(|source| {
                if source.is_conditional_check_failed() {
                    Error::NotFound {
                        operation: "Update",
                        type_name: schema.type_name().to_string(),
                        id: record.model().id.clone(),
                    }
                } else {
                    Error::backend("Update")(source)
                }
            })?;

        *record = updated;
        Ok(())
    }

    async fn try_delete<T: Record>(&mut self, record: &T) -> Result<(), Error> {
        let schema = self.registry.register::<T>("Delete")?;
        let key = identity(&schema, "Delete", record)?;
        self.store
            .delete_item(&self.table, &key)
            .await
            .map_err(Error::backend("Delete"))
    }

    async fn try_soft_delete<T: Record>(&mut self, record: &mut T) -> Result<(), Error> {
        let schema = self.registry.register::<T>("SoftDelete")?;
        let key = identity(&schema, "SoftDelete", record)?;
        if record.model().is_deleted() {
            tracing::debug!(type_name = %schema.type_name(), id = %key.id, "record already soft-deleted");
            return Ok(());
        }

        let now = self.clock.now();
        let request = UpdateRequest {
            key,
            set: vec![(DELETED_AT_ATTRIBUTE.to_string(), to_attribute_value(now)?)],
            condition: Some(Expr::And(vec![
                Expr::exists(ID_ATTRIBUTE),
                Expr::not_exists(DELETED_AT_ATTRIBUTE),
            ])),
        };

        match self.store.update_item(&self.table, request).await {
            Ok(()) => {
                record.model_mut().deleted_at = Some(now);
                Ok(())
            }
            Err(source) if source.is_conditional_check_failed() => {
                tracing::warn!(
                    table = %self.table,
                    type_name = %schema.type_name(),
                    id = %record.model().id,
                    "soft delete found no live record"
                );
                Err(Error::NotFound {
                    operation: "SoftDelete",
                    type_name: schema.type_name().to_string(),
                    id: record.model().id.clone(),
                })
            }
            Err(source) => Err(Error::backend("SoftDelete")(source)),
        }
    }

    async fn try_all<T: Record>(&mut self, records: &mut Vec<T>) -> Result<(), Error> {
        let schema = self.registry.register::<T>("All")?;
        let query = predicate::all_of_type(schema.type_name());
        *records = self.executor().fetch::<T>("All", &schema, &query).await?;
        Ok(())
    }

    async fn try_where_in<T, V>(
        &mut self,
        open: bool,
        records: &mut Vec<T>,
        field: &str,
        values: &V,
    ) -> Result<(), Error>
    where
        T: Record,
        V: Serialize + ?Sized,
    {
        let schema = self.registry.register::<T>("Where")?;
        let condition = Condition::new("Where", field, values)?;
        warn_if_sensitive(&schema, field);

        match self.chain.accumulate(condition, open)? {
            AccumulateStep::Defer => {
                tracing::debug!(
                    type_name = %schema.type_name(),
                    pending = self.chain.pending().len(),
                    "deferred where condition"
                );
                Ok(())
            }
            AccumulateStep::Flush(conditions) => {
                let found: Vec<T> = self.executor().flush(&schema, &conditions).await?;
                tracing::debug!(
                    type_name = %schema.type_name(),
                    conditions = conditions.len(),
                    count = found.len(),
                    "flushed where chain"
                );
                *records = found;
                Ok(())
            }
        }
    }

    async fn try_where_narrow<T, V>(
        &mut self,
        open: bool,
        records: &mut Vec<T>,
        field: &str,
        value: &V,
    ) -> Result<(), Error>
    where
        T: Record,
        V: Serialize + ?Sized,
    {
        let schema = self.registry.register::<T>("Where")?;
        let condition = Condition::new("Where", field, value)?;
        let [value] = condition.values() else {
            return Err(Error::usage(
                "Where",
                format!("narrowing on `{field}` takes a single value"),
            ));
        };

        let result = match self.chain.narrow(open, !records.is_empty())? {
            NarrowStep::Query => {
                warn_if_sensitive(&schema, field);
                let query = predicate::build_single_condition(schema.type_name(), field, value.clone());
                self.executor()
                    .fetch::<T>("Where", &schema, &query)
                    .await
                    .map(|found| *records = found)
            }
            NarrowStep::FilterInMemory => match_mask(records, field, value).map(|mask| {
                let before = records.len();
                retain_by_mask(records, &mask);
                tracing::debug!(
                    type_name = %schema.type_name(),
                    field,
                    before,
                    after = records.len(),
                    "narrowed results in memory"
                );
            }),
            NarrowStep::StillEmpty => {
                tracing::debug!(type_name = %schema.type_name(), field, "chain already empty");
                Ok(())
            }
        };

        if result.is_err() {
            self.chain.reset();
        }
        result
    }
}

fn identity<T: Record>(schema: &Schema, operation: &'static str, record: &T) -> Result<Key, Error> {
    let model = record.model();
    if !model.has_identity() {
        return Err(Error::NotFound {
            operation,
            type_name: schema.type_name().to_string(),
            id: String::new(),
        });
    }
    Ok(Key::new(schema.type_name(), model.id.clone()))
}

fn warn_if_sensitive(schema: &Schema, field: &str) {
    if schema.is_sensitive(field) {
        tracing::warn!(
            type_name = %schema.type_name(),
            field,
            "remote filter on a sensitive field cannot match encrypted values"
        );
    }
}
