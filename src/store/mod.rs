//! Backing document store
//!
//! The session only talks to the store through [`DocumentStore`], so the same
//! chain logic runs against DynamoDB ([`DynamoStore`]) or the in-process
//! [`MemoryStore`].

use async_trait::async_trait;
use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::get_item::GetItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::types::error::ConditionalCheckFailedException;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use crate::error::BoxError;
use crate::model::{ID_ATTRIBUTE, TYPE_ATTRIBUTE};
use crate::predicate::Expr;

mod dynamodb;
mod memory;

pub use dynamodb::DynamoStore;
pub use memory::MemoryStore;

/// Native item representation shared by every store
pub type Item = HashMap<String, AttributeValue>;

type DynamoPutError = SdkError<PutItemError, Response>;
type DynamoGetError = SdkError<GetItemError, Response>;
type DynamoQueryError = SdkError<QueryError, Response>;
type DynamoUpdateError = SdkError<UpdateItemError, Response>;
type DynamoDeleteItemError = SdkError<DeleteItemError, Response>;
type DynamoCreateTableError = SdkError<CreateTableError, Response>;

/// Composite `(Type, ID)` identity of a stored record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Type discriminator (partition key)
    pub type_name: String,
    /// Record identity (sort key)
    pub id: String,
}

impl Key {
    /// Build a key from a type discriminator and an identity
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    /// Key attributes in native item form
    pub fn to_item(&self) -> Item {
        HashMap::from([
            (
                TYPE_ATTRIBUTE.to_string(),
                AttributeValue::S(self.type_name.clone()),
            ),
            (ID_ATTRIBUTE.to_string(), AttributeValue::S(self.id.clone())),
        ])
    }
}

/// Query over one type partition with an optional filter
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    /// Type discriminator the query is scoped to
    pub type_name: String,
    /// Filter applied to every item of the partition
    pub filter: Option<Expr>,
}

impl QueryRequest {
    /// Key condition scoping the query to its type partition
    pub fn key_condition(&self) -> Expr {
        Expr::eq(TYPE_ATTRIBUTE, AttributeValue::S(self.type_name.clone()))
    }
}

/// Partial update of a stored item
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRequest {
    /// Item to update
    pub key: Key,
    /// Attribute paths and the values assigned to them
    pub set: Vec<(String, AttributeValue)>,
    /// Condition the stored item must satisfy for the update to apply
    pub condition: Option<Expr>,
}

/// Store operation, used for logging and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// PutItem
    Put,
    /// GetItem
    Get,
    /// DeleteItem
    Delete,
    /// UpdateItem
    Update,
    /// Query
    Query,
}

impl StoreOperation {
    pub(crate) const ALL: [StoreOperation; 5] = [
        StoreOperation::Put,
        StoreOperation::Get,
        StoreOperation::Delete,
        StoreOperation::Update,
        StoreOperation::Query,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            StoreOperation::Put => 0,
            StoreOperation::Get => 1,
            StoreOperation::Delete => 2,
            StoreOperation::Update => 3,
            StoreOperation::Query => 4,
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::Put => "put",
            StoreOperation::Get => "get",
            StoreOperation::Delete => "delete",
            StoreOperation::Update => "update",
            StoreOperation::Query => "query",
        };
        f.write_str(name)
    }
}

/// Document store client
///
/// Every method is one remote round trip. Implementations must not retry on
/// their own behalf beyond what the underlying client is configured to do.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write a full item, replacing any item with the same key
    async fn put_item(&self, table: &str, item: Item) -> Result<(), StoreError>;

    /// Read a single item by key
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError>;

    /// Remove a single item by key
    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError>;

    /// Assign attributes on an existing item
    async fn update_item(&self, table: &str, update: UpdateRequest) -> Result<(), StoreError>;

    /// Return every item of a type partition matching the filter
    async fn query(&self, table: &str, query: &QueryRequest) -> Result<Vec<Item>, StoreError>;
}

/// Document store failure
#[derive(Debug)]
pub enum StoreError {
    /// DynamoDB request builder error
    BuildError(BuildError),
    /// DynamoDB PutItem operation error
    DynamoPutError(DynamoPutError),
    /// DynamoDB GetItem operation error
    DynamoGetError(DynamoGetError),
    /// DynamoDB Query operation error
    DynamoQueryError(DynamoQueryError),
    /// DynamoDB UpdateItem operation error
    DynamoUpdateError(DynamoUpdateError),
    /// DynamoDB DeleteItem operation error
    DynamoDeleteItemError(DynamoDeleteItemError),
    /// DynamoDB CreateTable operation error
    DynamoCreateTableError(DynamoCreateTableError),
    /// Waiting for a table to become active failed
    Waiter(BoxError),
    /// The in-memory store was told to fail this operation
    Unavailable {
        /// Operation that was refused
        operation: StoreOperation,
    },
    /// The in-memory store rejected an update whose condition did not hold
    ConditionalCheckFailed,
    /// The in-memory store could not apply an update to the given path
    InvalidPath(String),
}

impl StoreError {
    /// Check if an update was rejected because its condition did not hold
    pub fn is_conditional_check_failed(&self) -> bool {
        match self {
            StoreError::ConditionalCheckFailed => true,
            StoreError::DynamoUpdateError(dynamo_err) => matches!(
                dynamo_err.as_service_error(),
                Some(UpdateItemError::ConditionalCheckFailedException(
                    ConditionalCheckFailedException { .. }
                ))
            ),
            _ => false,
        }
    }
}

macro_rules! impl_from_error {
    ($name:ident) => {
        impl From<$name> for StoreError {
            fn from(e: $name) -> Self {
                StoreError::$name(e)
            }
        }
    };
}

impl_from_error!(BuildError);
impl_from_error!(DynamoPutError);
impl_from_error!(DynamoGetError);
impl_from_error!(DynamoQueryError);
impl_from_error!(DynamoUpdateError);
impl_from_error!(DynamoDeleteItemError);
impl_from_error!(DynamoCreateTableError);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::BuildError(e) => write!(f, "DynamoDB request builder error: {}", e),
            StoreError::DynamoPutError(e) => {
                write!(f, "DynamoDB PutItem operation failed: {}", e)
            }
            StoreError::DynamoGetError(e) => {
                write!(f, "DynamoDB GetItem operation failed: {}", e)
            }
            StoreError::DynamoQueryError(e) => {
                write!(f, "DynamoDB Query operation failed: {}", e)
            }
            StoreError::DynamoUpdateError(e) => {
                write!(f, "DynamoDB UpdateItem operation failed: {}", e)
            }
            StoreError::DynamoDeleteItemError(e) => {
                write!(f, "DynamoDB DeleteItem operation failed: {}", e)
            }
            StoreError::DynamoCreateTableError(e) => {
                write!(f, "DynamoDB CreateTable operation failed: {}", e)
            }
            StoreError::Waiter(e) => write!(f, "waiting for table failed: {}", e),
            StoreError::Unavailable { operation } => {
                write!(f, "store unavailable for {operation}")
            }
            StoreError::ConditionalCheckFailed => f.write_str("the conditional request failed"),
            StoreError::InvalidPath(path) => {
                write!(f, "the document path `{path}` is invalid for update")
            }
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::BuildError(e) => Some(e),
            StoreError::DynamoPutError(e) => Some(e),
            StoreError::DynamoGetError(e) => Some(e),
            StoreError::DynamoQueryError(e) => Some(e),
            StoreError::DynamoUpdateError(e) => Some(e),
            StoreError::DynamoDeleteItemError(e) => Some(e),
            StoreError::DynamoCreateTableError(e) => Some(e),
            StoreError::Waiter(e) => {
                let source: &(dyn StdError + 'static) = e.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}
