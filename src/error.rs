use serde_dynamo::Error as SerdeDynamoError;
use std::error::Error as StdError;
use std::fmt;

use crate::store::StoreError;

/// Boxed error returned by pluggable collaborators such as the key service
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Model session error
///
/// Every session operation records the first error it hits and turns the rest
/// of the chain into no-ops, so the error always names the operation that
/// failed first.
#[derive(Debug)]
pub enum Error {
    /// The record type does not serialize to a map and cannot be stored
    InvalidShape {
        /// Operation that rejected the record
        operation: &'static str,
        /// What was wrong with the shape
        detail: String,
    },
    /// The record type does not carry the lifecycle metadata at its top level
    MissingCapability {
        /// Operation that rejected the record
        operation: &'static str,
        /// Rust type name of the offending record
        type_name: String,
    },
    /// A type discriminator was requested for a type without a declared name
    UnnamedType {
        /// Full Rust type path that could not be named
        type_path: String,
    },
    /// Create was called on a record that already has an identity
    AlreadyExists {
        /// Operation that refused the record
        operation: &'static str,
        /// Type discriminator of the record
        type_name: String,
        /// Identity already present on the record
        id: String,
    },
    /// No item exists for the requested identity
    NotFound {
        /// Operation that looked the record up
        operation: &'static str,
        /// Type discriminator used for the lookup
        type_name: String,
        /// Identity used for the lookup (empty when the record had none)
        id: String,
    },
    /// A sensitive field could not be encrypted
    Encryption {
        /// Attribute path of the sensitive field
        field: String,
        /// Why encryption failed
        reason: String,
        /// Key service failure, when there was one
        source: Option<BoxError>,
    },
    /// A sensitive field could not be decrypted
    Decryption {
        /// Attribute path of the sensitive field
        field: String,
        /// Why decryption failed
        reason: String,
        /// Key service failure, when there was one
        source: Option<BoxError>,
    },
    /// The caller used the session in a way it does not support
    Usage {
        /// Operation that was misused
        operation: &'static str,
        /// Description of the misuse
        detail: String,
    },
    /// Serde DynamoDB serialization/deserialization error
    Serialization(SerdeDynamoError),
    /// The backing store failed
    Backend {
        /// Operation that issued the store call
        operation: &'static str,
        /// Underlying store failure
        source: StoreError,
    },
}

impl Error {
    /// Sentinel discriminator reported alongside [`Error::UnnamedType`]
    pub const UNNAMED_TYPE_NAME: &'static str = "unnamed_struct";

    /// Name of the session operation the error belongs to, if any
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Error::InvalidShape { operation, .. }
            | Error::MissingCapability { operation, .. }
            | Error::AlreadyExists { operation, .. }
            | Error::NotFound { operation, .. }
            | Error::Usage { operation, .. }
            | Error::Backend { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Check if the error reports a missing item
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if the error reports a create on an already persisted record
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    /// Check if the error came from the backing store
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend { .. })
    }

    /// Check if the error is a serialization/deserialization error
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::Serialization(_))
    }

    pub(crate) fn backend(operation: &'static str) -> impl FnOnce(StoreError) -> Error {
        move |source| Error::Backend { operation, source }
    }

    pub(crate) fn usage(operation: &'static str, detail: impl Into<String>) -> Error {
        Error::Usage {
            operation,
            detail: detail.into(),
        }
    }
}

macro_rules! impl_from_error {
    ($name:ident, $variant:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$variant(e)
            }
        }
    };
}

impl_from_error!(SerdeDynamoError, Serialization);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidShape { operation, detail } => {
                write!(f, "encountered an error during {operation} operation: {detail}")
            }
            Error::MissingCapability {
                operation,
                type_name,
            } => write!(
                f,
                "encountered an error during {operation} operation: struct {type_name} must embed dynamo_model::Model (e.g. `#[serde(flatten)] model: Model`)"
            ),
            Error::UnnamedType { type_path } => {
                write!(f, "cannot use an unnamed type as a record: {type_path}")
            }
            Error::AlreadyExists {
                operation,
                type_name,
                id,
            } => write!(
                f,
                "encountered an error during {operation} operation: {type_name} {id} already exists, try the update method instead"
            ),
            Error::NotFound {
                operation,
                type_name,
                id,
            } if id.is_empty() => write!(
                f,
                "encountered an error during {operation} operation: {type_name} record has no identity"
            ),
            Error::NotFound {
                operation,
                type_name,
                id,
            } => write!(
                f,
                "encountered an error during {operation} operation: {type_name} {id} not found"
            ),
            Error::Encryption { field, reason, .. } => {
                write!(f, "failed to encrypt sensitive field `{field}`: {reason}")
            }
            Error::Decryption { field, reason, .. } => {
                write!(f, "failed to decrypt sensitive field `{field}`: {reason}")
            }
            Error::Usage { operation, detail } => {
                write!(f, "encountered an error during {operation} operation: {detail}")
            }
            Error::Serialization(e) => write!(f, "DynamoDB serialization error: {e}"),
            Error::Backend { operation, source } => {
                write!(f, "encountered an error during {operation} operation: {source}")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Encryption { source, .. } | Error::Decryption { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn StdError + 'static)),
            Error::Serialization(e) => Some(e),
            Error::Backend { source, .. } => Some(source),
            _ => None,
        }
    }
}
