use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Error;
use crate::schema;

/// Attribute holding the record identity (table sort key)
pub const ID_ATTRIBUTE: &str = "ID";
/// Attribute holding the type discriminator (table partition key)
pub const TYPE_ATTRIBUTE: &str = "Type";
/// Attribute holding the creation timestamp
pub const CREATED_AT_ATTRIBUTE: &str = "CreatedAt";
/// Attribute holding the last write timestamp
pub const UPDATED_AT_ATTRIBUTE: &str = "UpdatedAt";
/// Attribute whose presence marks a soft-deleted record
pub const DELETED_AT_ATTRIBUTE: &str = "DeletedAt";

/// Attributes every stored record must expose at its top level
pub(crate) const REQUIRED_ATTRIBUTES: [&str; 4] = [
    ID_ATTRIBUTE,
    TYPE_ATTRIBUTE,
    CREATED_AT_ATTRIBUTE,
    UPDATED_AT_ATTRIBUTE,
];

/// Lifecycle metadata carried by every persisted record
///
/// Embed it with `#[serde(flatten)]` so its attributes sit next to the
/// record's own fields in the stored item. All fields are managed by the
/// session; callers only read them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Generated identity, empty until the record is created
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Type discriminator derived from the record's type name
    #[serde(rename = "Type", default)]
    pub type_name: String,
    /// Set once when the record is created
    #[serde(rename = "CreatedAt", default)]
    pub created_at: DateTime<Utc>,
    /// Refreshed on every full or partial write
    #[serde(rename = "UpdatedAt", default)]
    pub updated_at: DateTime<Utc>,
    /// Set once when the record is soft-deleted
    #[serde(
        rename = "DeletedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Whether the record has been persisted
    pub fn has_identity(&self) -> bool {
        !self.id.is_empty()
    }

    /// Whether the record has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Capability every persistable type implements
///
/// The stored item of a record is its `serde` form, so the type must embed a
/// [`Model`] with `#[serde(flatten)]`. The session checks that once per type
/// before first use.
///
/// ```
/// use dynamo_model::{Model, impl_record};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Dog {
///     #[serde(rename = "Name")]
///     name: String,
///     #[serde(flatten)]
///     model: Model,
/// }
///
/// impl_record!(Dog, model);
/// ```
pub trait Record: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Attribute paths whose string values are encrypted at rest
    const SENSITIVE_FIELDS: &'static [&'static str] = &[];

    /// Embedded lifecycle metadata
    fn model(&self) -> &Model;

    /// Embedded lifecycle metadata, mutably
    fn model_mut(&mut self) -> &mut Model;

    /// Type discriminator stored in the `Type` attribute
    ///
    /// Defaults to the snake-cased type name.
    fn type_name() -> Result<String, Error> {
        schema::derive_type_name::<Self>()
    }
}

/// Implement [`Record`] for a struct embedding [`Model`]
///
/// `impl_record!(Type, field)` or, with encrypted attributes,
/// `impl_record!(Type, field, ["Secret", "Owner.Token"])`.
#[macro_export]
macro_rules! impl_record {
    ($ty:ty, $field:ident) => {
        $crate::impl_record!($ty, $field, []);
    };
    ($ty:ty, $field:ident, [$($sensitive:expr),* $(,)?]) => {
        impl $crate::Record for $ty {
            const SENSITIVE_FIELDS: &'static [&'static str] = &[$($sensitive),*];

            fn model(&self) -> &$crate::Model {
                &self.$field
            }

            fn model_mut(&mut self) -> &mut $crate::Model {
                &mut self.$field
            }
        }
    };
}
