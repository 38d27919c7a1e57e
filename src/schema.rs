//! Type discriminators, record shape validation and attribute paths

use aws_sdk_dynamodb::types::AttributeValue;
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::model::{REQUIRED_ATTRIBUTES, Record};
use crate::store::Item;

/// Wrapper types unwrapped down to their element type when naming a type
const WRAPPERS: [&str; 10] = [
    "alloc::vec::Vec",
    "alloc::boxed::Box",
    "alloc::sync::Arc",
    "alloc::rc::Rc",
    "core::option::Option",
    "Vec",
    "Box",
    "Arc",
    "Rc",
    "Option",
];

/// Derive the snake-case type discriminator of `T`
///
/// References, slices, arrays and `Vec`/`Box`/`Arc`/`Rc`/`Option` wrappers
/// are unwrapped, so `Vec<Dog>` and `&mut [Box<Dog>]` both name `dog`.
pub fn derive_type_name<T: ?Sized>() -> Result<String, Error> {
    type_name_from_path(type_name::<T>())
}

/// Derive a type discriminator from a Rust type path
///
/// Tuples, closures, trait objects and other types without a declared name
/// fail with [`Error::UnnamedType`].
pub fn type_name_from_path(path: &str) -> Result<String, Error> {
    let unnamed = || Error::UnnamedType {
        type_path: path.to_string(),
    };

    let mut current = path.trim();
    loop {
        if let Some(rest) = current.strip_prefix('&') {
            let rest = rest.trim_start();
            current = rest.strip_prefix("mut ").unwrap_or(rest).trim_start();
        } else if let Some(rest) = current
            .strip_prefix("*const ")
            .or_else(|| current.strip_prefix("*mut "))
        {
            current = rest.trim_start();
        } else if let Some(inner) = current.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            current = match inner.rsplit_once(';') {
                Some((element, _)) => element.trim(),
                None => inner.trim(),
            };
        } else if let Some(inner) = unwrap_wrapper(current) {
            current = inner;
        } else {
            break;
        }
    }

    if current.is_empty()
        || current.starts_with('(')
        || current.starts_with("dyn ")
        || current.starts_with("impl ")
        || current.starts_with("fn(")
        || current.contains('{')
    {
        return Err(unnamed());
    }

    let base = current.split('<').next().unwrap_or(current);
    let ident = base.rsplit("::").next().unwrap_or(base).trim();
    if ident.is_empty() || !ident.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(unnamed());
    }

    Ok(to_snake_case(ident))
}

fn unwrap_wrapper(path: &str) -> Option<&str> {
    WRAPPERS.iter().find_map(|wrapper| {
        let inner = path
            .strip_prefix(wrapper)?
            .strip_prefix('<')?
            .strip_suffix('>')?;
        Some(first_generic_argument(inner))
    })
}

/// First top-level argument of a generic argument list (drops allocators)
fn first_generic_argument(arguments: &str) -> &str {
    let mut depth = 0usize;
    for (index, c) in arguments.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return arguments[..index].trim(),
            _ => {}
        }
    }
    arguments.trim()
}

/// Convert a type identifier to snake case (`HTTPServer` → `http_server`)
pub fn to_snake_case(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len() + 4);

    for (index, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let previous = index.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(index + 1).copied();
            let boundary = match previous {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// Check that `T` serializes to a map carrying the lifecycle metadata
///
/// A record that serializes to anything but a map fails with
/// [`Error::InvalidShape`]; a map without the metadata attributes at its top
/// level (the [`Model`](crate::Model) is not flattened in) fails with
/// [`Error::MissingCapability`].
pub fn validate_shape<T: Record>(operation: &'static str) -> Result<(), Error> {
    let rust_name = type_name::<T>();
    let short_name = rust_name.rsplit("::").next().unwrap_or(rust_name);

    let value: AttributeValue = serde_dynamo::to_attribute_value(T::default())?;
    let AttributeValue::M(item) = value else {
        return Err(Error::InvalidShape {
            operation,
            detail: format!("expected {short_name} to serialize to a map, got {}", kind(&value)),
        });
    };

    if REQUIRED_ATTRIBUTES
        .iter()
        .all(|attribute| item.contains_key(*attribute))
    {
        Ok(())
    } else {
        Err(Error::MissingCapability {
            operation,
            type_name: short_name.to_string(),
        })
    }
}

fn kind(value: &AttributeValue) -> &'static str {
    match value {
        AttributeValue::S(_) => "a string",
        AttributeValue::N(_) => "a number",
        AttributeValue::Bool(_) => "a boolean",
        AttributeValue::Null(_) => "null",
        AttributeValue::L(_) | AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_) => {
            "a list"
        }
        AttributeValue::B(_) => "binary",
        AttributeValue::M(_) => "a map",
        _ => "an unknown value",
    }
}

/// Resolve a dot-separated attribute path
///
/// Returns `None` when a segment is missing or when a non-map value (including
/// `NULL`, the form of an unset option) is reached before the last segment.
pub fn resolve_path<'a>(item: &'a Item, path: &str) -> Option<&'a AttributeValue> {
    let mut segments = path.split('.');
    let mut current = item.get(segments.next().filter(|s| !s.is_empty())?)?;
    for segment in segments {
        if segment.is_empty() {
            return None;
        }
        match current {
            AttributeValue::M(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Assign a value at a dot-separated attribute path
///
/// Every segment but the last must already resolve to a map.
pub fn assign_path(item: &mut Item, path: &str, value: AttributeValue) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("`{path}` is not a valid attribute path"));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| format!("`{path}` is not a valid attribute path"))?;

    let mut current = item;
    for segment in parents {
        current = match current.get_mut(*segment) {
            Some(AttributeValue::M(map)) => map,
            _ => return Err(format!("`{segment}` in `{path}` is not a map")),
        };
    }

    let _ = current.insert((*last).to_string(), value);
    Ok(())
}

/// Per-type facts resolved once and reused by every operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    type_name: String,
    sensitive_fields: &'static [&'static str],
}

impl Schema {
    /// Type discriminator of the record type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Attribute paths encrypted at rest
    pub fn sensitive_fields(&self) -> &'static [&'static str] {
        self.sensitive_fields
    }

    /// Whether the attribute path is, or sits inside, a sensitive field
    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive_fields.iter().any(|field| {
            path == *field
                || path
                    .strip_prefix(field)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

/// Record types validated by a session
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<TypeId, Arc<Schema>>,
}

impl SchemaRegistry {
    /// Validate `T` on first use and return its cached schema
    pub fn register<T: Record>(&mut self, operation: &'static str) -> Result<Arc<Schema>, Error> {
        if let Some(schema) = self.schemas.get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(schema));
        }

        let type_name = T::type_name()?;
        validate_shape::<T>(operation)?;

        let schema = Arc::new(Schema {
            type_name,
            sensitive_fields: T::SENSITIVE_FIELDS,
        });
        tracing::debug!(
            type_name = %schema.type_name,
            sensitive_fields = schema.sensitive_fields.len(),
            "registered record type"
        );

        let _ = self
            .schemas
            .insert(TypeId::of::<T>(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Number of validated record types
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no record type has been validated yet
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Model;
    use serde::{Deserialize, Serialize};
    use std::rc::Rc;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct TestUser {
        #[serde(rename = "Name")]
        name: String,
        #[serde(flatten)]
        model: Model,
    }
    crate::impl_record!(TestUser, model);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct NestedModel {
        #[serde(rename = "Name")]
        name: String,
        model: Model,
    }
    crate::impl_record!(NestedModel, model);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Wrapped(String, #[serde(skip)] Model);

    impl Record for Wrapped {
        fn model(&self) -> &Model {
            &self.1
        }

        fn model_mut(&mut self) -> &mut Model {
            &mut self.1
        }
    }

    fn item(pairs: Vec<(&str, AttributeValue)>) -> Item {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_derive_type_name_unwraps_wrappers() {
        assert_eq!(derive_type_name::<TestUser>().unwrap(), "test_user");
        assert_eq!(derive_type_name::<Vec<TestUser>>().unwrap(), "test_user");
        assert_eq!(derive_type_name::<&mut [Box<TestUser>]>().unwrap(), "test_user");
        assert_eq!(derive_type_name::<[Rc<TestUser>; 3]>().unwrap(), "test_user");
        assert_eq!(derive_type_name::<Option<Arc<TestUser>>>().unwrap(), "test_user");
    }

    #[test]
    fn test_derive_type_name_is_deterministic() {
        let first = derive_type_name::<TestUser>().unwrap();
        let second = derive_type_name::<TestUser>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unnamed_types_fail() {
        let err = derive_type_name::<(i32, String)>().unwrap_err();
        assert!(matches!(err, Error::UnnamedType { .. }));
        assert_eq!(Error::UNNAMED_TYPE_NAME, "unnamed_struct");

        let closure = || 1;
        fn name_of<F>(_: &F) -> Result<String, Error> {
            derive_type_name::<F>()
        }
        assert!(name_of(&closure).is_err());

        assert!(type_name_from_path("dyn core::fmt::Debug").is_err());
        assert!(type_name_from_path("").is_err());
    }

    #[test]
    fn test_type_name_from_path_strips_generics_and_modules() {
        assert_eq!(
            type_name_from_path("my_app::models::Wrapper<alloc::string::String>").unwrap(),
            "wrapper"
        );
        assert_eq!(
            type_name_from_path("alloc::vec::Vec<app::Dog, alloc::alloc::Global>").unwrap(),
            "dog"
        );
        assert_eq!(type_name_from_path("*const app::Dog").unwrap(), "dog");
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("Dog"), "dog");
        assert_eq!(to_snake_case("TestUser"), "test_user");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("MyStruct2"), "my_struct2");
        assert_eq!(to_snake_case("User2Profile"), "user2_profile");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("ABC"), "abc");
    }

    #[test]
    fn test_validate_shape() {
        assert!(validate_shape::<TestUser>("Create").is_ok());

        let err = validate_shape::<NestedModel>("Save").unwrap_err();
        assert!(
            matches!(err, Error::MissingCapability { operation: "Save", ref type_name } if type_name == "NestedModel")
        );

        let err = validate_shape::<Wrapped>("Where").unwrap_err();
        assert!(matches!(err, Error::InvalidShape { operation: "Where", .. }), "{err}");
    }

    #[test]
    fn test_registry_caches_schema() {
        let mut registry = SchemaRegistry::default();
        assert!(registry.is_empty());

        let first = registry.register::<TestUser>("Create").unwrap();
        let second = registry.register::<TestUser>("Find").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.type_name(), "test_user");
        assert_eq!(registry.len(), 1);

        assert!(registry.register::<NestedModel>("Create").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_path() {
        let item = item(vec![
            ("Name", AttributeValue::S("Buddy".to_string())),
            (
                "Owner",
                AttributeValue::M(HashMap::from([(
                    "Address".to_string(),
                    AttributeValue::M(HashMap::from([(
                        "City".to_string(),
                        AttributeValue::S("Oslo".to_string()),
                    )])),
                )])),
            ),
            ("Vet", AttributeValue::Null(true)),
        ]);

        assert_eq!(
            resolve_path(&item, "Name"),
            Some(&AttributeValue::S("Buddy".to_string()))
        );
        assert_eq!(
            resolve_path(&item, "Owner.Address.City"),
            Some(&AttributeValue::S("Oslo".to_string()))
        );
        assert_eq!(resolve_path(&item, "Vet"), Some(&AttributeValue::Null(true)));
        assert_eq!(resolve_path(&item, "Vet.Name"), None);
        assert_eq!(resolve_path(&item, "Name.Length"), None);
        assert_eq!(resolve_path(&item, "Owner.Phone"), None);
        assert_eq!(resolve_path(&item, "Owner..City"), None);
        assert_eq!(resolve_path(&item, ""), None);
    }

    #[test]
    fn test_assign_path() {
        let mut item = item(vec![(
            "Owner",
            AttributeValue::M(HashMap::from([(
                "Name".to_string(),
                AttributeValue::S("Ann".to_string()),
            )])),
        )]);

        assign_path(&mut item, "Owner.Name", AttributeValue::S("Bo".to_string())).unwrap();
        assert_eq!(
            resolve_path(&item, "Owner.Name"),
            Some(&AttributeValue::S("Bo".to_string()))
        );

        assign_path(&mut item, "Age", AttributeValue::N("3".to_string())).unwrap();
        assert_eq!(resolve_path(&item, "Age"), Some(&AttributeValue::N("3".to_string())));

        assert!(assign_path(&mut item, "Age.Years", AttributeValue::N("3".to_string())).is_err());
        assert!(assign_path(&mut item, "Missing.Name", AttributeValue::Null(true)).is_err());
        assert!(assign_path(&mut item, "Owner.", AttributeValue::Null(true)).is_err());
    }

    #[test]
    fn test_schema_sensitive_paths() {
        let schema = Schema {
            type_name: "dog".to_string(),
            sensitive_fields: &["Secret", "Owner.Token"],
        };
        assert!(schema.is_sensitive("Secret"));
        assert!(schema.is_sensitive("Secret.Inner"));
        assert!(schema.is_sensitive("Owner.Token"));
        assert!(!schema.is_sensitive("SecretName"));
        assert!(!schema.is_sensitive("Owner"));
    }
}
