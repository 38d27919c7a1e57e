//! Record encoding with per-field envelope encryption

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_dynamo::{from_item, to_item};
use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, Error};
use crate::model::Record;
use crate::schema::Schema;
use crate::store::Item;

/// Symmetric key service used to protect sensitive fields
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Encrypt `plaintext` under `key_id`, returning the ciphertext blob
    async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError>;

    /// Decrypt a ciphertext blob produced by [`KeyManagement::encrypt`] under `key_id`
    async fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError>;
}

/// Converts records to stored items and back
///
/// Sensitive string fields are encrypted on the way in and decrypted on the
/// way out. Every other field passes through unchanged.
#[derive(Clone, Default)]
pub struct RecordCodec {
    keys: Option<Arc<dyn KeyManagement>>,
    key_id: Option<String>,
}

impl fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCodec")
            .field("key_management", &self.keys.is_some())
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl RecordCodec {
    /// Codec without a key service; records with sensitive fields cannot be written
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec encrypting sensitive fields with the given key service and key
    pub fn with_key_management(keys: Arc<dyn KeyManagement>, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        Self {
            keys: Some(keys),
            key_id: (!key_id.is_empty()).then_some(key_id),
        }
    }

    /// Serialize a record, encrypting its sensitive fields
    pub async fn encode<T: Record>(&self, schema: &Schema, record: &T) -> Result<Item, Error> {
        let mut item: Item = to_item(record)?;
        for field in schema.sensitive_fields() {
            if let Some(value) = resolve_mut(&mut item, field) {
                *value = self.encrypt_value(field, value).await?;
            }
        }
        Ok(item)
    }

    /// Encode a single value written to `path` by a partial update
    ///
    /// Writing a map that contains a sensitive field encrypts that field
    /// inside the map.
    pub async fn encode_value(
        &self,
        schema: &Schema,
        path: &str,
        mut value: AttributeValue,
    ) -> Result<AttributeValue, Error> {
        for field in schema.sensitive_fields() {
            if *field == path {
                return self.encrypt_value(field, &value).await;
            }
            let Some(rest) = field
                .strip_prefix(path)
                .and_then(|rest| rest.strip_prefix('.'))
            else {
                continue;
            };
            if let AttributeValue::M(map) = &mut value {
                if let Some(inner) = resolve_mut(map, rest) {
                    *inner = self.encrypt_value(field, inner).await?;
                }
            }
        }
        Ok(value)
    }

    /// Decrypt sensitive fields and deserialize a stored item
    pub async fn decode<T: Record>(&self, schema: &Schema, mut item: Item) -> Result<T, Error> {
        for field in schema.sensitive_fields() {
            if let Some(AttributeValue::S(ciphertext)) = resolve_mut(&mut item, field) {
                *ciphertext = self.decrypt_string(field, ciphertext).await?;
            }
        }
        Ok(from_item(item)?)
    }

    /// Decode every item, failing on the first item that cannot be decoded
    pub async fn decode_all<T: Record>(&self, schema: &Schema, items: Vec<Item>) -> Result<Vec<T>, Error> {
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            records.push(self.decode(schema, item).await?);
        }
        Ok(records)
    }

    async fn encrypt_value(&self, field: &str, value: &AttributeValue) -> Result<AttributeValue, Error> {
        let plaintext = match value {
            AttributeValue::Null(_) => return Ok(value.clone()),
            AttributeValue::S(plaintext) => plaintext.as_bytes(),
            _ => {
                return Err(Error::Encryption {
                    field: field.to_string(),
                    reason: "only string fields can be marked sensitive".to_string(),
                    source: None,
                });
            }
        };

        let (keys, key_id) = match (&self.keys, &self.key_id) {
            (Some(keys), Some(key_id)) => (keys, key_id),
            _ => {
                return Err(Error::Encryption {
                    field: field.to_string(),
                    reason: "field is marked sensitive but no key id is configured".to_string(),
                    source: None,
                });
            }
        };

        let ciphertext = keys
            .encrypt(plaintext, key_id)
            .await
            .map_err(|e| Error::Encryption {
                field: field.to_string(),
                reason: "key service rejected the request".to_string(),
                source: Some(e),
            })?;

        Ok(AttributeValue::S(STANDARD.encode(ciphertext)))
    }

    async fn decrypt_string(&self, field: &str, encoded: &str) -> Result<String, Error> {
        let failure = |reason: &str, source: Option<BoxError>| Error::Decryption {
            field: field.to_string(),
            reason: reason.to_string(),
            source,
        };

        let (Some(keys), Some(key_id)) = (&self.keys, &self.key_id) else {
            return Err(failure("no key id is configured", None));
        };
        let ciphertext = STANDARD
            .decode(encoded)
            .map_err(|e| failure("stored value is not valid base64", Some(Box::new(e))))?;
        let plaintext = keys
            .decrypt(&ciphertext, key_id)
            .await
            .map_err(|e| failure("key service rejected the request", Some(e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| failure("decrypted value is not valid UTF-8", Some(Box::new(e))))
    }
}

fn resolve_mut<'a>(item: &'a mut Item, path: &str) -> Option<&'a mut AttributeValue> {
    let mut segments = path.split('.');
    let mut current = item.get_mut(segments.next()?)?;
    for segment in segments {
        match current {
            AttributeValue::M(map) => current = map.get_mut(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Model;
    use crate::schema::SchemaRegistry;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Credentials {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Secret")]
        secret: String,
        #[serde(rename = "Pin", skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
        #[serde(flatten)]
        model: Model,
    }
    crate::impl_record!(Credentials, model, ["Secret", "Pin"]);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counter {
        #[serde(rename = "Count")]
        count: u32,
        #[serde(flatten)]
        model: Model,
    }
    crate::impl_record!(Counter, model, ["Count"]);

    struct XorKeys;

    #[async_trait]
    impl KeyManagement for XorKeys {
        async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError> {
            if key_id == "denied" {
                return Err("access denied".into());
            }
            Ok(plaintext.iter().map(|b| b ^ 0x5a).collect())
        }

        async fn decrypt(&self, ciphertext: &[u8], _key_id: &str) -> Result<Vec<u8>, BoxError> {
            Ok(ciphertext.iter().map(|b| b ^ 0x5a).collect())
        }
    }

    fn schema<T: Record>() -> Arc<Schema> {
        SchemaRegistry::default().register::<T>("Create").unwrap()
    }

    fn codec(key_id: &str) -> RecordCodec {
        RecordCodec::with_key_management(Arc::new(XorKeys), key_id)
    }

    fn credentials() -> Credentials {
        Credentials {
            name: "svc".to_string(),
            secret: "hunter2".to_string(),
            pin: None,
            model: Model::default(),
        }
    }

    #[tokio::test]
    async fn test_sensitive_field_is_encrypted_at_rest() {
        let schema = schema::<Credentials>();
        let codec = codec("alias/test");

        let item = codec.encode(&schema, &credentials()).await.unwrap();
        let expected = STANDARD.encode("hunter2".bytes().map(|b| b ^ 0x5a).collect::<Vec<_>>());
        assert_eq!(item.get("Secret"), Some(&AttributeValue::S(expected)));
        assert_eq!(item.get("Name"), Some(&AttributeValue::S("svc".to_string())));
        assert!(!item.contains_key("Pin"));

        let back: Credentials = codec.decode(&schema, item).await.unwrap();
        assert_eq!(back, credentials());
    }

    #[tokio::test]
    async fn test_missing_key_id_fails_encryption() {
        let schema = schema::<Credentials>();
        let err = RecordCodec::new()
            .encode(&schema, &credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encryption { ref field, .. } if field == "Secret"));
        assert!(err.to_string().contains("no key id is configured"));

        assert!(codec("").encode(&schema, &credentials()).await.is_err());
    }

    #[tokio::test]
    async fn test_key_service_failure_is_reported() {
        let schema = schema::<Credentials>();
        let err = codec("denied")
            .encode(&schema, &credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encryption { source: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_non_string_sensitive_field_is_rejected() {
        let schema = schema::<Counter>();
        let err = codec("alias/test")
            .encode(&schema, &Counter::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("only string fields"));
    }

    #[tokio::test]
    async fn test_invalid_ciphertext_fails_decryption() {
        let schema = schema::<Credentials>();
        let mut item = codec("alias/test")
            .encode(&schema, &credentials())
            .await
            .unwrap();
        let _ = item.insert("Secret".to_string(), AttributeValue::S("%%%".to_string()));

        let err = codec("alias/test")
            .decode::<Credentials>(&schema, item)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decryption { ref field, .. } if field == "Secret"));
    }

    #[tokio::test]
    async fn test_encode_value_only_touches_sensitive_paths() {
        let schema = schema::<Credentials>();
        let codec = codec("alias/test");

        let plain = codec
            .encode_value(&schema, "Name", AttributeValue::S("svc".to_string()))
            .await
            .unwrap();
        assert_eq!(plain, AttributeValue::S("svc".to_string()));

        let secret = codec
            .encode_value(&schema, "Secret", AttributeValue::S("x".to_string()))
            .await
            .unwrap();
        assert_ne!(secret, AttributeValue::S("x".to_string()));
    }
}
