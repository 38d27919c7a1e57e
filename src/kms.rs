//! AWS KMS key service

use async_trait::async_trait;
use aws_sdk_kms::Client;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::EncryptionAlgorithmSpec;
use aws_types::SdkConfig;

use crate::codec::KeyManagement;
use crate::error::BoxError;

/// [`KeyManagement`] backed by AWS KMS symmetric keys
#[derive(Clone, Debug)]
pub struct KmsKeyManagement {
    client: Client,
}

impl KmsKeyManagement {
    /// Build a KMS client from shared AWS configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// Use an existing KMS client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyManagement for KmsKeyManagement {
    async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError> {
        let output = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .encryption_algorithm(EncryptionAlgorithmSpec::SymmetricDefault)
            .send()
            .await?;

        output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| "KMS Encrypt returned no ciphertext".into())
    }

    async fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError> {
        let output = self
            .client
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .encryption_algorithm(EncryptionAlgorithmSpec::SymmetricDefault)
            .send()
            .await?;

        output
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| "KMS Decrypt returned no plaintext".into())
    }
}
