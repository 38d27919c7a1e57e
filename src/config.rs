use aws_config::{BehaviorVersion, SdkConfig, defaults};
use aws_types::sdk_config::{RetryConfig, TimeoutConfig};
use std::env;
use std::time::Duration;

/// Environment variable naming the model table
pub const TABLE_NAME_ENV: &str = "DYNAMO_MODEL_TABLE";
/// Environment variable naming the KMS key used for sensitive fields
pub const KMS_KEY_ID_ENV: &str = "DYNAMO_MODEL_KMS_KEY_ID";
/// Environment variable overriding the AWS endpoint
pub const ENDPOINT_ENV: &str = "DYNAMO_MODEL_ENDPOINT";

/// Table used when none is configured
pub const DEFAULT_TABLE_NAME: &str = "models";

const LOCALSTACK_ENDPOINT: &str = "http://127.0.0.1:4566";

/// Settings for connecting a [`Session`](crate::Session) to AWS
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Table holding every record type
    pub table_name: String,
    /// KMS key id or alias for sensitive fields; unset disables encryption
    pub kms_key_id: Option<String>,
    /// Endpoint override, e.g. LocalStack
    pub endpoint_url: Option<String>,
    /// Create the table on connect if it does not exist
    pub create_table: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_NAME)
    }
}

impl SessionConfig {
    /// Configuration for `table_name` without encryption
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            kms_key_id: None,
            endpoint_url: None,
            create_table: false,
        }
    }

    /// Read configuration from the environment
    ///
    /// `AWS_PROFILE=localstack` points at a local LocalStack endpoint unless
    /// an explicit endpoint is set.
    pub fn from_env() -> Self {
        let read = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());

        let endpoint_url = read(ENDPOINT_ENV).or_else(|| {
            (read("AWS_PROFILE").as_deref() == Some("localstack"))
                .then(|| LOCALSTACK_ENDPOINT.to_string())
        });

        Self {
            table_name: read(TABLE_NAME_ENV).unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            kms_key_id: read(KMS_KEY_ID_ENV),
            endpoint_url,
            create_table: false,
        }
    }

    /// Set the KMS key used for sensitive fields
    pub fn with_kms_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.kms_key_id = Some(key_id.into());
        self
    }

    /// Override the AWS endpoint
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Create the table on connect
    pub fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }
}

/// Load shared AWS configuration with sensible client defaults
///
/// It configures:
/// - Adaptive retry mode with 3 max attempts
/// - Exponential backoff starting at 1 second
/// - Connect timeout: 3 seconds
/// - Read timeout: 20 seconds
/// - Operation timeout: 60 seconds
pub async fn aws_config_defaults(endpoint_url: Option<&str>) -> SdkConfig {
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .operation_timeout(Duration::from_secs(60))
        .build();

    let mut loader = defaults(BehaviorVersion::latest())
        .retry_config(
            RetryConfig::adaptive()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_secs(1)),
        )
        .timeout_config(timeout_config);

    if let Some(endpoint_url) = endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    loader.load().await
}
