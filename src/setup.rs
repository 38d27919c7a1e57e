use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::client::Waiters;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
};
use std::time::Duration;

use crate::model::{ID_ATTRIBUTE, TYPE_ATTRIBUTE};
use crate::store::StoreError;

/// How long to wait for a new table to become active
const TABLE_ACTIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the model table and wait until it is active
///
/// The table is keyed on the `Type` discriminator (partition key) and the
/// record `ID` (sort key), billed on demand. A table that already exists is
/// left untouched.
pub async fn create_table(client: &Client, table: &str) -> Result<(), StoreError> {
    let builder = client
        .create_table()
        .table_name(table)
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(TYPE_ATTRIBUTE)
                .key_type(KeyType::Hash)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(ID_ATTRIBUTE)
                .key_type(KeyType::Range)
                .build()?,
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(TYPE_ATTRIBUTE)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(ID_ATTRIBUTE)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        )
        .billing_mode(BillingMode::PayPerRequest);

    // Ignore ResourceInUseException - table already exists
    match builder.send().await {
        Ok(_) => tracing::info!(table, "created model table"),
        Err(e) => {
            if matches!(
                e.as_service_error(),
                Some(CreateTableError::ResourceInUseException(_))
            ) {
                tracing::debug!(table, "model table already exists");
            } else {
                return Err(e.into());
            }
        }
    }

    let _ = client
        .wait_until_table_exists()
        .table_name(table)
        .wait(TABLE_ACTIVE_TIMEOUT)
        .await
        .map_err(|e| StoreError::Waiter(Box::new(e)))?;
    Ok(())
}
