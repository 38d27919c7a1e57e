use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue, Select};
use aws_smithy_types_convert::stream::PaginationStreamExt;
use aws_types::SdkConfig;
use futures_util::TryStreamExt;
use std::collections::HashMap;

use super::{DocumentStore, Item, Key, QueryRequest, StoreError, UpdateRequest};
use crate::predicate::{Expr, Placeholders};

/// [`DocumentStore`] backed by a DynamoDB table keyed on `(Type, ID)`
#[derive(Clone, Debug)]
pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    /// Build a DynamoDB client from shared AWS configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// Use an existing DynamoDB client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Underlying DynamoDB client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn optional<K, V>(map: HashMap<K, V>) -> Option<HashMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

#[async_trait]
impl DocumentStore for DynamoStore {
    async fn put_item(&self, table: &str, item: Item) -> Result<(), StoreError> {
        tracing::debug!(table, attributes = item.len(), "PutItem");
        let _ = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await?;
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError> {
        tracing::debug!(table, type_name = %key.type_name, id = %key.id, "GetItem");
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .send()
            .await?;
        Ok(output.item)
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        tracing::debug!(table, type_name = %key.type_name, id = %key.id, "DeleteItem");
        let _ = self
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .send()
            .await?;
        Ok(())
    }

    async fn update_item(&self, table: &str, update: UpdateRequest) -> Result<(), StoreError> {
        tracing::debug!(
            table,
            type_name = %update.key.type_name,
            id = %update.key.id,
            attributes = update.set.len(),
            "UpdateItem"
        );

        let mut placeholders = Placeholders::default();
        let assignments = update
            .set
            .into_iter()
            .map(|(path, value)| {
                let name = placeholders.path(&path);
                let value = placeholders.value(value);
                format!("{name} = {value}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let condition = update
            .condition
            .as_ref()
            .map(|condition| condition.render(&mut placeholders));
        let (names, values) = placeholders.into_parts();

        let _ = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(update.key.to_item()))
            .update_expression(format!("SET {assignments}"))
            .set_condition_expression(condition)
            .set_expression_attribute_names(optional(names))
            .set_expression_attribute_values(optional(values))
            .return_values(ReturnValue::None)
            .send()
            .await?;
        Ok(())
    }

    async fn query(&self, table: &str, query: &QueryRequest) -> Result<Vec<Item>, StoreError> {
        let mut placeholders = Placeholders::default();
        let key_condition = query.key_condition().render(&mut placeholders);
        let filter = query
            .filter
            .as_ref()
            .map(|filter: &Expr| filter.render(&mut placeholders));
        tracing::debug!(
            table,
            key_condition = %key_condition,
            filter = filter.as_deref().unwrap_or_default(),
            "Query"
        );
        let (names, values) = placeholders.into_parts();

        let items: Vec<HashMap<String, AttributeValue>> = self
            .client
            .query()
            .table_name(table)
            .select(Select::AllAttributes)
            .key_condition_expression(key_condition)
            .set_filter_expression(filter)
            .set_expression_attribute_names(optional(names))
            .set_expression_attribute_values(optional(values))
            .into_paginator()
            .items()
            .send()
            .into_stream_03x()
            .try_collect()
            .await?;
        Ok(items)
    }
}
