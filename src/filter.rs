//! Query execution and in-memory narrowing of chained results

use aws_sdk_dynamodb::types::AttributeValue;
use serde_dynamo::to_item;
use std::collections::BTreeMap;

use crate::codec::RecordCodec;
use crate::error::Error;
use crate::model::Record;
use crate::predicate::{self, Condition, attribute_eq};
use crate::schema::{Schema, resolve_path};
use crate::store::{DocumentStore, Item, QueryRequest};

/// Runs queries for one session and decodes the results
pub(crate) struct FilterExecutor<'a> {
    pub(crate) store: &'a dyn DocumentStore,
    pub(crate) table: &'a str,
    pub(crate) codec: &'a RecordCodec,
}

impl FilterExecutor<'_> {
    /// Run a query and decode every returned item
    pub(crate) async fn fetch<T: Record>(
        &self,
        operation: &'static str,
        schema: &Schema,
        query: &QueryRequest,
    ) -> Result<Vec<T>, Error> {
        let items = self
            .store
            .query(self.table, query)
            .await
            .map_err(Error::backend(operation))?;
        tracing::debug!(
            table = self.table,
            type_name = %query.type_name,
            count = items.len(),
            "query returned items"
        );
        self.codec.decode_all(schema, items).await
    }

    /// Run one query combining every accumulated condition
    pub(crate) async fn flush<T: Record>(
        &self,
        schema: &Schema,
        conditions: &[Condition],
    ) -> Result<Vec<T>, Error> {
        let query = predicate::build_combined_conditions(schema.type_name(), conditions)?;
        self.fetch("Where", schema, &query).await
    }
}

/// Which records have `field` equal to `value`
///
/// Records where the path does not resolve never match. The mask is computed
/// up front so a failure leaves the caller's records untouched.
pub fn match_mask<T: Record>(records: &[T], field: &str, value: &AttributeValue) -> Result<Vec<bool>, Error> {
    records
        .iter()
        .map(|record| -> Result<bool, Error> {
            let item: Item = to_item(record)?;
            Ok(resolve_path(&item, field).is_some_and(|actual| values_match(actual, value)))
        })
        .collect()
}

/// Keep only the records selected by `mask`
pub fn retain_by_mask<T>(records: &mut Vec<T>, mask: &[bool]) {
    let mut keep = mask.iter().copied();
    records.retain(|_| keep.next().unwrap_or(false));
}

/// Loose equality used when narrowing results in memory
///
/// A boolean field only matches a boolean value. Other attributes compare as
/// DynamoDB would, then by their textual rendering so `"3"` matches `3`.
pub fn values_match(actual: &AttributeValue, expected: &AttributeValue) -> bool {
    if let AttributeValue::Bool(a) = actual {
        return matches!(expected, AttributeValue::Bool(b) if a == b);
    }
    attribute_eq(actual, expected) || render_value(actual) == render_value(expected)
}

fn render_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(s) | AttributeValue::N(s) => s.clone(),
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Null(_) => "null".to_string(),
        AttributeValue::L(values) => render_list(values.iter().map(render_value)),
        AttributeValue::Ss(values) | AttributeValue::Ns(values) => {
            render_list(values.iter().cloned())
        }
        AttributeValue::M(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, render_value(v))).collect();
            let fields = sorted
                .into_iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{fields}}}")
        }
        other => format!("{other:?}"),
    }
}

fn render_list(values: impl Iterator<Item = String>) -> String {
    format!("[{}]", values.collect::<Vec<_>>().join(" "))
}
