//! Query predicates and their DynamoDB expression form

use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Error;
use crate::model::DELETED_AT_ATTRIBUTE;
use crate::schema::resolve_path;
use crate::store::{Item, QueryRequest};

/// One `field IN values` condition of a chained query
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    field: String,
    values: Vec<AttributeValue>,
}

impl Condition {
    /// Build a condition from a field path and a value or sequence of values
    ///
    /// Sequences (vectors, slices, arrays, sets) contribute each element; any
    /// other value is treated as a one-element set. An empty sequence is
    /// rejected.
    pub fn new<V>(operation: &'static str, field: impl Into<String>, values: &V) -> Result<Self, Error>
    where
        V: Serialize + ?Sized,
    {
        let field = field.into();
        if field.is_empty() || field.split('.').any(str::is_empty) {
            return Err(Error::usage(
                operation,
                format!("`{field}` is not a valid attribute path"),
            ));
        }

        let values = match serde_dynamo::to_attribute_value(values)? {
            AttributeValue::L(values) => values,
            AttributeValue::Ss(values) => values.into_iter().map(AttributeValue::S).collect(),
            AttributeValue::Ns(values) => values.into_iter().map(AttributeValue::N).collect(),
            AttributeValue::Bs(values) => values.into_iter().map(AttributeValue::B).collect(),
            value => vec![value],
        };
        if values.is_empty() {
            return Err(Error::usage(
                operation,
                format!("no values given for `{field}`"),
            ));
        }

        Ok(Self { field, values })
    }

    /// Attribute path the condition applies to
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Accepted values
    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }
}

/// Filter or condition expression over an item
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// `path = value`
    Eq {
        /// Attribute path
        path: String,
        /// Expected value
        value: AttributeValue,
    },
    /// `path IN (values...)`
    In {
        /// Attribute path
        path: String,
        /// Accepted values
        values: Vec<AttributeValue>,
    },
    /// `attribute_exists(path)`
    Exists {
        /// Attribute path
        path: String,
    },
    /// `attribute_not_exists(path)`
    NotExists {
        /// Attribute path
        path: String,
    },
    /// Conjunction of every inner expression
    And(Vec<Expr>),
}

impl Expr {
    /// `path = value`
    pub fn eq(path: impl Into<String>, value: AttributeValue) -> Self {
        Expr::Eq {
            path: path.into(),
            value,
        }
    }

    /// `path IN (values...)`
    pub fn is_in(path: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Expr::In {
            path: path.into(),
            values,
        }
    }

    /// `attribute_exists(path)`
    pub fn exists(path: impl Into<String>) -> Self {
        Expr::Exists { path: path.into() }
    }

    /// `attribute_not_exists(path)`
    pub fn not_exists(path: impl Into<String>) -> Self {
        Expr::NotExists { path: path.into() }
    }

    /// Condition as an expression: equality for one value, membership otherwise
    pub fn from_condition(condition: &Condition) -> Self {
        match condition.values.as_slice() {
            [value] => Expr::eq(condition.field.clone(), value.clone()),
            values => Expr::is_in(condition.field.clone(), values.to_vec()),
        }
    }

    /// Render the expression, registering names and values as placeholders
    pub fn render(&self, placeholders: &mut Placeholders) -> String {
        match self {
            Expr::Eq { path, value } => {
                let name = placeholders.path(path);
                let value = placeholders.value(value.clone());
                format!("{name} = {value}")
            }
            Expr::In { path, values } => {
                let name = placeholders.path(path);
                let values = values
                    .iter()
                    .map(|value| placeholders.value(value.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{name} IN ({values})")
            }
            Expr::Exists { path } => format!("attribute_exists({})", placeholders.path(path)),
            Expr::NotExists { path } => {
                format!("attribute_not_exists({})", placeholders.path(path))
            }
            Expr::And(parts) => parts
                .iter()
                .map(|part| format!("({})", part.render(placeholders)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    /// Evaluate the expression against an item
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Expr::Eq { path, value } => {
                resolve_path(item, path).is_some_and(|actual| attribute_eq(actual, value))
            }
            Expr::In { path, values } => resolve_path(item, path)
                .is_some_and(|actual| values.iter().any(|value| attribute_eq(actual, value))),
            Expr::Exists { path } => resolve_path(item, path).is_some(),
            Expr::NotExists { path } => resolve_path(item, path).is_none(),
            Expr::And(parts) => parts.iter().all(|part| part.matches(item)),
        }
    }

    /// Attribute paths referenced by the expression
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Expr::Eq { path, .. }
            | Expr::In { path, .. }
            | Expr::Exists { path }
            | Expr::NotExists { path } => vec![path.as_str()],
            Expr::And(parts) => parts.iter().flat_map(Expr::paths).collect(),
        }
    }
}

/// Attribute equality as DynamoDB evaluates it (numbers compare numerically)
pub fn attribute_eq(left: &AttributeValue, right: &AttributeValue) -> bool {
    match (left, right) {
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            a == b
                || matches!(
                    (a.parse::<f64>(), b.parse::<f64>()),
                    (Ok(x), Ok(y)) if x == y
                )
        }
        _ => left == right,
    }
}

/// Expression attribute names and values collected while rendering
#[derive(Debug, Default)]
pub struct Placeholders {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Placeholders {
    /// Placeholder for a dot-separated path, one name per segment
    pub fn path(&mut self, path: &str) -> String {
        path.split('.')
            .map(|segment| self.name(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn name(&mut self, segment: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, name)| *name == segment) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        let _ = self
            .names
            .insert(placeholder.clone(), segment.to_string());
        placeholder
    }

    /// Placeholder for a value
    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        let _ = self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Name and value maps for the request
    pub fn into_parts(self) -> (HashMap<String, String>, HashMap<String, AttributeValue>) {
        (self.names, self.values)
    }
}

/// Exclude soft-deleted records
///
/// Live records never carry the `DeletedAt` attribute, so absence alone
/// identifies them.
pub fn soft_delete_exclusion() -> Expr {
    Expr::not_exists(DELETED_AT_ATTRIBUTE)
}

/// Every live record of a type
pub fn all_of_type(type_name: &str) -> QueryRequest {
    QueryRequest {
        type_name: type_name.to_string(),
        filter: Some(soft_delete_exclusion()),
    }
}

/// Live records of a type matching one field/value condition
pub fn build_single_condition(type_name: &str, field: &str, value: AttributeValue) -> QueryRequest {
    QueryRequest {
        type_name: type_name.to_string(),
        filter: Some(Expr::And(vec![
            Expr::eq(field, value),
            soft_delete_exclusion(),
        ])),
    }
}

/// Live records of a type matching every accumulated condition
pub fn build_combined_conditions(
    type_name: &str,
    conditions: &[Condition],
) -> Result<QueryRequest, Error> {
    if conditions.is_empty() {
        return Err(Error::usage("Where", "no conditions to execute"));
    }

    let mut parts: Vec<Expr> = conditions.iter().map(Expr::from_condition).collect();
    parts.push(soft_delete_exclusion());

    Ok(QueryRequest {
        type_name: type_name.to_string(),
        filter: Some(Expr::And(parts)),
    })
}
