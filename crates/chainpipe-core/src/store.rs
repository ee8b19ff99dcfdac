//! Persistent store and object cache contracts.
//!
//! The pipeline and the pagination engine only ever talk to storage through
//! [`PersistentStore`] and [`ObjectCache`]. Documents are JSON objects grouped
//! into named collections; every list-shaped collection carries a `u64`
//! primary key under [`PK_FIELD`].

use async_trait::async_trait;
use alloy_primitives::U256;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::error::PipelineError;

/// Name of the primary key field of every document.
pub const PK_FIELD: &str = "_id";

// ─── Filter ───────────────────────────────────────────────────────────────────

/// Comparison operator of a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// The field is an array containing the value.
    Contains,
}

/// A single `field op value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

/// A conjunction of conditions. The empty filter matches every document.
///
/// A condition whose value fails to encode poisons the filter: it matches
/// nothing and [`Filter::validate`] reports the failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    #[serde(skip)]
    error: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition; `value` is encoded the same way documents are.
    pub fn with(mut self, field: impl Into<String>, op: Op, value: impl Serialize) -> Self {
        let field = field.into();
        match serde_json::to_value(value) {
            Ok(value) => self.conditions.push(Condition { field, op, value }),
            Err(e) => {
                error!(%field, error = %e, "can not encode filter value");
                self.error
                    .get_or_insert_with(|| format!("filter value of '{field}' can not be encoded; {e}"));
            }
        }
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Serialize) -> Self {
        self.with(field, Op::Eq, value)
    }

    pub fn contains(self, field: impl Into<String>, value: impl Serialize) -> Self {
        self.with(field, Op::Contains, value)
    }

    /// Filter matching a single primary key.
    pub fn pk(key: u64) -> Self {
        Self::new().eq(PK_FIELD, key)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.error.is_none()
    }

    /// Fail if any condition value could not be encoded.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match &self.error {
            Some(e) => Err(PipelineError::Storage(e.clone())),
            None => Ok(()),
        }
    }

    /// Evaluate the filter against a document.
    ///
    /// Backends that cannot push filters down use this; it is also the
    /// reference semantics every backend must match.
    pub fn matches(&self, doc: &Value) -> bool {
        self.error.is_none() && self.conditions.iter().all(|c| c.matches(doc))
    }
}

impl Condition {
    pub fn matches(&self, doc: &Value) -> bool {
        let field = doc.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            Op::Eq => field == &self.value,
            Op::Ne => field != &self.value,
            Op::Contains => field
                .as_array()
                .map(|items| items.contains(&self.value))
                .unwrap_or(false),
            op => match compare_values(field, &self.value) {
                Some(ord) => match op {
                    Op::Gt => ord.is_gt(),
                    Op::Gte => ord.is_ge(),
                    Op::Lt => ord.is_lt(),
                    Op::Lte => ord.is_le(),
                    _ => false,
                },
                None => false,
            },
        }
    }
}

/// Order two JSON scalars of the same kind. Mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Shallow `$set`-style merge of `patch` into `target`.
pub fn merge_document(target: &mut Value, patch: Value) {
    match (target.as_object_mut(), patch) {
        (Some(dst), Value::Object(src)) => {
            for (k, v) in src {
                dst.insert(k, v);
            }
        }
        (_, patch) => *target = patch,
    }
}

// ─── Find options ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Sorting and windowing for [`PersistentStore::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<Sort>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            order,
        });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ─── Traits ───────────────────────────────────────────────────────────────────

/// Durable document store.
///
/// Implementations provide their own internal synchronization; callers issue
/// independent operations concurrently without external locking.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Insert a new document.
    async fn insert(&self, collection: &str, doc: Value) -> Result<(), PipelineError>;

    /// Merge `doc`'s fields into the first document matching `filter`, or
    /// insert `doc` if nothing matches.
    async fn upsert(&self, collection: &str, filter: &Filter, doc: Value)
        -> Result<(), PipelineError>;

    /// Load documents matching `filter`, sorted and windowed by `options`.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Value>, PipelineError>;

    /// Count documents matching `filter`.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, PipelineError>;

    /// Sum a numeric field over the documents matching `filter`.
    ///
    /// Numbers and numeric strings (decimal or `0x` hex) are summed; other
    /// values are ignored.
    async fn aggregate_sum(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> Result<U256, PipelineError>;
}

/// Hot-object cache. Eviction is the implementation's concern.
#[async_trait]
pub trait ObjectCache: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), PipelineError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError>;
}

/// Parse a document value into `U256` for summing.
pub fn sum_operand(v: &Value) -> Option<U256> {
    match v {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => s.parse::<U256>().ok(),
        _ => None,
    }
}

// ─── Typed documents ──────────────────────────────────────────────────────────

/// A record stored in a named collection with a `u64` primary key.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the record lives in.
    const COLLECTION: &'static str;

    /// Primary key; must be unique within the collection and grow with
    /// chain time.
    fn pk(&self) -> u64;

    /// Encode as a store document.
    fn to_document(&self) -> Result<Value, PipelineError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from a store document.
    fn from_document(doc: Value) -> Result<Self, PipelineError> {
        serde_json::from_value(doc).map_err(|e| {
            PipelineError::Storage(format!("can not decode {} row; {e}", Self::COLLECTION))
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_all() {
        assert!(Filter::new().matches(&json!({"a": 1})));
    }

    #[test]
    fn range_conditions_compare_numbers() {
        let f = Filter::new().with("_id", Op::Gt, 5u64).with("_id", Op::Lte, 9u64);
        assert!(f.matches(&json!({"_id": 9})));
        assert!(!f.matches(&json!({"_id": 5})));
        assert!(!f.matches(&json!({"_id": "9"})));
    }

    #[test]
    fn contains_checks_arrays() {
        let f = Filter::new().contains("participants", "0xab");
        assert!(f.matches(&json!({"participants": ["0xcd", "0xab"]})));
        assert!(!f.matches(&json!({"participants": []})));
        assert!(!f.matches(&json!({"participants": "0xab"})));
    }

    #[test]
    fn missing_field_equals_null() {
        assert!(Filter::new().eq("x", Value::Null).matches(&json!({})));
        assert!(!Filter::new().eq("x", 1).matches(&json!({})));
    }

    #[test]
    fn unencodable_value_poisons_the_filter() {
        use std::collections::BTreeMap;
        let bad: BTreeMap<(u8, u8), u8> = BTreeMap::from([((1, 2), 3)]);
        let f = Filter::new().eq("x", bad);
        assert!(matches!(f.validate(), Err(PipelineError::Storage(_))));
        assert!(!f.is_empty());
        assert!(!f.matches(&json!({})));
        assert!(!f.matches(&json!({"x": null})));

        let f = f.eq("y", 1);
        assert!(f.validate().is_err());
        assert!(Filter::new().eq("y", 1).validate().is_ok());
    }

    #[test]
    fn sum_operand_accepts_hex_and_decimal() {
        assert_eq!(sum_operand(&json!(7)), Some(U256::from(7)));
        assert_eq!(sum_operand(&json!("0x10")), Some(U256::from(16)));
        assert_eq!(sum_operand(&json!("25")), Some(U256::from(25)));
        assert_eq!(sum_operand(&json!(true)), None);
    }
}
