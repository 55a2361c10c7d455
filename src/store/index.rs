//! # Index Store
//!
//! Sorted secondary indexes over message index properties, maintained per
//! tenant in the key-value engine.
//!
//! Each property gets a forward partition prefix `__{name}__/` whose keys are
//! `{encoded value}\x00{item id}` — the NUL delimiter keeps the item id as a
//! tie-breaker without bleeding into value ordering. A reverse lookup at
//! `index/{item id}` records every property an item was indexed on, so
//! deletes and cursor resolution never scan.
//!
//! Queries are OR-composed filters (AND within a filter) and run one of two
//! strategies: small result sets are materialized and paged in memory;
//! everything else walks the sort property's partition from a cursor-derived
//! start key.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{KvStore, RangeOpts, WriteOp};
use crate::store::Cursor;
use crate::{Lower, Range, Result, Upper, unexpected};

/// The largest integer exactly representable in an IEEE-754 double, the
/// ceiling for indexed numbers.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

const INDEX_PREFIX: &str = "index/";

/// A scalar value an item can be indexed on.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum IndexValue {
    /// A boolean property.
    Bool(bool),

    /// An integer property.
    Number(i64),

    /// A string property.
    String(String),
}

impl IndexValue {
    /// Encode the value so that lexicographic byte order equals value order
    /// within the type.
    ///
    /// Strings are JSON-quoted so numeric-looking strings sort apart from
    /// numbers. Non-negative numbers are zero-padded to 16 characters;
    /// negatives are offset by [`MAX_SAFE_INTEGER`] and prefixed with `!`,
    /// which sorts before every digit.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Number(value) => {
                if *value >= 0 {
                    format!("{value:016}")
                } else {
                    format!("!{:016}", MAX_SAFE_INTEGER + value)
                }
            }
            Self::String(value) => Value::String(value.clone()).to_string(),
        }
    }

    /// Convert a JSON scalar into an indexable value. Objects, arrays,
    /// floats, and nulls are not indexable.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A predicate over one index property.
#[derive(Clone, Debug)]
pub enum FilterVal {
    /// Match the exact value.
    Equal(IndexValue),

    /// Match any of the values.
    OneOf(Vec<IndexValue>),

    /// Match values within the range; at least one bound must be set.
    Range(Range<IndexValue>),
}

/// Property name → predicate; all predicates must hold for a match.
pub type Filter = HashMap<String, FilterVal>;

/// Options shaping a query's ordering and paging.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// The index property results are ordered by.
    pub sort_index: String,

    /// Iterate newest-first.
    pub descending: bool,

    /// Maximum items to return.
    pub limit: Option<usize>,

    /// Resume strictly after this item.
    pub cursor: Option<Cursor>,
}

/// An indexed item: its id and the full property bag it was indexed with.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IndexItem {
    /// The indexed item's id (a message CID).
    pub item_id: String,

    /// The item's index properties.
    pub indexes: HashMap<String, Value>,
}

impl IndexItem {
    /// The item's encoded value on the given property, or `None` when the
    /// property is missing or not a scalar.
    #[must_use]
    pub fn encoded(&self, property: &str) -> Option<String> {
        self.indexes.get(property).and_then(IndexValue::from_json).map(|v| v.encode())
    }
}

/// Write forward entries for every indexable property plus the reverse
/// lookup, atomically.
///
/// # Errors
///
/// Fails when no property is indexable or the engine rejects the batch.
pub async fn insert(
    owner: &str, item_id: &str, indexes: &HashMap<String, Value>, store: &impl KvStore,
) -> Result<()> {
    let item = IndexItem {
        item_id: item_id.to_string(),
        indexes: indexes.clone(),
    };
    let serialized = serde_json::to_vec(&item)?;

    let mut ops = Vec::new();
    for (name, value) in indexes {
        let Some(value) = IndexValue::from_json(value) else {
            continue;
        };
        ops.push(WriteOp::Put {
            key: forward_key(name, &value.encode(), item_id),
            value: serialized.clone(),
        });
    }
    if ops.is_empty() {
        return Err(unexpected!("item {item_id} has no indexable properties"));
    }
    ops.push(WriteOp::Put {
        key: format!("{INDEX_PREFIX}{item_id}"),
        value: serde_json::to_vec(indexes)?,
    });

    store.batch(owner, ops).await?;
    Ok(())
}

/// Remove an item's forward entries and reverse lookup. A missing reverse
/// lookup is a no-op.
///
/// # Errors
///
/// Fails when the engine rejects the batch.
pub async fn delete(owner: &str, item_id: &str, store: &impl KvStore) -> Result<()> {
    let Some(bytes) = store.get(owner, &format!("{INDEX_PREFIX}{item_id}")).await? else {
        return Ok(());
    };
    let indexes: HashMap<String, Value> = serde_json::from_slice(&bytes)?;

    let mut ops = Vec::new();
    for (name, value) in &indexes {
        let Some(value) = IndexValue::from_json(value) else {
            continue;
        };
        ops.push(WriteOp::Delete {
            key: forward_key(name, &value.encode(), item_id),
        });
    }
    ops.push(WriteOp::Delete {
        key: format!("{INDEX_PREFIX}{item_id}"),
    });

    store.batch(owner, ops).await?;
    Ok(())
}

/// Fetch an item's index properties from the reverse lookup.
///
/// # Errors
///
/// Fails when the stored lookup cannot be deserialized.
pub async fn lookup(
    owner: &str, item_id: &str, store: &impl KvStore,
) -> Result<Option<HashMap<String, Value>>> {
    let Some(bytes) = store.get(owner, &format!("{INDEX_PREFIX}{item_id}")).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Query the indexes: the result is the union of items matching any filter,
/// ordered by the sort property (item id as tie-breaker), paged by
/// `limit`/`cursor`.
///
/// # Errors
///
/// Fails when a matched item lacks the sort property, or the cursor is
/// malformed.
pub async fn query(
    owner: &str, filters: &[Filter], options: &QueryOptions, store: &impl KvStore,
) -> Result<Vec<IndexItem>> {
    if filters.iter().all(|f| is_concise(f, options.cursor.as_ref())) {
        query_concise(owner, filters, options, store).await
    } else {
        query_iterator(owner, filters, options, store).await
    }
}

/// A filter is concise when it is expected to yield a small result set: it
/// pins a record id, or (absent a cursor) one of the narrow record-lineage
/// properties.
fn is_concise(filter: &Filter, cursor: Option<&Cursor>) -> bool {
    if filter.contains_key("recordId") {
        return true;
    }
    if cursor.is_some() {
        return false;
    }
    ["protocolPath", "contextId", "parentId", "schema"]
        .iter()
        .any(|property| filter.contains_key(*property))
}

// In-memory paging: materialize each filter's candidates from its most
// selective property, union by item id, sort, then slice at the cursor.
async fn query_concise(
    owner: &str, filters: &[Filter], options: &QueryOptions, store: &impl KvStore,
) -> Result<Vec<IndexItem>> {
    let mut matched = BTreeMap::new();

    for filter in filters {
        let Some((property, predicate)) = pick_selective(filter) else {
            return Err(unexpected!("query filter has no indexable predicates"));
        };

        for item in candidates(owner, property, predicate, store).await? {
            if !matches(&item.indexes, filter) {
                continue;
            }
            let Some(sort_key) = item.encoded(&options.sort_index) else {
                return Err(unexpected!(
                    "sort property {} missing from matched item",
                    options.sort_index
                ));
            };
            matched.entry(format!("{sort_key}\u{0}{}", item.item_id)).or_insert(item);
        }
    }

    let mut items: Vec<IndexItem> = matched.into_values().collect();
    if options.descending {
        items.reverse();
    }

    // slice at the cursor
    let start = if let Some(cursor) = &options.cursor {
        let Some(found) = items.iter().position(|item| item.item_id == cursor.message_cid) else {
            return Ok(Vec::new());
        };
        found + 1
    } else {
        0
    };

    let taken = items.into_iter().skip(start);
    match options.limit {
        Some(limit) => Ok(taken.take(limit).collect()),
        None => Ok(taken.collect()),
    }
}

// Iterator paging: walk the sort property's partition from a cursor-derived
// start key, testing each entry against the filter union until the limit is
// reached.
async fn query_iterator(
    owner: &str, filters: &[Filter], options: &QueryOptions, store: &impl KvStore,
) -> Result<Vec<IndexItem>> {
    let prefix = index_prefix(&options.sort_index);

    // resolve the cursor to a start key within the sort partition
    let start_key = if let Some(cursor) = &options.cursor {
        let Some(indexes) = lookup(owner, &cursor.message_cid, store).await? else {
            return Ok(Vec::new());
        };
        if !filters.iter().any(|filter| matches(&indexes, filter)) {
            return Ok(Vec::new());
        }
        let Some(value) = indexes.get(&options.sort_index).and_then(IndexValue::from_json) else {
            return Ok(Vec::new());
        };
        Some(format!("{prefix}{}\u{0}{}", value.encode(), cursor.message_cid))
    } else {
        None
    };

    let mut items = Vec::new();
    let mut opts = RangeOpts {
        reverse: options.descending,
        limit: Some(SCAN_PAGE),
        ..RangeOpts::default()
    };
    if options.descending {
        opts.lt = Some(start_key.unwrap_or_else(|| prefix_end(&prefix)));
        opts.gte = Some(prefix.clone());
    } else {
        opts.gt = Some(start_key.unwrap_or_else(|| prefix.clone()));
        opts.lt = Some(prefix_end(&prefix));
    }

    loop {
        let page = store.range(owner, opts.clone()).await?;
        let page_len = page.len();

        for (key, bytes) in page {
            let item: IndexItem = serde_json::from_slice(&bytes)?;
            if filters.iter().any(|filter| matches(&item.indexes, filter)) {
                items.push(item);
                if options.limit.is_some_and(|limit| items.len() >= limit) {
                    return Ok(items);
                }
            }
            if options.descending {
                opts.lt = Some(key);
            } else {
                opts.gt = Some(key);
            }
        }

        if page_len < SCAN_PAGE {
            return Ok(items);
        }
    }
}

const SCAN_PAGE: usize = 512;

// Materialize the candidate set for one predicate via a forward-partition
// range scan.
async fn candidates(
    owner: &str, property: &str, predicate: &FilterVal, store: &impl KvStore,
) -> Result<Vec<IndexItem>> {
    let mut scans = Vec::new();

    match predicate {
        FilterVal::Equal(value) => scans.push(equal_bounds(property, value)),
        FilterVal::OneOf(values) => {
            for value in values {
                scans.push(equal_bounds(property, value));
            }
        }
        FilterVal::Range(range) => {
            let prefix = index_prefix(property);
            let mut opts = RangeOpts::default();
            opts.gte = match &range.lower {
                // inclusive: every key for the value itself starts at `enc\x00`
                Some(Lower::Inclusive(value)) => {
                    Some(format!("{prefix}{}\u{0}", value.encode()))
                }
                // exclusive: skip past all of the value's keys
                Some(Lower::Exclusive(value)) => {
                    Some(format!("{prefix}{}\u{1}", value.encode()))
                }
                None => Some(prefix.clone()),
            };
            opts.lt = match &range.upper {
                // inclusive: take every key for the bound value too
                Some(Upper::Inclusive(value)) => {
                    Some(format!("{prefix}{}\u{1}", value.encode()))
                }
                Some(Upper::Exclusive(value)) => {
                    Some(format!("{prefix}{}\u{0}", value.encode()))
                }
                None => Some(prefix_end(&prefix)),
            };
            scans.push(opts);
        }
    }

    let mut items = Vec::new();
    for opts in scans {
        for (_, bytes) in store.range(owner, opts).await? {
            items.push(serde_json::from_slice(&bytes)?);
        }
    }
    Ok(items)
}

fn equal_bounds(property: &str, value: &IndexValue) -> RangeOpts {
    let prefix = index_prefix(property);
    let encoded = value.encode();
    RangeOpts {
        gte: Some(format!("{prefix}{encoded}\u{0}")),
        lt: Some(format!("{prefix}{encoded}\u{1}")),
        ..RangeOpts::default()
    }
}

/// Check an item's properties against every predicate in a filter.
#[must_use]
pub fn matches(indexes: &HashMap<String, Value>, filter: &Filter) -> bool {
    for (property, predicate) in filter {
        let Some(value) = indexes.get(property).and_then(IndexValue::from_json) else {
            return false;
        };
        let encoded = value.encode();

        let matched = match predicate {
            FilterVal::Equal(expected) => encoded == expected.encode(),
            FilterVal::OneOf(options) => options.iter().any(|o| o.encode() == encoded),
            FilterVal::Range(range) => {
                let lower_ok = match &range.lower {
                    Some(Lower::Inclusive(v)) => encoded >= v.encode(),
                    Some(Lower::Exclusive(v)) => encoded > v.encode(),
                    None => true,
                };
                let upper_ok = match &range.upper {
                    Some(Upper::Inclusive(v)) => encoded <= v.encode(),
                    Some(Upper::Exclusive(v)) => encoded < v.encode(),
                    None => true,
                };
                lower_ok && upper_ok
            }
        };
        if !matched {
            return false;
        }
    }
    true
}

// Pick the most selective predicate to materialize a filter's candidates,
// in priority order.
fn pick_selective(filter: &Filter) -> Option<(&str, &FilterVal)> {
    const PRIORITY: &[&str] = &[
        "recordId",
        "attester",
        "parentId",
        "recipient",
        "contextId",
        "protocolPath",
        "schema",
        "protocol",
        "dataCid",
        "dataSize",
        "datePublished",
        "dateCreated",
        "dateUpdated",
        "messageTimestamp",
        "dataFormat",
        "published",
        "author",
    ];

    for property in PRIORITY {
        if let Some(predicate) = filter.get(*property) {
            return Some((*property, predicate));
        }
    }
    filter.iter().next().map(|(name, predicate)| (name.as_str(), predicate))
}

fn index_prefix(property: &str) -> String {
    format!("__{property}__/")
}

fn forward_key(property: &str, encoded: &str, item_id: &str) -> String {
    format!("{}{encoded}\u{0}{item_id}", index_prefix(property))
}

// The smallest key greater than every key with the given prefix.
fn prefix_end(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.last_mut() {
        if *last < 0xff {
            *last += 1;
            return String::from_utf8_lossy(&bytes).into_owned();
        }
        bytes.pop();
    }
    // unbounded: a prefix of 0xff bytes has no upper sibling
    "\u{10FFFF}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_encoding_preserves_order() {
        let values = [-9_007_199_254_740_991, -50, -5, -2, -1, 0, 1, 2, 10, 99, 1_000_000];
        for window in values.windows(2) {
            let a = IndexValue::Number(window[0]).encode();
            let b = IndexValue::Number(window[1]).encode();
            assert!(a < b, "{} should sort before {}", window[0], window[1]);
        }
    }

    #[test]
    fn strings_sort_apart_from_numbers() {
        let number = IndexValue::Number(42).encode();
        let string = IndexValue::String("42".to_string()).encode();
        assert_ne!(number, string);
        assert_eq!(string, "\"42\"");
    }

    #[test]
    fn bool_encoding() {
        assert_eq!(IndexValue::Bool(true).encode(), "true");
        assert_eq!(IndexValue::Bool(false).encode(), "false");
    }

    #[test]
    fn prefix_end_increments() {
        assert_eq!(prefix_end("__digit__/"), "__digit__0");
        assert!(prefix_end("abc") > "abcz".to_string());
    }
}
