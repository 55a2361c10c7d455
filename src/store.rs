//! # Store
//!
//! Storage built on the provider's ordered key-value engine: content-addressed
//! messages, sorted secondary indexes, chunked blobs, and the append-only
//! event log. Query types here are shared by the message store and event log.

pub(crate) mod data;
pub(crate) mod event_log;
pub mod index;
pub(crate) mod message;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::data::DataStore;
pub use self::event_log::EventLog;
pub use self::index::{FilterVal, IndexValue};
pub use self::message::MessageStore;
use crate::endpoint::Message;
use crate::messages::MessagesFilter;
use crate::protocols::Configure;
use crate::records::{Delete, RecordsFilter, Write};
use crate::{Descriptor, Method, Result};

/// A persisted message together with the properties it is indexed on.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Entry {
    /// The message.
    pub message: EntryType,

    /// Index property → scalar value.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub indexes: HashMap<String, Value>,
}

/// The type of message carried by an [`Entry`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EntryType {
    /// A `RecordsWrite` message.
    Write(Write),

    /// A `ProtocolsConfigure` message.
    Configure(Configure),

    /// A `RecordsDelete` message.
    Delete(Delete),
}

impl Entry {
    /// Compute the CID of the carried message.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be canonically encoded.
    pub fn cid(&self) -> Result<String> {
        match &self.message {
            EntryType::Write(write) => Message::cid(write),
            EntryType::Configure(configure) => Message::cid(configure),
            EntryType::Delete(delete) => Message::cid(delete),
        }
    }

    /// The carried message's base descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        match &self.message {
            EntryType::Write(write) => &write.descriptor.base,
            EntryType::Configure(configure) => &configure.descriptor.base,
            EntryType::Delete(delete) => &delete.descriptor.base,
        }
    }

    /// The carried message as a `RecordsWrite`, if it is one.
    #[must_use]
    pub const fn as_write(&self) -> Option<&Write> {
        match &self.message {
            EntryType::Write(write) => Some(write),
            _ => None,
        }
    }

    /// The carried message as a `RecordsDelete`, if it is one.
    #[must_use]
    pub const fn as_delete(&self) -> Option<&Delete> {
        match &self.message {
            EntryType::Delete(delete) => Some(delete),
            _ => None,
        }
    }

    /// The carried message as a `ProtocolsConfigure`, if it is one.
    #[must_use]
    pub const fn as_configure(&self) -> Option<&Configure> {
        match &self.message {
            EntryType::Configure(configure) => Some(configure),
            _ => None,
        }
    }

    /// Add (or replace) an index property.
    pub fn add_index(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.indexes.insert(key.into(), value.into());
    }
}

impl From<&Write> for Entry {
    fn from(write: &Write) -> Self {
        Self {
            message: EntryType::Write(write.clone()),
            indexes: write.build_indexes(),
        }
    }
}

impl From<&Delete> for Entry {
    fn from(delete: &Delete) -> Self {
        Self {
            message: EntryType::Delete(delete.clone()),
            indexes: delete.build_indexes(),
        }
    }
}

impl From<&Configure> for Entry {
    fn from(configure: &Configure) -> Self {
        Self {
            message: EntryType::Configure(configure.clone()),
            indexes: configure.build_indexes(),
        }
    }
}

/// A store query, one variant per interface.
#[derive(Clone, Debug)]
pub enum Query {
    /// Query for `Records` messages.
    Records(RecordsQuery),

    /// Query for `ProtocolsConfigure` messages.
    Protocols(ProtocolsQuery),

    /// Query the event log for messages of any type.
    Messages(MessagesQuery),
}

/// A query over `Records` messages.
#[derive(Clone, Debug)]
pub struct RecordsQuery {
    /// OR-composed filters; an entry matches when any filter matches.
    pub filters: Vec<RecordsFilter>,

    /// Restrict matches to the given method. `None` matches both `Write`
    /// and `Delete` messages.
    pub method: Option<Method>,

    /// Include entries no longer in latest-base state (retained initial
    /// writes).
    pub include_archived: bool,

    /// Result ordering.
    pub sort: Sort,

    /// Limit/cursor to apply.
    pub pagination: Option<Pagination>,
}

impl Default for RecordsQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            method: Some(Method::Write),
            include_archived: false,
            sort: Sort::default(),
            pagination: None,
        }
    }
}

/// Builds a [`RecordsQuery`].
#[derive(Clone, Debug, Default)]
pub struct RecordsQueryBuilder {
    query: RecordsQuery,
}

impl RecordsQueryBuilder {
    /// Returns a new [`RecordsQueryBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter to the OR set.
    #[must_use]
    pub fn add_filter(mut self, filter: RecordsFilter) -> Self {
        self.query.filters.push(filter);
        self
    }

    /// Restrict (or unrestrict, with `None`) the matched method.
    #[must_use]
    pub fn method(mut self, method: Option<Method>) -> Self {
        self.query.method = method;
        self
    }

    /// Include archived (non-latest) entries.
    #[must_use]
    pub const fn include_archived(mut self, include_archived: bool) -> Self {
        self.query.include_archived = include_archived;
        self
    }

    /// Set the result ordering.
    #[must_use]
    pub const fn sort(mut self, sort: Sort) -> Self {
        self.query.sort = sort;
        self
    }

    /// Set the limit/cursor.
    #[must_use]
    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.query.pagination = Some(pagination);
        self
    }

    /// Build the query.
    #[must_use]
    pub fn build(self) -> Query {
        Query::Records(self.query)
    }
}

/// A query over protocol configurations.
#[derive(Clone, Debug, Default)]
pub struct ProtocolsQuery {
    /// Match a specific (normalized) protocol URL.
    pub protocol: Option<String>,

    /// Match only published (or only unpublished) definitions.
    pub published: Option<bool>,
}

/// A query over the event log.
#[derive(Clone, Debug, Default)]
pub struct MessagesQuery {
    /// OR-composed filters; an event matches when any filter matches.
    pub filters: Vec<MessagesFilter>,

    /// Replay strictly after this cursor.
    pub cursor: Option<Cursor>,
}

/// Result ordering for records queries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Sort {
    /// Sort `dateCreated` from oldest to newest.
    #[serde(rename = "createdAscending")]
    CreatedAsc,

    /// Sort `dateCreated` newest to oldest.
    #[serde(rename = "createdDescending")]
    CreatedDesc,

    /// Sort `datePublished` from oldest to newest.
    #[serde(rename = "publishedAscending")]
    PublishedAsc,

    /// Sort `datePublished` from newest to oldest.
    #[serde(rename = "publishedDescending")]
    PublishedDesc,

    /// Sort `messageTimestamp` from oldest to newest.
    #[serde(rename = "timestampAscending")]
    #[default]
    TimestampAsc,

    /// Sort `messageTimestamp` from newest to oldest.
    #[serde(rename = "timestampDescending")]
    TimestampDesc,
}

impl Sort {
    /// The index property sorted on.
    #[must_use]
    pub const fn index(&self) -> &'static str {
        match self {
            Self::CreatedAsc | Self::CreatedDesc => "dateCreated",
            Self::PublishedAsc | Self::PublishedDesc => "datePublished",
            Self::TimestampAsc | Self::TimestampDesc => "messageTimestamp",
        }
    }

    /// Whether the sort runs newest-first.
    #[must_use]
    pub const fn is_descending(&self) -> bool {
        matches!(self, Self::CreatedDesc | Self::PublishedDesc | Self::TimestampDesc)
    }
}

/// Limit and cursor for paged queries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Maximum entries per page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Resume strictly after this cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// A pagination cursor: the last returned item and its value on the sort
/// property. The value is typed so the next page can re-derive the start key
/// without guessing.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// CID of the last message returned, the sort tie-breaker.
    pub message_cid: String,

    /// The item's value on the sort property.
    pub value: CursorValue,
}

/// The typed value component of a [`Cursor`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CursorValue {
    /// A string-sorted cursor.
    String(String),

    /// A number-sorted cursor.
    Number(i64),
}

impl CursorValue {
    /// The cursor value as an index value.
    #[must_use]
    pub fn to_index_value(&self) -> IndexValue {
        match self {
            Self::String(s) => IndexValue::String(s.clone()),
            Self::Number(n) => IndexValue::Number(*n),
        }
    }
}

impl RecordsQuery {
    /// Lower the query to index filters plus query options.
    pub(crate) fn to_parts(&self) -> (Vec<index::Filter>, index::QueryOptions) {
        let mut filters = Vec::new();
        let base_filters: &[RecordsFilter] =
            if self.filters.is_empty() { &[RecordsFilter::default()] } else { &self.filters };

        for filter in base_filters {
            let mut index_filter = filter.to_filter();
            index_filter
                .insert("interface".to_string(), FilterVal::Equal(IndexValue::from("Records")));
            if let Some(method) = &self.method {
                index_filter.insert(
                    "method".to_string(),
                    FilterVal::Equal(IndexValue::from(method.to_string())),
                );
            }
            if !self.include_archived {
                index_filter
                    .insert("latestBase".to_string(), FilterVal::Equal(IndexValue::Bool(true)));
            }
            filters.push(index_filter);
        }

        let pagination = self.pagination.clone().unwrap_or_default();
        let options = index::QueryOptions {
            sort_index: self.sort.index().to_string(),
            descending: self.sort.is_descending(),
            limit: pagination.limit,
            cursor: pagination.cursor,
        };

        (filters, options)
    }
}

impl ProtocolsQuery {
    pub(crate) fn to_parts(&self) -> (Vec<index::Filter>, index::QueryOptions) {
        let mut filter = index::Filter::new();
        filter.insert("interface".to_string(), FilterVal::Equal(IndexValue::from("Protocols")));
        filter.insert("method".to_string(), FilterVal::Equal(IndexValue::from("Configure")));
        if let Some(protocol) = &self.protocol {
            filter.insert(
                "protocol".to_string(),
                FilterVal::Equal(IndexValue::from(protocol.clone())),
            );
        }
        if let Some(published) = self.published {
            filter.insert("published".to_string(), FilterVal::Equal(IndexValue::Bool(published)));
        }

        let options = index::QueryOptions {
            sort_index: "messageTimestamp".to_string(),
            descending: false,
            limit: None,
            cursor: None,
        };

        (vec![filter], options)
    }
}

impl MessagesQuery {
    pub(crate) fn to_filters(&self) -> Vec<index::Filter> {
        self.filters.iter().map(MessagesFilter::to_filter).collect()
    }
}
