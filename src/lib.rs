//! # Decentralized Web Node (DWN)
//!
//! A per-tenant, protocol-aware message store. Signed messages describing
//! records and protocol configurations are ingested through
//! [`endpoint::handle`], authorized against a layered permission model,
//! indexed for rich queries, and emitted as lifecycle events to subscribers.
//!
//! All state is partitioned by tenant (typically a DID) and persisted through
//! the [`provider::KvStore`] seam — an ordered, byte-keyed engine with atomic
//! batches and range iterators. Everything above that seam (blob storage,
//! message indexing, the event log) lives in this crate.

pub mod authorization;
pub mod data;
pub mod endpoint;
mod error;
pub mod event;
pub mod grants;
pub mod jws;
pub mod messages;
pub mod protocols;
pub mod provider;
pub mod records;
mod schema;
pub mod store;
mod sync;
pub mod tasks;
pub(crate) mod utils;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use crate::endpoint::{Message, Reply, Status};
pub use crate::error::Error;

/// Result type for `DWN` handlers and stores.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The message interface.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, derive_more::Display)]
pub enum Interface {
    /// Records interface: user data records.
    #[default]
    Records,

    /// Protocols interface: protocol configurations.
    Protocols,

    /// Messages interface: event-log access.
    Messages,
}

/// The message method.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, derive_more::Display)]
pub enum Method {
    /// Read a single item.
    #[default]
    Read,

    /// Query for a set of items.
    Query,

    /// Write (create or update) a record.
    Write,

    /// Delete (tombstone) a record.
    Delete,

    /// Configure a protocol.
    Configure,

    /// Subscribe to an event stream.
    Subscribe,
}

/// The message descriptor fields common to all messages.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// The associated web node interface.
    pub interface: Interface,

    /// The interface method.
    pub method: Method,

    /// The timestamp of the message, microsecond precision.
    pub message_timestamp: DateTime<Utc>,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self {
            interface: Interface::default(),
            method: Method::default(),
            message_timestamp: utils::now_micros(),
        }
    }
}

/// One or more values, flattened on the wire.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value.
    One(T),

    /// A set of values.
    Many(Vec<T>),
}

impl<T: Default> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::One(T::default())
    }
}

impl<T: Clone> OneOrMany<T> {
    /// Convert to a `Vec`, cloning as needed.
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

/// An inclusive or exclusive lower bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lower<T> {
    /// Greater than or equal (`gte`).
    Inclusive(T),

    /// Greater than (`gt`).
    Exclusive(T),
}

/// An inclusive or exclusive upper bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upper<T> {
    /// Less than or equal (`lte`).
    Inclusive(T),

    /// Less than (`lt`).
    Exclusive(T),
}

/// A half- or fully-bounded range filter, serialized using the
/// `gt`/`gte`/`lt`/`lte` wire keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Range<T> {
    /// The lower bound, if any.
    pub lower: Option<Lower<T>>,

    /// The upper bound, if any.
    pub upper: Option<Upper<T>>,
}

impl<T: PartialOrd> Range<T> {
    /// Check a value lies within the range.
    pub fn contains(&self, value: &T) -> bool {
        let lower_ok = match &self.lower {
            Some(Lower::Inclusive(lower)) => value >= lower,
            Some(Lower::Exclusive(lower)) => value > lower,
            None => true,
        };
        if !lower_ok {
            return false;
        }
        match &self.upper {
            Some(Upper::Inclusive(upper)) => value <= upper,
            Some(Upper::Exclusive(upper)) => value < upper,
            None => true,
        }
    }
}

impl<T: Serialize> Serialize for Range<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.lower {
            Some(Lower::Inclusive(value)) => map.serialize_entry("gte", value)?,
            Some(Lower::Exclusive(value)) => map.serialize_entry("gt", value)?,
            None => {}
        }
        match &self.upper {
            Some(Upper::Inclusive(value)) => map.serialize_entry("lte", value)?,
            Some(Upper::Exclusive(value)) => map.serialize_entry("lt", value)?,
            None => {}
        }
        map.end()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Range<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire<U> {
            gt: Option<U>,
            gte: Option<U>,
            lt: Option<U>,
            lte: Option<U>,
        }

        let wire = Wire::<T>::deserialize(deserializer)?;
        Ok(Self {
            lower: wire.gte.map(Lower::Inclusive).or(wire.gt.map(Lower::Exclusive)),
            upper: wire.lte.map(Upper::Inclusive).or(wire.lt.map(Upper::Exclusive)),
        })
    }
}

/// An inclusive date range, serialized using the `from`/`to` wire keys.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DateRange {
    /// The earliest matching date.
    #[serde(rename = "from")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower: Option<DateTime<Utc>>,

    /// The latest matching date.
    #[serde(rename = "to")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Check a date lies within the range.
    #[must_use]
    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        if let Some(lower) = &self.lower {
            if date < lower {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if date > upper {
                return false;
            }
        }
        true
    }
}

/// A range constraining the size, in bytes, of a record's data.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SizeRange {
    /// The minimum size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,

    /// The maximum size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}
