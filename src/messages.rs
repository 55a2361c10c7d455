//! # Messages

mod query;
mod read;
mod subscribe;

use serde::{Deserialize, Serialize};

pub use self::query::{Query, QueryBuilder, QueryDescriptor, QueryReply};
pub use self::read::{Read, ReadBuilder, ReadDescriptor, ReadReply, ReadReplyEntry};
pub use self::subscribe::{Subscribe, SubscribeBuilder, SubscribeDescriptor, SubscribeReply};
use crate::store::{FilterVal, IndexValue, index::Filter};
use crate::{DateRange, Interface, Lower, Method, Range, Upper, utils};

/// Filter over messages of any interface, AND-composed across set
/// properties.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesFilter {
    /// Messages of the specified interface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<Interface>,

    /// Messages of the specified method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,

    /// Messages under the specified protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Messages timestamped within the range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<DateRange>,
}

impl MessagesFilter {
    /// Returns a new [`MessagesFilter`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Match messages of the given interface.
    #[must_use]
    pub const fn interface(mut self, interface: Interface) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Match messages of the given method.
    #[must_use]
    pub const fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match messages under the given protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Match messages timestamped within the range.
    #[must_use]
    pub const fn message_timestamp(mut self, message_timestamp: DateRange) -> Self {
        self.message_timestamp = Some(message_timestamp);
        self
    }

    /// Lower the filter to index predicates.
    #[must_use]
    pub(crate) fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();

        if let Some(interface) = &self.interface {
            filter.insert(
                "interface".to_string(),
                FilterVal::Equal(IndexValue::from(interface.to_string())),
            );
        }
        if let Some(method) = &self.method {
            filter.insert(
                "method".to_string(),
                FilterVal::Equal(IndexValue::from(method.to_string())),
            );
        }
        if let Some(protocol) = &self.protocol {
            filter.insert(
                "protocol".to_string(),
                FilterVal::Equal(IndexValue::from(protocol.clone())),
            );
        }
        if let Some(message_timestamp) = &self.message_timestamp {
            filter.insert(
                "messageTimestamp".to_string(),
                FilterVal::Range(Range {
                    lower: message_timestamp
                        .lower
                        .as_ref()
                        .map(|lower| Lower::Inclusive(IndexValue::from(utils::format_date(lower)))),
                    upper: message_timestamp
                        .upper
                        .as_ref()
                        .map(|upper| Upper::Inclusive(IndexValue::from(utils::format_date(upper)))),
                }),
            );
        }

        filter
    }
}
