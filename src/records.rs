//! # Records

mod delete;
mod protocol;
mod query;
mod read;
mod subscribe;
pub(crate) mod write;

use serde::{Deserialize, Serialize};

pub use self::delete::{Delete, DeleteBuilder, DeleteDescriptor, DeleteReply};
pub use self::protocol::Authorizer;
pub use self::query::{Query, QueryBuilder, QueryDescriptor, QueryReply, QueryReplyEntry};
pub use self::read::{Read, ReadBuilder, ReadDescriptor, ReadReply, ReadReplyEntry};
pub use self::subscribe::{Subscribe, SubscribeBuilder, SubscribeDescriptor, SubscribeReply};
pub use self::write::{
    Data, DelegatedGrant, SignaturePayload, Write, WriteBuilder, WriteDescriptor, WriteProtocol,
    WriteReply, entry_id,
};
pub use crate::data::DataStream;
use crate::store::{FilterVal, IndexValue, index::Filter};
use crate::{DateRange, Lower, OneOrMany, Range, Result, Upper, utils};

/// Records filter, AND-composed across set properties.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordsFilter {
    /// Get a single record by its ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Records matching the specified author(s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<OneOrMany<String>>,

    /// Records attested to by the specified attester.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attester: Option<String>,

    /// Records matching the specified recipient(s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<OneOrMany<String>>,

    /// Records within the specified context (or a descendant context).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Records with the specified parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Records under the specified protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Records at the specified protocol path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_path: Option<String>,

    /// Records with the specified schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// The MIME type of the record data, e.g. `application/json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,

    /// The CID of the record data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_cid: Option<String>,

    /// Records whose data size lies within the range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_size: Option<Range<i64>>,

    /// Whether the record is published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,

    /// Records published within the range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<DateRange>,

    /// Records created within the range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateRange>,

    /// Records updated within the range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<DateRange>,
}

impl RecordsFilter {
    /// Normalize the filter's protocol and schema URLs.
    pub(crate) fn normalize(&self) -> Result<Self> {
        let mut filter = self.clone();
        if let Some(protocol) = &self.protocol {
            filter.protocol = Some(utils::uri::clean(protocol)?);
        }
        if let Some(schema) = &self.schema {
            filter.schema = Some(utils::uri::clean(schema)?);
        }
        Ok(filter)
    }

    /// Lower the filter to index predicates.
    #[must_use]
    pub(crate) fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();

        if let Some(record_id) = &self.record_id {
            filter.insert(
                "recordId".to_string(),
                FilterVal::Equal(IndexValue::from(record_id.clone())),
            );
        }
        if let Some(author) = &self.author {
            let authors = author.to_vec().into_iter().map(IndexValue::from).collect();
            filter.insert("author".to_string(), FilterVal::OneOf(authors));
        }
        if let Some(attester) = &self.attester {
            filter
                .insert("attester".to_string(), FilterVal::Equal(IndexValue::from(attester.clone())));
        }
        if let Some(recipient) = &self.recipient {
            let recipients = recipient.to_vec().into_iter().map(IndexValue::from).collect();
            filter.insert("recipient".to_string(), FilterVal::OneOf(recipients));
        }
        if let Some(context_id) = &self.context_id {
            // a context filter matches the context and its descendants
            filter.insert(
                "contextId".to_string(),
                FilterVal::Range(Range {
                    lower: Some(Lower::Inclusive(IndexValue::from(context_id.clone()))),
                    upper: Some(Upper::Inclusive(IndexValue::from(format!(
                        "{context_id}\u{ffff}"
                    )))),
                }),
            );
        }
        if let Some(parent_id) = &self.parent_id {
            filter.insert(
                "parentId".to_string(),
                FilterVal::Equal(IndexValue::from(parent_id.clone())),
            );
        }
        if let Some(protocol) = &self.protocol {
            filter
                .insert("protocol".to_string(), FilterVal::Equal(IndexValue::from(protocol.clone())));
        }
        if let Some(protocol_path) = &self.protocol_path {
            filter.insert(
                "protocolPath".to_string(),
                FilterVal::Equal(IndexValue::from(protocol_path.clone())),
            );
        }
        if let Some(schema) = &self.schema {
            filter.insert("schema".to_string(), FilterVal::Equal(IndexValue::from(schema.clone())));
        }
        if let Some(data_format) = &self.data_format {
            filter.insert(
                "dataFormat".to_string(),
                FilterVal::Equal(IndexValue::from(data_format.clone())),
            );
        }
        if let Some(data_cid) = &self.data_cid {
            filter
                .insert("dataCid".to_string(), FilterVal::Equal(IndexValue::from(data_cid.clone())));
        }
        if let Some(data_size) = &self.data_size {
            filter.insert("dataSize".to_string(), FilterVal::Range(number_range(data_size)));
        }
        if let Some(published) = self.published {
            filter.insert("published".to_string(), FilterVal::Equal(IndexValue::Bool(published)));
        }
        if let Some(date_published) = &self.date_published {
            filter.insert("datePublished".to_string(), FilterVal::Range(date_range(date_published)));
        }
        if let Some(date_created) = &self.date_created {
            filter.insert("dateCreated".to_string(), FilterVal::Range(date_range(date_created)));
        }
        if let Some(date_updated) = &self.date_updated {
            filter.insert("dateUpdated".to_string(), FilterVal::Range(date_range(date_updated)));
        }

        filter
    }
}

fn number_range(range: &Range<i64>) -> Range<IndexValue> {
    Range {
        lower: range.lower.as_ref().map(|lower| match lower {
            Lower::Inclusive(value) => Lower::Inclusive(IndexValue::Number(*value)),
            Lower::Exclusive(value) => Lower::Exclusive(IndexValue::Number(*value)),
        }),
        upper: range.upper.as_ref().map(|upper| match upper {
            Upper::Inclusive(value) => Upper::Inclusive(IndexValue::Number(*value)),
            Upper::Exclusive(value) => Upper::Exclusive(IndexValue::Number(*value)),
        }),
    }
}

fn date_range(range: &DateRange) -> Range<IndexValue> {
    Range {
        lower: range
            .lower
            .as_ref()
            .map(|lower| Lower::Inclusive(IndexValue::from(utils::format_date(lower)))),
        upper: range
            .upper
            .as_ref()
            .map(|upper| Upper::Inclusive(IndexValue::from(utils::format_date(upper)))),
    }
}

/// Builder-like construction for [`RecordsFilter`].
impl RecordsFilter {
    /// Returns a new [`RecordsFilter`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an author to the filter.
    #[must_use]
    pub fn add_author(mut self, author: impl Into<String>) -> Self {
        match &mut self.author {
            Some(OneOrMany::Many(existing)) => existing.push(author.into()),
            Some(OneOrMany::One(existing)) => {
                self.author = Some(OneOrMany::Many(vec![existing.clone(), author.into()]));
            }
            None => self.author = Some(OneOrMany::One(author.into())),
        }
        self
    }

    /// Add an attester to the filter.
    #[must_use]
    pub fn attester(mut self, attester: impl Into<String>) -> Self {
        self.attester = Some(attester.into());
        self
    }

    /// Add a recipient to the filter.
    #[must_use]
    pub fn add_recipient(mut self, recipient: impl Into<String>) -> Self {
        match &mut self.recipient {
            Some(OneOrMany::Many(existing)) => existing.push(recipient.into()),
            Some(OneOrMany::One(existing)) => {
                self.recipient = Some(OneOrMany::Many(vec![existing.clone(), recipient.into()]));
            }
            None => self.recipient = Some(OneOrMany::One(recipient.into())),
        }
        self
    }

    /// Add a protocol to the filter.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Add a protocol path to the filter.
    #[must_use]
    pub fn protocol_path(mut self, protocol_path: impl Into<String>) -> Self {
        self.protocol_path = Some(protocol_path.into());
        self
    }

    /// Add a schema to the filter.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a published flag to the filter.
    #[must_use]
    pub const fn published(mut self, published: bool) -> Self {
        self.published = Some(published);
        self
    }

    /// Add a context ID to the filter.
    #[must_use]
    pub fn context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Add a record ID to the filter.
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Add a parent ID to the filter.
    #[must_use]
    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Add a data format to the filter.
    #[must_use]
    pub fn data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
        self
    }

    /// Add a data size range to the filter.
    #[must_use]
    pub const fn data_size(mut self, data_size: Range<i64>) -> Self {
        self.data_size = Some(data_size);
        self
    }

    /// Add a data CID to the filter.
    #[must_use]
    pub fn data_cid(mut self, data_cid: impl Into<String>) -> Self {
        self.data_cid = Some(data_cid.into());
        self
    }

    /// Add a created-date range to the filter.
    #[must_use]
    pub const fn date_created(mut self, date_created: DateRange) -> Self {
        self.date_created = Some(date_created);
        self
    }

    /// Add a published-date range to the filter.
    #[must_use]
    pub const fn date_published(mut self, date_published: DateRange) -> Self {
        self.date_published = Some(date_published);
        self
    }

    /// Add an updated-date range to the filter.
    #[must_use]
    pub const fn date_updated(mut self, date_updated: DateRange) -> Self {
        self.date_updated = Some(date_updated);
        self
    }
}
