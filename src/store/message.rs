//! # Message Store
//!
//! Canonical message persistence keyed by message CID, coupled with the index
//! store for queryability. Implemented for every [`KvStore`].

use async_trait::async_trait;

use crate::provider::KvStore;
use crate::store::{Cursor, CursorValue, Entry, Query, index};
use crate::{Result, unexpected};

const MESSAGE_PREFIX: &str = "message/";

/// The `MessageStore` persists canonically encoded messages and serves
/// sorted, paginated queries over them.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message entry, replacing its indexes. Re-putting the same
    /// entry is idempotent.
    async fn put(&self, owner: &str, entry: &Entry) -> Result<()>;

    /// Fetch a message by CID, or `None`.
    async fn get(&self, owner: &str, message_cid: &str) -> Result<Option<Entry>>;

    /// Query for matching messages, returning them in sorted order together
    /// with a continuation cursor when a full page was returned.
    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Option<Cursor>)>;

    /// Delete the message and its indexes. Deleting an absent message is a
    /// no-op.
    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()>;

    /// Remove all of a tenant's state.
    async fn purge(&self, owner: &str) -> Result<()>;
}

#[async_trait]
impl<T: KvStore> MessageStore for T {
    async fn put(&self, owner: &str, entry: &Entry) -> Result<()> {
        let message_cid = entry.cid()?;

        let block = serde_ipld_dagcbor::to_vec(entry)
            .map_err(|e| unexpected!("issue encoding message: {e}"))?;
        KvStore::put(self, owner, &format!("{MESSAGE_PREFIX}{message_cid}"), &block).await?;

        // re-putting replaces any prior indexes for the message
        index::delete(owner, &message_cid, self).await?;
        index::insert(owner, &message_cid, &entry.indexes, self).await?;

        tracing::debug!(target: "store", "put message {message_cid} for {owner}");
        Ok(())
    }

    async fn get(&self, owner: &str, message_cid: &str) -> Result<Option<Entry>> {
        let Some(bytes) =
            KvStore::get(self, owner, &format!("{MESSAGE_PREFIX}{message_cid}")).await?
        else {
            return Ok(None);
        };
        let entry = serde_ipld_dagcbor::from_slice(&bytes)
            .map_err(|e| unexpected!("issue decoding message: {e}"))?;
        Ok(Some(entry))
    }

    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Option<Cursor>)> {
        let (filters, options) = match query {
            Query::Records(records) => records.to_parts(),
            Query::Protocols(protocols) => protocols.to_parts(),
            Query::Messages(_) => {
                return Err(unexpected!("messages queries run against the event log"));
            }
        };

        let items = index::query(owner, &filters, &options, self).await?;

        let mut entries = Vec::new();
        for item in &items {
            let Some(entry) = MessageStore::get(self, owner, &item.item_id).await? else {
                return Err(unexpected!("indexed message {} is missing", item.item_id));
            };
            entries.push(entry);
        }

        // a full page implies more may follow
        let cursor = match (options.limit, items.last()) {
            (Some(limit), Some(last)) if items.len() == limit => {
                let value = last
                    .indexes
                    .get(&options.sort_index)
                    .and_then(index::IndexValue::from_json)
                    .map(|value| match value {
                        index::IndexValue::String(s) => CursorValue::String(s),
                        index::IndexValue::Number(n) => CursorValue::Number(n),
                        index::IndexValue::Bool(b) => CursorValue::String(b.to_string()),
                    });
                value.map(|value| Cursor {
                    message_cid: last.item_id.clone(),
                    value,
                })
            }
            _ => None,
        };

        Ok((entries, cursor))
    }

    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()> {
        index::delete(owner, message_cid, self).await?;
        KvStore::delete(self, owner, &format!("{MESSAGE_PREFIX}{message_cid}")).await?;
        tracing::debug!(target: "store", "deleted message {message_cid} for {owner}");
        Ok(())
    }

    async fn purge(&self, owner: &str) -> Result<()> {
        KvStore::purge(self, owner).await?;
        Ok(())
    }
}
