//! # Event Log
//!
//! An append-only, per-tenant log of persisted messages. Entries are keyed by
//! a monotonic ULID so replay order equals append order; a side lookup maps
//! message CID → sequence for cursor resolution and pruning.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;

use crate::provider::{KvStore, RangeOpts, WriteOp};
use crate::store::{Cursor, CursorValue, Entry, Query, index};
use crate::{Result, unexpected};

const EVENT_PREFIX: &str = "event/";
const CID_PREFIX: &str = "evcid/";

// process-wide monotonic ULID source; two appends in the same millisecond
// must still order
fn next_seq() -> Result<String> {
    static GENERATOR: OnceLock<Mutex<ulid::Generator>> = OnceLock::new();
    let generator = GENERATOR.get_or_init(|| Mutex::new(ulid::Generator::new()));
    let mut generator =
        generator.lock().map_err(|_| unexpected!("event sequence generator poisoned"))?;
    let ulid =
        generator.generate().map_err(|e| unexpected!("issue generating event sequence: {e}"))?;
    Ok(ulid.to_string().to_lowercase())
}

/// The `EventLog` records every persisted message in append order and serves
/// cursor replay and filtered queries. Implemented for every [`KvStore`].
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a message event to the tenant's log.
    async fn append(&self, owner: &str, entry: &Entry) -> Result<()>;

    /// All events in append order, strictly after the cursor when given.
    async fn events(
        &self, owner: &str, cursor: Option<Cursor>,
    ) -> Result<(Vec<Entry>, Option<Cursor>)>;

    /// Filtered events in append order, strictly after the cursor when given.
    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Option<Cursor>)>;

    /// Remove the event for a message. Removing an absent event is a no-op.
    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()>;
}

#[async_trait]
impl<T: KvStore> EventLog for T {
    async fn append(&self, owner: &str, entry: &Entry) -> Result<()> {
        let message_cid = entry.cid()?;

        // appending the same message twice must not duplicate the event
        if KvStore::get(self, owner, &format!("{CID_PREFIX}{message_cid}")).await?.is_some() {
            return Ok(());
        }

        let seq = next_seq()?;
        self.batch(
            owner,
            vec![
                WriteOp::Put {
                    key: format!("{EVENT_PREFIX}{seq}"),
                    value: serde_json::to_vec(entry)?,
                },
                WriteOp::Put {
                    key: format!("{CID_PREFIX}{message_cid}"),
                    value: seq.into_bytes(),
                },
            ],
        )
        .await?;

        Ok(())
    }

    async fn events(
        &self, owner: &str, cursor: Option<Cursor>,
    ) -> Result<(Vec<Entry>, Option<Cursor>)> {
        replay(self, owner, &[], cursor).await
    }

    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Option<Cursor>)> {
        let Query::Messages(messages_query) = query else {
            return Err(unexpected!("expected a messages query"));
        };
        let filters = messages_query.to_filters();
        replay(self, owner, &filters, messages_query.cursor.clone()).await
    }

    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()> {
        let Some(seq) = KvStore::get(self, owner, &format!("{CID_PREFIX}{message_cid}")).await?
        else {
            return Ok(());
        };
        let seq = String::from_utf8_lossy(&seq).into_owned();

        self.batch(
            owner,
            vec![
                WriteOp::Delete {
                    key: format!("{EVENT_PREFIX}{seq}"),
                },
                WriteOp::Delete {
                    key: format!("{CID_PREFIX}{message_cid}"),
                },
            ],
        )
        .await?;

        Ok(())
    }
}

async fn replay(
    store: &impl KvStore, owner: &str, filters: &[index::Filter], cursor: Option<Cursor>,
) -> Result<(Vec<Entry>, Option<Cursor>)> {
    // the cursor names a message CID; resolve it to its log position
    let start = if let Some(cursor) = &cursor {
        let Some(seq) =
            KvStore::get(store, owner, &format!("{CID_PREFIX}{}", cursor.message_cid)).await?
        else {
            return Ok((Vec::new(), None));
        };
        format!("{EVENT_PREFIX}{}", String::from_utf8_lossy(&seq))
    } else {
        EVENT_PREFIX.to_string()
    };

    let events = store
        .range(
            owner,
            RangeOpts {
                gt: Some(start),
                lt: Some("event0".to_string()),
                ..RangeOpts::default()
            },
        )
        .await?;

    let mut entries = Vec::new();
    for (key, bytes) in events {
        let entry: Entry = serde_json::from_slice(&bytes)?;
        if filters.is_empty() || filters.iter().any(|f| index::matches(&entry.indexes, f)) {
            entries.push((key, entry));
        }
    }

    let next = entries.last().map(|(key, entry)| {
        let seq = key.trim_start_matches(EVENT_PREFIX).to_string();
        entry.cid().map(|message_cid| Cursor {
            message_cid,
            value: CursorValue::String(seq),
        })
    });
    let next = match next {
        Some(result) => Some(result?),
        None => None,
    };

    Ok((entries.into_iter().map(|(_, entry)| entry).collect(), next))
}
