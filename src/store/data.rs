//! # Data Store
//!
//! Content-addressed blob storage. Payload chunks are shared per tenant under
//! `blob/{dataCid}`, while each referencing record keeps a linkage at
//! `data/{recordId}/{dataCid}` and a reference marker at
//! `ref/{dataCid}/{recordId}`. The linkage lets a delete find its blob without
//! scanning; the markers make the is-anyone-else-using-this check a bounded
//! prefix scan.

use std::io::Read;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::{CHUNK_SIZE, DataStream};
use crate::provider::{KvStore, RangeOpts, WriteOp};
use crate::utils::cid;
use crate::{Result, unexpected};

/// The outcome of storing a data stream: the size and CID actually observed.
/// Callers verify these against the message descriptor.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutResult {
    /// The CID computed over the stored bytes.
    pub data_cid: String,

    /// The number of bytes stored.
    pub data_size: usize,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Linkage {
    data_cid: String,
    data_size: usize,
}

/// The `DataStore` persists record data blobs, deduplicated per tenant by
/// reference counting. Implemented for every [`KvStore`].
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Stream data into chunked storage for the given record, returning the
    /// recomputed CID and observed size.
    async fn put(
        &self, owner: &str, record_id: &str, reader: DataStream,
    ) -> Result<PutResult>;

    /// Fetch a record's data, or `None` when the blob is absent or the
    /// record never referenced it.
    async fn get(&self, owner: &str, record_id: &str, data_cid: &str)
    -> Result<Option<DataStream>>;

    /// Remove the record's linkage; the shared blob is removed too when no
    /// other record in the tenant references it.
    async fn delete(&self, owner: &str, record_id: &str, data_cid: &str) -> Result<()>;
}

#[async_trait]
impl<T: KvStore> DataStore for T {
    async fn put(&self, owner: &str, record_id: &str, reader: DataStream) -> Result<PutResult> {
        let mut reader = reader;
        let mut ops = Vec::new();
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .map_err(|e| unexpected!("issue reading data stream: {e}"))?;

        let data_cid = cid::from_data(&buffer);
        let data_size = buffer.len();

        for (seq, chunk) in buffer.chunks(CHUNK_SIZE).enumerate() {
            ops.push(WriteOp::Put {
                key: format!("blob/{data_cid}/{seq:08}"),
                value: chunk.to_vec(),
            });
        }

        let linkage = Linkage {
            data_cid: data_cid.clone(),
            data_size,
        };
        ops.push(WriteOp::Put {
            key: format!("data/{record_id}/{data_cid}"),
            value: serde_json::to_vec(&linkage)?,
        });
        ops.push(WriteOp::Put {
            key: format!("ref/{data_cid}/{record_id}"),
            value: Vec::new(),
        });

        self.batch(owner, ops).await?;

        Ok(PutResult { data_cid, data_size })
    }

    async fn get(
        &self, owner: &str, record_id: &str, data_cid: &str,
    ) -> Result<Option<DataStream>> {
        // the record must reference the blob
        if KvStore::get(self, owner, &format!("data/{record_id}/{data_cid}")).await?.is_none() {
            return Ok(None);
        }

        let chunks = self
            .range(
                owner,
                RangeOpts {
                    gte: Some(format!("blob/{data_cid}/")),
                    lt: Some(format!("blob/{data_cid}0")),
                    ..RangeOpts::default()
                },
            )
            .await?;
        if chunks.is_empty() {
            return Ok(None);
        }

        let mut buffer = Vec::new();
        for (_, chunk) in chunks {
            buffer.extend_from_slice(&chunk);
        }
        Ok(Some(DataStream::from(buffer)))
    }

    async fn delete(&self, owner: &str, record_id: &str, data_cid: &str) -> Result<()> {
        let mut ops = vec![
            WriteOp::Delete {
                key: format!("data/{record_id}/{data_cid}"),
            },
            WriteOp::Delete {
                key: format!("ref/{data_cid}/{record_id}"),
            },
        ];

        // reclaim the shared blob when this was the last reference
        let refs = self
            .range(
                owner,
                RangeOpts {
                    gte: Some(format!("ref/{data_cid}/")),
                    lt: Some(format!("ref/{data_cid}0")),
                    ..RangeOpts::default()
                },
            )
            .await?;
        let last_ref =
            refs.iter().all(|(key, _)| key == &format!("ref/{data_cid}/{record_id}"));

        if last_ref {
            let chunks = self
                .range(
                    owner,
                    RangeOpts {
                        gte: Some(format!("blob/{data_cid}/")),
                        lt: Some(format!("blob/{data_cid}0")),
                        ..RangeOpts::default()
                    },
                )
                .await?;
            for (key, _) in chunks {
                ops.push(WriteOp::Delete { key });
            }
        }

        self.batch(owner, ops).await?;
        Ok(())
    }
}
