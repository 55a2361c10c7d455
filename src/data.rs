//! # Data
//!
//! Record data handling: the in-memory data stream passed alongside
//! `RecordsWrite` messages and returned by reads.

use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::store::DataStore;
use crate::utils::cid;

/// Data smaller than this threshold is carried inline in the message's
/// `encodedData` property rather than the blob store.
pub const MAX_ENCODED_SIZE: usize = 30000;

/// The size of a stored blob chunk.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// A readable, cloneable stream of record data.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DataStream {
    buffer: Vec<u8>,
    #[serde(skip)]
    position: usize,
}

impl DataStream {
    /// The number of bytes in the stream.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the stream is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The stream's full contents.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.clone()
    }

    /// Compute the content CID and size of the stream.
    #[must_use]
    pub fn compute_cid(&self) -> (String, usize) {
        (cid::from_data(&self.buffer), self.buffer.len())
    }

    /// Fetch a record's data from the blob store, returning `None` when the
    /// blob or its record linkage is missing.
    ///
    /// # Errors
    ///
    /// Surfaces blob store failures.
    pub async fn from_store(
        owner: &str, record_id: &str, data_cid: &str, store: &impl DataStore,
    ) -> Result<Option<Self>> {
        DataStore::get(store, owner, record_id, data_cid).await
    }
}

impl From<Vec<u8>> for DataStream {
    fn from(buffer: Vec<u8>) -> Self {
        Self { buffer, position: 0 }
    }
}

impl Read for DataStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut cursor = Cursor::new(&self.buffer[self.position..]);
        let read = cursor.read(buf)?;
        self.position += read;
        Ok(read)
    }
}
