//! # Test Node
//!
//! An in-memory web node provider for tests and examples: an ordered
//! key-value engine over `BTreeMap` partitions, a deterministic key store
//! (signing keys derived from the DID string), a matching DID resolver, and
//! the crate's in-process event stream.

pub mod key_store;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dwn_core::event::{EventBroker, SubscribeFilter, Subscriber};
use dwn_core::provider::{
    DidResolver, Document, EventStream, KeyStore, Keyring, KvStore, Provider, RangeOpts, WriteOp,
};
use tokio::sync::RwLock;

type Partition = BTreeMap<String, Vec<u8>>;

/// An in-memory [`Provider`] implementation.
#[derive(Clone)]
pub struct ProviderImpl {
    kv: Arc<RwLock<HashMap<String, Partition>>>,
    events: EventBroker,
}

impl Provider for ProviderImpl {}

impl ProviderImpl {
    /// Create an empty provider.
    ///
    /// # Errors
    ///
    /// Infallible; `Result` for call-site symmetry with real providers.
    pub async fn new() -> Result<Self> {
        Ok(Self {
            kv: Arc::new(RwLock::new(HashMap::new())),
            events: EventBroker::new(),
        })
    }
}

#[async_trait]
impl KvStore for ProviderImpl {
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.kv.read().await;
        Ok(store.get(partition).and_then(|map| map.get(key).cloned()))
    }

    async fn put(&self, partition: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut store = self.kv.write().await;
        store.entry(partition.to_string()).or_default().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<()> {
        let mut store = self.kv.write().await;
        if let Some(map) = store.get_mut(partition) {
            map.remove(key);
        }
        Ok(())
    }

    async fn batch(&self, partition: &str, ops: Vec<WriteOp>) -> Result<()> {
        // a single map lock makes the batch atomic
        let mut store = self.kv.write().await;
        let map = store.entry(partition.to_string()).or_default();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    map.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn range(&self, partition: &str, opts: RangeOpts) -> Result<Vec<(String, Vec<u8>)>> {
        let store = self.kv.read().await;
        let Some(map) = store.get(partition) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(String, Vec<u8>)> = map
            .iter()
            .filter(|(key, _)| {
                opts.gt.as_ref().is_none_or(|bound| key.as_str() > bound.as_str())
                    && opts.gte.as_ref().is_none_or(|bound| key.as_str() >= bound.as_str())
                    && opts.lt.as_ref().is_none_or(|bound| key.as_str() < bound.as_str())
                    && opts.lte.as_ref().is_none_or(|bound| key.as_str() <= bound.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if opts.reverse {
            entries.reverse();
        }
        if let Some(limit) = opts.limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    async fn purge(&self, partition: &str) -> Result<()> {
        let mut store = self.kv.write().await;
        store.remove(partition);
        Ok(())
    }
}

#[async_trait]
impl EventStream for ProviderImpl {
    async fn subscribe(
        &self, owner: &str, filter: SubscribeFilter,
    ) -> Result<Subscriber> {
        Ok(self.events.subscribe(owner, filter).await)
    }

    async fn emit(&self, owner: &str, event: &dwn_core::event::Event) -> Result<()> {
        self.events.emit(owner, event).await;
        Ok(())
    }
}

#[async_trait]
impl DidResolver for ProviderImpl {
    async fn resolve(&self, did: &str) -> Result<Document> {
        Ok(key_store::document(did))
    }
}

impl KeyStore for ProviderImpl {
    fn keyring(&self, controller: &str) -> Result<impl Keyring> {
        Ok(key_store::keyring(controller))
    }
}
