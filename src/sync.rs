//! Per-(tenant, record) write serialization.
//!
//! Conflict resolution and persistence for a record must not interleave with
//! another write or delete of the same record. Reads stay lock-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::OwnedMutexGuard;

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

fn locks() -> &'static LockMap {
    static LOCKS: OnceLock<LockMap> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Acquire the write lock for a record within a tenant, waiting for any
/// in-flight writer of the same record.
pub(crate) async fn lock(owner: &str, record_id: &str) -> OwnedMutexGuard<()> {
    let key = format!("{owner}\u{0}{record_id}");
    let lock = {
        let mut map = locks().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(map.entry(key).or_default())
    };
    lock.lock_owned().await
}
