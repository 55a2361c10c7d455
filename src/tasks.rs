//! # Tasks
//!
//! A scaffold for resumable tasks: long-running operations (currently record
//! deletes) are registered with the task store before running, so a node
//! interrupted mid-task can grab and resume timed-out tasks on restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::{KvStore, Provider};
use crate::records::Delete;
use crate::{Result, unexpected};

/// The timeout window extended while a task is being worked.
const TIMEOUT_SECS: u64 = 120;

const TASK_PREFIX: &str = "task/";

/// A task that can be run to completion by any node holding it.
pub trait Task: Send + Sync {
    /// Run the task to completion.
    fn run(
        &self, owner: &str, provider: &impl Provider,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The type of task being resumed, carrying its message.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum TaskType {
    /// A `RecordsDelete` in flight.
    RecordsDelete(Delete),
}

/// A registered, potentially in-flight task.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumableTask {
    /// The task's unique id.
    pub task_id: String,

    /// The task to run.
    pub task: TaskType,

    /// Unix epoch seconds at which the task is considered timed out and may
    /// be grabbed by another worker.
    pub timeout: u64,

    /// The number of times the task has been retried.
    pub retry_count: u64,
}

/// Register a task, run it, then clear it.
///
/// # Errors
///
/// Surfaces registration failures and the task's own failure.
pub async fn run(owner: &str, task_type: TaskType, provider: &impl Provider) -> Result<()> {
    let task_id = uuid::Uuid::new_v4().to_string();

    let timeout = chrono::Utc::now().timestamp();
    let timeout = u64::try_from(timeout).unwrap_or_default() + TIMEOUT_SECS;
    let resumable = ResumableTask {
        task_id: task_id.clone(),
        task: task_type.clone(),
        timeout,
        retry_count: 0,
    };
    TaskStore::register(provider, owner, &resumable).await?;

    let result = match &task_type {
        TaskType::RecordsDelete(delete) => delete.run(owner, provider).await,
    };

    TaskStore::delete(provider, owner, &task_id).await?;
    result
}

/// The `TaskStore` persists in-flight resumable tasks. Implemented for every
/// [`KvStore`].
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Register a task as in-flight.
    async fn register(&self, owner: &str, task: &ResumableTask) -> Result<()>;

    /// Grab up to `count` timed-out tasks, extending their timeouts.
    async fn grab(&self, owner: &str, count: usize) -> Result<Vec<ResumableTask>>;

    /// Extend the timeout of an in-flight task. A missing task is a no-op.
    async fn extend(&self, owner: &str, task_id: &str) -> Result<()>;

    /// Clear a completed task.
    async fn delete(&self, owner: &str, task_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: KvStore> TaskStore for T {
    async fn register(&self, owner: &str, task: &ResumableTask) -> Result<()> {
        let key = format!("{TASK_PREFIX}{}", task.task_id);
        KvStore::put(self, owner, &key, &serde_json::to_vec(task)?).await?;
        Ok(())
    }

    async fn grab(&self, owner: &str, count: usize) -> Result<Vec<ResumableTask>> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();

        let entries = self
            .range(
                owner,
                crate::provider::RangeOpts {
                    gte: Some(TASK_PREFIX.to_string()),
                    lt: Some("task0".to_string()),
                    ..crate::provider::RangeOpts::default()
                },
            )
            .await?;

        let mut grabbed = Vec::new();
        for (key, bytes) in entries {
            if grabbed.len() >= count {
                break;
            }
            let mut task: ResumableTask = serde_json::from_slice(&bytes)?;
            if task.timeout > now {
                continue;
            }
            task.timeout = now + TIMEOUT_SECS;
            task.retry_count += 1;
            KvStore::put(self, owner, &key, &serde_json::to_vec(&task)?).await?;
            grabbed.push(task);
        }

        Ok(grabbed)
    }

    async fn extend(&self, owner: &str, task_id: &str) -> Result<()> {
        let key = format!("{TASK_PREFIX}{task_id}");
        let Some(bytes) = KvStore::get(self, owner, &key).await? else {
            return Ok(());
        };
        let mut task: ResumableTask =
            serde_json::from_slice(&bytes).map_err(|e| unexpected!("invalid stored task: {e}"))?;

        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        task.timeout = now + TIMEOUT_SECS;
        KvStore::put(self, owner, &key, &serde_json::to_vec(&task)?).await?;
        Ok(())
    }

    async fn delete(&self, owner: &str, task_id: &str) -> Result<()> {
        KvStore::delete(self, owner, &format!("{TASK_PREFIX}{task_id}")).await?;
        Ok(())
    }
}
