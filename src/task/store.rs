use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::task::model::Task;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {task_id} already exists on channel {channel_id}")]
    Duplicate { channel_id: u32, task_id: String },
    #[error("task {task_id} does not exist on channel {channel_id}")]
    Missing { channel_id: u32, task_id: String },
}

/// Persistence seam for task records, keyed by `(channel_id, task_id)`.
///
/// The public routes only carry a task id, so an id is held by at most one
/// channel at a time.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: Task) -> Result<(), StoreError>;
    async fn get(&self, channel_id: u32, task_id: &str) -> Option<Task>;
    /// Looks a task up by id alone.
    async fn find_by_id(&self, task_id: &str) -> Option<Task>;
    async fn update(&self, task: Task) -> Result<(), StoreError>;
    async fn unfinished(&self) -> Vec<Task>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<(u32, String), Task>,
    owners: DashMap<String, u32>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        match self.owners.entry(task.task_id.clone()) {
            Entry::Occupied(owner) => Err(StoreError::Duplicate {
                channel_id: *owner.get(),
                task_id: task.task_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(task.channel_id);
                self.tasks.insert((task.channel_id, task.task_id.clone()), task);
                Ok(())
            }
        }
    }

    async fn get(&self, channel_id: u32, task_id: &str) -> Option<Task> {
        self.tasks
            .get(&(channel_id, task_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    async fn find_by_id(&self, task_id: &str) -> Option<Task> {
        let channel_id = self.owners.get(task_id).map(|owner| *owner.value())?;
        self.get(channel_id, task_id).await
    }

    async fn update(&self, task: Task) -> Result<(), StoreError> {
        match self.tasks.get_mut(&(task.channel_id, task.task_id.clone())) {
            Some(mut existing) => {
                *existing = task;
                Ok(())
            }
            None => Err(StoreError::Missing {
                channel_id: task.channel_id,
                task_id: task.task_id,
            }),
        }
    }

    async fn unfinished(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect()
    }
}
