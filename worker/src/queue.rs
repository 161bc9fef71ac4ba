//! Bounded task queue backed by the persistent task table.
//!
//! Enqueue dedups against non-terminal tasks, persists, then pushes.
//! Reset tasks carry a positive priority and jump the FIFO class; order
//! within a class is FIFO.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gitstat_lib::{Store, StoreError, Task, TaskStatus, TaskStore};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("enqueue cancelled while waiting for queue capacity")]
    Cancelled,
    #[error("queue is closed")]
    Closed,
}

#[derive(Default)]
struct QueueInner {
    high: VecDeque<Task>,
    normal: VecDeque<Task>,
    closed: bool,
}

impl QueueInner {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn push(&mut self, task: Task) {
        if task.priority > 0 {
            self.high.push_back(task);
        } else {
            self.normal.push_back(task);
        }
    }

    fn pop(&mut self) -> Option<Task> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

pub struct TaskQueue {
    store: Arc<dyn Store>,
    inner: Mutex<QueueInner>,
    capacity: usize,
    /// Signalled when a task lands in the queue or the queue closes.
    items: Notify,
    /// Signalled when capacity frees up or the queue closes.
    space: Notify,
}

impl TaskQueue {
    pub fn new(capacity: usize, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            inner: Mutex::new(QueueInner::default()),
            capacity: capacity.max(1),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Submit a task. If an equivalent non-terminal task already exists its
    /// identity is bound into `task` and nothing new is created or pushed
    /// (idempotent enqueue). Otherwise the task is persisted pending and
    /// pushed; a full queue blocks until capacity frees or `cancel` fires.
    pub async fn enqueue(&self, task: &mut Task, cancel: &CancellationToken) -> Result<(), QueueError> {
        if let Some(existing) = self
            .store
            .find_active_task(task.repo_id, task.task_type, &task.parameters)
            .await?
        {
            info!(
                task_id = existing.id,
                repo_id = task.repo_id,
                task_type = %task.task_type,
                "task already exists, returning existing task"
            );
            task.id = existing.id;
            task.status = existing.status;
            task.created_at = existing.created_at;
            return Ok(());
        }

        task.status = TaskStatus::Pending;
        self.store.create_task(task).await?;

        loop {
            // Arm the waiter before the capacity check so a pop between
            // check and await cannot be missed.
            let space = self.space.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if inner.len() < self.capacity {
                    inner.push(task.clone());
                    drop(inner);
                    self.items.notify_one();
                    info!(
                        task_id = task.id,
                        repo_id = task.repo_id,
                        task_type = %task.task_type,
                        "task enqueued"
                    );
                    return Ok(());
                }
            }

            tokio::select! {
                _ = space => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        }
    }

    /// Block until a task is available, the queue closes empty, or the
    /// caller is cancelled. Remaining tasks still drain after close.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Task, QueueError> {
        loop {
            let items = self.items.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(task) = inner.pop() {
                    drop(inner);
                    self.space.notify_one();
                    return Ok(task);
                }
                if inner.closed {
                    return Err(QueueError::Closed);
                }
            }

            tokio::select! {
                _ = items => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        }
    }

    /// In-memory depth, not the persistent task count.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Stop accepting pushes and wake every waiter. Callers are expected
    /// to have stopped the pool first.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.items.notify_waiters();
        self.space.notify_waiters();
    }
}
