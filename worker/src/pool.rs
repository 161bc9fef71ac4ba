//! Fixed-size pool of identical workers draining the task queue. Workers
//! select a handler by task type, wrap it in the handler's timeout budget,
//! and record the task's status transitions.

use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gitstat_lib::{Store, Task, TaskStatus, TaskStore, TaskType};

use crate::{
    handlers::{HandlerError, TaskHandler},
    queue::{QueueError, TaskQueue},
};

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    store: Arc<dyn Store>,
    handlers: Arc<HashMap<TaskType, Box<dyn TaskHandler>>>,
    worker_count: usize,
    cancel: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue: Arc<TaskQueue>,
        store: Arc<dyn Store>,
        handlers: HashMap<TaskType, Box<dyn TaskHandler>>,
    ) -> Self {
        Self {
            queue,
            store,
            handlers: Arc::new(handlers),
            worker_count: worker_count.max(1),
            cancel: CancellationToken::new(),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        info!(worker_count = self.worker_count, "starting worker pool");
        let mut workers = self.workers.lock().unwrap();
        for id in 1..=self.worker_count {
            let worker = Worker {
                id,
                queue: Arc::clone(&self.queue),
                store: Arc::clone(&self.store),
                handlers: Arc::clone(&self.handlers),
                cancel: self.cancel.clone(),
            };
            workers.push(tokio::spawn(async move { worker.run().await }));
        }
    }

    /// Cancel in-flight work, close the queue, and wait for every worker
    /// to return.
    pub async fn stop(&self) {
        info!("stopping worker pool");
        self.cancel.cancel();
        self.queue.close();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if let Err(err) = worker.await {
                error!(%err, "worker exited abnormally");
            }
        }
        info!("worker pool stopped");
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        Arc::clone(&self.queue)
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }
}

struct Worker {
    id: usize,
    queue: Arc<TaskQueue>,
    store: Arc<dyn Store>,
    handlers: Arc<HashMap<TaskType, Box<dyn TaskHandler>>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(&self) {
        info!(worker_id = self.id, "worker started");
        loop {
            match self.queue.dequeue(&self.cancel).await {
                Ok(task) => self.handle_task(task).await,
                Err(QueueError::Cancelled) | Err(QueueError::Closed) => break,
                Err(err) => {
                    error!(worker_id = self.id, %err, "failed to dequeue task");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
        info!(worker_id = self.id, "worker stopped");
    }

    async fn handle_task(&self, task: Task) {
        let started = Instant::now();
        info!(
            worker_id = self.id,
            task_id = task.id,
            task_type = %task.task_type,
            repo_id = task.repo_id,
            "task started"
        );

        if let Err(err) = self
            .store
            .update_task_status(task.id, TaskStatus::Running, None)
            .await
        {
            error!(task_id = task.id, %err, "failed to mark task running");
            return;
        }

        let Some(handler) = self.handlers.get(&task.task_type) else {
            let message = format!("no handler for type {}", task.task_type);
            error!(task_id = task.id, task_type = %task.task_type, "{message}");
            self.finish(task.id, TaskStatus::Failed, Some(&message)).await;
            return;
        };

        // The handler gets a child of the pool token so shutdown reaches
        // in-flight subprocesses; the timeout races the handler and kills
        // its work on expiry.
        let task_cancel = self.cancel.child_token();
        let budget = handler.timeout();
        let outcome = match tokio::time::timeout(budget, handler.handle(&task, &task_cancel)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                task_cancel.cancel();
                Err(HandlerError::Timeout(budget))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(
                    worker_id = self.id,
                    task_id = task.id,
                    task_type = %task.task_type,
                    duration_ms,
                    "task completed"
                );
                self.finish(task.id, TaskStatus::Completed, None).await;
            }
            Err(err) => {
                error!(
                    worker_id = self.id,
                    task_id = task.id,
                    task_type = %task.task_type,
                    duration_ms,
                    %err,
                    "task failed"
                );
                self.finish(task.id, TaskStatus::Failed, Some(&err.to_string()))
                    .await;
            }
        }
    }

    async fn finish(&self, task_id: i64, status: TaskStatus, error: Option<&str>) {
        if let Err(err) = self.store.update_task_status(task_id, status, error).await {
            warn!(task_id, %err, "failed to record task status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use gitstat_lib::TaskStore;
    use gitstat_store::InMemoryStore;

    struct RecordingHandler {
        task_type: TaskType,
        delay: Duration,
        fail_with: Option<String>,
        budget: Duration,
    }

    #[async_trait]
    impl TaskHandler for RecordingHandler {
        fn task_type(&self) -> TaskType {
            self.task_type
        }

        fn timeout(&self) -> Duration {
            self.budget
        }

        async fn handle(&self, _task: &Task, cancel: &CancellationToken) -> crate::HandlerResult {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => {
                    return Err(HandlerError::Git(gitstat_core::GitError::Cancelled));
                }
            }
            match &self.fail_with {
                Some(message) => Err(HandlerError::Git(gitstat_core::GitError::Command(
                    message.clone(),
                ))),
                None => Ok(()),
            }
        }
    }

    fn recording(task_type: TaskType) -> RecordingHandler {
        RecordingHandler {
            task_type,
            delay: Duration::from_millis(5),
            fail_with: None,
            budget: Duration::from_secs(60),
        }
    }

    async fn wait_for_status(
        store: &Arc<dyn Store>,
        task_id: i64,
        expected: TaskStatus,
    ) -> Task {
        for _ in 0..200 {
            let task = store.get_task(task_id).await.unwrap();
            if task.status == expected {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached {expected}");
    }

    fn pool_with(
        handlers: HashMap<TaskType, Box<dyn TaskHandler>>,
    ) -> (Arc<WorkerPool>, Arc<TaskQueue>, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue = Arc::new(TaskQueue::new(16, store.clone()));
        let pool = Arc::new(WorkerPool::new(2, queue.clone(), store.clone(), handlers));
        (pool, queue, store)
    }

    #[tokio::test]
    async fn pool_runs_tasks_to_completion() {
        let mut handlers: HashMap<TaskType, Box<dyn TaskHandler>> = HashMap::new();
        handlers.insert(TaskType::Pull, Box::new(recording(TaskType::Pull)));
        let (pool, queue, store) = pool_with(handlers);
        pool.start();

        let cancel = CancellationToken::new();
        let mut task = Task::new(TaskType::Pull, 1, String::new(), 0);
        queue.enqueue(&mut task, &cancel).await.unwrap();

        let done = wait_for_status(&store, task.id, TaskStatus::Completed).await;
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());

        pool.stop().await;
    }

    #[tokio::test]
    async fn unknown_task_type_fails_immediately() {
        let (pool, queue, store) = pool_with(HashMap::new());
        pool.start();

        let cancel = CancellationToken::new();
        let mut task = Task::new(TaskType::Stats, 1, String::new(), 0);
        queue.enqueue(&mut task, &cancel).await.unwrap();

        let failed = wait_for_status(&store, task.id, TaskStatus::Failed).await;
        assert_eq!(
            failed.error_message.as_deref(),
            Some("no handler for type stats")
        );

        pool.stop().await;
    }

    #[tokio::test]
    async fn handler_timeout_fails_the_task() {
        let mut handlers: HashMap<TaskType, Box<dyn TaskHandler>> = HashMap::new();
        handlers.insert(
            TaskType::Pull,
            Box::new(RecordingHandler {
                task_type: TaskType::Pull,
                delay: Duration::from_secs(60),
                fail_with: None,
                budget: Duration::from_millis(20),
            }),
        );
        let (pool, queue, store) = pool_with(handlers);
        pool.start();

        let cancel = CancellationToken::new();
        let mut task = Task::new(TaskType::Pull, 1, String::new(), 0);
        queue.enqueue(&mut task, &cancel).await.unwrap();

        let failed = wait_for_status(&store, task.id, TaskStatus::Failed).await;
        assert!(failed.error_message.unwrap().contains("timed out"));

        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_work() {
        let mut handlers: HashMap<TaskType, Box<dyn TaskHandler>> = HashMap::new();
        handlers.insert(
            TaskType::Pull,
            Box::new(RecordingHandler {
                task_type: TaskType::Pull,
                delay: Duration::from_secs(60),
                fail_with: None,
                budget: Duration::from_secs(120),
            }),
        );
        let (pool, queue, store) = pool_with(handlers);
        pool.start();

        let cancel = CancellationToken::new();
        let mut task = Task::new(TaskType::Pull, 1, String::new(), 0);
        queue.enqueue(&mut task, &cancel).await.unwrap();
        wait_for_status(&store, task.id, TaskStatus::Running).await;

        pool.stop().await;

        let after = store.get_task(task.id).await.unwrap();
        assert_eq!(after.status, TaskStatus::Failed);
    }
}
