//! The persistence interface the core is written against. One typed
//! sub-trait per entity; `Store` bundles them for the places that need the
//! whole thing. Every call is transactional on its own.

use async_trait::async_trait;

use crate::{
    Credential, RepoStatus, Repository, StatsCache, Task, TaskStatus, TaskType,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("storage error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Insert a repository; assigns `id` and bumps timestamps.
    async fn create_repo(&self, repo: &mut Repository) -> StoreResult<()>;
    async fn get_repo(&self, id: i64) -> StoreResult<Repository>;
    async fn get_repo_by_url(&self, url: &str) -> StoreResult<Option<Repository>>;
    async fn update_repo(&self, repo: &Repository) -> StoreResult<()>;
    /// Page through repositories, optionally filtered by status. Returns
    /// the page plus the total matching count.
    async fn list_repos(
        &self,
        status: Option<RepoStatus>,
        page: u32,
        page_size: u32,
    ) -> StoreResult<(Vec<Repository>, u64)>;
    async fn delete_repo(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task; assigns `id`.
    async fn create_task(&self, task: &mut Task) -> StoreResult<()>;
    async fn get_task(&self, id: i64) -> StoreResult<Task>;
    /// The dedup probe: a non-terminal (pending or running) task with the
    /// same repository, type and parameter blob.
    async fn find_active_task(
        &self,
        repo_id: i64,
        task_type: TaskType,
        parameters: &str,
    ) -> StoreResult<Option<Task>>;
    /// Transition a task. Stamps `started_at` when moving to running and
    /// `completed_at` when moving to a terminal status; records the error
    /// string on failure.
    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error: Option<&str>,
    ) -> StoreResult<()>;
    async fn set_task_result(&self, id: i64, result: &str) -> StoreResult<()>;
    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> StoreResult<(Vec<Task>, u64)>;
    async fn delete_all_tasks(&self) -> StoreResult<()>;
    /// Remove completed, failed and cancelled tasks.
    async fn delete_finished_tasks(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_credential(&self, credential: &Credential) -> StoreResult<()>;
    async fn get_credential(&self, id: &str) -> StoreResult<Credential>;
}

#[async_trait]
pub trait StatsCacheStore: Send + Sync {
    /// Insert a cache metadata row; assigns `id`.
    async fn create_stats_cache(&self, entry: &mut StatsCache) -> StoreResult<()>;
    async fn get_stats_cache_by_key(&self, cache_key: &str) -> StoreResult<Option<StatsCache>>;
    /// Bump hit count and last-hit timestamp for a row.
    async fn record_cache_hit(&self, id: i64) -> StoreResult<()>;
    async fn list_stats_caches(
        &self,
        repo_id: Option<i64>,
        limit: u32,
    ) -> StoreResult<(Vec<StatsCache>, u64)>;
    async fn delete_stats_caches_by_repo(&self, repo_id: i64) -> StoreResult<()>;
    async fn delete_all_stats_caches(&self) -> StoreResult<()>;
}

pub trait Store: RepoStore + TaskStore + CredentialStore + StatsCacheStore {}

impl<T: RepoStore + TaskStore + CredentialStore + StatsCacheStore> Store for T {}
