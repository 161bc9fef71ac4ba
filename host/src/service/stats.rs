use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

use gitstat_core::{cache_key_from_parts, FileCache, GitOps};
use gitstat_lib::{
    ConstraintSpec, RepoStatus, RepoStore, Repository, StatsConstraint, StatsResult, Task,
    TaskParameters, TaskType,
};
use gitstat_worker::TaskQueue;

use crate::interfaces::{HostError, HostResult};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CalculateRequest {
    pub repo_id: i64,
    pub branch: String,
    pub constraint: ConstraintSpec,
}

#[derive(Debug, Deserialize)]
pub struct QueryResultRequest {
    pub repo_id: i64,
    pub branch: String,
    pub constraint_type: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommitCountResponse {
    pub repo_id: i64,
    pub branch: String,
    pub from: String,
    pub to: String,
    pub commit_count: u64,
}

pub struct StatsService {
    store: Arc<dyn gitstat_lib::Store>,
    queue: Arc<TaskQueue>,
    cache: Arc<FileCache>,
    git: Arc<dyn GitOps>,
    shutdown: CancellationToken,
}

impl StatsService {
    pub fn new(
        store: Arc<dyn gitstat_lib::Store>,
        queue: Arc<TaskQueue>,
        cache: Arc<FileCache>,
        git: Arc<dyn GitOps>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            cache,
            git,
            shutdown,
        }
    }

    async fn get_ready_repo(&self, repo_id: i64) -> HostResult<Repository> {
        let repo = self.store.get_repo(repo_id).await.map_err(|err| match err {
            gitstat_lib::StoreError::NotFound => {
                HostError::NotFound("repository not found".to_string())
            }
            other => other.into(),
        })?;
        if repo.status != RepoStatus::Ready {
            return Err(HostError::Precondition(format!(
                "repository is not ready, status: {}",
                repo.status
            )));
        }
        Ok(repo)
    }

    /// Validate and enqueue a stats task. The dedup probe makes repeated
    /// identical submissions return the same task.
    pub async fn calculate(&self, request: &CalculateRequest) -> HostResult<Task> {
        if request.repo_id == 0 {
            return Err(HostError::Validation("repo_id is required".to_string()));
        }
        if request.branch.is_empty() {
            return Err(HostError::Validation("branch is required".to_string()));
        }
        let constraint = StatsConstraint::try_from(&request.constraint)?;

        self.get_ready_repo(request.repo_id).await?;

        let parameters = serde_json::to_string(&TaskParameters {
            branch: Some(request.branch.clone()),
            constraint: Some(constraint),
        })
        .map_err(|e| HostError::Validation(e.to_string()))?;

        let mut task = Task::new(TaskType::Stats, request.repo_id, parameters, 0);
        self.queue.enqueue(&mut task, &self.shutdown).await?;
        info!(
            repo_id = request.repo_id,
            branch = %request.branch,
            task_id = task.id,
            "stats task submitted"
        );
        Ok(task)
    }

    /// Answer a result query from the cache against the live HEAD. The
    /// constraint is fingerprinted as given, not validated: anything that
    /// never matched a computation, malformed input included, is simply a
    /// miss. A miss is a distinguishable not-found, never an implicit
    /// calculation.
    pub async fn query_result(&self, request: &QueryResultRequest) -> HostResult<StatsResult> {
        if request.repo_id == 0 {
            return Err(HostError::Validation("repo_id is required".to_string()));
        }
        if request.branch.is_empty() {
            return Err(HostError::Validation("branch is required".to_string()));
        }

        let spec = ConstraintSpec {
            kind: request.constraint_type.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            limit: request.limit,
        };

        let repo = self.get_ready_repo(request.repo_id).await?;
        let commit_hash = self.git.head_hash(&repo.local_path, &self.shutdown).await?;
        let key =
            cache_key_from_parts(repo.id, &request.branch, &spec.canonical(), &commit_hash);

        match self.cache.get(&key).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(HostError::NotFound(
                "statistics not found, please submit calculation task first".to_string(),
            )),
            Err(err) => {
                warn!(cache_key = %key, %err, "failed to read cache");
                Err(HostError::NotFound(
                    "statistics not found, please submit calculation task first".to_string(),
                ))
            }
        }
    }

    pub async fn count_commits(
        &self,
        repo_id: i64,
        branch: &str,
        from: Option<&str>,
    ) -> HostResult<CommitCountResponse> {
        if repo_id == 0 {
            return Err(HostError::Validation("repo_id is required".to_string()));
        }
        if branch.is_empty() {
            return Err(HostError::Validation("branch is required".to_string()));
        }

        let repo = self.get_ready_repo(repo_id).await?;
        let count = self
            .git
            .count_commits(&repo.local_path, branch, from, &self.shutdown)
            .await?;

        info!(repo_id, branch, from = from.unwrap_or(""), count, "commits counted");
        Ok(CommitCountResponse {
            repo_id,
            branch: branch.to_string(),
            from: from.unwrap_or_default().to_string(),
            to: "HEAD".to_string(),
            commit_count: count,
        })
    }
}
