use std::{path::PathBuf, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

use gitstat_core::{redact_url, CredentialSecret, GitOps, SecretSealer};
use gitstat_lib::{
    AuthKind, Credential, CredentialStore, RepoStatus, RepoStore, Repository, Task,
    TaskParameters, TaskType,
};
use gitstat_worker::TaskQueue;

use crate::interfaces::{HostError, HostResult};

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("valid name pattern"));

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RepoInput {
    pub url: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddReposRequest {
    pub repos: Vec<RepoInput>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddRepoResult {
    pub repo_id: i64,
    pub url: String,
    pub task_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddRepoFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddReposResponse {
    pub total: usize,
    pub succeeded: Vec<AddRepoResult>,
    pub failed: Vec<AddRepoFailure>,
}

pub struct RepoService {
    store: Arc<dyn gitstat_lib::Store>,
    queue: Arc<TaskQueue>,
    git: Arc<dyn GitOps>,
    sealer: Arc<dyn SecretSealer>,
    cache_dir: PathBuf,
    shutdown: CancellationToken,
}

impl RepoService {
    pub fn new(
        store: Arc<dyn gitstat_lib::Store>,
        queue: Arc<TaskQueue>,
        git: Arc<dyn GitOps>,
        sealer: Arc<dyn SecretSealer>,
        cache_dir: impl Into<PathBuf>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            git,
            sealer,
            cache_dir: cache_dir.into(),
            shutdown,
        }
    }

    /// Batch add. Each URL succeeds or fails independently; one shared
    /// credential row is attached to every repo created in the batch.
    pub async fn add_repos(&self, request: AddReposRequest) -> HostResult<AddReposResponse> {
        let mut response = AddReposResponse {
            total: request.repos.len(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        let credential_id = self
            .maybe_create_credential(&request.username, &request.password)
            .await;

        for input in &request.repos {
            let url = input.url.clone();
            let branch = if input.branch.is_empty() {
                "main".to_string()
            } else {
                input.branch.clone()
            };

            match self.add_one(&url, branch, credential_id.clone()).await {
                Ok((repo_id, task_id)) => {
                    info!(
                        repo_id,
                        url = %redact_url(&url),
                        task_id,
                        has_credentials = credential_id.is_some(),
                        "repository added"
                    );
                    response.succeeded.push(AddRepoResult {
                        repo_id,
                        url,
                        task_id,
                    });
                }
                Err(err) => response.failed.push(AddRepoFailure {
                    url,
                    error: err.to_string(),
                }),
            }
        }

        Ok(response)
    }

    async fn maybe_create_credential(&self, username: &str, password: &str) -> Option<String> {
        if username.is_empty() || password.is_empty() {
            return None;
        }

        let secret = CredentialSecret {
            username: username.to_string(),
            password: Some(password.to_string()),
        };
        let sealed = match self.sealer.seal(&secret) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(%err, "failed to seal credential, continuing without credentials");
                return None;
            }
        };

        let credential = Credential::new(generate_credential_id(), AuthKind::Basic, sealed);
        match self.store.create_credential(&credential).await {
            Ok(()) => {
                info!(credential_id = %credential.id, "credential created");
                Some(credential.id)
            }
            Err(err) => {
                warn!(%err, "failed to save credential, continuing without credentials");
                None
            }
        }
    }

    async fn add_one(
        &self,
        url: &str,
        branch: String,
        credential_id: Option<String>,
    ) -> HostResult<(i64, i64)> {
        if !is_valid_git_url(url) {
            return Err(HostError::Validation("invalid git URL".to_string()));
        }

        if self.store.get_repo_by_url(url).await?.is_some() {
            return Err(HostError::Validation(
                "repository already exists".to_string(),
            ));
        }

        let name = extract_repo_name(url);
        let local_path = self.cache_dir.join(&name);
        let mut repo = Repository::new(
            url.to_string(),
            name,
            branch,
            local_path.to_string_lossy().into_owned(),
        );
        repo.credential_id = credential_id;
        self.store.create_repo(&mut repo).await?;

        let mut task = Task::new(TaskType::Clone, repo.id, String::new(), 0);
        self.queue.enqueue(&mut task, &self.shutdown).await?;

        Ok((repo.id, task.id))
    }

    pub async fn get_repo(&self, id: i64) -> HostResult<Repository> {
        self.store.get_repo(id).await.map_err(|err| match err {
            gitstat_lib::StoreError::NotFound => {
                HostError::NotFound("repository not found".to_string())
            }
            other => other.into(),
        })
    }

    pub async fn list_repos(
        &self,
        status: Option<RepoStatus>,
        page: u32,
        page_size: u32,
    ) -> HostResult<(Vec<Repository>, u64)> {
        Ok(self.store.list_repos(status, page, page_size).await?)
    }

    async fn get_ready_repo(&self, id: i64) -> HostResult<Repository> {
        let repo = self.get_repo(id).await?;
        if repo.status != RepoStatus::Ready {
            return Err(HostError::Precondition(format!(
                "repository is not ready, status: {}",
                repo.status
            )));
        }
        Ok(repo)
    }

    pub async fn switch_branch(&self, repo_id: i64, branch: &str) -> HostResult<Task> {
        self.get_ready_repo(repo_id).await?;

        let parameters = serde_json::to_string(&TaskParameters {
            branch: Some(branch.to_string()),
            constraint: None,
        })
        .map_err(|e| HostError::Validation(e.to_string()))?;

        let mut task = Task::new(TaskType::Switch, repo_id, parameters, 0);
        self.queue.enqueue(&mut task, &self.shutdown).await?;
        info!(repo_id, branch, task_id = task.id, "switch branch task submitted");
        Ok(task)
    }

    pub async fn update_repo(&self, repo_id: i64) -> HostResult<Task> {
        self.get_ready_repo(repo_id).await?;

        let mut task = Task::new(TaskType::Pull, repo_id, String::new(), 0);
        self.queue.enqueue(&mut task, &self.shutdown).await?;
        info!(repo_id, task_id = task.id, "update task submitted");
        Ok(task)
    }

    /// Reset is accepted in any repository state.
    pub async fn reset_repo(&self, repo_id: i64) -> HostResult<Task> {
        self.get_repo(repo_id).await?;

        let mut task = Task::new(TaskType::Reset, repo_id, String::new(), 1);
        self.queue.enqueue(&mut task, &self.shutdown).await?;
        info!(repo_id, task_id = task.id, "reset task submitted");
        Ok(task)
    }

    /// Removes the repository row only; working directory and cache
    /// artifacts are reclaimed out of band.
    pub async fn delete_repo(&self, id: i64) -> HostResult<()> {
        self.store.delete_repo(id).await.map_err(|err| match err {
            gitstat_lib::StoreError::NotFound => {
                HostError::NotFound("repository not found".to_string())
            }
            other => other.into(),
        })
    }

    /// Live branch listing from the working copy; requires ready.
    pub async fn get_branches(&self, repo_id: i64) -> HostResult<Vec<String>> {
        let repo = self.get_ready_repo(repo_id).await?;
        Ok(self
            .git
            .list_branches(&repo.local_path, &self.shutdown)
            .await?)
    }
}

fn is_valid_git_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || url.starts_with("git@")
}

/// A filesystem-safe name derived from the URL's last path segment.
pub fn extract_repo_name(url: &str) -> String {
    let url = url.trim_end_matches(".git");
    let name = url.rsplit('/').next().unwrap_or_default();
    let name = UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned();
    if name.is_empty() {
        "repo".to_string()
    } else {
        name
    }
}

fn generate_credential_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitstat_core::MockGit;
    use gitstat_lib::{Store, TaskStatus, TaskStore};
    use gitstat_store::InMemoryStore;

    fn service() -> (RepoService, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue = Arc::new(TaskQueue::new(16, store.clone()));
        let git = Arc::new(MockGit::with_head("main", "H1"));
        let repos = RepoService::new(
            store.clone(),
            queue,
            git,
            Arc::new(gitstat_core::PlainSealer),
            "/tmp/gitstat-test/cache",
            CancellationToken::new(),
        );
        (repos, store)
    }

    fn batch(urls: &[&str]) -> AddReposRequest {
        AddReposRequest {
            repos: urls
                .iter()
                .map(|url| RepoInput {
                    url: url.to_string(),
                    branch: String::new(),
                })
                .collect(),
            username: String::new(),
            password: String::new(),
        }
    }

    #[tokio::test]
    async fn add_repos_creates_pending_row_and_clone_task() {
        let (service, store) = service();
        let response = service
            .add_repos(batch(&["https://example.test/a/b.git"]))
            .await
            .unwrap();

        assert_eq!(response.total, 1);
        assert_eq!(response.succeeded.len(), 1);
        assert!(response.failed.is_empty());

        let added = &response.succeeded[0];
        let repo = store.get_repo(added.repo_id).await.unwrap();
        assert_eq!(repo.status, RepoStatus::Pending);
        assert_eq!(repo.current_branch, "main");
        assert_eq!(repo.name, "b");

        let task = store.get_task(added.task_id).await.unwrap();
        assert_eq!(task.task_type, TaskType::Clone);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn add_repos_rejects_bad_and_duplicate_urls() {
        let (service, _store) = service();
        service
            .add_repos(batch(&["https://example.test/a/b.git"]))
            .await
            .unwrap();

        let response = service
            .add_repos(batch(&[
                "ftp://example.test/a/c.git",
                "https://example.test/a/b.git",
            ]))
            .await
            .unwrap();
        assert!(response.succeeded.is_empty());
        assert_eq!(response.failed.len(), 2);
        assert!(response.failed[0].error.contains("invalid git URL"));
        assert!(response.failed[1].error.contains("already exists"));
    }

    #[tokio::test]
    async fn pull_and_switch_require_ready() {
        let (service, store) = service();
        let response = service
            .add_repos(batch(&["https://example.test/a/b.git"]))
            .await
            .unwrap();
        let repo_id = response.succeeded[0].repo_id;

        assert!(matches!(
            service.update_repo(repo_id).await.unwrap_err(),
            HostError::Precondition(_)
        ));
        assert!(matches!(
            service.switch_branch(repo_id, "develop").await.unwrap_err(),
            HostError::Precondition(_)
        ));

        // Reset is accepted regardless of state.
        let reset = service.reset_repo(repo_id).await.unwrap();
        assert_eq!(reset.task_type, TaskType::Reset);
        assert_eq!(reset.priority, 1);

        let mut repo = store.get_repo(repo_id).await.unwrap();
        repo.status = RepoStatus::Ready;
        store.update_repo(&repo).await.unwrap();

        let pull = service.update_repo(repo_id).await.unwrap();
        assert_eq!(pull.task_type, TaskType::Pull);
    }

    #[tokio::test]
    async fn missing_repo_is_not_found() {
        let (service, _store) = service();
        assert!(matches!(
            service.get_repo(99).await.unwrap_err(),
            HostError::NotFound(_)
        ));
        assert!(matches!(
            service.delete_repo(99).await.unwrap_err(),
            HostError::NotFound(_)
        ));
    }

    #[test]
    fn extracts_safe_repo_names() {
        assert_eq!(extract_repo_name("https://github.com/user/repo.git"), "repo");
        assert_eq!(extract_repo_name("https://github.com/user/repo"), "repo");
        assert_eq!(extract_repo_name("git@github.com:user/repo.git"), "repo");
        assert_eq!(extract_repo_name("https://example.test/a/my repo!.git"), "my_repo_");
        assert_eq!(extract_repo_name(""), "repo");
    }

    #[test]
    fn validates_git_url_schemes() {
        assert!(is_valid_git_url("https://example.test/a/b.git"));
        assert!(is_valid_git_url("http://example.test/a/b.git"));
        assert!(is_valid_git_url("git@example.test:a/b.git"));
        assert!(!is_valid_git_url("ftp://example.test/a/b.git"));
        assert!(!is_valid_git_url("example.test/a/b.git"));
    }

    #[test]
    fn credential_ids_are_32_hex() {
        let id = generate_credential_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_credential_id());
    }
}
