//! One handler per task type. Each is a short state-machine step over the
//! repository row; stats additionally reads through the result cache.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gitstat_core::{
    CacheError, CredentialSecret, FileCache, GitError, GitOps, SecretSealer, StatsCalculator,
};
use gitstat_lib::{
    CredentialStore, RepoStatus, RepoStore, Repository, StatsConstraint, Store, StoreError, Task,
    TaskParameters, TaskResult, TaskStore, TaskType,
};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to parse parameters: {0}")]
    Params(#[from] serde_json::Error),
    #[error("missing task parameter: {0}")]
    MissingParam(&'static str),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type HandlerResult = Result<(), HandlerError>;

/// A typed task handler with a declared timeout budget.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;
    fn timeout(&self) -> Duration;
    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> HandlerResult;
}

fn parse_parameters(task: &Task) -> Result<TaskParameters, HandlerError> {
    if task.parameters.is_empty() {
        return Ok(TaskParameters::default());
    }
    Ok(serde_json::from_str(&task.parameters)?)
}

/// Resolve the repo's credential secret, best-effort: a missing row or an
/// unopenable blob degrades to anonymous access with a warning.
async fn resolve_secret(
    store: &Arc<dyn Store>,
    sealer: &Arc<dyn SecretSealer>,
    repo: &Repository,
) -> Option<CredentialSecret> {
    let credential_id = repo.credential_id.as_deref()?;
    match store.get_credential(credential_id).await {
        Ok(credential) => match sealer.open(&credential.sealed_data) {
            Ok(secret) => Some(secret),
            Err(err) => {
                warn!(credential_id, %err, "failed to open credential secret");
                None
            }
        },
        Err(err) => {
            warn!(credential_id, %err, "failed to load credential");
            None
        }
    }
}

/// Shared tail of clone and reset: read derived fields best-effort and
/// persist the repository as ready.
async fn finish_clone(
    store: &Arc<dyn Store>,
    git: &Arc<dyn GitOps>,
    repo: &mut Repository,
    cancel: &CancellationToken,
) -> HandlerResult {
    let branch = match git.current_branch(&repo.local_path, cancel).await {
        Ok(branch) => branch,
        Err(err) => {
            warn!(repo_id = repo.id, %err, "failed to get current branch");
            "main".to_string()
        }
    };
    let commit_hash = match git.head_hash(&repo.local_path, cancel).await {
        Ok(hash) => Some(hash),
        Err(err) => {
            warn!(repo_id = repo.id, %err, "failed to get HEAD commit hash");
            None
        }
    };

    repo.status = RepoStatus::Ready;
    repo.current_branch = branch;
    repo.last_commit_hash = commit_hash;
    repo.last_pull_at = Some(Utc::now());
    repo.error_message = None;
    store.update_repo(repo).await?;
    Ok(())
}

/// Record a clone failure on the repository row before surfacing the error.
async fn record_clone_failure(store: &Arc<dyn Store>, repo: &mut Repository, err: &GitError) {
    repo.status = RepoStatus::Failed;
    repo.error_message = Some(err.to_string());
    if let Err(update_err) = store.update_repo(repo).await {
        warn!(repo_id = repo.id, %update_err, "failed to persist clone failure");
    }
}

pub struct CloneHandler {
    store: Arc<dyn Store>,
    git: Arc<dyn GitOps>,
    sealer: Arc<dyn SecretSealer>,
}

impl CloneHandler {
    pub fn new(store: Arc<dyn Store>, git: Arc<dyn GitOps>, sealer: Arc<dyn SecretSealer>) -> Self {
        Self { store, git, sealer }
    }
}

#[async_trait]
impl TaskHandler for CloneHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Clone
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> HandlerResult {
        let mut repo = self.store.get_repo(task.repo_id).await?;

        repo.status = RepoStatus::Cloning;
        self.store.update_repo(&repo).await?;

        let secret = resolve_secret(&self.store, &self.sealer, &repo).await;
        if let Err(err) = self
            .git
            .clone_repo(&repo.url, &repo.local_path, secret.as_ref(), cancel)
            .await
        {
            record_clone_failure(&self.store, &mut repo, &err).await;
            return Err(err.into());
        }

        finish_clone(&self.store, &self.git, &mut repo, cancel).await
    }
}

pub struct PullHandler {
    store: Arc<dyn Store>,
    git: Arc<dyn GitOps>,
    sealer: Arc<dyn SecretSealer>,
}

impl PullHandler {
    pub fn new(store: Arc<dyn Store>, git: Arc<dyn GitOps>, sealer: Arc<dyn SecretSealer>) -> Self {
        Self { store, git, sealer }
    }
}

#[async_trait]
impl TaskHandler for PullHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Pull
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> HandlerResult {
        let mut repo = self.store.get_repo(task.repo_id).await?;
        let secret = resolve_secret(&self.store, &self.sealer, &repo).await;

        // On failure the repo keeps its prior status and HEAD; only the
        // task is marked failed.
        self.git
            .pull(&repo.local_path, secret.as_ref(), cancel)
            .await?;

        // Derived-field refresh is best-effort and never fails the task.
        match self.git.head_hash(&repo.local_path, cancel).await {
            Ok(hash) => repo.last_commit_hash = Some(hash),
            Err(err) => warn!(repo_id = repo.id, %err, "failed to refresh HEAD after pull"),
        }
        repo.last_pull_at = Some(Utc::now());
        if let Err(err) = self.store.update_repo(&repo).await {
            warn!(repo_id = repo.id, %err, "failed to persist refresh after pull");
        }
        Ok(())
    }
}

pub struct SwitchHandler {
    store: Arc<dyn Store>,
    git: Arc<dyn GitOps>,
}

impl SwitchHandler {
    pub fn new(store: Arc<dyn Store>, git: Arc<dyn GitOps>) -> Self {
        Self { store, git }
    }
}

#[async_trait]
impl TaskHandler for SwitchHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Switch
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> HandlerResult {
        let mut repo = self.store.get_repo(task.repo_id).await?;
        let params = parse_parameters(task)?;
        let branch = params
            .branch
            .filter(|b| !b.is_empty())
            .ok_or(HandlerError::MissingParam("branch"))?;

        self.git.checkout(&repo.local_path, &branch, cancel).await?;

        repo.current_branch = branch;
        match self.git.head_hash(&repo.local_path, cancel).await {
            Ok(hash) => repo.last_commit_hash = Some(hash),
            Err(err) => warn!(repo_id = repo.id, %err, "failed to refresh HEAD after checkout"),
        }
        self.store.update_repo(&repo).await?;
        Ok(())
    }
}

pub struct ResetHandler {
    store: Arc<dyn Store>,
    git: Arc<dyn GitOps>,
    cache: Arc<FileCache>,
    sealer: Arc<dyn SecretSealer>,
}

impl ResetHandler {
    pub fn new(
        store: Arc<dyn Store>,
        git: Arc<dyn GitOps>,
        cache: Arc<FileCache>,
        sealer: Arc<dyn SecretSealer>,
    ) -> Self {
        Self {
            store,
            git,
            cache,
            sealer,
        }
    }
}

#[async_trait]
impl TaskHandler for ResetHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Reset
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> HandlerResult {
        let mut repo = self.store.get_repo(task.repo_id).await?;

        if let Err(err) = self.cache.invalidate_by_repo(repo.id).await {
            warn!(repo_id = repo.id, %err, "failed to invalidate stats cache");
        }

        // A filesystem error here must not abort the rebuild.
        if let Err(err) = tokio::fs::remove_dir_all(&repo.local_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(repo_id = repo.id, path = %repo.local_path, %err, "failed to remove local path");
            }
        }

        repo.status = RepoStatus::Pending;
        repo.current_branch = String::new();
        repo.last_commit_hash = None;
        repo.last_pull_at = None;
        repo.error_message = None;
        self.store.update_repo(&repo).await?;

        repo.status = RepoStatus::Cloning;
        self.store.update_repo(&repo).await?;

        let secret = resolve_secret(&self.store, &self.sealer, &repo).await;
        if let Err(err) = self
            .git
            .clone_repo(&repo.url, &repo.local_path, secret.as_ref(), cancel)
            .await
        {
            record_clone_failure(&self.store, &mut repo, &err).await;
            return Err(err.into());
        }

        finish_clone(&self.store, &self.git, &mut repo, cancel).await
    }
}

pub struct StatsHandler {
    store: Arc<dyn Store>,
    git: Arc<dyn GitOps>,
    cache: Arc<FileCache>,
    calculator: StatsCalculator,
}

impl StatsHandler {
    pub fn new(store: Arc<dyn Store>, git: Arc<dyn GitOps>, cache: Arc<FileCache>) -> Self {
        Self {
            store,
            git,
            cache,
            calculator: StatsCalculator::new(),
        }
    }

    fn constraint_of(params: &TaskParameters) -> Result<&StatsConstraint, HandlerError> {
        params
            .constraint
            .as_ref()
            .ok_or(HandlerError::MissingParam("constraint"))
    }
}

#[async_trait]
impl TaskHandler for StatsHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Stats
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30 * 60)
    }

    async fn handle(&self, task: &Task, cancel: &CancellationToken) -> HandlerResult {
        let repo = self.store.get_repo(task.repo_id).await?;
        let params = parse_parameters(task)?;
        let branch = params
            .branch
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or(HandlerError::MissingParam("branch"))?;
        let constraint = Self::constraint_of(&params)?;

        let commit_hash = self.git.head_hash(&repo.local_path, cancel).await?;
        let key = gitstat_core::cache_key(repo.id, &branch, Some(constraint), &commit_hash);

        match self.cache.get(&key).await {
            Ok(Some(_)) => {
                info!(cache_key = %key, "cache hit during stats calculation");
                self.write_result(task.id, &key, "cache hit").await;
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => warn!(cache_key = %key, %err, "cache read failed, recalculating"),
        }

        let history = self
            .git
            .history_with_numstat(&repo.local_path, &branch, constraint, cancel)
            .await?;
        let statistics = self.calculator.calculate(&history, constraint);

        if let Err(err) = self
            .cache
            .set(repo.id, &branch, constraint, &commit_hash, &statistics)
            .await
        {
            warn!(cache_key = %key, %err, "failed to save statistics to cache");
        }

        self.write_result(task.id, &key, "calculated").await;
        info!(
            repo_id = repo.id,
            branch,
            total_commits = statistics.summary.total_commits,
            contributors = statistics.summary.total_contributors,
            "statistics calculated"
        );
        Ok(())
    }
}

impl StatsHandler {
    async fn write_result(&self, task_id: i64, cache_key: &str, message: &str) {
        let result = TaskResult {
            cache_key: Some(cache_key.to_string()),
            message: Some(message.to_string()),
        };
        let encoded = serde_json::to_string(&result).unwrap_or_default();
        if let Err(err) = self.store.set_task_result(task_id, &encoded).await {
            warn!(task_id, %err, "failed to store task result");
        }
    }
}

/// The full handler set, keyed by task type.
pub fn default_handlers(
    store: Arc<dyn Store>,
    git: Arc<dyn GitOps>,
    cache: Arc<FileCache>,
    sealer: Arc<dyn SecretSealer>,
) -> HashMap<TaskType, Box<dyn TaskHandler>> {
    let mut handlers: HashMap<TaskType, Box<dyn TaskHandler>> = HashMap::new();
    handlers.insert(
        TaskType::Clone,
        Box::new(CloneHandler::new(store.clone(), git.clone(), sealer.clone())),
    );
    handlers.insert(
        TaskType::Pull,
        Box::new(PullHandler::new(store.clone(), git.clone(), sealer.clone())),
    );
    handlers.insert(
        TaskType::Switch,
        Box::new(SwitchHandler::new(store.clone(), git.clone())),
    );
    handlers.insert(
        TaskType::Reset,
        Box::new(ResetHandler::new(
            store.clone(),
            git.clone(),
            cache.clone(),
            sealer,
        )),
    );
    handlers.insert(
        TaskType::Stats,
        Box::new(StatsHandler::new(store, git, cache)),
    );
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitstat_core::{cache_key, FileChange, MockGit, PlainSealer};
    use gitstat_core::git::CommitRecord;
    use gitstat_lib::{StatsCacheStore, TaskStatus, TaskStore};
    use gitstat_store::InMemoryStore;
    use tempfile::tempdir;

    struct Fixture {
        store: Arc<dyn Store>,
        git: Arc<MockGit>,
        cache: Arc<FileCache>,
        sealer: Arc<dyn SecretSealer>,
        _stats_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let stats_dir = tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let git = Arc::new(MockGit::with_head("main", "H1"));
        let cache = Arc::new(FileCache::new(store.clone(), stats_dir.path()));
        Fixture {
            store,
            git,
            cache,
            sealer: Arc::new(PlainSealer),
            _stats_dir: stats_dir,
        }
    }

    async fn seed_repo(fixture: &Fixture, status: RepoStatus) -> Repository {
        let mut repo = Repository::new(
            "https://example.test/a/b.git".into(),
            "b".into(),
            "main".into(),
            "/tmp/gitstat-test/b".into(),
        );
        fixture.store.create_repo(&mut repo).await.unwrap();
        repo.status = status;
        fixture.store.update_repo(&repo).await.unwrap();
        repo
    }

    async fn seed_task(
        fixture: &Fixture,
        task_type: TaskType,
        repo_id: i64,
        parameters: &str,
    ) -> Task {
        let mut task = Task::new(task_type, repo_id, parameters.to_string(), 0);
        fixture.store.create_task(&mut task).await.unwrap();
        task
    }

    fn history_fixture() -> Vec<CommitRecord> {
        vec![
            CommitRecord {
                hash: "c1".into(),
                author: "Alice".into(),
                email: "a@example.test".into(),
                date: "2024-03-01".into(),
                files: vec![
                    FileChange { additions: 6, deletions: 1, path: "a.rs".into() },
                    FileChange { additions: 2, deletions: 0, path: "b.rs".into() },
                ],
            },
            CommitRecord {
                hash: "c2".into(),
                author: "Alice".into(),
                email: "a@example.test".into(),
                date: "2024-03-02".into(),
                files: vec![FileChange { additions: 2, deletions: 2, path: "a.rs".into() }],
            },
            CommitRecord {
                hash: "c3".into(),
                author: "Bob".into(),
                email: "b@example.test".into(),
                date: "2024-03-03".into(),
                files: vec![FileChange { additions: 0, deletions: 5, path: "c.rs".into() }],
            },
        ]
    }

    #[tokio::test]
    async fn clone_success_transitions_to_ready() {
        let f = fixture();
        let repo = seed_repo(&f, RepoStatus::Pending).await;
        let task = seed_task(&f, TaskType::Clone, repo.id, "").await;

        let handler = CloneHandler::new(f.store.clone(), f.git.clone(), f.sealer.clone());
        handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap();

        let loaded = f.store.get_repo(repo.id).await.unwrap();
        assert_eq!(loaded.status, RepoStatus::Ready);
        assert_eq!(loaded.current_branch, "main");
        assert_eq!(loaded.last_commit_hash.as_deref(), Some("H1"));
        assert!(loaded.last_pull_at.is_some());
        assert!(loaded.error_message.is_none());
        assert_eq!(f.git.clone_calls().len(), 1);
    }

    #[tokio::test]
    async fn clone_failure_transitions_to_failed() {
        let f = fixture();
        f.git.fail_clone_with("remote unreachable");
        let repo = seed_repo(&f, RepoStatus::Pending).await;
        let task = seed_task(&f, TaskType::Clone, repo.id, "").await;

        let handler = CloneHandler::new(f.store.clone(), f.git.clone(), f.sealer.clone());
        let err = handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("remote unreachable"));

        let loaded = f.store.get_repo(repo.id).await.unwrap();
        assert_eq!(loaded.status, RepoStatus::Failed);
        assert!(loaded
            .error_message
            .unwrap()
            .contains("remote unreachable"));
    }

    #[tokio::test]
    async fn pull_failure_keeps_repo_ready() {
        let f = fixture();
        f.git.fail_pull_with("network flake");
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let task = seed_task(&f, TaskType::Pull, repo.id, "").await;

        let handler = PullHandler::new(f.store.clone(), f.git.clone(), f.sealer.clone());
        assert!(handler
            .handle(&task, &CancellationToken::new())
            .await
            .is_err());

        let loaded = f.store.get_repo(repo.id).await.unwrap();
        assert_eq!(loaded.status, RepoStatus::Ready);
    }

    #[tokio::test]
    async fn pull_success_refreshes_head() {
        let f = fixture();
        f.git.set_head("main", "H2");
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let task = seed_task(&f, TaskType::Pull, repo.id, "").await;

        let handler = PullHandler::new(f.store.clone(), f.git.clone(), f.sealer.clone());
        handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap();

        let loaded = f.store.get_repo(repo.id).await.unwrap();
        assert_eq!(loaded.last_commit_hash.as_deref(), Some("H2"));
        assert!(loaded.last_pull_at.is_some());
    }

    #[tokio::test]
    async fn switch_updates_branch_and_head() {
        let f = fixture();
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let task = seed_task(
            &f,
            TaskType::Switch,
            repo.id,
            r#"{"branch":"develop"}"#,
        )
        .await;

        let handler = SwitchHandler::new(f.store.clone(), f.git.clone());
        handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap();

        let loaded = f.store.get_repo(repo.id).await.unwrap();
        assert_eq!(loaded.current_branch, "develop");
        assert_eq!(f.git.checkout_calls().len(), 1);
    }

    #[tokio::test]
    async fn switch_without_branch_fails() {
        let f = fixture();
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let task = seed_task(&f, TaskType::Switch, repo.id, "{}").await;

        let handler = SwitchHandler::new(f.store.clone(), f.git.clone());
        let err = handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingParam("branch")));
    }

    #[tokio::test]
    async fn stats_calculates_and_caches() {
        let f = fixture();
        f.git.set_history(history_fixture());
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let params = r#"{"branch":"main","constraint":{"type":"commit_limit","limit":10}}"#;
        let task = seed_task(&f, TaskType::Stats, repo.id, params).await;

        let handler = StatsHandler::new(f.store.clone(), f.git.clone(), f.cache.clone());
        handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap();

        let key = cache_key(
            repo.id,
            "main",
            Some(&StatsConstraint::CommitLimit { limit: 10 }),
            "H1",
        );
        let cached = f.cache.get(&key).await.unwrap().unwrap();
        assert_eq!(cached.statistics.summary.total_commits, 3);
        assert_eq!(cached.statistics.summary.total_contributors, 2);

        let alice = cached
            .statistics
            .by_contributor
            .iter()
            .find(|c| c.email == "a@example.test")
            .unwrap();
        assert_eq!(
            (alice.commits, alice.additions, alice.deletions, alice.modifications, alice.net_additions),
            (2, 10, 3, 3, 7)
        );
        let bob = cached
            .statistics
            .by_contributor
            .iter()
            .find(|c| c.email == "b@example.test")
            .unwrap();
        assert_eq!(
            (bob.commits, bob.additions, bob.deletions, bob.modifications, bob.net_additions),
            (1, 0, 5, 0, -5)
        );

        let stored = f.store.get_task(task.id).await.unwrap();
        let result: TaskResult = serde_json::from_str(stored.result.as_deref().unwrap()).unwrap();
        assert_eq!(result.cache_key.as_deref(), Some(key.as_str()));
        assert_eq!(result.message.as_deref(), Some("calculated"));
    }

    #[tokio::test]
    async fn stats_second_run_is_a_cache_hit() {
        let f = fixture();
        f.git.set_history(history_fixture());
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let params = r#"{"branch":"main","constraint":{"type":"commit_limit","limit":10}}"#;

        let first = seed_task(&f, TaskType::Stats, repo.id, params).await;
        let handler = StatsHandler::new(f.store.clone(), f.git.clone(), f.cache.clone());
        handler
            .handle(&first, &CancellationToken::new())
            .await
            .unwrap();

        let second = seed_task(&f, TaskType::Stats, repo.id, params).await;
        handler
            .handle(&second, &CancellationToken::new())
            .await
            .unwrap();

        let stored = f.store.get_task(second.id).await.unwrap();
        let result: TaskResult = serde_json::from_str(stored.result.as_deref().unwrap()).unwrap();
        assert_eq!(result.message.as_deref(), Some("cache hit"));
    }

    #[tokio::test]
    async fn reset_invalidates_cache_and_reclones() {
        let f = fixture();
        f.git.set_history(history_fixture());
        let repo = seed_repo(&f, RepoStatus::Ready).await;

        // Populate a cache entry for the repo first.
        let stats_params = r#"{"branch":"main","constraint":{"type":"commit_limit","limit":10}}"#;
        let stats_task = seed_task(&f, TaskType::Stats, repo.id, stats_params).await;
        StatsHandler::new(f.store.clone(), f.git.clone(), f.cache.clone())
            .handle(&stats_task, &CancellationToken::new())
            .await
            .unwrap();
        let key = cache_key(
            repo.id,
            "main",
            Some(&StatsConstraint::CommitLimit { limit: 10 }),
            "H1",
        );
        assert!(f.cache.get(&key).await.unwrap().is_some());

        let reset_task = seed_task(&f, TaskType::Reset, repo.id, "").await;
        ResetHandler::new(
            f.store.clone(),
            f.git.clone(),
            f.cache.clone(),
            f.sealer.clone(),
        )
        .handle(&reset_task, &CancellationToken::new())
        .await
        .unwrap();

        assert!(f.cache.get(&key).await.unwrap().is_none());
        let (_, cache_rows) = f.store.list_stats_caches(Some(repo.id), 50).await.unwrap();
        assert_eq!(cache_rows, 0);

        let loaded = f.store.get_repo(repo.id).await.unwrap();
        assert_eq!(loaded.status, RepoStatus::Ready);
        assert_eq!(loaded.last_commit_hash.as_deref(), Some("H1"));
        assert_eq!(f.git.clone_calls().len(), 1);
    }

    #[tokio::test]
    async fn reset_after_failed_clone_recovers() {
        let f = fixture();
        f.git.fail_clone_with("first attempt failed");
        let repo = seed_repo(&f, RepoStatus::Pending).await;

        let clone_task = seed_task(&f, TaskType::Clone, repo.id, "").await;
        let clone_handler = CloneHandler::new(f.store.clone(), f.git.clone(), f.sealer.clone());
        assert!(clone_handler
            .handle(&clone_task, &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(
            f.store.get_repo(repo.id).await.unwrap().status,
            RepoStatus::Failed
        );

        // The remote comes back; reset rebuilds from scratch.
        let fresh = Arc::new(MockGit::with_head("main", "H1"));
        let reset_task = seed_task(&f, TaskType::Reset, repo.id, "").await;
        ResetHandler::new(
            f.store.clone(),
            fresh.clone(),
            f.cache.clone(),
            f.sealer.clone(),
        )
        .handle(&reset_task, &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(
            f.store.get_repo(repo.id).await.unwrap().status,
            RepoStatus::Ready
        );
    }

    #[tokio::test]
    async fn stats_requires_constraint() {
        let f = fixture();
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let task = seed_task(&f, TaskType::Stats, repo.id, r#"{"branch":"main"}"#).await;

        let handler = StatsHandler::new(f.store.clone(), f.git.clone(), f.cache.clone());
        let err = handler
            .handle(&task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingParam("constraint")));
    }

    #[tokio::test]
    async fn handlers_declare_expected_timeouts() {
        let f = fixture();
        let handlers = default_handlers(
            f.store.clone(),
            f.git.clone(),
            f.cache.clone(),
            f.sealer.clone(),
        );
        let minutes = |t: TaskType| handlers[&t].timeout().as_secs() / 60;
        assert_eq!(minutes(TaskType::Clone), 10);
        assert_eq!(minutes(TaskType::Pull), 5);
        assert_eq!(minutes(TaskType::Switch), 1);
        assert_eq!(minutes(TaskType::Reset), 10);
        assert_eq!(minutes(TaskType::Stats), 30);
    }

    #[tokio::test]
    async fn finished_task_status_is_driven_by_store() {
        // update_task_status stamps timestamps; covered in the store crate,
        // but assert the worker-facing contract once here.
        let f = fixture();
        let repo = seed_repo(&f, RepoStatus::Ready).await;
        let task = seed_task(&f, TaskType::Pull, repo.id, "").await;
        f.store
            .update_task_status(task.id, TaskStatus::Running, None)
            .await
            .unwrap();
        f.store
            .update_task_status(task.id, TaskStatus::Completed, None)
            .await
            .unwrap();
        let done = f.store.get_task(task.id).await.unwrap();
        assert!(done.started_at.is_some() && done.completed_at.is_some());
    }
}
