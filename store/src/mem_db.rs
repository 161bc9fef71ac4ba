//! Hashmap-backed store with the same semantics as the sqlite backend.
//! Used by unit tests and available for ephemeral runs.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use gitstat_lib::{
    Credential, CredentialStore, RepoStatus, RepoStore, Repository, StatsCache, StatsCacheStore,
    StoreError, StoreResult, Task, TaskStatus, TaskStore, TaskType,
};

#[derive(Default)]
struct Inner {
    repos: HashMap<i64, Repository>,
    tasks: HashMap<i64, Task>,
    credentials: HashMap<String, Credential>,
    caches: HashMap<i64, StatsCache>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    next_repo_id: AtomicI64,
    next_task_id: AtomicI64,
    next_cache_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl RepoStore for InMemoryStore {
    async fn create_repo(&self, repo: &mut Repository) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.repos.values().any(|r| r.url == repo.url) {
            return Err(StoreError::Duplicate(format!(
                "repositories.url: {}",
                repo.url
            )));
        }
        repo.id = Self::next_id(&self.next_repo_id);
        let now = Utc::now();
        repo.created_at = now;
        repo.updated_at = now;
        inner.repos.insert(repo.id, repo.clone());
        Ok(())
    }

    async fn get_repo(&self, id: i64) -> StoreResult<Repository> {
        let inner = self.inner.lock().unwrap();
        inner.repos.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_repo_by_url(&self, url: &str) -> StoreResult<Option<Repository>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.repos.values().find(|r| r.url == url).cloned())
    }

    async fn update_repo(&self, repo: &Repository) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.repos.get_mut(&repo.id).ok_or(StoreError::NotFound)?;
        let mut updated = repo.clone();
        updated.updated_at = Utc::now();
        *slot = updated;
        Ok(())
    }

    async fn list_repos(
        &self,
        status: Option<RepoStatus>,
        page: u32,
        page_size: u32,
    ) -> StoreResult<(Vec<Repository>, u64)> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<Repository> = inner
            .repos
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id);
        let total = matching.len() as u64;
        let offset = (page.max(1) as usize - 1) * page_size as usize;
        let repos = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok((repos, total))
    }

    async fn delete_repo(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.repos.remove(&id).ok_or(StoreError::NotFound)?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &mut Task) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        task.id = Self::next_id(&self.next_task_id);
        let now = Utc::now();
        task.created_at = now;
        task.updated_at = now;
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: i64) -> StoreResult<Task> {
        let inner = self.inner.lock().unwrap();
        inner.tasks.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_active_task(
        &self,
        repo_id: i64,
        task_type: TaskType,
        parameters: &str,
    ) -> StoreResult<Option<Task>> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<&Task> = inner
            .tasks
            .values()
            .filter(|t| {
                t.repo_id == repo_id
                    && t.task_type == task_type
                    && t.parameters == parameters
                    && !t.status.is_terminal()
            })
            .collect();
        matching.sort_by_key(|t| t.id);
        Ok(matching.first().map(|t| (*t).clone()))
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        task.status = status;
        task.updated_at = now;
        if status == TaskStatus::Running {
            task.started_at = Some(now);
        } else if status.is_terminal() {
            task.completed_at = Some(now);
            task.error_message = error.map(String::from);
        }
        task.refresh_duration();
        Ok(())
    }

    async fn set_task_result(&self, id: i64, result: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound)?;
        task.result = Some(result.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> StoreResult<(Vec<Task>, u64)> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        let total = matching.len() as u64;
        matching.truncate(limit as usize);
        Ok((matching, total))
    }

    async fn delete_all_tasks(&self) -> StoreResult<()> {
        self.inner.lock().unwrap().tasks.clear();
        Ok(())
    }

    async fn delete_finished_tasks(&self) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .retain(|_, t| !t.status.is_terminal());
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn create_credential(&self, credential: &Credential) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.credentials.contains_key(&credential.id) {
            return Err(StoreError::Duplicate(format!(
                "credentials.id: {}",
                credential.id
            )));
        }
        inner
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> StoreResult<Credential> {
        let inner = self.inner.lock().unwrap();
        inner
            .credentials
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl StatsCacheStore for InMemoryStore {
    async fn create_stats_cache(&self, entry: &mut StatsCache) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.caches.values().any(|c| c.cache_key == entry.cache_key) {
            return Err(StoreError::Duplicate(format!(
                "stats_cache.cache_key: {}",
                entry.cache_key
            )));
        }
        entry.id = Self::next_id(&self.next_cache_id);
        entry.created_at = Utc::now();
        inner.caches.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get_stats_cache_by_key(&self, cache_key: &str) -> StoreResult<Option<StatsCache>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .caches
            .values()
            .find(|c| c.cache_key == cache_key)
            .cloned())
    }

    async fn record_cache_hit(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.caches.get_mut(&id).ok_or(StoreError::NotFound)?;
        entry.hit_count += 1;
        entry.last_hit_at = Some(Utc::now());
        Ok(())
    }

    async fn list_stats_caches(
        &self,
        repo_id: Option<i64>,
        limit: u32,
    ) -> StoreResult<(Vec<StatsCache>, u64)> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<StatsCache> = inner
            .caches
            .values()
            .filter(|c| repo_id.map_or(true, |id| c.repo_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        let total = matching.len() as u64;
        matching.truncate(limit as usize);
        Ok((matching, total))
    }

    async fn delete_stats_caches_by_repo(&self, repo_id: i64) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .caches
            .retain(|_, c| c.repo_id != repo_id);
        Ok(())
    }

    async fn delete_all_stats_caches(&self) -> StoreResult<()> {
        self.inner.lock().unwrap().caches.clear();
        Ok(())
    }
}
