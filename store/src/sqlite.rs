//! Sqlite-backed store. One exclusive connection behind an async mutex;
//! every trait call is its own implicit transaction.

use std::{path::Path, str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tokio::sync::Mutex;

use gitstat_lib::{
    AuthKind, Credential, CredentialStore, RepoStatus, RepoStore, Repository, StatsCache,
    StatsCacheStore, StoreError, StoreResult, Task, TaskStatus, TaskStore, TaskType,
};

#[derive(Debug)]
struct Db {
    conn: Connection,
}

impl Db {
    fn open(path: &Path) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(sql_err)?;
        Self::apply_pragmas(&conn)?;
        Ok(conn)
    }

    fn create(path: &Path) -> StoreResult<Connection> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::apply_pragmas(&conn)?;
        Self::create_tables(&conn)?;
        Ok(conn)
    }

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "foreign_keys", true).map_err(sql_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(sql_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(sql_err)?;
        conn.pragma_update(None, "temp_store", "MEMORY").map_err(sql_err)?;
        Ok(())
    }

    /// Open the database at `path`, creating file and schema when absent.
    fn open_or_create(path: &Path) -> StoreResult<Self> {
        let conn = if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }?;
        Ok(Self { conn })
    }

    fn create_tables(conn: &Connection) -> StoreResult<()> {
        // Bump store_version in metadata when the schema breaks backward
        // compatibility; a migration hook can key off it on open.
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metadata(
              key TEXT NOT NULL PRIMARY KEY,
              value TEXT
            );
            INSERT OR IGNORE INTO metadata(key, value) VALUES ('store_version', '1');

            CREATE TABLE IF NOT EXISTS repositories(
              id INTEGER PRIMARY KEY,
              url TEXT NOT NULL UNIQUE,
              name TEXT NOT NULL,
              current_branch TEXT NOT NULL DEFAULT '',
              local_path TEXT NOT NULL,
              status TEXT NOT NULL,
              error_message TEXT,
              last_pull_at TEXT,
              last_commit_hash TEXT,
              credential_id TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks(
              id INTEGER PRIMARY KEY,
              task_type TEXT NOT NULL,
              repo_id INTEGER NOT NULL,
              status TEXT NOT NULL,
              priority INTEGER NOT NULL DEFAULT 0,
              parameters TEXT NOT NULL DEFAULT '',
              result TEXT,
              error_message TEXT,
              retry_count INTEGER NOT NULL DEFAULT 0,
              started_at TEXT,
              completed_at TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_dedup
              ON tasks(repo_id, task_type, status);

            CREATE TABLE IF NOT EXISTS credentials(
              id TEXT NOT NULL PRIMARY KEY,
              auth_kind TEXT NOT NULL,
              sealed_data BLOB NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stats_cache(
              id INTEGER PRIMARY KEY,
              repo_id INTEGER NOT NULL,
              branch TEXT NOT NULL,
              constraint_type TEXT NOT NULL,
              constraint_value TEXT NOT NULL,
              commit_hash TEXT NOT NULL,
              result_path TEXT NOT NULL,
              result_size INTEGER NOT NULL,
              cache_key TEXT NOT NULL UNIQUE,
              hit_count INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              last_hit_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_stats_cache_repo
              ON stats_cache(repo_id);
            "#,
        )
        .map_err(sql_err)
    }
}

/// Durable store used by the service. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Db>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Db::open_or_create(path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// A throwaway database for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Db::apply_pragmas(&conn)?;
        Db::create_tables(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(Db { conn })),
        })
    }
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, ref msg) = err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Duplicate(
                msg.clone().unwrap_or_else(|| "constraint violation".to_string()),
            );
        }
    }
    StoreError::Backend(err.to_string())
}

fn conversion_err<E: std::fmt::Display>(err: E) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(err.to_string()),
    )
}

fn row_to_repo(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let status: String = row.get("status")?;
    let credential_id: Option<String> = row.get("credential_id")?;
    let mut repo = Repository {
        id: row.get("id")?,
        url: row.get("url")?,
        name: row.get("name")?,
        current_branch: row.get("current_branch")?,
        local_path: row.get("local_path")?,
        status: RepoStatus::from_str(&status).map_err(conversion_err)?,
        error_message: row.get("error_message")?,
        last_pull_at: row.get("last_pull_at")?,
        last_commit_hash: row.get("last_commit_hash")?,
        credential_id,
        has_credentials: false,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    repo.refresh_has_credentials();
    Ok(repo)
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let task_type: String = row.get("task_type")?;
    let status: String = row.get("status")?;
    let mut task = Task {
        id: row.get("id")?,
        task_type: TaskType::from_str(&task_type).map_err(conversion_err)?,
        repo_id: row.get("repo_id")?,
        status: TaskStatus::from_str(&status).map_err(conversion_err)?,
        priority: row.get("priority")?,
        parameters: row.get("parameters")?,
        result: row.get("result")?,
        error_message: row.get("error_message")?,
        retry_count: row.get("retry_count")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        duration_ms: None,
    };
    task.refresh_duration();
    Ok(task)
}

fn row_to_cache(row: &Row<'_>) -> rusqlite::Result<StatsCache> {
    Ok(StatsCache {
        id: row.get("id")?,
        repo_id: row.get("repo_id")?,
        branch: row.get("branch")?,
        constraint_type: row.get("constraint_type")?,
        constraint_value: row.get("constraint_value")?,
        commit_hash: row.get("commit_hash")?,
        result_path: row.get("result_path")?,
        result_size: row.get("result_size")?,
        cache_key: row.get("cache_key")?,
        hit_count: row.get("hit_count")?,
        created_at: row.get("created_at")?,
        last_hit_at: row.get("last_hit_at")?,
    })
}

const REPO_COLUMNS: &str = "id, url, name, current_branch, local_path, status, error_message, \
                            last_pull_at, last_commit_hash, credential_id, created_at, updated_at";
const TASK_COLUMNS: &str = "id, task_type, repo_id, status, priority, parameters, result, \
                            error_message, retry_count, started_at, completed_at, created_at, \
                            updated_at";
const CACHE_COLUMNS: &str = "id, repo_id, branch, constraint_type, constraint_value, commit_hash, \
                             result_path, result_size, cache_key, hit_count, created_at, \
                             last_hit_at";

#[async_trait]
impl RepoStore for SqliteStore {
    async fn create_repo(&self, repo: &mut Repository) -> StoreResult<()> {
        let db = self.db.lock().await;
        let now = Utc::now();
        db.conn
            .execute(
                "INSERT INTO repositories(url, name, current_branch, local_path, status, \
                 error_message, last_pull_at, last_commit_hash, credential_id, created_at, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    repo.url,
                    repo.name,
                    repo.current_branch,
                    repo.local_path,
                    repo.status.as_str(),
                    repo.error_message,
                    repo.last_pull_at,
                    repo.last_commit_hash,
                    repo.credential_id,
                    now,
                    now,
                ],
            )
            .map_err(sql_err)?;
        repo.id = db.conn.last_insert_rowid();
        repo.created_at = now;
        repo.updated_at = now;
        Ok(())
    }

    async fn get_repo(&self, id: i64) -> StoreResult<Repository> {
        let db = self.db.lock().await;
        db.conn
            .query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id],
                row_to_repo,
            )
            .optional()
            .map_err(sql_err)?
            .ok_or(StoreError::NotFound)
    }

    async fn get_repo_by_url(&self, url: &str) -> StoreResult<Option<Repository>> {
        let db = self.db.lock().await;
        db.conn
            .query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE url = ?1"),
                params![url],
                row_to_repo,
            )
            .optional()
            .map_err(sql_err)
    }

    async fn update_repo(&self, repo: &Repository) -> StoreResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .conn
            .execute(
                "UPDATE repositories SET url = ?1, name = ?2, current_branch = ?3, \
                 local_path = ?4, status = ?5, error_message = ?6, last_pull_at = ?7, \
                 last_commit_hash = ?8, credential_id = ?9, updated_at = ?10 WHERE id = ?11",
                params![
                    repo.url,
                    repo.name,
                    repo.current_branch,
                    repo.local_path,
                    repo.status.as_str(),
                    repo.error_message,
                    repo.last_pull_at,
                    repo.last_commit_hash,
                    repo.credential_id,
                    Utc::now(),
                    repo.id,
                ],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_repos(
        &self,
        status: Option<RepoStatus>,
        page: u32,
        page_size: u32,
    ) -> StoreResult<(Vec<Repository>, u64)> {
        let db = self.db.lock().await;
        let offset = (page.max(1) - 1) as i64 * page_size as i64;
        let (filter, args): (&str, Vec<String>) = match status {
            Some(status) => ("WHERE status = ?1", vec![status.as_str().to_string()]),
            None => ("", vec![]),
        };

        let total: u64 = db
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM repositories {filter}"),
                rusqlite::params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        let sql = format!(
            "SELECT {REPO_COLUMNS} FROM repositories {filter} ORDER BY id \
             LIMIT {} OFFSET {offset}",
            page_size as i64
        );
        let mut stmt = db.conn.prepare(&sql).map_err(sql_err)?;
        let repos = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_repo)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok((repos, total))
    }

    async fn delete_repo(&self, id: i64) -> StoreResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .conn
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &mut Task) -> StoreResult<()> {
        let db = self.db.lock().await;
        let now = Utc::now();
        db.conn
            .execute(
                "INSERT INTO tasks(task_type, repo_id, status, priority, parameters, result, \
                 error_message, retry_count, started_at, completed_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    task.task_type.as_str(),
                    task.repo_id,
                    task.status.as_str(),
                    task.priority,
                    task.parameters,
                    task.result,
                    task.error_message,
                    task.retry_count,
                    task.started_at,
                    task.completed_at,
                    now,
                    now,
                ],
            )
            .map_err(sql_err)?;
        task.id = db.conn.last_insert_rowid();
        task.created_at = now;
        task.updated_at = now;
        Ok(())
    }

    async fn get_task(&self, id: i64) -> StoreResult<Task> {
        let db = self.db.lock().await;
        db.conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()
            .map_err(sql_err)?
            .ok_or(StoreError::NotFound)
    }

    async fn find_active_task(
        &self,
        repo_id: i64,
        task_type: TaskType,
        parameters: &str,
    ) -> StoreResult<Option<Task>> {
        let db = self.db.lock().await;
        db.conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE repo_id = ?1 AND task_type = ?2 \
                     AND parameters = ?3 AND status IN ('pending', 'running') \
                     ORDER BY id LIMIT 1"
                ),
                params![repo_id, task_type.as_str(), parameters],
                row_to_task,
            )
            .optional()
            .map_err(sql_err)
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        let now = Utc::now();
        let changed = if status == TaskStatus::Running {
            db.conn.execute(
                "UPDATE tasks SET status = ?1, started_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
        } else if status.is_terminal() {
            db.conn.execute(
                "UPDATE tasks SET status = ?1, error_message = ?2, completed_at = ?3, \
                 updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, now, id],
            )
        } else {
            db.conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
        }
        .map_err(sql_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_task_result(&self, id: i64, result: &str) -> StoreResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .conn
            .execute(
                "UPDATE tasks SET result = ?1, updated_at = ?2 WHERE id = ?3",
                params![result, Utc::now(), id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> StoreResult<(Vec<Task>, u64)> {
        let db = self.db.lock().await;
        let (filter, args): (&str, Vec<String>) = match status {
            Some(status) => ("WHERE status = ?1", vec![status.as_str().to_string()]),
            None => ("", vec![]),
        };

        let total: u64 = db
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM tasks {filter}"),
                rusqlite::params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {filter} ORDER BY id DESC LIMIT {}",
            limit as i64
        );
        let mut stmt = db.conn.prepare(&sql).map_err(sql_err)?;
        let tasks = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_task)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok((tasks, total))
    }

    async fn delete_all_tasks(&self) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.conn.execute("DELETE FROM tasks", []).map_err(sql_err)?;
        Ok(())
    }

    async fn delete_finished_tasks(&self) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute(
                "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled')",
                [],
            )
            .map_err(sql_err)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn create_credential(&self, credential: &Credential) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute(
                "INSERT INTO credentials(id, auth_kind, sealed_data, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    credential.id,
                    credential.auth_kind.as_str(),
                    credential.sealed_data,
                    credential.created_at,
                    credential.updated_at,
                ],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> StoreResult<Credential> {
        let db = self.db.lock().await;
        db.conn
            .query_row(
                "SELECT id, auth_kind, sealed_data, created_at, updated_at FROM credentials \
                 WHERE id = ?1",
                params![id],
                |row| {
                    let auth_kind: String = row.get("auth_kind")?;
                    Ok(Credential {
                        id: row.get("id")?,
                        auth_kind: AuthKind::from_str(&auth_kind).map_err(conversion_err)?,
                        sealed_data: row.get("sealed_data")?,
                        created_at: row.get("created_at")?,
                        updated_at: row.get("updated_at")?,
                    })
                },
            )
            .optional()
            .map_err(sql_err)?
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl StatsCacheStore for SqliteStore {
    async fn create_stats_cache(&self, entry: &mut StatsCache) -> StoreResult<()> {
        let db = self.db.lock().await;
        let now = Utc::now();
        db.conn
            .execute(
                "INSERT INTO stats_cache(repo_id, branch, constraint_type, constraint_value, \
                 commit_hash, result_path, result_size, cache_key, hit_count, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                params![
                    entry.repo_id,
                    entry.branch,
                    entry.constraint_type,
                    entry.constraint_value,
                    entry.commit_hash,
                    entry.result_path,
                    entry.result_size,
                    entry.cache_key,
                    now,
                ],
            )
            .map_err(sql_err)?;
        entry.id = db.conn.last_insert_rowid();
        entry.created_at = now;
        Ok(())
    }

    async fn get_stats_cache_by_key(&self, cache_key: &str) -> StoreResult<Option<StatsCache>> {
        let db = self.db.lock().await;
        db.conn
            .query_row(
                &format!("SELECT {CACHE_COLUMNS} FROM stats_cache WHERE cache_key = ?1"),
                params![cache_key],
                row_to_cache,
            )
            .optional()
            .map_err(sql_err)
    }

    async fn record_cache_hit(&self, id: i64) -> StoreResult<()> {
        let db = self.db.lock().await;
        let changed = db
            .conn
            .execute(
                "UPDATE stats_cache SET hit_count = hit_count + 1, last_hit_at = ?1 WHERE id = ?2",
                params![Utc::now(), id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_stats_caches(
        &self,
        repo_id: Option<i64>,
        limit: u32,
    ) -> StoreResult<(Vec<StatsCache>, u64)> {
        let db = self.db.lock().await;
        let (filter, args): (&str, Vec<i64>) = match repo_id {
            Some(repo_id) => ("WHERE repo_id = ?1", vec![repo_id]),
            None => ("", vec![]),
        };

        let total: u64 = db
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM stats_cache {filter}"),
                rusqlite::params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        let sql = format!(
            "SELECT {CACHE_COLUMNS} FROM stats_cache {filter} ORDER BY id DESC LIMIT {}",
            limit as i64
        );
        let mut stmt = db.conn.prepare(&sql).map_err(sql_err)?;
        let entries = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_cache)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok((entries, total))
    }

    async fn delete_stats_caches_by_repo(&self, repo_id: i64) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute("DELETE FROM stats_cache WHERE repo_id = ?1", params![repo_id])
            .map_err(sql_err)?;
        Ok(())
    }

    async fn delete_all_stats_caches(&self) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute("DELETE FROM stats_cache", [])
            .map_err(sql_err)?;
        Ok(())
    }
}
