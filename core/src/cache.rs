//! Content-addressed statistics cache: a sha-256 fingerprint over
//! (repo, branch, constraint, commit hash) maps to a gzip JSON artifact on
//! disk plus a metadata row in the store.

use std::{
    fs,
    io::{Read, Write},
    path::PathBuf,
    sync::Arc,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use gitstat_lib::{
    Statistics, StatsCache, StatsCacheStore, StatsConstraint, StatsResult, Store, StoreError,
};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Derive the 64-hex cache key. The canonical string has no internal map
/// ordering; identical inputs always fingerprint identically.
pub fn cache_key(
    repo_id: i64,
    branch: &str,
    constraint: Option<&StatsConstraint>,
    commit_hash: &str,
) -> String {
    let constraint_str = constraint.map(StatsConstraint::canonical).unwrap_or_default();
    cache_key_from_parts(repo_id, branch, &constraint_str, commit_hash)
}

/// Key derivation over an already-canonicalized constraint fragment, for
/// callers that fingerprint raw query input without validating it.
pub fn cache_key_from_parts(
    repo_id: i64,
    branch: &str,
    constraint_str: &str,
    commit_hash: &str,
) -> String {
    let data =
        format!("repo:{repo_id}|branch:{branch}|constraint:{constraint_str}|commit:{commit_hash}");
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Stable JSON form of a constraint as persisted on cache rows.
pub fn serialize_constraint(constraint: Option<&StatsConstraint>) -> String {
    match constraint {
        Some(constraint) => {
            serde_json::to_string(constraint).unwrap_or_else(|_| "{}".to_string())
        }
        None => "{}".to_string(),
    }
}

/// The cache engine. Sole writer of artifact files under `stats_dir`;
/// metadata rows are authoritative, orphan files are tolerated until the
/// next `set` for the same key overwrites them.
pub struct FileCache {
    store: Arc<dyn Store>,
    stats_dir: PathBuf,
}

impl FileCache {
    pub fn new(store: Arc<dyn Store>, stats_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            stats_dir: stats_dir.into(),
        }
    }

    /// Look up a key. Hits bump the row's hit count in the background;
    /// a failure of that update is logged, never propagated.
    pub async fn get(&self, cache_key: &str) -> CacheResult<Option<StatsResult>> {
        let Some(entry) = self.store.get_stats_cache_by_key(cache_key).await? else {
            return Ok(None);
        };

        let statistics = match self.load_artifact(&entry.result_path) {
            Ok(statistics) => statistics,
            Err(err) => {
                error!(cache_key, path = %entry.result_path, %err, "failed to load cached artifact");
                return Err(err);
            }
        };

        let store = Arc::clone(&self.store);
        let entry_id = entry.id;
        tokio::spawn(async move {
            if let Err(err) = store.record_cache_hit(entry_id).await {
                warn!(cache_id = entry_id, %err, "failed to update cache hit count");
            }
        });

        info!(cache_key, cache_id = entry.id, "cache hit");
        Ok(Some(StatsResult {
            cache_hit: true,
            cached_at: Some(entry.created_at),
            commit_hash: entry.commit_hash,
            statistics,
        }))
    }

    /// Write an artifact and its metadata row, returning the derived key.
    ///
    /// The artifact lands via temp-file + rename so concurrent readers
    /// never observe a partial file. If the row insert fails the artifact
    /// is removed; a duplicate-key conflict means another writer won the
    /// race and the existing row stays authoritative.
    pub async fn set(
        &self,
        repo_id: i64,
        branch: &str,
        constraint: &StatsConstraint,
        commit_hash: &str,
        statistics: &Statistics,
    ) -> CacheResult<String> {
        let key = cache_key(repo_id, branch, Some(constraint), commit_hash);
        let path = self.stats_dir.join(format!("{key}.json.gz"));

        fs::create_dir_all(&self.stats_dir)?;
        self.write_artifact(&path, statistics)?;

        let size = fs::metadata(&path)?.len() as i64;
        let mut entry = StatsCache {
            id: 0,
            repo_id,
            branch: branch.to_string(),
            constraint_type: constraint.kind().to_string(),
            constraint_value: serialize_constraint(Some(constraint)),
            commit_hash: commit_hash.to_string(),
            result_path: path.to_string_lossy().into_owned(),
            result_size: size,
            cache_key: key.clone(),
            hit_count: 0,
            created_at: chrono::Utc::now(),
            last_hit_at: None,
        };

        match self.store.create_stats_cache(&mut entry).await {
            Ok(()) => {
                info!(cache_key = %key, cache_id = entry.id, file_size = size, "cache saved");
                Ok(key)
            }
            Err(StoreError::Duplicate(_)) => {
                // Lost a same-key race; identical inputs mean identical
                // content, so the file we just renamed in is exactly what
                // the existing row points at.
                debug!(cache_key = %key, "cache row already present");
                Ok(key)
            }
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), %remove_err, "failed to remove orphan artifact");
                }
                Err(err.into())
            }
        }
    }

    /// Drop all metadata rows for a repository. Artifact files are reaped
    /// lazily; rows are authoritative.
    pub async fn invalidate_by_repo(&self, repo_id: i64) -> CacheResult<()> {
        self.store.delete_stats_caches_by_repo(repo_id).await?;
        info!(repo_id, "cache invalidated");
        Ok(())
    }

    fn write_artifact(&self, path: &std::path::Path, statistics: &Statistics) -> CacheResult<()> {
        let tmp = NamedTempFile::new_in(&self.stats_dir)?;
        let mut encoder = GzEncoder::new(tmp.reopen()?, Compression::default());
        encoder.write_all(&serde_json::to_vec(statistics)?)?;
        encoder.finish()?;
        tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }

    fn load_artifact(&self, path: &str) -> CacheResult<Statistics> {
        let file = fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitstat_lib::{ContributorStats, StatsSummary};
    use gitstat_store::InMemoryStore;
    use tempfile::tempdir;

    fn sample_statistics() -> Statistics {
        Statistics {
            summary: StatsSummary {
                total_commits: 3,
                total_contributors: 1,
                date_range: None,
                commit_limit: Some(10),
            },
            by_contributor: vec![ContributorStats {
                author: "Alice".into(),
                email: "alice@example.test".into(),
                commits: 3,
                additions: 10,
                deletions: 3,
                modifications: 3,
                net_additions: 7,
            }],
        }
    }

    #[test]
    fn keys_are_deterministic_64_hex() {
        let constraint = StatsConstraint::CommitLimit { limit: 100 };
        let a = cache_key(1, "main", Some(&constraint), "abc123");
        let b = cache_key(1, "main", Some(&constraint), "abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_inputs_produce_distinct_keys() {
        let constraint = StatsConstraint::CommitLimit { limit: 100 };
        let base = cache_key(1, "main", Some(&constraint), "abc123");
        assert_ne!(base, cache_key(2, "main", Some(&constraint), "abc123"));
        assert_ne!(base, cache_key(1, "develop", Some(&constraint), "abc123"));
        assert_ne!(base, cache_key(1, "main", Some(&constraint), "def456"));
        assert_ne!(
            base,
            cache_key(
                1,
                "main",
                Some(&StatsConstraint::CommitLimit { limit: 99 }),
                "abc123"
            )
        );
        assert_ne!(base, cache_key(1, "main", None, "abc123"));
    }

    #[test]
    fn constraint_serialization_matches_row_format() {
        assert_eq!(serialize_constraint(None), "{}");
        assert_eq!(
            serialize_constraint(Some(&StatsConstraint::DateRange {
                from: "2024-01-01".into(),
                to: "2024-12-31".into(),
            })),
            r#"{"type":"date_range","from":"2024-01-01","to":"2024-12-31"}"#
        );
        assert_eq!(
            serialize_constraint(Some(&StatsConstraint::CommitLimit { limit: 100 })),
            r#"{"type":"commit_limit","limit":100}"#
        );
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let cache = FileCache::new(store, dir.path());

        let constraint = StatsConstraint::CommitLimit { limit: 10 };
        let statistics = sample_statistics();
        let key = cache
            .set(1, "main", &constraint, "abc123", &statistics)
            .await
            .unwrap();
        assert_eq!(key, cache_key(1, "main", Some(&constraint), "abc123"));

        let result = cache.get(&key).await.unwrap().unwrap();
        assert!(result.cache_hit);
        assert_eq!(result.commit_hash, "abc123");
        assert_eq!(result.statistics, statistics);
    }

    #[tokio::test]
    async fn get_misses_on_unknown_key() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(Arc::new(InMemoryStore::new()), dir.path());
        assert!(cache.get("0".repeat(64).as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_set_keeps_existing_row() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(Arc::new(InMemoryStore::new()), dir.path());
        let constraint = StatsConstraint::CommitLimit { limit: 10 };
        let statistics = sample_statistics();

        let key1 = cache
            .set(1, "main", &constraint, "abc123", &statistics)
            .await
            .unwrap();
        let key2 = cache
            .set(1, "main", &constraint, "abc123", &statistics)
            .await
            .unwrap();
        assert_eq!(key1, key2);
        assert!(cache.get(&key1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalidate_drops_rows_for_repo() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(Arc::new(InMemoryStore::new()), dir.path());
        let constraint = StatsConstraint::CommitLimit { limit: 10 };
        let statistics = sample_statistics();

        let key1 = cache
            .set(1, "main", &constraint, "abc123", &statistics)
            .await
            .unwrap();
        let key2 = cache
            .set(2, "main", &constraint, "abc123", &statistics)
            .await
            .unwrap();

        cache.invalidate_by_repo(1).await.unwrap();
        assert!(cache.get(&key1).await.unwrap().is_none());
        assert!(cache.get(&key2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_artifact_is_an_error_not_a_hit() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let cache = FileCache::new(store, dir.path());
        let constraint = StatsConstraint::CommitLimit { limit: 10 };

        let key = cache
            .set(1, "main", &constraint, "abc123", &sample_statistics())
            .await
            .unwrap();
        let path = dir.path().join(format!("{key}.json.gz"));
        fs::write(&path, b"definitely not gzip").unwrap();

        assert!(cache.get(&key).await.is_err());
    }
}
