//! YAML configuration with serde defaults. A missing file falls back to
//! the built-in defaults; `CONFIG_PATH`, `ENCRYPTION_KEY` and `DB_PATH`
//! override from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub web: WebConfig,
    pub workspace: WorkspaceConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub git: GitConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds.
    pub read_timeout: u64,
    /// Seconds.
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: 30,
            write_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub dir: String,
    pub enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            dir: "./web".to_string(),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub base_dir: String,
    pub cache_dir: String,
    pub stats_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: "./workspace".to_string(),
            cache_dir: "./workspace/cache".to_string(),
            stats_dir: "./workspace/stats".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite: SqliteConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            sqlite: SqliteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "./workspace/data.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub clone_workers: usize,
    pub pull_workers: usize,
    pub stats_workers: usize,
    pub general_workers: usize,
    pub queue_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            clone_workers: 2,
            pull_workers: 2,
            stats_workers: 2,
            general_workers: 4,
            queue_buffer: 100,
        }
    }
}

impl WorkerConfig {
    /// All workers are interchangeable; the four counts are a sizing
    /// budget, not role assignments.
    pub fn total_workers(&self) -> usize {
        self.clone_workers + self.pull_workers + self.stats_workers + self.general_workers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_total_size: u64,
    pub max_single_result: u64,
    pub retention_days: u32,
    /// Seconds.
    pub cleanup_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_size: 10 * 1024 * 1024 * 1024,
            max_single_result: 100 * 1024 * 1024,
            retention_days: 30,
            cleanup_interval: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub encryption_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// `json` or `text`.
    pub format: String,
    /// `stdout` or a file path.
    pub output: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "stdout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/metrics".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&data)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Built-in defaults with environment overrides applied.
    pub fn default_with_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ENCRYPTION_KEY") {
            if !key.is_empty() {
                self.security.encryption_key = key;
            }
        }
        if let Ok(db_path) = std::env::var("DB_PATH") {
            if !db_path.is_empty() {
                self.storage.sqlite.path = db_path;
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_sample() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.worker.total_workers(), 10);
        assert_eq!(config.worker.queue_buffer, 100);
        assert_eq!(config.storage.kind, "sqlite");
        assert_eq!(config.workspace.stats_dir, "./workspace/stats");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let yaml = "server:\n  port: 9090\nworker:\n  stats_workers: 8\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.worker.stats_workers, 8);
        assert_eq!(config.worker.clone_workers, 2);
        assert_eq!(config.worker.total_workers(), 16);
    }
}
