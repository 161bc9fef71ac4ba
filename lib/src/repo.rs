use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle state of a repository's local working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Pending,
    Cloning,
    Ready,
    Failed,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::Cloning => "cloning",
            RepoStatus::Ready => "ready",
            RepoStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RepoStatus::Pending),
            "cloning" => Ok(RepoStatus::Cloning),
            "ready" => Ok(RepoStatus::Ready),
            "failed" => Ok(RepoStatus::Failed),
            other => Err(format!("unknown repository status: {other}")),
        }
    }
}

/// A tracked remote repository and its local mirror.
///
/// `credential_id` is internal wiring and never serialized outward; API
/// consumers only see the derived `has_credentials` flag.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Repository {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub current_branch: String,
    pub local_path: String,
    pub status: RepoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pull_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_hash: Option<String>,
    #[serde(skip)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub has_credentials: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// A fresh record as produced by the add-repos service call.
    pub fn new(url: String, name: String, branch: String, local_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            url,
            name,
            current_branch: branch,
            local_path,
            status: RepoStatus::Pending,
            error_message: None,
            last_pull_at: None,
            last_commit_hash: None,
            credential_id: None,
            has_credentials: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn refresh_has_credentials(&mut self) {
        self.has_credentials = self
            .credential_id
            .as_deref()
            .map(|id| !id.is_empty())
            .unwrap_or(false);
    }
}
