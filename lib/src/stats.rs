use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Validated bound on which commits enter a statistics run.
///
/// Serializes as `{"type":"date_range","from":..,"to":..}` or
/// `{"type":"commit_limit","limit":..}`; that exact byte form is also what
/// gets persisted as a cache row's constraint value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatsConstraint {
    DateRange { from: String, to: String },
    CommitLimit { limit: u32 },
}

impl StatsConstraint {
    pub fn kind(&self) -> &'static str {
        match self {
            StatsConstraint::DateRange { .. } => "date_range",
            StatsConstraint::CommitLimit { .. } => "commit_limit",
        }
    }

    /// Short canonical form embedded into cache keys: `dr_<from>_<to>` or
    /// `cl_<limit>`.
    pub fn canonical(&self) -> String {
        match self {
            StatsConstraint::DateRange { from, to } => format!("dr_{from}_{to}"),
            StatsConstraint::CommitLimit { limit } => format!("cl_{limit}"),
        }
    }
}

/// Unvalidated wire form of a constraint, as it arrives in request bodies
/// and query strings. `TryFrom` enforces the mutual-exclusion rules before
/// anything downstream sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConstraintSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ConstraintSpec {
    /// Canonical key fragment for the raw, unvalidated form: missing
    /// fields collapse to their defaults and an unknown kind to the empty
    /// string. Agrees with [`StatsConstraint::canonical`] on well-formed
    /// input, so result queries fingerprint without validating first.
    pub fn canonical(&self) -> String {
        match self.kind.as_str() {
            "date_range" => format!(
                "dr_{}_{}",
                self.from.as_deref().unwrap_or(""),
                self.to.as_deref().unwrap_or("")
            ),
            "commit_limit" => format!("cl_{}", self.limit.unwrap_or(0)),
            _ => String::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintError {
    #[error("constraint type must be date_range or commit_limit")]
    UnknownKind(String),
    #[error("date_range requires both from and to")]
    MissingDates,
    #[error("date_range cannot be used with limit")]
    DateRangeWithLimit,
    #[error("commit_limit requires positive limit value")]
    NonPositiveLimit,
    #[error("commit_limit cannot be used with date range")]
    CommitLimitWithDates,
}

impl TryFrom<&ConstraintSpec> for StatsConstraint {
    type Error = ConstraintError;

    fn try_from(spec: &ConstraintSpec) -> Result<Self, Self::Error> {
        let has = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.is_empty());

        match spec.kind.as_str() {
            "date_range" => {
                if spec.limit.unwrap_or(0) != 0 {
                    return Err(ConstraintError::DateRangeWithLimit);
                }
                if !has(&spec.from) || !has(&spec.to) {
                    return Err(ConstraintError::MissingDates);
                }
                Ok(StatsConstraint::DateRange {
                    from: spec.from.clone().unwrap(),
                    to: spec.to.clone().unwrap(),
                })
            }
            "commit_limit" => {
                if has(&spec.from) || has(&spec.to) {
                    return Err(ConstraintError::CommitLimitWithDates);
                }
                match spec.limit {
                    Some(limit) if limit > 0 => Ok(StatsConstraint::CommitLimit {
                        limit: limit as u32,
                    }),
                    _ => Err(ConstraintError::NonPositiveLimit),
                }
            }
            other => Err(ConstraintError::UnknownKind(other.to_string())),
        }
    }
}

/// Per-contributor aggregates for one statistics run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContributorStats {
    pub author: String,
    pub email: String,
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
    /// Replaced lines: `min(additions, deletions)`.
    pub modifications: u64,
    /// `additions - deletions`; negative when a contributor removed more
    /// than they added.
    pub net_additions: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatsSummary {
    pub total_commits: u64,
    pub total_contributors: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub date_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_limit: Option<u32>,
}

/// The cache artifact payload: summary plus per-contributor rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Statistics {
    pub summary: StatsSummary,
    pub by_contributor: Vec<ContributorStats>,
}

/// What a statistics query returns: the artifact plus cache provenance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsResult {
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cached_at: Option<DateTime<Utc>>,
    pub commit_hash: String,
    pub statistics: Statistics,
}

/// Metadata row for one cached statistics artifact.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsCache {
    pub id: i64,
    pub repo_id: i64,
    pub branch: String,
    pub constraint_type: String,
    pub constraint_value: String,
    pub commit_hash: String,
    pub result_path: String,
    pub result_size: i64,
    pub cache_key: String,
    pub hit_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_hit_at: Option<DateTime<Utc>>,
}
