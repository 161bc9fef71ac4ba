//! Turns a history stream into per-contributor aggregates.

use std::collections::HashMap;

use gitstat_lib::{
    ContributorStats, DateRange, Statistics, StatsConstraint, StatsSummary,
};

use crate::git::CommitRecord;

/// Aggregates a pre-filtered history window (merges excluded, constraint
/// applied upstream). Contributors are keyed by email; the author name is
/// whatever the first commit for that email carried. Commits are not
/// deduplicated by hash.
pub struct StatsCalculator;

impl StatsCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(
        &self,
        history: &[CommitRecord],
        constraint: &StatsConstraint,
    ) -> Statistics {
        let mut contributors: HashMap<&str, ContributorStats> = HashMap::new();

        for commit in history {
            let entry = contributors
                .entry(commit.email.as_str())
                .or_insert_with(|| ContributorStats {
                    author: commit.author.clone(),
                    email: commit.email.clone(),
                    commits: 0,
                    additions: 0,
                    deletions: 0,
                    modifications: 0,
                    net_additions: 0,
                });
            entry.commits += 1;

            for file in &commit.files {
                entry.additions += file.additions;
                entry.deletions += file.deletions;
            }
        }

        let by_contributor: Vec<ContributorStats> = contributors
            .into_values()
            .map(|mut contributor| {
                contributor.modifications = contributor.additions.min(contributor.deletions);
                contributor.net_additions =
                    contributor.additions as i64 - contributor.deletions as i64;
                contributor
            })
            .collect();

        let summary = StatsSummary {
            total_commits: history.len() as u64,
            total_contributors: by_contributor.len() as u64,
            date_range: match constraint {
                StatsConstraint::DateRange { from, to } => Some(DateRange {
                    from: from.clone(),
                    to: to.clone(),
                }),
                _ => None,
            },
            commit_limit: match constraint {
                StatsConstraint::CommitLimit { limit } => Some(*limit),
                _ => None,
            },
        };

        Statistics {
            summary,
            by_contributor,
        }
    }
}

impl Default for StatsCalculator {
    fn default() -> Self {
        Self::new()
    }
}
