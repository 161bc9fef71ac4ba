//! Thin orchestrators between the HTTP surface and the task pipeline.

mod repo;
mod stats;

pub use repo::{
    AddRepoFailure, AddRepoResult, AddReposRequest, AddReposResponse, RepoInput, RepoService,
};
pub use stats::{CalculateRequest, CommitCountResponse, QueryResultRequest, StatsService};
