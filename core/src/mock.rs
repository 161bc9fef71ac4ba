//! A scriptable in-memory `GitOps` used by handler and service tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gitstat_lib::StatsConstraint;

use crate::{
    credential::CredentialSecret,
    git::{CommitRecord, GitError, GitOps, GitResult},
};

#[derive(Debug, Default)]
struct MockState {
    branch: String,
    head_hash: String,
    branches: Vec<String>,
    commit_count: u64,
    history: Vec<CommitRecord>,
    fail_clone: Option<String>,
    fail_pull: Option<String>,
    fail_checkout: Option<String>,
    clone_calls: Vec<(String, String)>,
    pull_calls: Vec<String>,
    checkout_calls: Vec<(String, String)>,
}

/// Scripted source-control backend. Configure the outcome up front, run
/// the code under test, then inspect the recorded calls.
#[derive(Default)]
pub struct MockGit {
    state: Mutex<MockState>,
}

impl MockGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_head(branch: &str, head_hash: &str) -> Self {
        let mock = Self::new();
        mock.set_head(branch, head_hash);
        mock
    }

    pub fn set_head(&self, branch: &str, head_hash: &str) {
        let mut state = self.state.lock().unwrap();
        state.branch = branch.to_string();
        state.head_hash = head_hash.to_string();
    }

    pub fn set_branches(&self, branches: &[&str]) {
        self.state.lock().unwrap().branches =
            branches.iter().map(|b| b.to_string()).collect();
    }

    pub fn set_commit_count(&self, count: u64) {
        self.state.lock().unwrap().commit_count = count;
    }

    pub fn set_history(&self, history: Vec<CommitRecord>) {
        self.state.lock().unwrap().history = history;
    }

    pub fn fail_clone_with(&self, message: &str) {
        self.state.lock().unwrap().fail_clone = Some(message.to_string());
    }

    pub fn fail_pull_with(&self, message: &str) {
        self.state.lock().unwrap().fail_pull = Some(message.to_string());
    }

    pub fn fail_checkout_with(&self, message: &str) {
        self.state.lock().unwrap().fail_checkout = Some(message.to_string());
    }

    pub fn clone_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().clone_calls.clone()
    }

    pub fn pull_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().pull_calls.clone()
    }

    pub fn checkout_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().checkout_calls.clone()
    }
}

#[async_trait]
impl GitOps for MockGit {
    async fn clone_repo(
        &self,
        url: &str,
        local_path: &str,
        _auth: Option<&CredentialSecret>,
        _cancel: &CancellationToken,
    ) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .clone_calls
            .push((url.to_string(), local_path.to_string()));
        match &state.fail_clone {
            Some(message) => Err(GitError::Command(message.clone())),
            None => Ok(()),
        }
    }

    async fn pull(
        &self,
        local_path: &str,
        _auth: Option<&CredentialSecret>,
        _cancel: &CancellationToken,
    ) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        state.pull_calls.push(local_path.to_string());
        match &state.fail_pull {
            Some(message) => Err(GitError::Command(message.clone())),
            None => Ok(()),
        }
    }

    async fn checkout(
        &self,
        local_path: &str,
        branch: &str,
        _cancel: &CancellationToken,
    ) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .checkout_calls
            .push((local_path.to_string(), branch.to_string()));
        if let Some(message) = &state.fail_checkout {
            return Err(GitError::Command(message.clone()));
        }
        state.branch = branch.to_string();
        Ok(())
    }

    async fn current_branch(
        &self,
        _local_path: &str,
        _cancel: &CancellationToken,
    ) -> GitResult<String> {
        Ok(self.state.lock().unwrap().branch.clone())
    }

    async fn head_hash(&self, _local_path: &str, _cancel: &CancellationToken) -> GitResult<String> {
        Ok(self.state.lock().unwrap().head_hash.clone())
    }

    async fn list_branches(
        &self,
        _local_path: &str,
        _cancel: &CancellationToken,
    ) -> GitResult<Vec<String>> {
        Ok(self.state.lock().unwrap().branches.clone())
    }

    async fn count_commits(
        &self,
        _local_path: &str,
        _branch: &str,
        _since: Option<&str>,
        _cancel: &CancellationToken,
    ) -> GitResult<u64> {
        Ok(self.state.lock().unwrap().commit_count)
    }

    async fn history_with_numstat(
        &self,
        _local_path: &str,
        _branch: &str,
        _constraint: &StatsConstraint,
        _cancel: &CancellationToken,
    ) -> GitResult<Vec<CommitRecord>> {
        Ok(self.state.lock().unwrap().history.clone())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
