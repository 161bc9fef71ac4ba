//! Domain core: the source-control capability and its subprocess
//! implementation, the statistics calculator, and the content-addressed
//! result cache.

pub mod cache;
pub mod calculator;
pub mod credential;
pub mod git;
pub mod mock;

pub use cache::{cache_key, cache_key_from_parts, serialize_constraint, CacheError, FileCache};
pub use calculator::StatsCalculator;
pub use credential::{CredentialSecret, PlainSealer, SealError, SecretSealer};
pub use git::{redact_url, CmdGit, CommitRecord, FileChange, GitError, GitOps, GitResult};
pub use mock::MockGit;
