//! The gitstat host: configuration, services, the HTTP surface and the
//! process bootstrap glue.

pub mod config;
pub mod interfaces;
pub mod log;
pub mod server;
pub mod service;

use std::sync::Arc;

use gitstat_lib::Store;

use service::{RepoService, StatsService};

/// Shared handler state: the services plus direct store access for the
/// task and cache listing endpoints.
#[derive(Clone)]
pub struct AppState {
    pub repos: Arc<RepoService>,
    pub stats: Arc<StatsService>,
    pub store: Arc<dyn Store>,
}
