//! Application state
//!
//! Shared across all handlers. The session registry lives here and is
//! passed explicitly to the callback sink, which is what keeps the push
//! plumbing free of global maps.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use voiceci_config::Settings;
use voiceci_executor::ExecutorDeps;
use voiceci_persistence::Store;
use voiceci_scheduler::QueueRegistry;

use crate::sessions::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub sessions: Arc<SessionRegistry>,
    pub queues: Arc<QueueRegistry>,
    pub executor_deps: ExecutorDeps,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        store: Store,
        sessions: Arc<SessionRegistry>,
        queues: Arc<QueueRegistry>,
        executor_deps: ExecutorDeps,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings,
            store,
            sessions,
            queues,
            executor_deps,
            metrics,
        }
    }

    /// Base URL remote runners and builders use to reach this server.
    pub fn internal_base_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.settings.server.public_host, self.settings.server.port
        )
    }
}
