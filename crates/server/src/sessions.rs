//! Session registry
//!
//! One registry owns everything that used to be scattered module-global
//! maps: live sessions, their adapter configs, and the run → session
//! bindings the push emitters consult. Sessions are mutated only from
//! their own request handlers; the registry just routes.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use voiceci_core::{AdapterConfig, RunAggregate, TestResult, TestStatus};

/// Session lifecycle: initializing → open → closing → closed. Closed
/// sessions are removed from the registry, so the enum only carries the
/// live phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Open,
    Closing,
}

/// Events pushed to a session's stream, in emitter order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    TestCompleted {
        run_id: Uuid,
        result: TestResult,
    },
    RunCompleted {
        run_id: Uuid,
        status: TestStatus,
        aggregate: RunAggregate,
    },
    Progress {
        progress_token: serde_json::Value,
        progress: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        message: String,
    },
}

impl PushEvent {
    /// JSON-RPC notification method for the push stream.
    pub fn method(&self) -> &'static str {
        match self {
            PushEvent::TestCompleted { .. } => "notifications/test_completed",
            PushEvent::RunCompleted { .. } => "notifications/run_completed",
            PushEvent::Progress { .. } => "notifications/progress",
        }
    }
}

struct SessionEntry {
    phase: SessionPhase,
    tenant_id: Uuid,
    key_id: Uuid,
    adapter_configs: HashMap<Uuid, AdapterConfig>,
    push: Option<mpsc::Sender<PushEvent>>,
}

struct RunBinding {
    session_id: Uuid,
    progress_token: Option<serde_json::Value>,
    /// Completed-test counter behind progress notifications.
    progress: u64,
}

/// Process-local registry of sessions and run bindings.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionEntry>,
    run_bindings: DashMap<Uuid, RunBinding>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            run_bindings: DashMap::new(),
        }
    }

    /// `initialize`: mint a session bound to the authenticated identity.
    pub fn create(&self, tenant_id: Uuid, key_id: Uuid) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.insert(
            session_id,
            SessionEntry {
                phase: SessionPhase::Initializing,
                tenant_id,
                key_id,
                adapter_configs: HashMap::new(),
                push: None,
            },
        );
        tracing::info!(%session_id, "session created");
        session_id
    }

    pub fn exists(&self, session_id: Uuid) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn phase(&self, session_id: Uuid) -> Option<SessionPhase> {
        self.sessions.get(&session_id).map(|s| s.phase)
    }

    pub fn owner(&self, session_id: Uuid) -> Option<(Uuid, Uuid)> {
        self.sessions
            .get(&session_id)
            .map(|s| (s.tenant_id, s.key_id))
    }

    /// `notifications/initialized` moves the session to open.
    pub fn mark_open(&self, session_id: Uuid) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) if session.phase == SessionPhase::Initializing => {
                session.phase = SessionPhase::Open;
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Destroy a session and discard all bindings for runs it owned. The
    /// runs themselves continue; results stay reachable via get_status.
    pub fn close(&self, session_id: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.phase = SessionPhase::Closing;
            session.push = None;
        }
        self.sessions.remove(&session_id);
        self.run_bindings
            .retain(|_, binding| binding.session_id != session_id);
        tracing::info!(%session_id, "session closed");
    }

    pub fn store_adapter(&self, session_id: Uuid, config: AdapterConfig) -> Option<Uuid> {
        let mut session = self.sessions.get_mut(&session_id)?;
        let adapter_config_id = Uuid::new_v4();
        session.adapter_configs.insert(adapter_config_id, config);
        Some(adapter_config_id)
    }

    pub fn get_adapter(&self, session_id: Uuid, adapter_config_id: Uuid) -> Option<AdapterConfig> {
        self.sessions
            .get(&session_id)?
            .adapter_configs
            .get(&adapter_config_id)
            .cloned()
    }

    /// Bind a run to the session that created it (plus its progress token).
    pub fn bind_run(
        &self,
        run_id: Uuid,
        session_id: Uuid,
        progress_token: Option<serde_json::Value>,
    ) {
        self.run_bindings.insert(
            run_id,
            RunBinding {
                session_id,
                progress_token,
                progress: 0,
            },
        );
    }

    /// Attach the push stream; replaces any previous stream for the
    /// session.
    pub fn attach_push(&self, session_id: Uuid) -> Option<mpsc::Receiver<PushEvent>> {
        let mut session = self.sessions.get_mut(&session_id)?;
        let (tx, rx) = mpsc::channel(64);
        session.push = Some(tx);
        Some(rx)
    }

    /// Emit an event to whichever session owns the run. A closed stream or
    /// an unbound run makes this a no-op; the result stays fetchable via
    /// get_status.
    pub async fn emit_to_run(&self, run_id: Uuid, event: PushEvent) {
        let Some(sender) = self.push_sender_for_run(run_id) else {
            tracing::debug!(%run_id, "no live session for run; push skipped");
            return;
        };
        if sender.send(event).await.is_err() {
            tracing::debug!(%run_id, "push stream closed; event dropped");
        }
    }

    /// Count a completed test toward the run's progress notification. Does
    /// nothing unless the client supplied a progress token.
    pub async fn emit_test_progress(&self, run_id: Uuid, message: String) {
        let snapshot = {
            let Some(mut binding) = self.run_bindings.get_mut(&run_id) else {
                return;
            };
            binding.progress += 1;
            binding
                .progress_token
                .clone()
                .map(|token| (token, binding.progress))
        };
        let Some((progress_token, progress)) = snapshot else {
            return;
        };
        self.emit_to_run(
            run_id,
            PushEvent::Progress {
                progress_token,
                progress,
                total: None,
                message,
            },
        )
        .await;
    }

    /// Progress events only flow when the client supplied a token.
    pub async fn emit_progress(&self, run_id: Uuid, progress: u64, total: Option<u64>, message: String) {
        let token = self
            .run_bindings
            .get(&run_id)
            .and_then(|b| b.progress_token.clone());
        let Some(progress_token) = token else {
            return;
        };
        self.emit_to_run(
            run_id,
            PushEvent::Progress {
                progress_token,
                progress,
                total,
                message,
            },
        )
        .await;
    }

    fn push_sender_for_run(&self, run_id: Uuid) -> Option<mpsc::Sender<PushEvent>> {
        let binding = self.run_bindings.get(&run_id)?;
        let session = self.sessions.get(&binding.session_id)?;
        session.push.clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_and_adapter_storage() {
        let registry = SessionRegistry::new();
        let tenant = Uuid::new_v4();
        let key = Uuid::new_v4();

        let session_id = registry.create(tenant, key);
        assert_eq!(registry.phase(session_id), Some(SessionPhase::Initializing));
        assert!(registry.mark_open(session_id));
        assert_eq!(registry.phase(session_id), Some(SessionPhase::Open));

        let adapter_id = registry
            .store_adapter(
                session_id,
                AdapterConfig::WsVoice {
                    agent_url: "ws://x".into(),
                },
            )
            .unwrap();
        assert!(registry.get_adapter(session_id, adapter_id).is_some());
        // Configs are per-session.
        let other = registry.create(tenant, key);
        assert!(registry.get_adapter(other, adapter_id).is_none());

        registry.close(session_id);
        assert!(!registry.exists(session_id));
    }

    #[tokio::test]
    async fn close_discards_run_bindings_and_push_is_noop() {
        let registry = SessionRegistry::new();
        let session_id = registry.create(Uuid::new_v4(), Uuid::new_v4());
        let run_id = Uuid::new_v4();
        registry.bind_run(run_id, session_id, None);

        let mut rx = registry.attach_push(session_id).unwrap();
        registry
            .emit_to_run(
                run_id,
                PushEvent::RunCompleted {
                    run_id,
                    status: TestStatus::Pass,
                    aggregate: RunAggregate::default(),
                },
            )
            .await;
        assert!(rx.try_recv().is_ok());

        registry.close(session_id);
        // After close the emit is silently dropped.
        registry
            .emit_to_run(
                run_id,
                PushEvent::RunCompleted {
                    run_id,
                    status: TestStatus::Pass,
                    aggregate: RunAggregate::default(),
                },
            )
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn progress_requires_token() {
        let registry = SessionRegistry::new();
        let session_id = registry.create(Uuid::new_v4(), Uuid::new_v4());
        let mut rx = registry.attach_push(session_id).unwrap();

        let without_token = Uuid::new_v4();
        registry.bind_run(without_token, session_id, None);
        registry
            .emit_progress(without_token, 1, Some(4), "one done".into())
            .await;
        assert!(rx.try_recv().is_err());

        let with_token = Uuid::new_v4();
        registry.bind_run(with_token, session_id, Some(serde_json::json!("tok-1")));
        registry
            .emit_progress(with_token, 1, Some(4), "one done".into())
            .await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.method(), "notifications/progress");
    }
}
