//! Per-tenant queue registry

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use voiceci_core::{AdapterConfig, TestSpec};

use crate::SchedulerError;

/// One queued run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub run_id: Uuid,
    pub tenant_id: Uuid,
    pub key_id: Uuid,
    pub spec: TestSpec,
    /// Present for directly reachable agents; absent for bundle runs that
    /// need a machine.
    pub adapter: Option<AdapterConfig>,
    pub bundle_url: Option<String>,
    pub lockfile_hash: Option<String>,
}

impl Job {
    /// Directly reachable agents run in-process on the worker; everything
    /// else goes to an ephemeral machine.
    pub fn is_in_process(&self) -> bool {
        match &self.adapter {
            Some(adapter) => {
                adapter.agent_url().is_some()
                    || matches!(
                        adapter.tag(),
                        "sip" | "webrtc" | "vapi" | "retell" | "elevenlabs" | "bland"
                    )
            }
            None => false,
        }
    }
}

/// Shared coordination: the active-queue map plus announcements of new
/// queues. A queue's receiver is claimed by exactly one worker consumer,
/// which preserves per-tenant FIFO.
pub struct QueueRegistry {
    depth: usize,
    queues: DashMap<String, mpsc::Sender<Job>>,
    /// Receivers parked here until a worker claims them.
    unclaimed: Mutex<HashMap<String, mpsc::Receiver<Job>>>,
    announcements: broadcast::Sender<String>,
}

impl QueueRegistry {
    pub fn new(depth: usize) -> Self {
        let (announcements, _) = broadcast::channel(64);
        Self {
            depth: depth.max(1),
            queues: DashMap::new(),
            unclaimed: Mutex::new(HashMap::new()),
            announcements,
        }
    }

    /// Queue name for a tenant. Keyed by the (tenant, key) pair, the more
    /// specific of the two identities the auth filter attaches.
    pub fn queue_name(tenant_id: Uuid, key_id: Uuid) -> String {
        format!("runs:{}:{}", tenant_id, key_id)
    }

    /// Enqueue a job, creating and announcing the tenant's queue on first
    /// use.
    pub async fn enqueue(&self, job: Job) -> Result<(), SchedulerError> {
        let name = Self::queue_name(job.tenant_id, job.key_id);

        // The guard from `get` must drop before `entry` touches the shard.
        let existing = self.queues.get(&name).map(|sender| sender.clone());
        let sender = match existing {
            Some(sender) => sender,
            None => match self.queues.entry(name.clone()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().clone(),
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let (tx, rx) = mpsc::channel(self.depth);
                    vacant.insert(tx.clone());
                    self.unclaimed.lock().insert(name.clone(), rx);
                    // Workers hear about the new queue and attach.
                    let _ = self.announcements.send(name.clone());
                    tracing::info!(queue = %name, "created tenant queue");
                    tx
                }
            },
        };

        sender
            .try_send(job)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull(name.clone()),
                mpsc::error::TrySendError::Closed(_) => SchedulerError::QueueClosed(name),
            })
    }

    /// Subscribe to new-queue announcements.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.announcements.subscribe()
    }

    /// Claim the consumer side of a queue. Exactly one caller wins.
    pub fn claim(&self, name: &str) -> Option<mpsc::Receiver<Job>> {
        self.unclaimed.lock().remove(name)
    }

    /// Names of queues that exist but have no consumer yet; lets a worker
    /// catch up on queues announced before it subscribed.
    pub fn unclaimed_queues(&self) -> Vec<String> {
        self.unclaimed.lock().keys().cloned().collect()
    }

    pub fn active_queue_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(tenant: Uuid, key: Uuid) -> Job {
        Job {
            run_id: Uuid::new_v4(),
            tenant_id: tenant,
            key_id: key,
            spec: TestSpec::default(),
            adapter: Some(AdapterConfig::WsVoice {
                agent_url: "ws://127.0.0.1:3001".into(),
            }),
            bundle_url: None,
            lockfile_hash: None,
        }
    }

    #[tokio::test]
    async fn per_tenant_fifo_order() {
        let registry = QueueRegistry::new(16);
        let tenant = Uuid::new_v4();
        let key = Uuid::new_v4();

        let a = job(tenant, key);
        let b = job(tenant, key);
        registry.enqueue(a.clone()).await.unwrap();
        registry.enqueue(b.clone()).await.unwrap();

        let name = QueueRegistry::queue_name(tenant, key);
        let mut rx = registry.claim(&name).unwrap();
        assert_eq!(rx.recv().await.unwrap().run_id, a.run_id);
        assert_eq!(rx.recv().await.unwrap().run_id, b.run_id);
    }

    #[tokio::test]
    async fn new_queue_is_announced_once() {
        let registry = QueueRegistry::new(16);
        let mut announcements = registry.subscribe();

        let tenant = Uuid::new_v4();
        let key = Uuid::new_v4();
        registry.enqueue(job(tenant, key)).await.unwrap();
        registry.enqueue(job(tenant, key)).await.unwrap();

        let name = announcements.try_recv().unwrap();
        assert_eq!(name, QueueRegistry::queue_name(tenant, key));
        assert!(announcements.try_recv().is_err());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let registry = QueueRegistry::new(16);
        let tenant = Uuid::new_v4();
        let key = Uuid::new_v4();
        registry.enqueue(job(tenant, key)).await.unwrap();

        let name = QueueRegistry::queue_name(tenant, key);
        assert!(registry.claim(&name).is_some());
        assert!(registry.claim(&name).is_none());
    }

    #[tokio::test]
    async fn tenants_get_separate_queues() {
        let registry = QueueRegistry::new(16);
        registry
            .enqueue(job(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();
        registry
            .enqueue(job(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(registry.active_queue_count(), 2);
        assert_eq!(registry.unclaimed_queues().len(), 2);
    }

    #[test]
    fn routing_rules() {
        let tenant = Uuid::new_v4();
        let key = Uuid::new_v4();

        let mut reachable = job(tenant, key);
        assert!(reachable.is_in_process());

        reachable.adapter = Some(AdapterConfig::Vapi {
            assistant_id: "a".into(),
        });
        assert!(reachable.is_in_process());

        let bundled = Job {
            adapter: None,
            bundle_url: Some("https://bundles/x.tgz".into()),
            ..job(tenant, key)
        };
        assert!(!bundled.is_in_process());
    }
}
