//! Worker dispatch
//!
//! Each queue gets exactly one consumer task, so a tenant's runs start in
//! the order they were enqueued. Across queues the worker is bounded by a
//! run-concurrency semaphore. Jobs route either to the in-process executor
//! or to an ephemeral machine that reports back through the callback sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use voiceci_core::{ExecuteTestsResult, TestResult};
use voiceci_executor::{ExecuteTestsRequest, ExecutorDeps};
use voiceci_machine::{size_for_test_count, ControlPlaneClient, ImageResolver, ProvisionRequest};
use voiceci_persistence::RunStore;

use crate::queue::{Job, QueueRegistry};

/// Where finished work goes. In-process runs deliver through the same sink
/// the HTTP callback uses, so results behave identically on both paths.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// A single test finished (streamed mid-run).
    async fn test_completed(&self, run_id: Uuid, result: TestResult);
    /// The whole run finished.
    async fn run_completed(&self, result: ExecuteTestsResult);
}

/// Control-plane wiring for the machine path.
pub struct MachineContext {
    pub control: ControlPlaneClient,
    pub resolver: ImageResolver,
    pub runner_callback_url: String,
    pub callback_secret: String,
    pub run_timeout: Duration,
}

pub struct WorkerDeps {
    pub runs: RunStore,
    pub executor: ExecutorDeps,
    pub sink: Arc<dyn ResultSink>,
    pub machines: Option<MachineContext>,
    /// Per-machine run concurrency, shared by all queue consumers.
    pub run_slots: Arc<Semaphore>,
}

/// Attaches to tenant queues and processes their jobs.
pub struct Worker {
    registry: Arc<QueueRegistry>,
    deps: Arc<WorkerDeps>,
}

impl Worker {
    pub fn new(registry: Arc<QueueRegistry>, deps: Arc<WorkerDeps>) -> Self {
        Self { registry, deps }
    }

    /// Run forever: claim existing queues, then attach to each new queue as
    /// it is announced.
    pub async fn run(self) {
        let mut announcements = self.registry.subscribe();

        // Queues announced before this worker subscribed.
        for name in self.registry.unclaimed_queues() {
            self.attach(&name);
        }

        loop {
            match announcements.recv().await {
                Ok(name) => self.attach(&name),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "queue announcements lagged; rescanning");
                    for name in self.registry.unclaimed_queues() {
                        self.attach(&name);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Claim a queue and spawn its consumer. Losing the claim race to
    /// another worker is the normal case for all but one of them.
    fn attach(&self, name: &str) {
        let Some(mut receiver) = self.registry.claim(name) else {
            return;
        };
        tracing::info!(queue = %name, "worker attached to queue");

        let deps = self.deps.clone();
        let queue_name = name.to_string();
        tokio::spawn(async move {
            // Sequential per queue: FIFO within a tenant.
            while let Some(job) = receiver.recv().await {
                let permit = match deps.run_slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                process_job(&deps, job).await;
                drop(permit);
            }
            tracing::info!(queue = %queue_name, "queue consumer exited");
        });
    }
}

async fn process_job(deps: &WorkerDeps, job: Job) {
    let run_id = job.run_id;

    match deps.runs.mark_running(run_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(%run_id, "run not in queued state; skipping");
            return;
        }
        Err(e) => {
            tracing::error!(%run_id, "failed to mark run running: {}", e);
            return;
        }
    }

    let outcome = if job.is_in_process() {
        run_in_process(deps, &job).await
    } else {
        run_on_machine(deps, &job).await
    };

    if let Err(error_text) = outcome {
        tracing::warn!(%run_id, "run failed: {}", error_text);
        if let Err(e) = deps.runs.mark_failed(run_id, &error_text).await {
            tracing::error!(%run_id, "failed to record run failure: {}", e);
        }
    }
}

/// In-process path: the executor runs right here, streaming each result to
/// the sink as it completes, then delivering the aggregate exactly as a
/// remote runner's callback would.
async fn run_in_process(deps: &WorkerDeps, job: &Job) -> Result<(), String> {
    let adapter = job
        .adapter
        .clone()
        .ok_or_else(|| "in-process job without adapter".to_string())?;

    let request = ExecuteTestsRequest {
        run_id: job.run_id,
        spec: job.spec.clone(),
        adapter,
    };

    let (completed_tx, mut completed_rx) = mpsc::channel::<TestResult>(32);
    let sink = deps.sink.clone();
    let run_id = job.run_id;
    let forwarder = tokio::spawn(async move {
        while let Some(result) = completed_rx.recv().await {
            sink.test_completed(run_id, result).await;
        }
    });

    let result = voiceci_executor::execute_tests(&deps.executor, request, Some(completed_tx)).await;
    let _ = forwarder.await;

    deps.sink.run_completed(result).await;
    Ok(())
}

/// Machine path: resolve an image, boot a sized VM, wait for it to exit,
/// destroy on trouble. Terminal pass/fail is written by the callback sink
/// when the machine posts its results.
async fn run_on_machine(deps: &WorkerDeps, job: &Job) -> Result<(), String> {
    let machines = deps
        .machines
        .as_ref()
        .ok_or_else(|| "machine control plane not configured".to_string())?;

    let image = machines
        .resolver
        .resolve(job.lockfile_hash.as_deref(), job.bundle_url.as_deref())
        .await
        .map_err(|e| format!("image resolution failed: {}", e))?;

    let spec_json =
        serde_json::to_string(&job.spec).map_err(|e| format!("spec serialization: {}", e))?;

    let mut env = std::collections::HashMap::new();
    env.insert("VOICECI_RUN_ID".into(), job.run_id.to_string());
    env.insert("VOICECI_TEST_SPEC".into(), spec_json);
    env.insert(
        "VOICECI_CALLBACK_URL".into(),
        machines.runner_callback_url.clone(),
    );
    env.insert(
        "VOICECI_CALLBACK_SECRET".into(),
        machines.callback_secret.clone(),
    );
    if let Some(bundle_url) = &job.bundle_url {
        env.insert("VOICECI_BUNDLE_URL".into(), bundle_url.clone());
    }

    let request = ProvisionRequest {
        name: format!("voiceci-run-{}", job.run_id),
        image,
        size: size_for_test_count(job.spec.test_count()),
        env,
    };

    let machine = machines
        .control
        .provision(&request)
        .await
        .map_err(|e| format!("provision failed: {}", e))?;

    match machines
        .control
        .wait_for_exit(&machine.id, machines.run_timeout)
        .await
    {
        Ok(_) => {
            // The machine exited; if it never called back, the run would
            // hang in running forever. Surface that as a failure.
            match deps.runs.get(job.run_id).await {
                Ok(Some(run)) if !run.status.is_terminal() => {
                    Err("machine exited without reporting results".to_string())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(format!("status check failed: {}", e)),
            }
        }
        Err(e) => {
            let _ = machines.control.destroy(&machine.id).await;
            Err(format!("machine wait failed: {}", e))
        }
    }
}
