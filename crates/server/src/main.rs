//! VoiceCI Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voiceci_channel::ChannelFactory;
use voiceci_config::{load_settings, Settings};
use voiceci_executor::ExecutorDeps;
use voiceci_llm::{LlmClient, LlmConfig};
use voiceci_machine::{ControlPlaneClient, ImageResolver};
use voiceci_persistence::Store;
use voiceci_pipeline::stt::SttConfig;
use voiceci_pipeline::tts::TtsConfig;
use voiceci_pipeline::{SttClient, TtsClient};
use voiceci_scheduler::{MachineContext, QueueRegistry, Worker, WorkerDeps};
use voiceci_server::callback::LocalSink;
use voiceci_server::{create_router, init_metrics, AppState, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("VOICECI_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("Warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };
    let settings = Arc::new(settings);

    init_tracing(&settings);

    tracing::info!("Starting VoiceCI server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        config = env.as_deref().unwrap_or("default"),
        "configuration loaded"
    );

    let metrics_handle = init_metrics();
    if metrics_handle.is_some() {
        tracing::info!("Prometheus metrics at /metrics");
    }

    let store = Store::connect(&settings.persistence).await?;

    let executor_deps = build_executor_deps(&settings)?;
    let sessions = Arc::new(SessionRegistry::new());
    let queues = Arc::new(QueueRegistry::new(settings.scheduler.queue_depth));

    let state = AppState::new(
        settings.clone(),
        store.clone(),
        sessions,
        queues.clone(),
        executor_deps.clone(),
        metrics_handle,
    );

    spawn_workers(&state, &store, executor_deps, queues);

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Provider clients for the in-process execution path. Missing keys are
/// tolerated at startup; run_suite refuses runs that need them.
fn build_executor_deps(settings: &Arc<Settings>) -> anyhow::Result<ExecutorDeps> {
    let read_key = |var: &str| -> String {
        match std::env::var(var) {
            Ok(key) => key,
            Err(_) => {
                tracing::warn!("{} not set; runs needing it will be refused", var);
                "unconfigured".to_string()
            }
        }
    };

    let providers = &settings.providers;
    let timeout = Duration::from_secs(providers.timeout_secs);

    let mut tts_config = TtsConfig::new(&providers.tts_endpoint, read_key(&providers.tts_api_key_var));
    tts_config.timeout = timeout;
    if let Some(voice) = &providers.tts_default_voice {
        tts_config = tts_config.with_voice(voice);
    }

    let mut stt_config = SttConfig::new(&providers.stt_endpoint, read_key(&providers.stt_api_key_var));
    stt_config.timeout = timeout;

    let llm_config = LlmConfig::new(
        &providers.llm_endpoint,
        read_key(&providers.llm_api_key_var),
        &providers.llm_model,
    );

    Ok(ExecutorDeps {
        factory: ChannelFactory::new(settings.clone()),
        tts: TtsClient::new(tts_config).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        stt: SttClient::new(stt_config).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        llm: LlmClient::new(llm_config).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        config: settings.executor.clone(),
    })
}

fn spawn_workers(
    state: &AppState,
    store: &Store,
    executor_deps: ExecutorDeps,
    queues: Arc<QueueRegistry>,
) {
    let settings = state.settings.clone();

    let machines = build_machine_context(state);
    if machines.is_none() {
        tracing::info!("machine control plane not configured; bundle runs will be refused");
    }

    let deps = Arc::new(WorkerDeps {
        runs: store.runs(),
        executor: executor_deps,
        sink: Arc::new(LocalSink::new(state.clone())),
        machines,
        run_slots: Arc::new(Semaphore::new(settings.scheduler.workers * 4)),
    });

    for worker_index in 0..settings.scheduler.workers {
        let worker = Worker::new(queues.clone(), deps.clone());
        tokio::spawn(async move {
            tracing::info!(worker = worker_index, "worker started");
            worker.run().await;
        });
    }
}

fn build_machine_context(state: &AppState) -> Option<MachineContext> {
    let settings = &state.settings;
    if settings.machine.api_endpoint.is_empty() {
        return None;
    }

    let token = match std::env::var(&settings.machine.api_token_var) {
        Ok(token) => token,
        Err(_) => {
            tracing::warn!(
                "{} not set; machine path disabled",
                settings.machine.api_token_var
            );
            return None;
        }
    };

    let control = match ControlPlaneClient::new(settings.machine.api_endpoint.clone(), token) {
        Ok(control) => control,
        Err(e) => {
            tracing::warn!("control plane client init failed: {}", e);
            return None;
        }
    };

    let resolver = ImageResolver::new(
        state.store.images(),
        control.clone(),
        settings.machine.clone(),
        format!("{}/internal/builder-callback", state.internal_base_url()),
        settings.server.callback_secret.clone(),
    );

    Some(MachineContext {
        control,
        resolver,
        runner_callback_url: format!("{}/internal/runner-callback", state.internal_base_url()),
        callback_secret: settings.server.callback_secret.clone(),
        run_timeout: Duration::from_secs(settings.machine.run_timeout_secs),
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("voiceci={},tower_http=info", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
