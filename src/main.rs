//! Yardwatch - Camera Motion to Deterrent Coordinator
//!
//! Main entry point.

use yardwatch::{
    actuation::{ActuationController, CooldownGate, FireCommand, HttpActuator},
    ai_client::AiClient,
    clock::{Clock, SystemClock},
    detection::{DetectionDispatcher, RETRY_BACKOFF},
    dispatch_queue::DispatchQueue,
    event_bus::{
        BusMessage, EventBusListener, InMemoryBus, MessageBus, MqttBus, MqttConfig,
        SnapshotRequester, Topics,
    },
    event_log_service::{
        EventLogSink, FanoutEventLog, HttpEventLog, MemoryEventLog, MySqlEventLog,
    },
    polling_orchestrator::PollingOrchestrator,
    settings_sync::{HttpSettingsStore, SettingsHandle, SettingsSnapshot, SettingsSynchronizer},
    snapshot_cache::SnapshotCache,
    snapshot_store::{RetentionSweeper, SnapshotStore},
    state::{AppConfig, AppState, EventLogBackend},
    web_api,
    worker_pool::WorkerPool,
};
use anyhow::Context;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the durable event log sink selected by configuration
async fn durable_event_log(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn EventLogSink>>> {
    match config.event_log_backend {
        EventLogBackend::Memory => Ok(None),
        EventLogBackend::Http => {
            let url = config
                .event_log_url
                .clone()
                .context("EVENT_LOG_BACKEND=http requires EVENT_LOG_URL")?;
            tracing::info!(url = %url, "Event log: HTTP");
            let sink: Arc<dyn EventLogSink> = Arc::new(HttpEventLog::new(url)?);
            Ok(Some(sink))
        }
        EventLogBackend::MySql => {
            let database_url = config
                .database_url
                .as_deref()
                .context("EVENT_LOG_BACKEND=mysql requires DATABASE_URL")?;
            let pool = MySqlPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(database_url)
                .await
                .context("Failed to connect to MySQL")?;
            let mysql = MySqlEventLog::new(pool);
            mysql.ensure_schema().await?;
            tracing::info!("Event log: MySQL");
            let sink: Arc<dyn EventLogSink> = Arc::new(mysql);
            Ok(Some(sink))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yardwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Yardwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        mqtt = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        inference_url = %config.inference_url,
        settings_url = %config.settings_url,
        actuator_url = %config.actuator_url,
        snapshot_dir = %config.snapshot_dir.display(),
        workers = config.worker_count,
        timezone = %config.timezone,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let topics = Topics::new(config.mqtt_topic_prefix.clone());

    // Shared state
    let cache = Arc::new(SnapshotCache::with_defaults());
    let queue = Arc::new(DispatchQueue::new());
    let settings = SettingsHandle::new(SettingsSnapshot::defaults(config.timezone));
    let cooldown = Arc::new(CooldownGate::new());

    // Message bus
    let (bus, inbound): (Arc<dyn MessageBus>, mpsc::Receiver<BusMessage>) = if config.mqtt_disabled {
        tracing::warn!("MQTT disabled, using in-process bus");
        let (bus, inbound) = InMemoryBus::with_topics(topics.clone(), 256);
        (Arc::new(bus), inbound)
    } else {
        let mqtt_config = MqttConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            client_id: config.mqtt_client_id.clone(),
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            ..MqttConfig::default()
        };
        let (bus, inbound) = MqttBus::connect(&mqtt_config, topics.clone(), shutdown.clone())
            .await
            .context("Failed to connect to MQTT broker")?;
        (Arc::new(bus), inbound)
    };

    // Storage
    let snapshot_store = Arc::new(SnapshotStore::new(config.snapshot_dir.clone()));
    snapshot_store
        .init()
        .await
        .context("Failed to create snapshot directory")?;
    tracing::info!(dir = %snapshot_store.base_dir().display(), "Snapshot store ready");

    let recent_events = Arc::new(MemoryEventLog::default());
    let event_log = Arc::new(
        FanoutEventLog::new(durable_event_log(&config).await?, recent_events.clone())
            .with_timeout(config.event_log_timeout),
    );

    // Collaborators
    let ai_client = AiClient::new(config.inference_url.clone())?;
    if !ai_client.health_check().await {
        tracing::warn!(url = %ai_client.base_url(), "Inference service not reachable yet");
    }
    let dispatcher = Arc::new(
        DetectionDispatcher::new(Arc::new(ai_client))
            .with_timeouts(config.inference_timeout, RETRY_BACKOFF),
    );

    let actuation = Arc::new(ActuationController::new(
        Arc::new(HttpActuator::new(config.actuator_url.clone())?),
        cooldown.clone(),
        clock.clone(),
        FireCommand {
            zone: config.actuator_zone.clone(),
            duration_seconds: config.actuator_duration_sec,
        },
    ));

    let synchronizer = Arc::new(SettingsSynchronizer::new(
        Arc::new(HttpSettingsStore::new(config.settings_url.clone())?),
        settings.clone(),
        clock.clone(),
        config.timezone,
        config.settings_sync_interval,
    ));

    let requester = Arc::new(
        SnapshotRequester::new(bus, topics.clone(), cache.clone(), clock.clone())
            .with_wait_timeout(config.image_wait)
            .with_reuse_window(config.image_reuse_window),
    );

    let polling = Arc::new(PollingOrchestrator::new(
        requester.clone(),
        queue.clone(),
        settings.clone(),
        clock.clone(),
        config.periodic_cameras.clone(),
    ));

    let workers = Arc::new(
        WorkerPool::new(
            queue.clone(),
            requester,
            dispatcher,
            actuation,
            settings.clone(),
            event_log,
            clock.clone(),
        )
        .with_snapshot_store(snapshot_store.clone())
        .with_worker_count(config.worker_count),
    );

    let sweeper = Arc::new(RetentionSweeper::new(
        snapshot_store,
        clock.clone(),
        config.retention,
        config.sweep_interval,
    ));

    let listener = Arc::new(EventBusListener::new(
        topics,
        cache.clone(),
        queue.clone(),
        clock.clone(),
    ));

    // Start background loops
    let mut tasks = vec![
        listener.start(inbound, shutdown.clone()),
        synchronizer.clone().start(shutdown.clone()),
        polling.clone().start(shutdown.clone()),
        sweeper.start(shutdown.clone()),
    ];
    tasks.extend(workers.clone().start(shutdown.clone()));
    tracing::info!(tasks = tasks.len(), "Background loops started");

    let state = AppState {
        queue,
        cache,
        settings,
        synchronizer,
        cooldown,
        recent_events,
        polling,
        workers,
        started_at: clock.now(),
        clock,
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        server_shutdown.cancel();
    });

    axum::serve(tcp, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Yardwatch stopped");
    Ok(())
}
