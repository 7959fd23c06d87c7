//! Process composition: logging setup and the two role runners.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::EventLogService;
use crate::ingest::IngestPipeline;
use crate::lifecycle::LifecycleCoordinator;
use crate::notify::NotificationHub;
use crate::queue::consumer::ConsumerRuntime;
use crate::queue::producer::RedisQueueProducer;
use crate::server::{self, AppState};
use crate::storage::{BlobStore, PgMetadataStore, S3BlobStore};
use crate::worker::processor::PhotoProcessor;
use crate::worker::JobHandler;

/// Install the tracing subscriber. `RUST_LOG` overrides the verbosity
/// flag.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn redis_pool(config: &Config) -> anyhow::Result<deadpool_redis::Pool> {
    let mut pool_config = deadpool_redis::Config::from_url(&config.redis.url);
    pool_config.pool = Some(deadpool_redis::PoolConfig::new(config.redis.pool_size));
    pool_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("failed to create Redis pool")
}

/// Run the ingest node until the listener fails.
pub async fn run_serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let store = Arc::new(
        PgMetadataStore::connect(&config.database)
            .await
            .context("metadata store unavailable")?,
    );
    let blob: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(&config.object_store)
            .await
            .context("object store unavailable")?,
    );
    blob.ensure_buckets().await.context("bucket creation failed")?;

    let queue = Arc::new(RedisQueueProducer::new(
        redis_pool(&config)?,
        config.queue.clone(),
    ));
    let hub = Arc::new(NotificationHub::default());
    let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), hub.clone()));
    let events = Arc::new(EventLogService::new(store.clone()));
    let ingest = Arc::new(IngestPipeline::new(
        blob.clone(),
        store.clone(),
        queue.clone(),
        coordinator.clone(),
        hub.clone(),
        config.ingest.clone(),
    ));

    let state = AppState {
        store,
        blob,
        queue,
        hub,
        coordinator,
        ingest,
        events,
        config,
    };

    server::serve(state).await
}

/// Run a worker node until interrupted. In-flight messages left behind
/// by a shutdown stay pending and are reclaimed by the next instance.
pub async fn run_worker(config: Config, consumer: Option<String>) -> anyhow::Result<()> {
    let mut config = config;
    if let Some(consumer) = consumer {
        config.queue.consumer = consumer;
    }

    let store = Arc::new(
        PgMetadataStore::connect(&config.database)
            .await
            .context("metadata store unavailable")?,
    );
    let hub = Arc::new(NotificationHub::default());
    let coordinator = Arc::new(LifecycleCoordinator::new(store.clone(), hub.clone()));
    let events = Arc::new(EventLogService::new(store.clone()));
    let processor = Arc::new(PhotoProcessor::new(events));
    let handler = Arc::new(JobHandler::new(store, coordinator, processor));

    let runtime = Arc::new(ConsumerRuntime::new(
        redis_pool(&config)?,
        handler,
        config.queue.clone(),
    ));

    tokio::select! {
        result = runtime.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down; pending messages will be reclaimed");
            Ok(())
        }
    }
}
