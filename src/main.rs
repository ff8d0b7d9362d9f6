use std::sync::Arc;
use std::time::Duration;

use catalog_search_sync::application::registry::HandlerRegistry;
use catalog_search_sync::application::search_handlers::register_product_handlers;
use catalog_search_sync::application::tailer::DEFAULT_CHANNEL;
use catalog_search_sync::infrastructure::kafka::{
    create_producer, KafkaDeadLetterSink, KafkaEventPublisher, KafkaMessageSource,
};
use catalog_search_sync::infrastructure::outbox_repo::DieselOutboxRepository;
use catalog_search_sync::infrastructure::pg_listener::PgChangeNotifier;
use catalog_search_sync::infrastructure::search_index::HttpSearchIndex;
use catalog_search_sync::{
    create_pool, run_migrations, AppConfig, OutboxTailer, SearchSyncWorker, Shutdown,
};
use dotenvy::dotenv;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url)?;
    if config.run_migrations {
        run_migrations(&pool).map_err(|e| format!("migrations failed: {}", e))?;
    }

    let shutdown = Shutdown::new();
    let producer = create_producer(&config.kafka_brokers)?;

    // ── Outbox tailer ────────────────────────────────────────────────────────
    let mut tailer = OutboxTailer::new(
        config.tailer_config(),
        PgChangeNotifier::new(config.database_url.clone()),
        KafkaEventPublisher::new(producer.clone(), config.topic_prefix.clone()),
    );
    if config.catch_up {
        tailer = tailer.with_repository(Arc::new(DieselOutboxRepository::new(pool.clone())));
    }
    let tailer_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { tailer.run(shutdown).await }
    });

    // ── Search-sync worker ───────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let mut registry = HandlerRegistry::new();
    register_product_handlers(
        &mut registry,
        HttpSearchIndex::new(http, &config.search_url, config.search_index.clone()),
    )?;

    let mut worker = SearchSyncWorker::new(
        config.worker_options(),
        KafkaMessageSource::new(&config.kafka_brokers, &config.group_id)?,
        Arc::new(registry),
        KafkaDeadLetterSink::new(producer, config.dead_letter_topic.clone()),
    );
    let worker_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    log::info!(
        "catalog search sync running (channel '{}', topics {:?})",
        DEFAULT_CHANNEL,
        config.topics
    );

    if let Err(e) = shutdown.wait_for_signal().await {
        log::error!("Signal handling failed: {}", e);
        shutdown.trigger();
    }

    let (tailer_result, worker_result) = tokio::join!(tailer_task, worker_task);
    worker_result?;
    tailer_result??;
    Ok(())
}
