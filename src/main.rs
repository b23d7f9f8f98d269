use std::sync::Arc;
use stock_feed_service::database::establish_connection_pool;
use stock_feed_service::database::repositories::{MarketDataRepository, MarketDataRepositoryImpl};
use stock_feed_service::jobs::{build_jobs, JobContext};
use stock_feed_service::scheduler::FireOutcome;
use stock_feed_service::{create_router, AppConfig, FetchDispatcher, Scheduler, SyncEngine, UpstoxClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stock_feed_service=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("❌ Invalid configuration: {}", e);
        e
    })?;

    // Database pool and schema
    let pool = establish_connection_pool(&config.database_url, config.db_pool_max_size)?;
    let migration_pool = pool.clone();
    let applied = tokio::task::spawn_blocking(move || migration_pool.run_migrations()).await??;
    tracing::info!("✅ Database ready ({} migrations applied)", applied);

    let repository: Arc<dyn MarketDataRepository> =
        Arc::new(MarketDataRepositoryImpl::new(move || pool.get_conn()));

    // Provider, sync engine and fan-out
    if config.provider.access_token.is_none() {
        tracing::warn!("⚠️  UPSTOX_ACCESS_TOKEN not set, requests are sent unauthenticated");
    }
    let provider = Arc::new(UpstoxClient::new(&config.provider)?);
    let engine = Arc::new(SyncEngine::new(
        repository.clone(),
        config.ingestion.retention,
        config.ingestion.intraday_trim_enabled,
    ));
    let dispatcher = Arc::new(FetchDispatcher::new(
        provider,
        engine,
        config.ingestion.max_workers,
        config.ingestion.historical_min_candles,
    ));

    // Jobs and scheduler
    let jobs = build_jobs(&JobContext {
        repository: repository.clone(),
        dispatcher,
        ingestion: config.ingestion.clone(),
        snapshot: config.snapshot.clone(),
    })?;

    let scheduler = Arc::new(Scheduler::new(&config.scheduler).await?);
    scheduler.start().await?;

    // Registration awaits each warm-up, so instruments load before candles are fetched
    let registration = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            for job in jobs {
                let name = job.name();
                match scheduler.register(job).await {
                    Ok(FireOutcome::Completed(summary)) => {
                        tracing::info!("✅ Job {} registered, warm-up: {}", name, summary)
                    }
                    Ok(outcome) => tracing::warn!("⚠️  Job {} registered, warm-up: {:?}", name, outcome),
                    Err(e) => tracing::error!("❌ Failed to register job {}: {}", name, e),
                }
            }
        })
    };

    // Read API
    let app = create_router(repository);
    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr).await?;

    tracing::info!("🚀 Stock feed service running on http://{}", config.api_bind_addr);
    tracing::info!("📊 Instruments: http://{}/api/v1/instruments", config.api_bind_addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", config.api_bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    if let Err(e) = registration.await {
        tracing::warn!("Job registration task ended abnormally: {}", e);
    }

    tracing::info!("👋 Stock feed service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    tracing::info!("🛑 Ctrl-C received, shutting down");
}
