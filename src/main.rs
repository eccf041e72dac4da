use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_chat::{
    build_app,
    clock::SystemClock,
    config::{Config, EphemeralBackend, StorageBackend},
    services::ChatEngine,
    storage::{
        memory::{MemoryEphemeralStore, MemoryStore},
        minio::MinioClient,
        postgres::PostgresStore,
        redis::RedisClient,
        AttachmentGateway, ChatStore, EphemeralStore,
    },
    timer::TokioTimers,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    config.chat.validate()?;
    tracing::info!("Starting server in {} mode", config.server.environment);

    let store: Arc<dyn ChatStore> = match config.storage {
        StorageBackend::Postgres => {
            let db = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database_url())
                .await?;
            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("./migrations").run(&db).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PostgresStore::new(db))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory conversation store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let ephemeral: Arc<dyn EphemeralStore> = match config.ephemeral {
        EphemeralBackend::Redis => {
            let redis = RedisClient::new(&config.redis_url(), config.chat.typing_expiry).await?;
            redis.ping().await?;
            tracing::info!("Connected to Redis");
            Arc::new(redis)
        }
        EphemeralBackend::Memory => Arc::new(MemoryEphemeralStore::new()),
    };

    let attachments: Option<Arc<dyn AttachmentGateway>> = if config.minio.enabled {
        let minio = MinioClient::new(&config.minio).await?;
        minio.ensure_bucket().await?;
        tracing::info!("Connected to MinIO");
        Some(Arc::new(minio))
    } else {
        None
    };

    let engine = Arc::new(ChatEngine::new(
        store,
        ephemeral,
        Arc::new(TokioTimers::new()),
        Arc::new(SystemClock),
        &config.chat,
    )?);

    if !config.chat.ephemeral_sweep.is_zero() {
        engine.spawn_sweeper(config.chat.ephemeral_sweep);
        tracing::info!(
            "Ephemeral sweep every {:?}",
            config.chat.ephemeral_sweep
        );
    }

    let app = build_app(AppState {
        engine,
        attachments,
    });

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
