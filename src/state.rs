use std::sync::Arc;

use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::error::Result;
use crate::registry::SocketRegistry;
use crate::repositories::dash::RedisDashStore;
use crate::repositories::session::PgDurableStore;
use crate::services::coordinator::Coordinator;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: Pool,
    /// The Redis connection manager.
    pub redis: ConnectionManager,
    /// The application's configuration.
    pub config: Config,
    /// The session coordinator, owner of the socket registry.
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis connection manager initialized (pooled)");

        let coordinator = Arc::new(Coordinator::new(
            Arc::new(RedisDashStore::new(redis.clone())),
            Arc::new(PgDurableStore::new(db.clone())),
            SocketRegistry::new(),
        ));
        tracing::info!("✅ Session coordinator initialized");

        Ok(AppState {
            db,
            redis,
            config: config.clone(),
            coordinator,
        })
    }
}
