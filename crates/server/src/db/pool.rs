//! Connection pool shared by the execution store and the health endpoint.

use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub type DbPool = PgPool;

/// Pool sized for the configured writers and readers. The reader
/// connections are opened eagerly so status reads do not pay for a
/// handshake after a quiet period.
pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    let max = config.pool_size();
    PgPoolOptions::new()
        .max_connections(max)
        .min_connections(config.readers.min(max))
        .acquire_timeout(config.acquire_timeout())
}

/// Connect to the execution store database.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    let pool = pool_options(config)
        .connect_with(config.connect_options()?)
        .await?;

    tracing::info!(
        writers = config.writers,
        readers = config.readers,
        max_connections = config.pool_size(),
        "Execution store pool ready"
    );
    Ok(pool)
}

/// Whether the database answers a trivial query.
pub async fn ping(pool: &DbPool) -> bool {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok_and(|one| one == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_options_follow_sizing() {
        let config = DatabaseConfig {
            writers: 10,
            readers: 3,
            acquire_timeout_ms: 750,
            ..DatabaseConfig::default()
        };
        let options = pool_options(&config);
        assert_eq!(options.get_max_connections(), 13);
        assert_eq!(options.get_min_connections(), 3);
        assert_eq!(options.get_acquire_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_min_connections_never_exceed_max() {
        let config = DatabaseConfig {
            writers: 0,
            readers: 0,
            ..DatabaseConfig::default()
        };
        let options = pool_options(&config);
        assert_eq!(options.get_max_connections(), 2);
        assert_eq!(options.get_min_connections(), 0);
    }
}
