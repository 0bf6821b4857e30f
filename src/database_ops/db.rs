use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::transform::StatementExecutor;

/// Shared pool handle. Each store operation acquires its own connection and
/// returns it to the pool when the operation ends, success or not.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Builds the pool without opening a connection. An unreachable store surfaces
    /// on the first query, inside the run, rather than at startup.
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let use_prepared = crate::util::env::env_flag("USE_PREPARED", false);
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parsing database url")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect_lazy_with(connect_options);
        info!(max_connections, "db pool ready");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl StatementExecutor for Db {
    /// Runs the statement on a dedicated connection; it commits on its own.
    async fn execute(&self, statement: &str) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        debug!(len = statement.len(), "executing statement");
        let done = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await?;
        Ok(done.rows_affected())
    }
}
