use polysync_config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::migrate::apply_polysync_migrations;

/// Reads the connection parameters of the Postgres server used by tests.
///
/// Returns `None` when `TESTS_DATABASE_HOST` is not set. The other variables are:
/// - `TESTS_DATABASE_PORT`: server port (required with the host)
/// - `TESTS_DATABASE_USERNAME`: database user (required with the host)
/// - `TESTS_DATABASE_PASSWORD`: password (optional)
///
/// Every call returns a fresh database name so tests never share state.
///
/// # Panics
///
/// Panics if the host is set but the port or user is missing.
pub fn local_pg_connection_config() -> Option<PgConnectionConfig> {
    let host = std::env::var("TESTS_DATABASE_HOST").ok()?;

    Some(PgConnectionConfig {
        host,
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: format!("polysync_test_{}", Uuid::new_v4().simple()),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
        max_connections: 4,
    })
}

/// Creates a new Postgres database and returns a connection pool to it.
///
/// # Panics
///
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db(None))
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.with_db(None))
        .await
        .expect("Failed to connect to Postgres")
}

/// Terminates the connections to a database and drops it.
///
/// Errors are printed and ignored so cleanup never fails a test.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db(None)).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
            return;
        }
    };

    if let Err(e) = connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {}",
            config.name, e
        );
    }

    if let Err(e) = connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {}", config.name, e);
    }
}

/// A throwaway database with the `polysync` schema migrated, dropped when this value is.
///
/// Dropping blocks on the cleanup, so tests using it must run on the multi-threaded runtime.
pub struct PgDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl PgDatabase {
    /// Creates the database and applies the polysync migrations.
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created or migrated.
    pub async fn new(config: PgConnectionConfig) -> Self {
        let pool = create_pg_database(&config).await;
        apply_polysync_migrations(&config)
            .await
            .expect("Failed to apply polysync migrations");

        Self { config, pool }
    }

    /// Runs a statement against the database.
    ///
    /// # Panics
    ///
    /// Panics if the statement fails.
    pub async fn execute(&self, sql: &str) {
        self.pool
            .execute(sql)
            .await
            .unwrap_or_else(|e| panic!("Failed to run `{sql}`: {e}"));
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        tokio::task::block_in_place(|| {
            Handle::current().block_on(async {
                self.pool.close().await;
                drop_pg_database(&self.config).await;
            });
        });
    }
}
