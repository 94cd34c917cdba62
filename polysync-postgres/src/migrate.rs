use polysync_config::shared::{IntoConnectOptions, PgConnectionConfig, PgConnectionOptions};
use sqlx::{Executor, postgres::PgPoolOptions};
use std::sync::LazyLock;
use tracing::info;

/// Session settings for schema migrations, which may wait on locks held by application writes.
static MIGRATION_CONNECTION_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        datestyle: "ISO".to_string(),
        client_encoding: "UTF8".to_string(),
        timezone: "UTC".to_string(),
        statement_timeout: 300_000,
        lock_timeout: 30_000,
        idle_in_transaction_session_timeout: 60_000,
        application_name: "polysync_migrations".to_string(),
    });

/// Creates the `polysync` schema on the primary store and applies pending migrations.
///
/// The search path is pinned to `polysync` so the `_sqlx_migrations` bookkeeping table lives
/// next to the change log instead of in the application's schema.
pub async fn apply_polysync_migrations(
    connection_config: &PgConnectionConfig,
) -> Result<(), sqlx::migrate::MigrateError> {
    let options = connection_config.with_db(Some(&*MIGRATION_CONNECTION_OPTIONS));

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists polysync;").await?;
                conn.execute("set search_path = 'polysync';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying polysync migrations");

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("polysync migrations applied");

    Ok(())
}
