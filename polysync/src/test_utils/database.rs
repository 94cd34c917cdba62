use polysync_postgres::test_utils::{PgDatabase, local_pg_connection_config};

/// Creates a migrated primary database with a `public.users` table.
///
/// Returns `None` when no test Postgres server is configured, so callers can skip.
pub async fn spawn_primary_database() -> Option<PgDatabase> {
    let config = local_pg_connection_config()?;
    let database = PgDatabase::new(config).await;
    database
        .execute(
            "create table public.users (
                id bigint primary key,
                name text not null,
                updated_at timestamptz not null default now()
            )",
        )
        .await;

    Some(database)
}
