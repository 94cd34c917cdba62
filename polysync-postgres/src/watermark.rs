use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn get_watermark(pool: &PgPool, table_pair: &str) -> sqlx::Result<Option<DateTime<Utc>>> {
    sqlx::query_scalar(
        r#"
        select watermark_value
        from polysync.sync_watermarks
        where table_pair = $1
        "#,
    )
    .bind(table_pair)
    .fetch_optional(pool)
    .await
}

/// Moves the watermark of a table pair forward and returns the stored value.
///
/// The stored value never decreases: advancing to an older timestamp keeps the current one.
pub async fn advance_watermark(
    pool: &PgPool,
    table_pair: &str,
    value: DateTime<Utc>,
) -> sqlx::Result<DateTime<Utc>> {
    sqlx::query_scalar(
        r#"
        insert into polysync.sync_watermarks (table_pair, watermark_value, updated_at)
        values ($1, $2, now())
        on conflict (table_pair) do update
        set watermark_value = greatest(sync_watermarks.watermark_value, excluded.watermark_value),
            updated_at = now()
        returning watermark_value
        "#,
    )
    .bind(table_pair)
    .bind(value)
    .fetch_one(pool)
    .await
}
