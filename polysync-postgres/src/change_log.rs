use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow};
use std::time::Duration;
use uuid::Uuid;

/// A row of `polysync.change_log`.
#[derive(Debug, Clone, FromRow)]
pub struct ChangeLogRow {
    pub id: Uuid,
    pub table_name: String,
    pub operation: String,
    pub old_record: Option<serde_json::Value>,
    pub new_record: Option<serde_json::Value>,
    pub captured_at: DateTime<Utc>,
    pub transaction_id: String,
    pub processed: bool,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

/// Claims up to `batch_size` unprocessed rows for this caller.
///
/// Rows are locked with `for update skip locked` while the lease is written, so concurrent
/// processors never claim the same row twice. A row stays invisible to other claims until
/// its lease expires or it is marked processed or failed. Rows that exhausted `max_retries`
/// or wait for their backoff delay are skipped. The result is ordered by capture time.
pub async fn claim_pending_changes(
    pool: &PgPool,
    batch_size: i64,
    max_retries: i32,
    lease: Duration,
) -> sqlx::Result<Vec<ChangeLogRow>> {
    let mut rows = sqlx::query_as::<_, ChangeLogRow>(
        r#"
        with claimable as (
            select id
            from polysync.change_log
            where processed = false
              and retry_count < $2
              and (next_attempt_at is null or next_attempt_at <= now())
              and (claimed_until is null or claimed_until < now())
            order by captured_at, id
            limit $1
            for update skip locked
        )
        update polysync.change_log c
        set claimed_until = now() + make_interval(secs => $3)
        from claimable
        where c.id = claimable.id
        returning c.id, c.table_name, c.operation, c.old_record, c.new_record, c.captured_at,
                  c.transaction_id, c.processed, c.error_message, c.retry_count
        "#,
    )
    .bind(batch_size)
    .bind(max_retries)
    .bind(lease.as_secs_f64())
    .fetch_all(pool)
    .await?;

    // `returning` does not preserve the order of the claiming subquery.
    rows.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));

    Ok(rows)
}

pub async fn mark_change_processed(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update polysync.change_log
        set processed = true, processed_at = now(), error_message = null, claimed_until = null
        where id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Records a failed attempt and releases the lease. Returns the new retry count.
pub async fn mark_change_failed(
    pool: &PgPool,
    id: Uuid,
    error_message: &str,
    next_attempt_at: DateTime<Utc>,
) -> sqlx::Result<i32> {
    sqlx::query_scalar(
        r#"
        update polysync.change_log
        set retry_count = retry_count + 1,
            error_message = $2,
            next_attempt_at = $3,
            claimed_until = null
        where id = $1
        returning retry_count
        "#,
    )
    .bind(id)
    .bind(error_message)
    .bind(next_attempt_at)
    .fetch_one(pool)
    .await
}

/// Resets a row flagged after exhausting its retries so it is claimed again.
pub async fn requeue_change(pool: &PgPool, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        update polysync.change_log
        set retry_count = 0, error_message = null, next_attempt_at = null, claimed_until = null
        where id = $1 and processed = false
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Returns unprocessed rows whose retries are exhausted, oldest first.
pub async fn get_flagged_changes(
    pool: &PgPool,
    max_retries: i32,
    limit: i64,
) -> sqlx::Result<Vec<ChangeLogRow>> {
    sqlx::query_as::<_, ChangeLogRow>(
        r#"
        select id, table_name, operation, old_record, new_record, captured_at,
               transaction_id, processed, error_message, retry_count
        from polysync.change_log
        where processed = false and retry_count >= $1
        order by captured_at, id
        limit $2
        "#,
    )
    .bind(max_retries)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Counts rows still eligible for processing.
pub async fn count_pending_changes(pool: &PgPool, max_retries: i32) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"
        select count(*)
        from polysync.change_log
        where processed = false and retry_count < $1
        "#,
    )
    .bind(max_retries)
    .fetch_one(pool)
    .await
}

/// Deletes processed rows captured before `cutoff`. Unprocessed rows are never deleted.
pub async fn delete_processed_changes_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        delete from polysync.change_log
        where processed = true and captured_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
