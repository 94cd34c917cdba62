//! Capture function and trigger generation.
//!
//! Every watched table gets a PL/pgSQL function appending to `polysync.change_log` and an
//! `after insert or update or delete` row trigger calling it. Since the trigger runs inside
//! the writer's transaction, a change record commits or rolls back together with the write
//! it describes.

use pg_escape::{quote_identifier, quote_literal};
use polysync_config::shared::TableCaptureConfig;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::POLYSYNC_SCHEMA;

/// Name of the capture trigger. Trigger names are scoped to their table, so one name is
/// enough for every watched table.
pub const CAPTURE_TRIGGER_NAME: &str = "polysync_capture";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("table `{0}` captures no columns once excluded columns are removed")]
    EmptyColumnSet(String),

    #[error("failed to install capture for `{table}`: {source}")]
    Install {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to remove capture for `{table}`: {source}")]
    Remove {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Column set serialized into change records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureColumns {
    /// Whole row minus the excluded columns.
    All { excluded: Vec<String> },
    /// Only the listed columns, excluded columns already removed.
    Only(Vec<String>),
}

impl CaptureColumns {
    /// Resolves an allow-list and a deny-list into the captured column set.
    ///
    /// The deny-list is applied last, so a column in both lists is dropped.
    pub fn resolve(config: &TableCaptureConfig) -> Result<Self, CaptureError> {
        let excluded = &config.excluded_columns;

        if config.captured_columns.is_empty() {
            return Ok(CaptureColumns::All {
                excluded: excluded.clone(),
            });
        }

        let mut columns: Vec<String> = Vec::with_capacity(config.captured_columns.len());
        for column in &config.captured_columns {
            if !excluded.contains(column) && !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        if columns.is_empty() {
            return Err(CaptureError::EmptyColumnSet(config.table.clone()));
        }

        Ok(CaptureColumns::Only(columns))
    }

    pub fn includes(&self, column: &str) -> bool {
        match self {
            CaptureColumns::All { excluded } => !excluded.iter().any(|c| c == column),
            CaptureColumns::Only(columns) => columns.iter().any(|c| c == column),
        }
    }

    /// Builds the jsonb expression serializing `record` (`new` or `old`).
    fn row_expression(&self, record: &str) -> String {
        match self {
            CaptureColumns::All { excluded } if excluded.is_empty() => {
                format!("to_jsonb({record})")
            }
            CaptureColumns::All { excluded } => {
                let keys = excluded
                    .iter()
                    .map(|column| quote_literal(column))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("to_jsonb({record}) - array[{keys}]::text[]")
            }
            CaptureColumns::Only(columns) => {
                let pairs = columns
                    .iter()
                    .map(|column| {
                        format!(
                            "{}, {record}.{}",
                            quote_literal(column),
                            quote_identifier(column)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("jsonb_build_object({pairs})")
            }
        }
    }
}

/// Number of characters kept from the sanitized `schema_table` in capture function names.
const FUNCTION_NAME_PREFIX_LEN: usize = 36;

/// Number of hex characters of the table digest appended to capture function names.
const FUNCTION_NAME_DIGEST_LEN: usize = 16;

/// Returns the unqualified name of the capture function of a table.
///
/// The readable part is lowercased and sanitized, so distinct tables such as `"Users"` and
/// `users` share it. The suffix is a digest of the exact schema and table names, which keeps
/// one function per table. The name stays within the 63 bytes of a Postgres identifier.
pub fn capture_function_name(config: &TableCaptureConfig) -> String {
    let sanitized: String = format!("{}_{}", config.schema, config.table)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(FUNCTION_NAME_PREFIX_LEN)
        .collect();

    // Identifiers cannot contain a nul byte, so the digest input is unambiguous.
    let mut hasher = Sha256::new();
    hasher.update(config.schema.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.table.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    format!(
        "capture_{sanitized}_{}",
        &digest[..FUNCTION_NAME_DIGEST_LEN]
    )
}

fn qualified_table(config: &TableCaptureConfig) -> String {
    format!(
        "{}.{}",
        quote_identifier(&config.schema),
        quote_identifier(&config.table)
    )
}

fn qualified_function(config: &TableCaptureConfig) -> String {
    format!(
        "{POLYSYNC_SCHEMA}.{}",
        quote_identifier(&capture_function_name(config))
    )
}

/// Builds the `create or replace function` statement of a table's capture function.
pub fn build_capture_function_sql(config: &TableCaptureConfig) -> Result<String, CaptureError> {
    let columns = CaptureColumns::resolve(config)?;
    let function = qualified_function(config);
    let table = quote_literal(&config.table);
    let new_row = columns.row_expression("new");
    let old_row = columns.row_expression("old");

    Ok(format!(
        r#"create or replace function {function}() returns trigger
language plpgsql
as $polysync$
begin
    if tg_op = 'INSERT' then
        insert into {POLYSYNC_SCHEMA}.change_log (table_name, operation, old_record, new_record)
        values ({table}, 'INSERT', null, {new_row});
        return new;
    elsif tg_op = 'UPDATE' then
        insert into {POLYSYNC_SCHEMA}.change_log (table_name, operation, old_record, new_record)
        values ({table}, 'UPDATE', {old_row}, {new_row});
        return new;
    elsif tg_op = 'DELETE' then
        insert into {POLYSYNC_SCHEMA}.change_log (table_name, operation, old_record, new_record)
        values ({table}, 'DELETE', {old_row}, null);
        return old;
    end if;
    return null;
end;
$polysync$;"#
    ))
}

/// Builds the statements (re)binding the capture function to its table.
pub fn build_install_trigger_sql(config: &TableCaptureConfig) -> [String; 2] {
    let table = qualified_table(config);
    let function = qualified_function(config);

    [
        format!("drop trigger if exists {CAPTURE_TRIGGER_NAME} on {table};"),
        format!(
            "create trigger {CAPTURE_TRIGGER_NAME} after insert or update or delete on {table} for each row execute function {function}();"
        ),
    ]
}

/// Builds the statements removing capture from a table.
pub fn build_drop_capture_sql(config: &TableCaptureConfig) -> [String; 2] {
    [
        format!(
            "drop trigger if exists {CAPTURE_TRIGGER_NAME} on {};",
            qualified_table(config)
        ),
        format!("drop function if exists {}();", qualified_function(config)),
    ]
}

/// Installs or replaces the capture function and trigger of a table in one transaction.
///
/// Safe to call repeatedly: the function is replaced and the trigger dropped before it is
/// recreated, so a second call converges on the same objects.
pub async fn install_capture(pool: &PgPool, config: &TableCaptureConfig) -> Result<(), CaptureError> {
    let function_sql = build_capture_function_sql(config)?;
    let [drop_trigger_sql, create_trigger_sql] = build_install_trigger_sql(config);

    let install = async {
        let mut tx = pool.begin().await?;
        sqlx::query(&function_sql).execute(&mut *tx).await?;
        sqlx::query(&drop_trigger_sql).execute(&mut *tx).await?;
        sqlx::query(&create_trigger_sql).execute(&mut *tx).await?;
        tx.commit().await
    };

    install.await.map_err(|source| CaptureError::Install {
        table: config.table.clone(),
        source,
    })?;

    info!(schema = %config.schema, table = %config.table, "capture trigger installed");

    Ok(())
}

/// Drops the capture trigger and function of a table, if present.
pub async fn drop_capture(pool: &PgPool, config: &TableCaptureConfig) -> Result<(), CaptureError> {
    let [drop_trigger_sql, drop_function_sql] = build_drop_capture_sql(config);

    let remove = async {
        let mut tx = pool.begin().await?;
        sqlx::query(&drop_trigger_sql).execute(&mut *tx).await?;
        sqlx::query(&drop_function_sql).execute(&mut *tx).await?;
        tx.commit().await
    };

    remove.await.map_err(|source| CaptureError::Remove {
        table: config.table.clone(),
        source,
    })?;

    info!(schema = %config.schema, table = %config.table, "capture trigger removed");

    Ok(())
}

/// Returns whether the capture trigger is currently bound to the table.
pub async fn capture_installed(pool: &PgPool, config: &TableCaptureConfig) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        r#"
        select exists (
            select 1
            from pg_trigger t
            join pg_class c on c.oid = t.tgrelid
            join pg_namespace n on n.oid = c.relnamespace
            where n.nspname = $1 and c.relname = $2 and t.tgname = $3 and not t.tgisinternal
        )
        "#,
    )
    .bind(&config.schema)
    .bind(&config.table)
    .bind(CAPTURE_TRIGGER_NAME)
    .fetch_one(pool)
    .await
}
