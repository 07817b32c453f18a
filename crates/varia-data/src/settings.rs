//! Settings table queries shared across crates.
//!
//! Every helper is generic over an [`Executor`] so it can run against a pool
//! or inside a transaction; multi-row flows (reordering, restore) are driven
//! by the service layer, which owns the transaction boundaries.

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, PgPool, Postgres};

use crate::error::{DataError, Result};

/// LISTEN/NOTIFY channel for settings change broadcasts.
pub const SETTINGS_CHANNEL: &str = "varia_settings_changed";

fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}

/// Apply all settings-related migrations.
///
/// # Errors
///
/// Returns an error when migration execution fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|source| DataError::MigrationFailed { source })?;
    Ok(())
}

/// Raw projection of the `settings` table.
#[derive(Debug, Clone, FromRow)]
pub struct SettingRow {
    /// Unique settings key; primary key of the table.
    pub key: String,
    /// Field-type identifier controlling value interpretation.
    #[sqlx(rename = "type")]
    pub type_id: String,
    /// Group the setting is displayed and ordered under.
    pub group: String,
    /// Ordering rank within the group.
    pub position: i64,
    /// Human-readable label.
    pub name: String,
    /// Optional help text.
    pub description: Option<String>,
    /// Whether `value` holds a JSON-encoded compound structure.
    pub is_array_value: bool,
    /// Stored value, opaque at this layer.
    pub value: Option<String>,
    /// JSON-encoded construction options, opaque at this layer.
    pub options: Option<String>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Column values for a freshly created setting.
#[derive(Debug, Clone, Copy)]
pub struct NewSettingRow<'a> {
    /// Normalized settings key.
    pub key: &'a str,
    /// Field-type identifier.
    pub type_id: &'a str,
    /// Owning group.
    pub group: &'a str,
    /// Assigned position within the group.
    pub position: i64,
    /// Display name.
    pub name: &'a str,
    /// Optional help text.
    pub description: Option<&'a str>,
    /// JSON-encoded options payload.
    pub options: Option<&'a str>,
}

/// Replacement values for the mutable columns of an existing setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingFieldUpdate<'a> {
    /// Display name.
    pub name: &'a str,
    /// Owning group.
    pub group: &'a str,
    /// Field-type identifier.
    pub type_id: &'a str,
    /// Optional help text.
    pub description: Option<&'a str>,
    /// JSON-encoded options payload.
    pub options: Option<&'a str>,
}

/// Load a single setting by key.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_setting<'e, E>(executor: E, key: &str) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>("SELECT * FROM settings WHERE key = $1")
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("fetch setting"))
}

/// Load a single setting by key, locking the row for the transaction.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_setting_for_update<'e, E>(executor: E, key: &str) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>("SELECT * FROM settings WHERE key = $1 FOR UPDATE")
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("lock setting"))
}

/// Load every setting ordered by group, position, and key.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_all_settings<'e, E>(executor: E) -> Result<Vec<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "SELECT * FROM settings ORDER BY \"group\" ASC, \"position\" ASC, key ASC",
    )
    .fetch_all(executor)
    .await
    .map_err(map_query_err("fetch all settings"))
}

/// Serialize concurrent writers of one group for the current transaction.
///
/// Position assignment is a read-then-write sequence; the advisory lock keeps
/// two concurrent creates in the same group from computing the same maximum.
///
/// # Errors
///
/// Returns an error when the lock statement fails.
pub async fn lock_group<'e, E>(executor: E, group: &str) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext('settings'), hashtext($1))")
        .bind(group)
        .execute(executor)
        .await
        .map_err(map_query_err("lock settings group"))?;
    Ok(())
}

/// Compute the next free position in a group (1 when the group is empty).
///
/// Callers must hold the group advisory lock in the same transaction.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn next_position<'e, E>(executor: E, group: &str) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(\"position\"), 0) + 1 FROM settings WHERE \"group\" = $1",
    )
    .bind(group)
    .fetch_one(executor)
    .await
    .map_err(map_query_err("compute next position"))
}

/// Insert a new setting and return the stored row.
///
/// # Errors
///
/// Returns an error when the insert fails (including key conflicts).
pub async fn insert_setting<'e, E>(executor: E, row: &NewSettingRow<'_>) -> Result<SettingRow>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "INSERT INTO settings (key, type, \"group\", \"position\", name, description, options) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(row.key)
    .bind(row.type_id)
    .bind(row.group)
    .bind(row.position)
    .bind(row.name)
    .bind(row.description)
    .bind(row.options)
    .fetch_one(executor)
    .await
    .map_err(map_query_err("insert setting"))
}

/// Replace the mutable columns of a setting and return the stored row.
///
/// # Errors
///
/// Returns an error when the update fails; `Ok(None)` when the key is absent.
pub async fn update_setting_fields<'e, E>(
    executor: E,
    key: &str,
    update: &SettingFieldUpdate<'_>,
) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "UPDATE settings \
         SET name = $2, \"group\" = $3, type = $4, description = $5, options = $6, \
             updated_at = now() \
         WHERE key = $1 RETURNING *",
    )
    .bind(key)
    .bind(update.name)
    .bind(update.group)
    .bind(update.type_id)
    .bind(update.description)
    .bind(update.options)
    .fetch_optional(executor)
    .await
    .map_err(map_query_err("update setting fields"))
}

/// Rename a setting, keeping every other column intact.
///
/// # Errors
///
/// Returns an error when the update fails; `Ok(None)` when `old_key` is absent.
pub async fn rename_setting<'e, E>(
    executor: E,
    old_key: &str,
    new_key: &str,
) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "UPDATE settings SET key = $2, updated_at = now() WHERE key = $1 RETURNING *",
    )
    .bind(old_key)
    .bind(new_key)
    .fetch_optional(executor)
    .await
    .map_err(map_query_err("rename setting"))
}

/// Persist a new value and its array/scalar discriminator.
///
/// # Errors
///
/// Returns an error when the update fails; `Ok(None)` when the key is absent.
pub async fn update_setting_value<'e, E>(
    executor: E,
    key: &str,
    is_array_value: bool,
    value: Option<&str>,
) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "UPDATE settings SET is_array_value = $2, value = $3, updated_at = now() \
         WHERE key = $1 RETURNING *",
    )
    .bind(key)
    .bind(is_array_value)
    .bind(value)
    .fetch_optional(executor)
    .await
    .map_err(map_query_err("update setting value"))
}

/// Remove a setting row.
///
/// # Errors
///
/// Returns an error when the delete fails.
pub async fn delete_setting<'e, E>(executor: E, key: &str) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM settings WHERE key = $1")
        .bind(key)
        .execute(executor)
        .await
        .map_err(map_query_err("delete setting"))?;
    Ok(result.rows_affected())
}

/// Find the closest setting below the given position in a group, locked.
///
/// Ties on `position` (a corrupt state) resolve to the lowest key so the
/// choice stays deterministic.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_next_in_group<'e, E>(
    executor: E,
    group: &str,
    position: i64,
) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "SELECT * FROM settings WHERE \"group\" = $1 AND \"position\" > $2 \
         ORDER BY \"position\" ASC, key ASC LIMIT 1 FOR UPDATE",
    )
    .bind(group)
    .bind(position)
    .fetch_optional(executor)
    .await
    .map_err(map_query_err("fetch next setting in group"))
}

/// Find the closest setting above the given position in a group, locked.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_prev_in_group<'e, E>(
    executor: E,
    group: &str,
    position: i64,
) -> Result<Option<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(
        "SELECT * FROM settings WHERE \"group\" = $1 AND \"position\" < $2 \
         ORDER BY \"position\" DESC, key ASC LIMIT 1 FOR UPDATE",
    )
    .bind(group)
    .bind(position)
    .fetch_optional(executor)
    .await
    .map_err(map_query_err("fetch previous setting in group"))
}

/// Move a setting to a new position.
///
/// # Errors
///
/// Returns an error when the update fails.
pub async fn update_position<'e, E>(executor: E, key: &str, position: i64) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE settings SET \"position\" = $2, updated_at = now() WHERE key = $1")
        .bind(key)
        .bind(position)
        .execute(executor)
        .await
        .map_err(map_query_err("update setting position"))?;
    Ok(())
}

/// Remove every setting whose key appears in `keys`.
///
/// # Errors
///
/// Returns an error when the delete fails.
pub async fn delete_settings_by_keys<'e, E>(executor: E, keys: &[String]) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM settings WHERE key = ANY($1)")
        .bind(keys)
        .execute(executor)
        .await
        .map_err(map_query_err("delete settings by keys"))?;
    Ok(result.rows_affected())
}

/// Insert a row restored from a backup document, timestamps included.
///
/// # Errors
///
/// Returns an error when the insert fails.
pub async fn insert_restored_setting<'e, E>(executor: E, row: &SettingRow) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO settings \
         (key, type, \"group\", \"position\", name, description, is_array_value, value, options, \
          created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&row.key)
    .bind(&row.type_id)
    .bind(&row.group)
    .bind(row.position)
    .bind(&row.name)
    .bind(row.description.as_deref())
    .bind(row.is_array_value)
    .bind(row.value.as_deref())
    .bind(row.options.as_deref())
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(executor)
    .await
    .map_err(map_query_err("insert restored setting"))?;
    Ok(())
}

/// Bump the settings revision and return the new value.
///
/// # Errors
///
/// Returns an error when the update fails.
pub async fn bump_revision<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        "UPDATE settings_revision SET revision = revision + 1 WHERE id = 1 RETURNING revision",
    )
    .fetch_one(executor)
    .await
    .map_err(map_query_err("bump settings revision"))
}

/// Read the current settings revision.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_revision<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar("SELECT revision FROM settings_revision WHERE id = 1")
        .fetch_one(executor)
        .await
        .map_err(map_query_err("fetch settings revision"))
}

/// Broadcast a change payload on the settings channel.
///
/// Delivery follows the surrounding transaction: a notification queued inside
/// a transaction is only sent on commit.
///
/// # Errors
///
/// Returns an error when the notify call fails.
pub async fn notify_change<'e, E>(executor: E, payload: &str) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(SETTINGS_CHANNEL)
        .bind(payload)
        .execute(executor)
        .await
        .map_err(map_query_err("notify settings change"))?;
    Ok(())
}
