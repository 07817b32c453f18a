//! Database-backed settings registry built on `PostgreSQL`.
//!
//! Layout: `model.rs` (typed settings models), `codec.rs` (value codec),
//! `fields.rs` (field-type catalog), with this module hosting the
//! `SettingsRegistry`/`SettingsService` implementation and persistence glue.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};
use varia_data::settings as data;
use varia_data::settings::{NewSettingRow, SettingFieldUpdate};

use crate::codec;
use crate::error::{SettingsError, SettingsResult};
use crate::fields;
use crate::model::{
    AttachmentRef, AttachmentResolution, ChangeOperation, Direction, EditableField, NewSetting,
    RestoreReport, Setting, SettingUpdate, SettingValue, SettingsChange, normalize_key,
};
use crate::watcher::{SettingsStream, SettingsWatcher};

/// External blob store holding the files referenced by file-typed settings.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Resolve an attachment id to its stored reference, if any.
    async fn resolve(&self, id: &str) -> anyhow::Result<Option<AttachmentRef>>;
    /// Permanently release a stored attachment.
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait]
/// Abstraction over the settings registry consumed by the admin UI and host
/// application.
pub trait SettingsRegistry: Send + Sync {
    /// Create a setting, assigning the next position in its group.
    async fn create(&self, new_setting: NewSetting) -> SettingsResult<Setting>;
    /// Replace the mutable fields of an existing setting.
    async fn update(&self, key: &str, update: SettingUpdate) -> SettingsResult<Setting>;
    /// Rename a setting, keeping every other field intact.
    async fn rename(&self, old_key: &str, new_key: &str) -> SettingsResult<Setting>;
    /// Save a new value; returns `None` when the value is unchanged.
    async fn set_value(
        &self,
        key: &str,
        new_value: serde_json::Value,
        old_value: Option<&str>,
    ) -> SettingsResult<Option<Setting>>;
    /// Delete a setting, releasing any referenced attachments first.
    async fn delete(&self, key: &str) -> SettingsResult<Setting>;
    /// Swap a setting with its neighbour in the given direction; no-op at the
    /// edges of the group.
    async fn move_setting(&self, key: &str, direction: Direction) -> SettingsResult<()>;
    /// Serialize every setting into a portable backup document.
    async fn backup(&self) -> SettingsResult<String>;
    /// Restore settings from a backup document, replacing matching keys.
    async fn restore(&self, data: &[u8]) -> SettingsResult<RestoreReport>;
    /// Resolve a setting's current value for the host application.
    async fn resolve_value(
        &self,
        key: &str,
        default: SettingValue,
        resolution: AttachmentResolution,
    ) -> SettingsResult<SettingValue>;
    /// Load every setting ordered by group and position.
    async fn list(&self) -> SettingsResult<Vec<Setting>>;
    /// Load a single setting by key.
    async fn find(&self, key: &str) -> SettingsResult<Option<Setting>>;
    /// Subscribe to change notifications.
    async fn subscribe_changes(&self) -> SettingsResult<SettingsStream>;
}

/// Concrete implementation backed by `PostgreSQL` + `SQLx`.
#[derive(Clone)]
pub struct SettingsService {
    pool: sqlx::PgPool,
    database_url: String,
    attachments: Arc<dyn AttachmentStore>,
}

impl SettingsService {
    /// Establish a connection pool and ensure migrations are applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the `PostgreSQL` connection cannot be established
    /// or migrations fail to run.
    #[instrument(name = "settings_service.connect", skip(database_url, attachments))]
    pub async fn connect(
        database_url: impl Into<String>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> SettingsResult<Self> {
        let database_url = database_url.into();
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&database_url)
            .await
            .map_err(|source| SettingsError::Database {
                operation: "connect to settings database",
                source,
            })?;

        data::run_migrations(&pool)
            .await
            .map_err(data_err("run settings migrations"))?;

        Ok(Self {
            pool,
            database_url,
            attachments,
        })
    }

    /// Access the underlying `SQLx` connection pool.
    #[must_use]
    pub const fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    /// Read the current settings revision.
    ///
    /// # Errors
    ///
    /// Returns an error when the revision query fails.
    pub async fn revision(&self) -> SettingsResult<i64> {
        data::fetch_revision(&self.pool)
            .await
            .map_err(data_err("fetch settings revision"))
    }

    /// Subscribe to settings changes with a polling fallback.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial revision read fails; a failed LISTEN
    /// attachment degrades to polling only.
    pub async fn watch_settings(
        &self,
        poll_interval: Duration,
    ) -> SettingsResult<(i64, SettingsWatcher)> {
        let revision = self.revision().await?;
        let stream = match self.subscribe_changes().await {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(error = ?err, "failed to initialize LISTEN stream; polling only");
                None
            }
        };

        let watcher = SettingsWatcher::new(self.clone(), stream, poll_interval, revision);
        Ok((revision, watcher))
    }

    /// Resolve a value with attachments rendered as URLs, the common case for
    /// templates and host-application reads.
    ///
    /// # Errors
    ///
    /// Returns an error when the lookup or attachment resolution fails.
    pub async fn get(
        &self,
        key: &str,
        default: impl Into<SettingValue> + Send,
    ) -> SettingsResult<SettingValue> {
        self.resolve_value(key, default.into(), AttachmentResolution::Urls)
            .await
    }

    async fn resolve_attachments(
        &self,
        value: Option<&str>,
        default: SettingValue,
        resolution: AttachmentResolution,
    ) -> SettingsResult<SettingValue> {
        let ids = codec::attachment_ids(value);
        let mut refs = Vec::with_capacity(ids.len());
        for id in &ids {
            let resolved = self.attachments.resolve(id).await.map_err(|source| {
                SettingsError::Attachment {
                    operation: "resolve attachment",
                    source: source.into(),
                }
            })?;
            match resolved {
                Some(reference) => refs.push(reference),
                None => warn!(id = %id, "stored attachment id did not resolve"),
            }
        }

        if refs.is_empty() {
            return Ok(default);
        }
        if refs.len() == 1 {
            let single = refs.remove(0);
            return Ok(match resolution {
                AttachmentResolution::Urls => SettingValue::Url(single.url),
                AttachmentResolution::Refs => SettingValue::Attachment(single),
            });
        }
        Ok(match resolution {
            AttachmentResolution::Urls => {
                SettingValue::Urls(refs.into_iter().map(|reference| reference.url).collect())
            }
            AttachmentResolution::Refs => SettingValue::Attachments(refs),
        })
    }
}

#[async_trait]
impl SettingsRegistry for SettingsService {
    async fn create(&self, new_setting: NewSetting) -> SettingsResult<Setting> {
        require("key", &new_setting.key)?;
        require("type", &new_setting.type_id)?;
        require("group", &new_setting.group)?;
        require("name", &new_setting.name)?;

        let key = normalize_key(&new_setting.key);
        let options = new_setting
            .options
            .unwrap_or_else(|| fields::default_options(&new_setting.type_id));
        let options = encode_options(&options)?;

        let mut tx = begin(&self.pool).await?;
        data::lock_group(tx.as_mut(), &new_setting.group)
            .await
            .map_err(data_err("lock settings group"))?;

        if data::fetch_setting(tx.as_mut(), &key)
            .await
            .map_err(data_err("check for duplicate key"))?
            .is_some()
        {
            return Err(SettingsError::DuplicateKey { key });
        }

        let position = data::next_position(tx.as_mut(), &new_setting.group)
            .await
            .map_err(data_err("compute next position"))?;
        let row = data::insert_setting(
            tx.as_mut(),
            &NewSettingRow {
                key: &key,
                type_id: &new_setting.type_id,
                group: &new_setting.group,
                position,
                name: &new_setting.name,
                description: new_setting.description.as_deref(),
                options: Some(&options),
            },
        )
        .await
        .map_err(data_err("insert setting"))?;

        record_change(&mut tx, ChangeOperation::Created, &key)
            .await
            .map_err(data_err("record settings change"))?;
        commit(tx).await?;

        info!(key = %key, group = %new_setting.group, position, "setting created");
        Ok(row.into())
    }

    async fn update(&self, key: &str, update: SettingUpdate) -> SettingsResult<Setting> {
        require("name", &update.name)?;
        require("group", &update.group)?;
        require("type", &update.type_id)?;

        let options = encode_options(&update.options)?;
        let mut tx = begin(&self.pool).await?;
        let row = data::update_setting_fields(
            tx.as_mut(),
            key,
            &SettingFieldUpdate {
                name: &update.name,
                group: &update.group,
                type_id: &update.type_id,
                description: update.description.as_deref(),
                options: Some(&options),
            },
        )
        .await
        .map_err(data_err("update setting fields"))?
        .ok_or_else(|| not_found(key))?;

        record_change(&mut tx, ChangeOperation::Updated, key)
            .await
            .map_err(data_err("record settings change"))?;
        commit(tx).await?;

        info!(key, "setting updated");
        Ok(row.into())
    }

    async fn rename(&self, old_key: &str, new_key: &str) -> SettingsResult<Setting> {
        require("key", new_key)?;
        let new_key = normalize_key(new_key);

        let mut tx = begin(&self.pool).await?;
        if data::fetch_setting_for_update(tx.as_mut(), old_key)
            .await
            .map_err(data_err("lock setting"))?
            .is_none()
        {
            // A rename is driven by the prior key the caller supplied, so a
            // stale key is a caller error rather than a missing resource.
            return Err(SettingsError::InvalidField {
                field: "old_key",
                value: Some(old_key.to_string()),
                reason: "does not resolve to an existing setting",
            });
        }
        if new_key != old_key
            && data::fetch_setting(tx.as_mut(), &new_key)
                .await
                .map_err(data_err("check for duplicate key"))?
                .is_some()
        {
            return Err(SettingsError::DuplicateKey { key: new_key });
        }

        let row = data::rename_setting(tx.as_mut(), old_key, &new_key)
            .await
            .map_err(data_err("rename setting"))?
            .ok_or_else(|| not_found(old_key))?;

        record_change(&mut tx, ChangeOperation::Renamed, &new_key)
            .await
            .map_err(data_err("record settings change"))?;
        commit(tx).await?;

        info!(old_key, new_key = %new_key, "setting renamed");
        Ok(row.into())
    }

    async fn set_value(
        &self,
        key: &str,
        new_value: serde_json::Value,
        old_value: Option<&str>,
    ) -> SettingsResult<Option<Setting>> {
        let mut tx = begin(&self.pool).await?;
        let current = data::fetch_setting_for_update(tx.as_mut(), key)
            .await
            .map_err(data_err("lock setting"))?
            .ok_or_else(|| not_found(key))?;

        if codec::values_equal(&new_value, old_value, current.is_array_value) {
            rollback(tx).await?;
            return Ok(None);
        }

        let encoded = codec::encode(&new_value);
        let row = data::update_setting_value(
            tx.as_mut(),
            key,
            encoded.is_array_value,
            encoded.value.as_deref(),
        )
        .await
        .map_err(data_err("update setting value"))?
        .ok_or_else(|| not_found(key))?;

        record_change(&mut tx, ChangeOperation::ValueSaved, key)
            .await
            .map_err(data_err("record settings change"))?;
        commit(tx).await?;

        info!(key, is_array_value = encoded.is_array_value, "setting value saved");
        Ok(Some(row.into()))
    }

    async fn delete(&self, key: &str) -> SettingsResult<Setting> {
        let mut tx = begin(&self.pool).await?;
        let current = data::fetch_setting_for_update(tx.as_mut(), key)
            .await
            .map_err(data_err("lock setting"))?
            .ok_or_else(|| not_found(key))?;

        if fields::is_file_field(&current.type_id) {
            for id in codec::attachment_ids(current.value.as_deref()) {
                self.attachments.delete(&id).await.map_err(|source| {
                    SettingsError::Attachment {
                        operation: "release attachment",
                        source: source.into(),
                    }
                })?;
            }
        }

        data::delete_setting(tx.as_mut(), key)
            .await
            .map_err(data_err("delete setting"))?;
        record_change(&mut tx, ChangeOperation::Deleted, key)
            .await
            .map_err(data_err("record settings change"))?;
        commit(tx).await?;

        info!(key, "setting deleted");
        Ok(current.into())
    }

    async fn move_setting(&self, key: &str, direction: Direction) -> SettingsResult<()> {
        let mut tx = begin(&self.pool).await?;
        let current = data::fetch_setting_for_update(tx.as_mut(), key)
            .await
            .map_err(op_failed("move setting"))?
            .ok_or_else(|| not_found(key))?;

        let neighbour = match direction {
            Direction::Down => {
                data::fetch_next_in_group(tx.as_mut(), &current.group, current.position).await
            }
            Direction::Up => {
                data::fetch_prev_in_group(tx.as_mut(), &current.group, current.position).await
            }
        }
        .map_err(op_failed("move setting"))?;

        let Some(neighbour) = neighbour else {
            // Already first/last in its group.
            rollback(tx).await?;
            return Ok(());
        };

        if neighbour.position == current.position {
            warn!(
                key,
                neighbour = %neighbour.key,
                position = current.position,
                "settings share a position; ordering within the group is corrupt"
            );
        }

        data::update_position(tx.as_mut(), &current.key, neighbour.position)
            .await
            .map_err(op_failed("move setting"))?;
        data::update_position(tx.as_mut(), &neighbour.key, current.position)
            .await
            .map_err(op_failed("move setting"))?;
        record_change(&mut tx, ChangeOperation::Moved, key)
            .await
            .map_err(op_failed("move setting"))?;
        tx.commit()
            .await
            .map_err(|source| SettingsError::OperationFailed {
                operation: "move setting",
                source: Box::new(source),
            })?;

        info!(
            key,
            direction = direction.as_str(),
            swapped_with = %neighbour.key,
            "setting moved"
        );
        Ok(())
    }

    async fn backup(&self) -> SettingsResult<String> {
        let rows = data::fetch_all_settings(&self.pool)
            .await
            .map_err(data_err("fetch settings for backup"))?;
        let settings: Vec<Setting> = rows.into_iter().map(Setting::from).collect();
        let document = serde_json::to_string_pretty(&settings).map_err(|source| {
            SettingsError::OperationFailed {
                operation: "serialize backup",
                source: Box::new(source),
            }
        })?;

        info!(count = settings.len(), "settings backup produced");
        Ok(document)
    }

    async fn restore(&self, data_bytes: &[u8]) -> SettingsResult<RestoreReport> {
        let incoming: Vec<Setting> = serde_json::from_slice(data_bytes).map_err(|err| {
            warn!(error = %err, "rejected malformed settings backup");
            SettingsError::InvalidBackup {
                reason: "invalid file".to_string(),
            }
        })?;

        let keys: Vec<String> = incoming.iter().map(|setting| setting.key.clone()).collect();

        let mut tx = begin(&self.pool).await?;
        data::delete_settings_by_keys(tx.as_mut(), &keys)
            .await
            .map_err(op_failed("restore settings"))?;
        for setting in &incoming {
            data::insert_restored_setting(tx.as_mut(), &to_row(setting))
                .await
                .map_err(op_failed("restore settings"))?;
        }
        record_change(&mut tx, ChangeOperation::Restored, "*")
            .await
            .map_err(op_failed("restore settings"))?;
        tx.commit()
            .await
            .map_err(|source| SettingsError::OperationFailed {
                operation: "restore settings",
                source: Box::new(source),
            })?;

        info!(count = incoming.len(), "settings restored");
        Ok(RestoreReport {
            restored: incoming.len(),
        })
    }

    async fn resolve_value(
        &self,
        key: &str,
        default: SettingValue,
        resolution: AttachmentResolution,
    ) -> SettingsResult<SettingValue> {
        let Some(row) = data::fetch_setting(&self.pool, key)
            .await
            .map_err(data_err("fetch setting"))?
        else {
            return Ok(default);
        };

        if fields::is_file_field(&row.type_id) {
            return self
                .resolve_attachments(row.value.as_deref(), default, resolution)
                .await;
        }

        let Some(raw) = row.value else {
            return Ok(default);
        };
        if row.is_array_value {
            return Ok(serde_json::from_str(&raw)
                .map_or_else(|_| SettingValue::Scalar(raw), SettingValue::Json));
        }
        Ok(SettingValue::Scalar(raw))
    }

    async fn list(&self) -> SettingsResult<Vec<Setting>> {
        let rows = data::fetch_all_settings(&self.pool)
            .await
            .map_err(data_err("fetch all settings"))?;
        Ok(rows.into_iter().map(Setting::from).collect())
    }

    async fn find(&self, key: &str) -> SettingsResult<Option<Setting>> {
        let row = data::fetch_setting(&self.pool, key)
            .await
            .map_err(data_err("fetch setting"))?;
        Ok(row.map(Setting::from))
    }

    async fn subscribe_changes(&self) -> SettingsResult<SettingsStream> {
        SettingsStream::connect(&self.database_url).await
    }
}

/// Translate a persisted setting into its UI-facing editable field.
///
/// Thin free-function wrapper over [`Setting::resolve_field`] so the
/// operation is reachable from the registry surface without a service handle.
#[must_use]
pub fn resolve_field(setting: &Setting) -> EditableField {
    setting.resolve_field()
}

fn data_err(operation: &'static str) -> impl FnOnce(varia_data::DataError) -> SettingsError {
    move |source| SettingsError::DataAccess { operation, source }
}

fn op_failed<E>(operation: &'static str) -> impl FnOnce(E) -> SettingsError
where
    E: Error + Send + Sync + 'static,
{
    move |source| SettingsError::OperationFailed {
        operation,
        source: Box::new(source),
    }
}

fn not_found(key: &str) -> SettingsError {
    SettingsError::NotFound {
        key: key.to_string(),
    }
}

fn require(field: &'static str, value: &str) -> SettingsResult<()> {
    if value.trim().is_empty() {
        return Err(SettingsError::MissingField { field });
    }
    Ok(())
}

fn encode_options(options: &[crate::model::OptionEntry]) -> SettingsResult<String> {
    serde_json::to_string(options).map_err(|_| SettingsError::InvalidField {
        field: "options",
        value: None,
        reason: "failed to encode options",
    })
}

fn to_row(setting: &Setting) -> varia_data::SettingRow {
    varia_data::SettingRow {
        key: setting.key.clone(),
        type_id: setting.type_id.clone(),
        group: setting.group.clone(),
        position: setting.position,
        name: setting.name.clone(),
        description: setting.description.clone(),
        is_array_value: setting.is_array_value,
        value: setting.value.clone(),
        options: setting.options.clone(),
        created_at: setting.created_at,
        updated_at: setting.updated_at,
    }
}

async fn begin(pool: &sqlx::PgPool) -> SettingsResult<Transaction<'_, Postgres>> {
    pool.begin()
        .await
        .map_err(|source| SettingsError::Database {
            operation: "begin transaction",
            source,
        })
}

async fn commit(tx: Transaction<'_, Postgres>) -> SettingsResult<()> {
    tx.commit()
        .await
        .map_err(|source| SettingsError::Database {
            operation: "commit transaction",
            source,
        })
}

async fn rollback(tx: Transaction<'_, Postgres>) -> SettingsResult<()> {
    tx.rollback()
        .await
        .map_err(|source| SettingsError::Database {
            operation: "roll back transaction",
            source,
        })
}

async fn record_change(
    tx: &mut Transaction<'_, Postgres>,
    operation: ChangeOperation,
    key: &str,
) -> varia_data::DataResult<i64> {
    let revision = data::bump_revision(tx.as_mut()).await?;
    let change = SettingsChange {
        revision,
        operation,
        key: key.to_string(),
    };
    data::notify_change(tx.as_mut(), &change.to_payload()).await?;
    Ok(revision)
}
