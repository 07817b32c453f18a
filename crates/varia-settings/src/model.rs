//! Typed settings models and change payloads.
//!
//! # Design
//! - Pure data carriers used by the settings service and its callers.
//! - Keeps domain types separate from IO/wiring code in `service.rs`.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use varia_data::SettingRow;

use crate::codec;
use crate::error::SettingsError;
use crate::fields;

/// A single keyed configuration record.
///
/// `value` and `options` are kept in their stored textual form so a backup
/// round-trip reproduces them byte for byte; decoding happens on demand in
/// [`Setting::resolve_field`] and the runtime accessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    /// Unique identifier; immutable outside of an explicit rename.
    pub key: String,
    /// Field-type identifier from the registry.
    #[serde(rename = "type")]
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
    /// Stored value, opaque until decoded through the codec.
    pub value: Option<String>,
    /// JSON-encoded list of construction options.
    pub options: Option<String>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<SettingRow> for Setting {
    fn from(row: SettingRow) -> Self {
        Self {
            key: row.key,
            type_id: row.type_id,
            group: row.group,
            position: row.position,
            name: row.name,
            description: row.description,
            is_array_value: row.is_array_value,
            value: row.value,
            options: row.options,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl Setting {
    /// Decode the stored options leniently; malformed JSON yields no options.
    #[must_use]
    pub fn decoded_options(&self) -> Vec<OptionEntry> {
        self.options
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Build the UI-facing editable field description for this setting.
    ///
    /// This is the single translation point between the persisted row and the
    /// rendered form. It is pure and total: malformed `options` degrade to no
    /// active construction parameters, malformed `value` to no value, and an
    /// unknown type identifier falls back to the default input type.
    #[must_use]
    pub fn resolve_field(&self) -> EditableField {
        let descriptor = fields::lookup(&self.type_id)
            .or_else(|| fields::lookup(fields::DEFAULT_TYPE));
        let type_id = descriptor.map_or(fields::DEFAULT_TYPE, |d| d.id);

        let params: BTreeMap<String, String> = self
            .decoded_options()
            .into_iter()
            .filter(|option| option.active)
            .map(|option| (option.name, option.param))
            .collect();

        EditableField {
            type_id: type_id.to_string(),
            params,
            title: self.name.clone(),
            value: codec::decode_stored(self.value.as_deref(), self.is_array_value),
            help: self.description.clone(),
        }
    }
}

/// One construction-parameter row of a setting's `options` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    /// Whether the parameter is applied when building the editable field.
    pub active: bool,
    /// Parameter name.
    pub name: String,
    /// Literal value or expression passed to the parameter.
    pub param: String,
    /// Display-only fully qualified signature.
    pub full: String,
}

/// Input payload for creating a setting.
#[derive(Debug, Clone)]
pub struct NewSetting {
    /// Requested key; `.` separators are normalized to `_` on create.
    pub key: String,
    /// Field-type identifier.
    pub type_id: String,
    /// Owning group.
    pub group: String,
    /// Display name.
    pub name: String,
    /// Optional help text.
    pub description: Option<String>,
    /// Construction options; defaults from the registry when `None`.
    pub options: Option<Vec<OptionEntry>>,
}

/// Replacement values for the mutable fields of an existing setting.
#[derive(Debug, Clone)]
pub struct SettingUpdate {
    /// Display name.
    pub name: String,
    /// Owning group.
    pub group: String,
    /// Field-type identifier.
    pub type_id: String,
    /// Optional help text.
    pub description: Option<String>,
    /// Construction options, replacing the stored list.
    pub options: Vec<OptionEntry>,
}

/// Abstract description of an editable form field, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableField {
    /// Resolved field-type identifier.
    pub type_id: String,
    /// Active construction parameters, name to literal value.
    pub params: BTreeMap<String, String>,
    /// Field title taken from the setting name.
    pub title: String,
    /// Current value decoded through the array/scalar path.
    pub value: Option<Value>,
    /// Help text taken from the setting description.
    pub help: Option<String>,
}

/// Reference to an externally stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Identifier in the external blob store.
    pub id: String,
    /// Public URL of the stored file.
    pub url: String,
}

impl AttachmentRef {
    /// Public URL of the stored file.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A resolved setting value as returned by the runtime accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    /// Raw scalar value; interpretation is up to the caller.
    Scalar(String),
    /// Decoded compound value.
    Json(Value),
    /// Single resolved attachment.
    Attachment(AttachmentRef),
    /// Multiple resolved attachments.
    Attachments(Vec<AttachmentRef>),
    /// Single resolved attachment URL.
    Url(String),
    /// Multiple resolved attachment URLs.
    Urls(Vec<String>),
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<Value> for SettingValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// How the runtime accessor renders resolved attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentResolution {
    /// Return derived URLs (the common case for templates).
    Urls,
    /// Return full attachment references.
    Refs,
}

/// Direction of a reorder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Swap with the closest lower-positioned setting in the group.
    Up,
    /// Swap with the closest higher-positioned setting in the group.
    Down,
}

impl Direction {
    /// Render the direction for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Outcome summary of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// Number of records written by the restore transaction.
    pub restored: usize,
}

/// Mutation kind recorded in a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    /// A setting was created.
    Created,
    /// A setting's properties were updated.
    Updated,
    /// A setting was renamed.
    Renamed,
    /// A setting's value was saved.
    ValueSaved,
    /// A setting was deleted.
    Deleted,
    /// Two settings swapped positions.
    Moved,
    /// A backup document was restored.
    Restored,
}

impl ChangeOperation {
    /// Render the operation as its wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Renamed => "renamed",
            Self::ValueSaved => "value_saved",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
            Self::Restored => "restored",
        }
    }
}

impl FromStr for ChangeOperation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "renamed" => Ok(Self::Renamed),
            "value_saved" => Ok(Self::ValueSaved),
            "deleted" => Ok(Self::Deleted),
            "moved" => Ok(Self::Moved),
            "restored" => Ok(Self::Restored),
            _ => Err(()),
        }
    }
}

/// Structured change payload emitted on the settings channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChange {
    /// Revision recorded after applying the change.
    pub revision: i64,
    /// Mutation kind.
    pub operation: ChangeOperation,
    /// Affected key; `*` for whole-store operations such as restore.
    pub key: String,
}

impl SettingsChange {
    /// Render the wire payload broadcast with `pg_notify`.
    #[must_use]
    pub fn to_payload(&self) -> String {
        format!("{}:{}:{}", self.revision, self.operation.as_str(), self.key)
    }

    /// Parse a wire payload received on the settings channel.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidNotification`] when the payload does
    /// not match the `revision:operation:key` shape.
    pub fn parse(payload: &str) -> Result<Self, SettingsError> {
        let invalid = || SettingsError::InvalidNotification {
            payload: payload.to_string(),
        };

        let mut parts = payload.splitn(3, ':');
        let revision = parts
            .next()
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let operation = parts
            .next()
            .and_then(|raw| ChangeOperation::from_str(raw).ok())
            .ok_or_else(invalid)?;
        let key = parts.next().ok_or_else(invalid)?.to_string();

        Ok(Self {
            revision,
            operation,
            key,
        })
    }
}

/// Normalize a settings key by replacing every `.` with `_`.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.replace('.', "_")
}
