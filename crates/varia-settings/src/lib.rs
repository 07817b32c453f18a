#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Database-backed dynamic settings registry built on `PostgreSQL`.
//!
//! Layout: `fields.rs` (static field-type catalog), `model.rs` (typed
//! settings models), `codec.rs` (value encode/decode rules), `service.rs`
//! (`SettingsService` + `SettingsRegistry` facade), `watcher.rs`
//! (LISTEN/NOTIFY change stream with polling fallback).

pub mod codec;
pub mod error;
pub mod fields;
pub mod model;
pub mod service;
pub mod watcher;

pub use error::{SettingsError, SettingsResult};
pub use fields::{DEFAULT_TYPE, FILE_TYPES, FieldTypeDescriptor, ParamSpec};
pub use model::{
    AttachmentRef, AttachmentResolution, ChangeOperation, Direction, EditableField, NewSetting,
    OptionEntry, RestoreReport, Setting, SettingUpdate, SettingValue, SettingsChange,
    normalize_key,
};
pub use service::{AttachmentStore, SettingsRegistry, SettingsService, resolve_field};
pub use watcher::{SettingsStream, SettingsWatcher};
