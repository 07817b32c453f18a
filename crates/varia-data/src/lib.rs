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

//! Data access layer for the Varia settings registry: migrations and queries.

pub mod error;
pub mod settings;

pub use error::{DataError, Result as DataResult};
pub use settings::{SETTINGS_CHANNEL, SettingRow};
