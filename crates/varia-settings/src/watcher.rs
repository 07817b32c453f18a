//! Change-notification plumbing for the settings registry.
//!
//! A [`SettingsStream`] wraps a `PostgreSQL` LISTEN connection; a
//! [`SettingsWatcher`] layers revision polling on top so consumers keep
//! seeing changes when the LISTEN connection drops.

use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::time::sleep;
use tracing::warn;
use varia_data::SETTINGS_CHANNEL;

use crate::error::{SettingsError, SettingsResult};
use crate::model::SettingsChange;
use crate::service::{SettingsRegistry, SettingsService};

/// Stream wrapper around a `PostgreSQL` LISTEN connection.
pub struct SettingsStream {
    listener: PgListener,
}

impl SettingsStream {
    /// Open a LISTEN connection on the settings channel.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection or LISTEN registration fails.
    pub async fn connect(database_url: &str) -> SettingsResult<Self> {
        let mut listener =
            PgListener::connect(database_url)
                .await
                .map_err(|source| SettingsError::Database {
                    operation: "open LISTEN connection",
                    source,
                })?;
        listener
            .listen(SETTINGS_CHANNEL)
            .await
            .map_err(|source| SettingsError::Database {
                operation: "LISTEN on settings channel",
                source,
            })?;

        Ok(Self { listener })
    }

    /// Receive the next settings change notification.
    pub async fn next(&mut self) -> Option<SettingsResult<SettingsChange>> {
        match self.listener.recv().await {
            Ok(notification) => Some(SettingsChange::parse(notification.payload())),
            Err(source) => Some(Err(SettingsError::Database {
                operation: "receive settings notification",
                source,
            })),
        }
    }
}

/// Watches settings changes, automatically falling back to polling if
/// LISTEN/NOTIFY connectivity is interrupted.
pub struct SettingsWatcher {
    service: SettingsService,
    stream: Option<SettingsStream>,
    poll_interval: Duration,
    last_revision: i64,
}

impl SettingsWatcher {
    pub(crate) const fn new(
        service: SettingsService,
        stream: Option<SettingsStream>,
        poll_interval: Duration,
        last_revision: i64,
    ) -> Self {
        Self {
            service,
            stream,
            poll_interval,
            last_revision,
        }
    }

    /// Await the next settings revision reflecting applied changes.
    ///
    /// # Errors
    ///
    /// Returns an error if polling or LISTEN handling fails while fetching
    /// the current revision.
    pub async fn next(&mut self) -> SettingsResult<i64> {
        loop {
            if let Some(revision) = self.listen_once().await? {
                return Ok(revision);
            }

            sleep(self.poll_interval).await;

            if let Some(revision) = self.poll_once().await? {
                return Ok(revision);
            }
        }
    }

    /// Force the watcher into polling mode, discarding the LISTEN stream.
    pub fn disable_listen(&mut self) {
        self.stream = None;
    }

    async fn listen_once(&mut self) -> SettingsResult<Option<i64>> {
        if let Some(stream) = &mut self.stream {
            match stream.next().await {
                Some(Ok(change)) => {
                    let current = self.service.revision().await?;
                    self.last_revision = change.revision.max(current);
                    return Ok(Some(self.last_revision));
                }
                Some(Err(err)) => {
                    warn!(
                        error = ?err,
                        "LISTEN connection dropped; switching to polling"
                    );
                    self.stream = None;
                }
                None => {
                    warn!("LISTEN stream closed; switching to polling");
                    self.stream = None;
                }
            }
        }
        Ok(None)
    }

    async fn poll_once(&mut self) -> SettingsResult<Option<i64>> {
        let current = self.service.revision().await?;
        if current > self.last_revision {
            self.last_revision = current;
            self.try_reattach_listen().await;
            return Ok(Some(current));
        }
        Ok(None)
    }

    async fn try_reattach_listen(&mut self) {
        if self.stream.is_some() {
            return;
        }

        match self.service.subscribe_changes().await {
            Ok(stream) => {
                self.stream = Some(stream);
            }
            Err(err) => {
                warn!(error = ?err, "failed to re-establish LISTEN connection");
            }
        }
    }
}
