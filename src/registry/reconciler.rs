//! Registry reconciliation
//!
//! Keeps the external registry in step with the active topology: every active
//! stream gets a redirect entry keyed by its display name. Entries are only
//! ever added; the reconciler never deletes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::client::RegistryClient;
use super::config::RegistryConfig;
use super::entry::NewStream;
use super::error::RegistryError;
use crate::catalog::StreamIdentity;
use crate::error::ErrorKind;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries listed by the registry
    pub listed: usize,
    /// Display names inserted in this pass
    pub inserted: Vec<String>,
    /// Display names whose insertion failed
    pub failed: Vec<String>,
}

/// Periodic registry reconciler
pub struct Reconciler<C> {
    client: C,
    config: RegistryConfig,
    active: watch::Receiver<Vec<StreamIdentity>>,
}

impl<C: RegistryClient> Reconciler<C> {
    /// Create a reconciler following the published active streams
    pub fn new(
        client: C,
        config: RegistryConfig,
        active: watch::Receiver<Vec<StreamIdentity>>,
    ) -> Self {
        Self {
            client,
            config,
            active,
        }
    }

    /// Run one pass against the current active streams
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, RegistryError> {
        let active = self.active.borrow().clone();
        if active.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let entries = self.client.list_streams().await?;
        let mut report = ReconcileReport {
            listed: entries.len(),
            ..Default::default()
        };

        for identity in &active {
            if entries
                .iter()
                .any(|entry| entry.name() == identity.display_name)
            {
                continue;
            }

            let url = self.config.redirect_url(&identity.endpoint_path);
            let stream = NewStream::redirect(identity.display_name.clone(), url.clone());
            match self.client.add_stream(&stream).await {
                Ok(()) => {
                    tracing::info!(
                        stream = %identity.id,
                        name = %identity.display_name,
                        url = %url,
                        "Registered stream"
                    );
                    report.inserted.push(identity.display_name.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        stream = %identity.id,
                        name = %identity.display_name,
                        kind = %ErrorKind::RegistryIo,
                        error = %e,
                        "Failed to register stream"
                    );
                    report.failed.push(identity.display_name.clone());
                }
            }
        }

        Ok(report)
    }

    /// Reconcile every poll interval, and right away when the active streams
    /// change, until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = self.config.poll_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            url = %self.config.streams_url(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Registry reconciler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                changed = self.active.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let _ = self.active.borrow_and_update();

            match self.reconcile_once().await {
                Ok(report) if !report.inserted.is_empty() || !report.failed.is_empty() => {
                    tracing::debug!(
                        listed = report.listed,
                        inserted = report.inserted.len(),
                        failed = report.failed.len(),
                        "Registry reconciled"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        kind = %ErrorKind::RegistryIo,
                        error = %e,
                        "Registry poll failed"
                    );
                }
            }
        }

        tracing::info!("Registry reconciler stopped");
    }
}
