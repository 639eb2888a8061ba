//! Orphan reconciliation.
//!
//! A session whose client never completes the PUT leaves a metadata row with
//! no payload. When enabled, a background task periodically deletes rows that
//! are older than the upload credential's lifetime plus one sweep interval and
//! whose payload is absent. Disabled unless configured.
//!
//! Each pass only lists rows created since the previous pass. Rows whose
//! upload is still streaming, or whose check failed, are carried over and
//! looked at again on the next pass.

use crate::services::{
    metadata_store::{MetadataStore, StoreError},
    object_store::{LocalObjectStore, ObjectStoreError, Presence},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Answers whether the object store holds, or is receiving, a payload.
#[async_trait]
pub trait ObjectPresence: Send + Sync + 'static {
    async fn payload_presence(&self, id: Uuid) -> Result<Presence, ObjectStoreError>;
}

#[async_trait]
impl ObjectPresence for LocalObjectStore {
    async fn payload_presence(&self, id: Uuid) -> Result<Presence, ObjectStoreError> {
        self.presence(id).await
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    /// Rows left alone because their payload is still being written.
    pub in_flight: usize,
    pub failed: usize,
}

pub struct OrphanSweeper {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectPresence>,
    /// Upper bound of the newest window already listed.
    watermark: Option<DateTime<Utc>>,
    recheck: BTreeSet<Uuid>,
}

impl OrphanSweeper {
    pub fn new(store: Arc<dyn MetadataStore>, objects: Arc<dyn ObjectPresence>) -> Self {
        Self {
            store,
            objects,
            watermark: None,
            recheck: BTreeSet::new(),
        }
    }

    /// Delete rows created before `cutoff` whose payload is missing.
    ///
    /// Per-row failures are counted, logged and retried on the next pass;
    /// only a failure to list new candidates aborts the pass.
    pub async fn sweep(&mut self, cutoff: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let fresh = self
            .store
            .list_created_between(self.watermark, cutoff)
            .await?;
        self.watermark = Some(self.watermark.map_or(cutoff, |w| w.max(cutoff)));

        let candidates: Vec<Uuid> = std::mem::take(&mut self.recheck)
            .into_iter()
            .chain(fresh.into_iter().map(|row| row.id))
            .collect();
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for id in candidates {
            match self.objects.payload_presence(id).await {
                Ok(Presence::Stored) => {}
                Ok(Presence::Uploading) => {
                    tracing::debug!(%id, "upload still in flight, row kept");
                    report.in_flight += 1;
                    self.recheck.insert(id);
                }
                Ok(Presence::Absent) => match self.store.delete_by_id(id).await {
                    Ok(()) => {
                        tracing::info!(%id, "deleted orphaned metadata row");
                        report.deleted += 1;
                    }
                    Err(err) => {
                        tracing::warn!(%id, error = %err, "failed to delete orphaned metadata row");
                        report.failed += 1;
                        self.recheck.insert(id);
                    }
                },
                Err(err) => {
                    tracing::warn!(%id, error = %err, "could not check object store");
                    report.failed += 1;
                    self.recheck.insert(id);
                }
            }
        }

        Ok(report)
    }
}

/// Spawn the periodic sweep. Rows become eligible `upload_ttl + interval`
/// after creation, which leaves room for uploads accepted just before the
/// credential expired.
pub fn spawn_sweeper(
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectPresence>,
    interval: Duration,
    upload_ttl: Duration,
) -> JoinHandle<()> {
    // tokio::time::interval panics on a zero period.
    let interval = interval.max(Duration::from_secs(1));
    let grace = chrono::Duration::from_std(upload_ttl + interval).unwrap_or(chrono::Duration::MAX);
    let mut sweeper = OrphanSweeper::new(store, objects);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now()
                .checked_sub_signed(grace)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            match sweeper.sweep(cutoff).await {
                Ok(report) => {
                    tracing::debug!(
                        examined = report.examined,
                        deleted = report.deleted,
                        in_flight = report.in_flight,
                        failed = report.failed,
                        "orphan sweep finished"
                    );
                }
                Err(err) => tracing::warn!(error = %err, "orphan sweep failed"),
            }
        }
    })
}
