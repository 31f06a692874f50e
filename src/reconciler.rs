//! Offline save path and FIFO replay of queued attendance batches.

use crate::model::{Mark, PendingAttendanceBatch, StudentId, SubjectId, SyncState};
use crate::outbox::QueueStore;
use crate::service::{AttendanceService, MarkError};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    /// The store could not be reached; the mark should be retried later.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the mark; retrying will not help.
    #[error("mark rejected: {0}")]
    Rejected(String),
}

impl From<MarkError> for SinkError {
    fn from(err: MarkError) -> Self {
        match &err {
            MarkError::Store(store) if store.is_connectivity() => SinkError::Unavailable(err.to_string()),
            _ => SinkError::Rejected(err.to_string()),
        }
    }
}

/// Destination of replayed marks.
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    async fn apply(&self, mark: &Mark) -> Result<(), SinkError>;
}

#[async_trait]
impl AttendanceSink for AttendanceService {
    async fn apply(&self, mark: &Mark) -> Result<(), SinkError> {
        self.record(mark).await.map(|_| ()).map_err(SinkError::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedMark {
    pub subject_id: SubjectId,
    pub date: NaiveDate,
    pub student_id: StudentId,
    pub reason: String,
}

/// Marks applied and rejected while replaying one or more batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub rejected: Vec<RejectedMark>,
}

impl ReplayReport {
    fn absorb(&mut self, other: ReplayReport) {
        self.applied += other.applied;
        self.rejected.extend(other.rejected);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Every mark reached the sink (some may have been rejected).
    Saved(ReplayReport),
    /// Batch, or its unreplayed remainder, is waiting in the queue.
    Deferred { report: ReplayReport, queued: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Batches fully replayed.
    pub batches: usize,
    pub replay: ReplayReport,
    /// Batches left in the queue after the drain.
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Connectivity was lost part-way; the unreplayed remainder stays at the queue front.
    Interrupted(DrainReport),
    /// Another drain was already in flight.
    Coalesced,
    Offline,
}

pub struct OfflineReconciler {
    queue: Arc<dyn QueueStore>,
    sink: Arc<dyn AttendanceSink>,
    // Serializes saves and drains.
    writer: Mutex<()>,
    // Held for the whole drain; `try_lock` failure means one is in flight.
    drain: Mutex<()>,
    online: AtomicBool,
    state: watch::Sender<SyncState>,
}

impl OfflineReconciler {
    /// Build a reconciler over an existing queue. Starts `PENDING` if the queue is not empty.
    pub async fn open(
        queue: Arc<dyn QueueStore>,
        sink: Arc<dyn AttendanceSink>,
        online: bool,
    ) -> Result<Self> {
        let initial = if queue.len().await? > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        };
        let (state, _) = watch::channel(initial);
        Ok(Self {
            queue,
            sink,
            writer: Mutex::new(()),
            drain: Mutex::new(()),
            online: AtomicBool::new(online),
            state,
        })
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub async fn pending(&self) -> Result<usize> {
        Ok(self.queue.len().await?)
    }

    fn set_state(&self, next: SyncState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = current.as_str(), to = next.as_str(), "sync state");
            *current = next;
            true
        });
    }

    /// Record a connectivity change. Restoring connectivity triggers a drain.
    pub async fn set_online(&self, online: bool) -> Result<Option<DrainOutcome>> {
        let was = self.online.swap(online, Ordering::SeqCst);
        if online && !was {
            info!("connectivity restored");
            return self.reconcile().await.map(Some);
        }
        if !online && was {
            info!("connectivity lost");
        }
        Ok(None)
    }

    /// Save a batch, replaying it directly when online and nothing older is queued.
    #[instrument(skip_all, fields(subject = %batch.subject_id, date = %batch.date, marks = batch.data.len()))]
    pub async fn save(&self, batch: PendingAttendanceBatch) -> Result<SaveOutcome> {
        let _writer = self.writer.lock().await;
        if !self.is_online() || self.queue.len().await? > 0 {
            return self.defer(batch, ReplayReport::default()).await;
        }
        let (report, remainder) = self.replay(&batch).await;
        match remainder {
            Some(rest) => {
                self.online.store(false, Ordering::SeqCst);
                warn!(applied = report.applied, left = rest.data.len(), "connectivity lost during save");
                self.defer(rest, report).await
            }
            None => Ok(SaveOutcome::Saved(report)),
        }
    }

    async fn defer(&self, batch: PendingAttendanceBatch, report: ReplayReport) -> Result<SaveOutcome> {
        self.queue.enqueue(batch).await?;
        self.set_state(SyncState::Pending);
        let queued = self.queue.len().await?;
        info!(queued, "attendance saved offline");
        Ok(SaveOutcome::Deferred { report, queued })
    }

    /// Replay every queued batch in order. Concurrent calls coalesce into the one in flight.
    pub async fn reconcile(&self) -> Result<DrainOutcome> {
        if !self.is_online() {
            return Ok(DrainOutcome::Offline);
        }
        let Ok(_drain) = self.drain.try_lock() else {
            debug!("drain already in flight");
            return Ok(DrainOutcome::Coalesced);
        };
        let _writer = self.writer.lock().await;
        // A save holding the writer may have lost connectivity meanwhile.
        if !self.is_online() {
            return Ok(DrainOutcome::Offline);
        }
        self.drain_locked().await
    }

    /// Replay from the head of the queue, removing a batch only once it has fully replayed.
    #[instrument(skip_all)]
    async fn drain_locked(&self) -> Result<DrainOutcome> {
        let mut report = DrainReport::default();
        let Some(mut head) = self.queue.peek().await? else {
            self.set_state(SyncState::Synced);
            return Ok(DrainOutcome::Completed(report));
        };
        self.set_state(SyncState::Syncing);
        let queued = self.queue.len().await?;
        info!(queued, "replaying offline attendance");

        loop {
            let (replayed, remainder) = self.replay(&head).await;
            report.replay.absorb(replayed);
            if let Some(rest) = remainder {
                self.queue.replace_front(rest).await?;
                report.remaining = self.queue.len().await?;
                self.online.store(false, Ordering::SeqCst);
                self.set_state(SyncState::Pending);
                warn!(
                    replayed = report.batches,
                    remaining = report.remaining,
                    "drain interrupted; remainder kept at queue front"
                );
                return Ok(DrainOutcome::Interrupted(report));
            }
            self.queue.pop_front().await?;
            report.batches += 1;
            match self.queue.peek().await? {
                Some(next) => head = next,
                None => break,
            }
        }

        self.set_state(SyncState::Synced);
        info!(
            batches = report.batches,
            applied = report.replay.applied,
            rejected = report.replay.rejected.len(),
            "offline attendance replayed"
        );
        Ok(DrainOutcome::Completed(report))
    }

    /// Apply a batch mark by mark. On connectivity loss returns the unreplayed rest.
    async fn replay(&self, batch: &PendingAttendanceBatch) -> (ReplayReport, Option<PendingAttendanceBatch>) {
        let mut report = ReplayReport::default();
        let marks: Vec<Mark> = batch.marks().collect();
        for (idx, mark) in marks.iter().enumerate() {
            match self.sink.apply(mark).await {
                Ok(()) => report.applied += 1,
                Err(SinkError::Rejected(reason)) => {
                    warn!(student = %mark.student_id, %reason, "queued mark rejected; dropping");
                    report.rejected.push(RejectedMark {
                        subject_id: mark.subject_id,
                        date: mark.date,
                        student_id: mark.student_id,
                        reason,
                    });
                }
                Err(SinkError::Unavailable(reason)) => {
                    debug!(student = %mark.student_id, %reason, "sink unavailable");
                    let rest: Vec<StudentId> = marks[idx..].iter().map(|m| m.student_id).collect();
                    return (report, Some(batch.retain_students(&rest)));
                }
            }
        }
        (report, None)
    }
}
