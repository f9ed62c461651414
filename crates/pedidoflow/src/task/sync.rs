//! Remote mirroring of task history.
//!
//! The local SQLite store is authoritative for live work; a remote
//! mirror keeps a copy so history survives the local machine. Pushes are
//! coalesced: a sync requested while one is running sets a pending flag
//! instead of starting a second pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::db::{task_repo, Database};

use super::ProcessingTask;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Mirror not provisioned")]
    NotProvisioned,

    #[error("Mirror request failed: {0}")]
    Request(String),
}

/// Port to the remote task store.
#[async_trait]
pub trait TaskMirror: Send + Sync {
    /// Whether the remote store exists and is ready for writes.
    async fn is_provisioned(&self) -> bool;

    /// Writes one task snapshot, overwriting any previous copy.
    async fn upsert(&self, task: &ProcessingTask) -> Result<(), MirrorError>;

    /// Fetches recent remote snapshots for reconciliation.
    async fn fetch_recent(&self) -> Result<Vec<ProcessingTask>, MirrorError>;
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub pushed: usize,
    pub pulled: usize,
}

/// State shared between sync requesters and the running pass.
#[derive(Default)]
pub struct SyncFlags {
    in_progress: AtomicBool,
    pending: AtomicBool,
}

/// Reconciles the local store with the remote mirror.
///
/// Push: every unsynced local row goes up and is marked synced. Pull:
/// remote rows unknown locally are inserted; for rows present on both
/// sides the newer `updated_at` wins.
pub async fn sync_tasks(
    db: &Database,
    mirror: &Arc<dyn TaskMirror>,
    flags: &SyncFlags,
) -> Result<SyncResult, MirrorError> {
    if flags
        .in_progress
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        flags.pending.store(true, Ordering::Release);
        debug!("sync already running, coalescing request");
        return Ok(SyncResult::default());
    }

    let result = run_sync(db, mirror).await;
    flags.in_progress.store(false, Ordering::Release);

    // A request that arrived mid-pass gets one follow-up pass.
    if flags.pending.swap(false, Ordering::AcqRel) {
        debug!("running coalesced follow-up sync");
        let follow_up = Box::pin(sync_tasks(db, mirror, flags)).await?;
        let first = result?;
        return Ok(SyncResult {
            pushed: first.pushed + follow_up.pushed,
            pulled: first.pulled + follow_up.pulled,
        });
    }

    result
}

async fn run_sync(
    db: &Database,
    mirror: &Arc<dyn TaskMirror>,
) -> Result<SyncResult, MirrorError> {
    if !mirror.is_provisioned().await {
        return Err(MirrorError::NotProvisioned);
    }

    let mut result = SyncResult::default();

    // Push local changes.
    let unsynced = task_repo::list_unsynced(db).map_err(|e| MirrorError::Request(e.to_string()))?;
    for row in &unsynced {
        let task = match ProcessingTask::from_row(row) {
            Ok(task) => task,
            Err(e) => {
                warn!("skipping corrupt row during sync: {e}");
                continue;
            }
        };
        mirror.upsert(&task).await?;
        task_repo::mark_synced(db, &task.id).map_err(|e| MirrorError::Request(e.to_string()))?;
        result.pushed += 1;
    }

    // Pull remote changes, last write wins.
    for remote in mirror.fetch_recent().await? {
        let local = task_repo::find_by_id(db, &remote.id)
            .map_err(|e| MirrorError::Request(e.to_string()))?;
        let take_remote = match &local {
            None => true,
            Some(row) => match ProcessingTask::from_row(row) {
                Ok(local_task) => remote.updated_at > local_task.updated_at,
                Err(_) => true,
            },
        };
        if take_remote {
            let mut row = remote
                .to_row()
                .map_err(|e| MirrorError::Request(e.to_string()))?;
            row.synced = true;
            task_repo::upsert(db, &row).map_err(|e| MirrorError::Request(e.to_string()))?;
            result.pulled += 1;
        }
    }

    if result.pushed > 0 || result.pulled > 0 {
        info!("sync done: {} pushed, {} pulled", result.pushed, result.pulled);
    }
    Ok(result)
}

/// Periodic sync scheduler.
///
/// Runs on its own thread with a current-thread runtime so the sync loop
/// survives independently of the caller's runtime. A manual trigger
/// channel wakes the loop between ticks.
pub struct SyncScheduler {
    db: Database,
    mirror: Arc<dyn TaskMirror>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SyncScheduler {
    pub fn new(db: Database, mirror: Arc<dyn TaskMirror>, interval: Duration) -> Self {
        Self {
            db,
            mirror,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sync loop in a background thread.
    /// Accepts a trigger receiver for manual sync requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let db = self.db.clone();
        let mirror = Arc::clone(&self.mirror);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("failed to build sync runtime: {e}");
                    return;
                }
            };

            rt.block_on(async {
                let flags = SyncFlags::default();
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            info!("Manual task sync triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match sync_tasks(&db, &mirror, &flags).await {
                        Ok(_) => {}
                        Err(MirrorError::NotProvisioned) => {
                            debug!("sync skipped: mirror not provisioned");
                        }
                        Err(e) => error!("Task sync failed: {e}"),
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeMirror;
    use super::*;

    use crate::task::{TaskStage, TaskStatus};

    fn completed_task(id: &str) -> ProcessingTask {
        let mut task = ProcessingTask::new(id.to_string(), "Daniel M 3".to_string());
        task.stage = TaskStage::Completed;
        task.status = TaskStatus::Success;
        task.progress = 100;
        task.result = Some(vec![]);
        task
    }

    #[tokio::test]
    async fn test_push_marks_rows_synced() {
        let db = Database::open_in_memory().unwrap();
        task_repo::insert(&db, &completed_task("t1").to_row().unwrap()).unwrap();

        let mirror: Arc<dyn TaskMirror> = Arc::new(FakeMirror::provisioned());
        let flags = SyncFlags::default();
        let result = sync_tasks(&db, &mirror, &flags).await.unwrap();

        assert_eq!(result.pushed, 1);
        assert!(task_repo::list_unsynced(&db).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_mirror_is_error() {
        let db = Database::open_in_memory().unwrap();
        let mirror: Arc<dyn TaskMirror> = Arc::new(FakeMirror::default());
        let flags = SyncFlags::default();
        assert!(matches!(
            sync_tasks(&db, &mirror, &flags).await,
            Err(MirrorError::NotProvisioned)
        ));
    }

    #[tokio::test]
    async fn test_pull_inserts_unknown_remote_tasks() {
        let db = Database::open_in_memory().unwrap();
        let fake = FakeMirror::provisioned();
        fake.seed(completed_task("remote1"));
        let mirror: Arc<dyn TaskMirror> = Arc::new(fake);

        let flags = SyncFlags::default();
        let result = sync_tasks(&db, &mirror, &flags).await.unwrap();
        assert_eq!(result.pulled, 1);

        let row = task_repo::find_by_id(&db, "remote1").unwrap().unwrap();
        assert!(row.synced);
    }

    #[tokio::test]
    async fn test_newer_remote_wins_older_loses() {
        let db = Database::open_in_memory().unwrap();

        let mut local = completed_task("t1");
        local.synced = true;
        local.error = Some("local".to_string());
        task_repo::insert(&db, &local.to_row().unwrap()).unwrap();

        // Remote copy updated later.
        let mut newer = completed_task("t1");
        newer.error = Some("remote".to_string());
        newer.updated_at = local.updated_at + chrono::Duration::seconds(10);
        let fake = FakeMirror::provisioned();
        fake.seed(newer);
        let mirror: Arc<dyn TaskMirror> = Arc::new(fake);

        let flags = SyncFlags::default();
        let result = sync_tasks(&db, &mirror, &flags).await.unwrap();
        assert_eq!(result.pulled, 1);
        let row = task_repo::find_by_id(&db, "t1").unwrap().unwrap();
        assert_eq!(row.error.as_deref(), Some("remote"));

        // An older remote copy does not overwrite.
        let mut older = completed_task("t1");
        older.error = Some("stale".to_string());
        older.updated_at = ProcessingTask::from_row(&row).unwrap().updated_at
            - chrono::Duration::seconds(60);
        let fake = FakeMirror::provisioned();
        fake.seed(older);
        let mirror: Arc<dyn TaskMirror> = Arc::new(fake);
        let result = sync_tasks(&db, &mirror, &flags).await.unwrap();
        assert_eq!(result.pulled, 0);
    }

    #[test]
    fn test_scheduler_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let mirror: Arc<dyn TaskMirror> = Arc::new(FakeMirror::provisioned());
        let scheduler = SyncScheduler::new(db, mirror, Duration::from_millis(50));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        // Let it run briefly then stop.
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        // Send a trigger to wake up the select loop so it sees the shutdown.
        let _ = trigger_tx.send(());

        handle.join().expect("scheduler thread panicked");
    }
}
