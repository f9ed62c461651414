//! Task orchestration: owns the task cache, runs the pipeline stages and
//! fans snapshots out to subscribers.
//!
//! The in-memory cache is the source of truth for live reads; every
//! mutation is written through to SQLite and broadcast in the same call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ai::{GenerationOptions, TextGenerator};
use crate::broadcast::TaskProgressBroadcaster;
use crate::catalog::{CatalogError, CatalogStore};
use crate::db::{task_repo, Database, DatabaseError};
use crate::parser::{self, ParserOptions};
use crate::pipeline::{self, GroupedOrder};

use super::sync::{self, MirrorError, SyncFlags, TaskMirror};
use super::{ProcessingTask, TaskStage, TaskStatus};

/// Errors surfaced by task submission and queries. Pipeline failures are
/// not here: those are captured on the task itself.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Progress checkpoints per stage.
const PROGRESS_PARSING: u8 = 10;
const PROGRESS_ANALYZING: u8 = 30;
const PROGRESS_VALIDATING: u8 = 50;
const PROGRESS_AI: u8 = 70;
const PROGRESS_GROUPING: u8 = 90;
const PROGRESS_DONE: u8 = 100;

/// Orchestrates processing tasks end to end.
pub struct TaskService {
    db: Database,
    catalog: Arc<dyn CatalogStore>,
    generator: Arc<dyn TextGenerator>,
    broadcaster: TaskProgressBroadcaster,
    cache: RwLock<HashMap<String, ProcessingTask>>,
    parser_options: ParserOptions,
    generation: GenerationOptions,
    retention: Duration,
    mirror: Option<Arc<dyn TaskMirror>>,
    sync_flags: SyncFlags,
}

impl TaskService {
    pub fn new(
        db: Database,
        catalog: Arc<dyn CatalogStore>,
        generator: Arc<dyn TextGenerator>,
        broadcast_capacity: usize,
        parser_options: ParserOptions,
        generation: GenerationOptions,
        retention_hours: i64,
    ) -> Self {
        Self {
            db,
            catalog,
            generator,
            broadcaster: TaskProgressBroadcaster::new(broadcast_capacity),
            cache: RwLock::new(HashMap::new()),
            parser_options,
            generation,
            retention: Duration::hours(retention_hours),
            mirror: None,
            sync_flags: SyncFlags::default(),
        }
    }

    /// Attaches a remote mirror. Terminal transitions then trigger a
    /// background sync pass.
    pub fn with_mirror(mut self, mirror: Arc<dyn TaskMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Database handle for collaborators (sync, purging).
    pub fn database(&self) -> Database {
        self.db.clone()
    }

    /// Loads persisted tasks into the cache, dropping expired terminal
    /// tasks first. Tasks that were mid-flight when the process died are
    /// marked failed; they cannot be resumed.
    pub fn load(&self) -> Result<usize, TaskError> {
        self.purge_expired()?;

        let rows = task_repo::list_all(&self.db)?;
        let mut loaded = 0;

        let mut cache = self.write_cache();
        for row in &rows {
            match ProcessingTask::from_row(row) {
                Ok(mut task) => {
                    if !task.status.is_terminal() {
                        warn!("task {} was interrupted, marking failed", task.id);
                        task.status = TaskStatus::Error;
                        task.stage = TaskStage::Failed;
                        task.error = Some("Interrupted by restart".to_string());
                        task.updated_at = Utc::now();
                        task.synced = false;
                        if let Ok(row) = task.to_row() {
                            if let Err(e) = task_repo::update(&self.db, &row) {
                                error!("failed to persist interrupted task {}: {e}", task.id);
                            }
                        }
                    }
                    cache.insert(task.id.clone(), task);
                    loaded += 1;
                }
                Err(e) => warn!("skipping corrupt task row: {e}"),
            }
        }
        drop(cache);

        info!("loaded {loaded} tasks from database");
        Ok(loaded)
    }

    /// Submits a message for processing and starts the pipeline in the
    /// background.
    ///
    /// Submissions are deduplicated by trimmed message: while a task for
    /// the same text is in flight or completed (and not yet purged), the
    /// existing task is returned and no second execution starts. Failed
    /// tasks do not block resubmission. The duplicate check and the
    /// registration happen under one lock, so concurrent submissions of
    /// identical text cannot both start a pipeline.
    pub fn submit(self: &Arc<Self>, message: &str) -> Result<ProcessingTask, TaskError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(TaskError::EmptyMessage);
        }

        if let Err(e) = self.purge_expired() {
            warn!("purge on submit failed: {e}");
        }

        let task = ProcessingTask::new(Uuid::new_v4().to_string(), trimmed.to_string());
        let row = task.to_row()?;
        {
            let mut cache = self.write_cache();
            if let Some(existing) = cache
                .values()
                .find(|t| t.status != TaskStatus::Error && t.message == trimmed)
            {
                info!("duplicate submission matches task {}", existing.id);
                return Ok(existing.clone());
            }
            cache.insert(task.id.clone(), task.clone());
        }

        if let Err(e) = task_repo::insert(&self.db, &row) {
            self.write_cache().remove(&task.id);
            return Err(e.into());
        }
        self.broadcaster.send(task.clone());

        let service = Arc::clone(self);
        let task_id = task.id.clone();
        let span = info_span!("pipeline", task_id = %task.id);
        tokio::spawn(async move {
            let runner = Arc::clone(&service);
            let run_id = task_id.clone();
            let outcome =
                tokio::spawn(async move { runner.run(&run_id).await }.instrument(span)).await;
            // A panic anywhere in the pipeline still ends in a terminal
            // state visible to subscribers.
            if outcome.is_err() {
                let still_running = service
                    .get_task(&task_id)
                    .map(|t| !t.status.is_terminal())
                    .unwrap_or(false);
                if still_running {
                    service.fail(&task_id, "Internal pipeline error");
                }
            }
        });

        Ok(task)
    }

    /// Runs the pipeline for one task. Any stage failure marks the task
    /// failed; refinement failures do not count as stage failures.
    async fn run(self: &Arc<Self>, task_id: &str) {
        let message = match self.get_task(task_id) {
            Some(task) => task.message,
            None => {
                error!("task {task_id} vanished before execution");
                return;
            }
        };

        // Parsing.
        self.advance(task_id, TaskStage::Parsing, PROGRESS_PARSING);
        let drafts = parser::parse(&message, &self.parser_options);

        // Analyzing: pull reference data from the catalog.
        self.advance(task_id, TaskStage::Analyzing, PROGRESS_ANALYZING);
        let clients = match self.catalog.list_clients().await {
            Ok(clients) => clients,
            Err(e) => {
                self.fail(task_id, &format!("Catalog unavailable: {e}"));
                return;
            }
        };
        let products = match self.catalog.list_products().await {
            Ok(products) => products,
            Err(e) => {
                self.fail(task_id, &format!("Catalog unavailable: {e}"));
                return;
            }
        };

        // Validating: resolve and annotate every draft.
        self.advance(task_id, TaskStage::Validating, PROGRESS_VALIDATING);
        let items = pipeline::validate(&drafts, &clients, &products);

        // AI refinement, best-effort.
        self.advance(task_id, TaskStage::AiProcessing, PROGRESS_AI);
        let outcome = pipeline::refine(
            &message,
            items,
            &clients,
            &products,
            &self.generator,
            &self.generation,
        )
        .await;
        if let Some(raw) = &outcome.raw_response {
            let raw = raw.clone();
            self.mutate(task_id, |task| task.raw_model_output = Some(raw));
        }

        // Grouping.
        self.advance(task_id, TaskStage::Grouping, PROGRESS_GROUPING);
        let groups = pipeline::group_items(&outcome.items);

        self.complete(task_id, groups);
    }

    /// Moves a task to a new stage and progress checkpoint. The status
    /// stays `pending` until a terminal transition.
    fn advance(&self, task_id: &str, stage: TaskStage, progress: u8) {
        self.mutate(task_id, |task| {
            task.stage = stage;
            task.progress = progress;
        });
    }

    fn complete(self: &Arc<Self>, task_id: &str, groups: Vec<GroupedOrder>) {
        info!("task {task_id} completed with {} order groups", groups.len());
        self.mutate(task_id, |task| {
            task.stage = TaskStage::Completed;
            task.status = TaskStatus::Success;
            task.progress = PROGRESS_DONE;
            task.result = Some(groups);
        });
        self.trigger_sync();
    }

    fn fail(self: &Arc<Self>, task_id: &str, reason: &str) {
        error!("task {task_id} failed: {reason}");
        self.mutate(task_id, |task| {
            task.stage = TaskStage::Failed;
            task.status = TaskStatus::Error;
            task.error = Some(reason.to_string());
        });
        self.trigger_sync();
    }

    /// Kicks off a background sync pass when a mirror is attached.
    /// Remote tasks pulled by the pass are folded into the live cache.
    fn trigger_sync(self: &Arc<Self>) {
        let Some(mirror) = self.mirror.clone() else {
            return;
        };
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match sync::sync_tasks(&service.db, &mirror, &service.sync_flags).await {
                Ok(result) => {
                    if result.pulled > 0 {
                        if let Err(e) = service.absorb_remote_tasks() {
                            warn!("failed to refresh cache after sync: {e}");
                        }
                    }
                }
                Err(MirrorError::NotProvisioned) => {
                    debug!("sync skipped: mirror not provisioned");
                }
                Err(e) => warn!("task sync failed: {e}"),
            }
        });
    }

    /// Folds database rows newer than the cached copy into the cache and
    /// broadcasts them, so tasks pulled from the mirror become visible
    /// without a restart.
    fn absorb_remote_tasks(&self) -> Result<usize, TaskError> {
        let rows = task_repo::list_all(&self.db)?;
        let mut absorbed = 0;

        for row in &rows {
            let task = match ProcessingTask::from_row(row) {
                Ok(task) => task,
                Err(e) => {
                    warn!("skipping corrupt task row: {e}");
                    continue;
                }
            };
            let newer = {
                let cache = self.read_cache();
                match cache.get(&task.id) {
                    Some(cached) => task.updated_at > cached.updated_at,
                    None => true,
                }
            };
            if newer {
                self.write_cache().insert(task.id.clone(), task.clone());
                self.broadcaster.send(task);
                absorbed += 1;
            }
        }
        Ok(absorbed)
    }

    /// Applies a mutation to the cached task, then persists and
    /// broadcasts the new snapshot.
    fn mutate<F>(&self, task_id: &str, f: F)
    where
        F: FnOnce(&mut ProcessingTask),
    {
        let snapshot = {
            let mut cache = self.write_cache();
            let Some(task) = cache.get_mut(task_id) else {
                warn!("mutation for unknown task {task_id}");
                return;
            };
            f(task);
            task.updated_at = Utc::now();
            task.synced = false;
            task.clone()
        };

        match snapshot.to_row() {
            Ok(row) => {
                if let Err(e) = task_repo::update(&self.db, &row) {
                    error!("failed to persist task {task_id}: {e}");
                }
            }
            Err(e) => error!("failed to serialize task {task_id}: {e}"),
        }

        self.broadcaster.send(snapshot);
    }

    /// Returns a snapshot of one task.
    pub fn get_task(&self, task_id: &str) -> Option<ProcessingTask> {
        self.read_cache().get(task_id).cloned()
    }

    /// Returns all known tasks, newest first.
    pub fn list_tasks(&self) -> Vec<ProcessingTask> {
        let mut tasks: Vec<ProcessingTask> = self.read_cache().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Returns the most recently touched non-terminal task, or the most
    /// recent terminal task when nothing is in flight.
    pub fn get_active_task(&self) -> Option<ProcessingTask> {
        let cache = self.read_cache();
        cache
            .values()
            .filter(|t| !t.status.is_terminal())
            .max_by_key(|t| t.updated_at)
            .or_else(|| cache.values().max_by_key(|t| t.updated_at))
            .cloned()
    }

    /// Subscribes to one task's snapshots. The current snapshot is
    /// returned alongside the receiver so late joiners see state that
    /// was broadcast before they subscribed.
    pub fn subscribe(
        &self,
        task_id: &str,
    ) -> (Option<ProcessingTask>, broadcast::Receiver<ProcessingTask>) {
        let rx = self.broadcaster.subscribe();
        (self.get_task(task_id), rx)
    }

    /// Subscribes to all task snapshots with an initial replay of every
    /// known task.
    pub fn subscribe_all(&self) -> (Vec<ProcessingTask>, broadcast::Receiver<ProcessingTask>) {
        let rx = self.broadcaster.subscribe();
        (self.list_tasks(), rx)
    }

    /// Removes terminal tasks older than the retention window from both
    /// the cache and the database. Returns the number of rows deleted.
    pub fn purge_expired(&self) -> Result<usize, TaskError> {
        let cutoff = Utc::now() - self.retention;
        let deleted = task_repo::delete_terminal_older_than(&self.db, &cutoff.to_rfc3339())?;

        if deleted > 0 {
            let mut cache = self.write_cache();
            cache.retain(|_, t| !(t.status.is_terminal() && t.created_at < cutoff));
            info!("purged {deleted} expired tasks");
        }
        Ok(deleted)
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ProcessingTask>> {
        match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("task cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ProcessingTask>> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("task cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
