//! Task repository, CRUD operations for the `tasks` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw task row from the database. Timestamps are RFC 3339 strings;
/// `result` carries the grouped-order JSON when present.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub message: String,
    pub stage: String,
    pub status: String,
    pub progress: u8,
    pub error: Option<String>,
    pub result: Option<String>,
    pub raw_response: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub synced: bool,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            message: row.get("message")?,
            stage: row.get("stage")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            error: row.get("error")?,
            result: row.get("result")?,
            raw_response: row.get("raw_response")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            synced: row.get::<_, i64>("synced")? != 0,
        })
    }
}

/// Inserts a new task row.
pub fn insert(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tasks (id, message, stage, status, progress, error, result,
             raw_response, created_at, updated_at, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task.id,
                task.message,
                task.stage,
                task.status,
                task.progress,
                task.error,
                task.result,
                task.raw_response,
                task.created_at,
                task.updated_at,
                task.synced as i64,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing task row. All fields except `id`, `message` and
/// `created_at` are overwritten.
pub fn update(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tasks SET stage=?2, status=?3, progress=?4, error=?5, result=?6,
             raw_response=?7, updated_at=?8, synced=?9
             WHERE id=?1",
            params![
                task.id,
                task.stage,
                task.status,
                task.progress,
                task.error,
                task.result,
                task.raw_response,
                task.updated_at,
                task.synced as i64,
            ],
        )?;
        Ok(())
    })
}

/// Inserts the row, or overwrites it when the id already exists.
pub fn upsert(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tasks (id, message, stage, status, progress, error, result,
             raw_response, created_at, updated_at, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 message=excluded.message, stage=excluded.stage, status=excluded.status,
                 progress=excluded.progress, error=excluded.error, result=excluded.result,
                 raw_response=excluded.raw_response, updated_at=excluded.updated_at,
                 synced=excluded.synced",
            params![
                task.id,
                task.message,
                task.stage,
                task.status,
                task.progress,
                task.error,
                task.result,
                task.raw_response,
                task.created_at,
                task.updated_at,
                task.synced as i64,
            ],
        )?;
        Ok(())
    })
}

/// Finds a task by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], TaskRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists all tasks, newest first.
pub fn list_all(db: &Database) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY created_at DESC")?;
        let rows: Vec<TaskRow> = stmt
            .query_map([], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists rows not yet mirrored to the remote store.
pub fn list_unsynced(db: &Database) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM tasks WHERE synced = 0 ORDER BY created_at ASC")?;
        let rows: Vec<TaskRow> = stmt
            .query_map([], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks a row as mirrored.
pub fn mark_synced(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("UPDATE tasks SET synced = 1 WHERE id = ?1", params![id])?;
        Ok(())
    })
}

/// Deletes terminal tasks older than the cutoff. Returns the number of
/// rows removed. In-flight rows are never purged regardless of age.
pub fn delete_terminal_older_than(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM tasks WHERE created_at < ?1 AND status IN ('success', 'error')",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}
