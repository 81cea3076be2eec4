//! SQLite store behind a dedicated worker thread.
//!
//! A single thread owns the connection; callers queue closures over an
//! mpsc channel and await the result on a oneshot. Because every write
//! runs on that one thread, the claim table's check-then-insert is
//! serialized without any extra locking.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod activities;
mod claims;
mod migrations;
mod sessions;
mod voters;

pub use claims::{ClaimBatch, ClaimRequest};
pub use voters::{ResolvedHouse, VoterSummary};

use crate::{Error, Result};
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if self.sender.send(DbCommand::Shutdown).is_err() {
                log::error!("store: worker already gone at shutdown");
            }
            if handle.join().is_err() {
                log::error!("store: failed to join worker thread");
            }
        }
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("walk-coord-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(Error::from(err)));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    log::error!("store: failed to enable WAL mode err={err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    log::error!("store: failed to enable foreign keys err={err}");
                }

                let init_result = run_migrations(&mut conn);
                if ready_tx.send(init_result).is_err() {
                    log::error!("store: init receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                log::debug!("store: worker thread shutting down");
            })
            .map_err(|err| Error::other(format!("failed to spawn store worker: {err}")))?;

        ready_rx
            .recv()
            .map_err(|_| Error::other("store worker exited before signaling readiness"))??;

        log::info!("store: open path={}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Run `task` on the worker thread and await its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                log::error!("store: caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| Error::other(format!("failed to queue store task: {err}")))?;

        reply_rx
            .await
            .map_err(|_| Error::other("store worker terminated unexpectedly"))?
    }
}

pub(crate) fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::invalid_data(format!("invalid datetime '{value}': {err}")))
}

pub(crate) fn to_count(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::invalid_data(format!("count {value} out of range")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use rusqlite::params;

    use super::Database;

    /// On-disk SQLite fixture; the tempdir guard must outlive the db.
    pub(crate) fn temp_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create tempdir");
        let db = Database::open(dir.path().join("walk-coord-test.db")).expect("open database");
        (db, dir)
    }

    /// Insert a bare active session so claim/activity rows satisfy
    /// their foreign keys.
    pub(crate) async fn seed_session(db: &Database, id: &str) {
        let id = id.to_owned();
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO walk_sessions (id, canvasser_id, status, started_at)
                 VALUES (?1, ?2, 'active', ?3)",
                params![id, format!("canvasser-{id}"), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
        .expect("seed session");
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_db;

    #[tokio::test]
    async fn open_runs_migrations_and_executes_tasks() {
        let (db, _dir) = temp_db();
        let count: i64 = db
            .execute(|conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                     ('voters', 'walk_sessions', 'house_claims', 'walk_activities')",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .expect("execute query");
        assert_eq!(count, 4);
    }
}
