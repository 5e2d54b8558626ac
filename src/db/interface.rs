//! A handle bound to exactly one SQLite database file.
//!
//! The connection lives on a dedicated worker thread; callers enqueue typed
//! task envelopes and either await the reply or fire-and-forget. Procedure
//! statements are served from the connection's prepared-statement cache;
//! ad-hoc queries are finalised after use. Transient BUSY errors retry with
//! growing jittered sleeps; a CORRUPT report aborts the process since the
//! database is unrecoverable in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::db::{functions, Param, ResultSet, Value};
use crate::error::{Error, Result};
use crate::ontology::Ontology;

/// Per-database tuning applied at open time.
#[derive(Debug, Clone, Copy)]
pub struct TuningProfile {
    /// SQLite cache size in pages; halved by the manager under low memory.
    pub cache_size: i64,
    /// Page size in bytes; `None` leaves the engine default alone.
    pub page_size: Option<i64>,
    /// Register FormatDate/REGEXP/GetServiceName/GetServiceTypeID.
    pub scalar_functions: bool,
    /// Register `uncompress` (content databases).
    pub uncompress_function: bool,
}

enum DbRequest {
    Query { sql: String, params: Vec<Param> },
    Procedure { name: String, params: Vec<Param> },
    Batch { sql: String },
    Attach { path: PathBuf, alias: String },
    Begin,
    Commit,
    Rollback,
}

struct DbTask {
    request: DbRequest,
    reply: Option<oneshot::Sender<Result<ResultSet>>>,
}

pub struct DbInterface {
    name: String,
    tx: mpsc::Sender<DbTask>,
}

const MAX_BUSY_RETRIES: u32 = 2000;

fn is_code(err: &rusqlite::Error, code: rusqlite::ErrorCode) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == code)
}

fn with_busy_retry<T>(
    db_name: &str,
    what: &str,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T> {
    let mut busy_count: u32 = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e)
                if is_code(&e, rusqlite::ErrorCode::DatabaseBusy)
                    || is_code(&e, rusqlite::ErrorCode::DatabaseLocked) =>
            {
                busy_count += 1;
                if busy_count > MAX_BUSY_RETRIES {
                    tracing::warn!("{db_name}: excessive busy count running {what}, dropping");
                    return Err(Error::DbBusy {
                        attempts: busy_count,
                    });
                }
                let sleep_us = if busy_count > 50 {
                    rand::rng().random_range(1000..u64::from(busy_count) * 200)
                } else {
                    100
                };
                std::thread::sleep(Duration::from_micros(sleep_us));
            }
            Err(e) if is_code(&e, rusqlite::ErrorCode::DatabaseCorrupt) => {
                tracing::error!("database {db_name} is corrupt, cannot continue: {e}");
                std::process::abort();
            }
            Err(e) => return Err(Error::DbQuery(e.to_string())),
        }
    }
}

fn read_rows(stmt: &mut rusqlite::Statement<'_>, params: &[Param]) -> rusqlite::Result<ResultSet> {
    let columns = stmt.column_count();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Int(v),
                ValueRef::Real(v) => Value::Real(v),
                ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::Blob(b.to_vec()),
            });
        }
        out.push(values);
    }
    Ok(ResultSet::new(columns, out))
}

fn handle_request(
    conn: &Connection,
    name: &str,
    procedures: &HashMap<String, String>,
    request: &DbRequest,
) -> Result<ResultSet> {
    match request {
        DbRequest::Query { sql, params } => {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| Error::DbPrepare(e.to_string()))?;
            with_busy_retry(name, sql, || read_rows(&mut stmt, params))
        }
        DbRequest::Procedure {
            name: proc_name,
            params,
        } => {
            let sql = procedures
                .get(proc_name)
                .unwrap_or_else(|| panic!("procedure {proc_name} not in table"));
            let mut stmt = conn
                .prepare_cached(sql)
                .map_err(|e| Error::DbPrepare(e.to_string()))?;
            with_busy_retry(name, proc_name, || read_rows(&mut stmt, params))
        }
        DbRequest::Batch { sql } => {
            with_busy_retry(name, "batch", || conn.execute_batch(sql))?;
            Ok(ResultSet::default())
        }
        DbRequest::Attach { path, alias } => {
            let sql = format!("ATTACH DATABASE '{}' AS {alias}", path.display());
            with_busy_retry(name, "attach", || conn.execute_batch(&sql))?;
            Ok(ResultSet::default())
        }
        DbRequest::Begin => {
            with_busy_retry(name, "begin", || conn.execute_batch("BEGIN"))?;
            Ok(ResultSet::default())
        }
        DbRequest::Commit => {
            with_busy_retry(name, "commit", || conn.execute_batch("COMMIT"))?;
            Ok(ResultSet::default())
        }
        DbRequest::Rollback => {
            with_busy_retry(name, "rollback", || conn.execute_batch("ROLLBACK"))?;
            Ok(ResultSet::default())
        }
    }
}

fn apply_profile(conn: &Connection, profile: &TuningProfile) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = FILE;\n\
         PRAGMA encoding = 'UTF-8';\n\
         PRAGMA auto_vacuum = 0;",
    )?;
    if let Some(page_size) = profile.page_size {
        conn.execute_batch(&format!("PRAGMA page_size = {page_size};"))?;
    }
    conn.execute_batch(&format!("PRAGMA cache_size = {};", profile.cache_size))?;
    Ok(())
}

impl DbInterface {
    /// Open the database and start its worker thread. The schema is not
    /// touched here; the manager bootstraps new files.
    pub fn open(
        name: &str,
        path: &Path,
        profile: TuningProfile,
        procedures: Arc<HashMap<String, String>>,
        ontology: Option<Arc<Ontology>>,
    ) -> Result<Arc<DbInterface>> {
        let (tx, rx) = mpsc::channel::<DbTask>();
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();

        let thread_name = format!("db-{name}");
        let worker_name = name.to_string();
        let worker_path = path.to_path_buf();

        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let conn = match Connection::open(&worker_path) {
                    Ok(conn) => conn,
                    Err(e) => {
                        let _ = open_tx.send(Err(Error::DbQuery(format!(
                            "cannot open {}: {e}",
                            worker_path.display()
                        ))));
                        return;
                    }
                };

                let setup = apply_profile(&conn, &profile)
                    .and_then(|_| functions::register_collation(&conn))
                    .and_then(|_| {
                        if profile.scalar_functions {
                            functions::register_scalar_functions(&conn, ontology.clone())?;
                        }
                        if profile.uncompress_function {
                            functions::register_uncompress(&conn)?;
                        }
                        Ok(())
                    });
                if let Err(e) = setup {
                    let _ = open_tx.send(Err(Error::DbQuery(e.to_string())));
                    return;
                }
                let _ = open_tx.send(Ok(()));

                while let Ok(task) = rx.recv() {
                    let result = handle_request(&conn, &worker_name, &procedures, &task.request);
                    if let Some(reply) = task.reply {
                        let _ = reply.send(result);
                    } else if let Err(e) = result {
                        tracing::warn!("{worker_name}: no-reply task failed: {e}");
                    }
                }
            })
            .map_err(|e| Error::DbQuery(format!("cannot spawn db worker: {e}")))?;

        open_rx
            .recv()
            .map_err(|_| Error::DbQuery("db worker died during open".to_string()))??;

        Ok(Arc::new(DbInterface {
            name: name.to_string(),
            tx,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(&self, request: DbRequest) -> Result<ResultSet> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DbTask {
                request,
                reply: Some(reply_tx),
            })
            .map_err(|_| Error::DbQuery(format!("{}: db worker gone", self.name)))?;
        reply_rx
            .await
            .map_err(|_| Error::DbQuery(format!("{}: db worker dropped reply", self.name)))?
    }

    fn dispatch_no_reply(&self, request: DbRequest) {
        if self
            .tx
            .send(DbTask {
                request,
                reply: None,
            })
            .is_err()
        {
            tracing::warn!("{}: db worker gone, task dropped", self.name);
        }
    }

    /// Ad-hoc SQL with optional bound parameters.
    pub async fn query(&self, sql: impl Into<String>, params: Vec<Param>) -> Result<ResultSet> {
        self.dispatch(DbRequest::Query {
            sql: sql.into(),
            params,
        })
        .await
    }

    pub fn query_no_reply(&self, sql: impl Into<String>, params: Vec<Param>) {
        self.dispatch_no_reply(DbRequest::Query {
            sql: sql.into(),
            params,
        });
    }

    /// Run a named procedure from the shared procedure table.
    pub async fn exec_proc(&self, name: &str, params: Vec<Param>) -> Result<ResultSet> {
        self.dispatch(DbRequest::Procedure {
            name: name.to_string(),
            params,
        })
        .await
    }

    /// Same as [`exec_proc`](Self::exec_proc) but the result set is discarded.
    pub fn exec_proc_no_reply(&self, name: &str, params: Vec<Param>) {
        self.dispatch_no_reply(DbRequest::Procedure {
            name: name.to_string(),
            params,
        });
    }

    /// Execute a multi-statement script.
    pub async fn batch(&self, sql: impl Into<String>) -> Result<()> {
        self.dispatch(DbRequest::Batch { sql: sql.into() }).await?;
        Ok(())
    }

    pub async fn attach(&self, path: &Path, alias: &str) -> Result<()> {
        self.dispatch(DbRequest::Attach {
            path: path.to_path_buf(),
            alias: alias.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Begin a transaction covering this handle and everything attached to it.
    pub async fn begin(&self) -> Result<()> {
        self.dispatch(DbRequest::Begin).await?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        self.dispatch(DbRequest::Commit).await?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.dispatch(DbRequest::Rollback).await?;
        Ok(())
    }
}
