use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{Host, ProbeResult};
use rusqlite::{Connection, params};
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS host (
    host_id   INTEGER PRIMARY KEY,
    host_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS ping_result (
    id        INTEGER PRIMARY KEY,
    host_id   INTEGER NOT NULL REFERENCES host (host_id),
    ip        TEXT NOT NULL,
    ping_time TEXT NOT NULL,
    rtt_ns    INTEGER NOT NULL,
    success   INTEGER NOT NULL
);
";

// Only the newest rows of the log are scanned; there is no index on
// (host_id, ping_time) and this query runs once per warm-up.
const LAST_SUCCESSFUL_RESULTS: &str = "
WITH log_tail AS (
    SELECT * FROM ping_result ORDER BY id DESC LIMIT ?1
), ranked AS (
    SELECT host_id, ip, ping_time, rtt_ns,
           ROW_NUMBER() OVER (PARTITION BY host_id ORDER BY ping_time DESC, id DESC) AS rn
    FROM log_tail
    WHERE success
)
SELECT host_id, ip, ping_time, rtt_ns FROM ranked WHERE rn = 1 ORDER BY host_id
";

/// Durable side of the collector: the host registry and the append-only
/// result log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Registers host names; names already present are left alone.
    async fn add_hosts(&self, names: &[String]) -> Result<()>;

    /// All hosts, ordered by name.
    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// The latest successful result of every host that has one in the tail
    /// of the log.
    async fn load_last_results(&self) -> Result<Vec<ProbeResult>>;

    /// Appends a batch atomically: either every result is stored or none is.
    async fn append_results(&self, batch: &[ProbeResult]) -> Result<()>;
}

/// [`Store`] backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    log_tail_limit: usize,
}

impl SqliteStore {
    pub fn open(path: &Path, log_tail_limit: usize) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::with_connection(conn, log_tail_limit)
    }

    pub fn open_in_memory(log_tail_limit: usize) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, log_tail_limit)
    }

    fn with_connection(conn: Connection, log_tail_limit: usize) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            log_tail_limit,
        })
    }

    // Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| anyhow!("database connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .context("database task failed")?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_hosts(&self, names: &[String]) -> Result<()> {
        let names = names.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut added = 0;
            {
                let mut stmt = tx.prepare("INSERT OR IGNORE INTO host (host_name) VALUES (?1)")?;
                for name in &names {
                    added += stmt.execute(params![name])?;
                }
            }
            tx.commit()?;
            tracing::info!("Provisioned {} new hosts ({} requested)", added, names.len());
            Ok(())
        })
        .await
        .context("Failed to add hosts")
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT host_id, host_name FROM host ORDER BY host_name")?;
            let hosts = stmt
                .query_map([], |row| {
                    Ok(Host {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hosts)
        })
        .await
        .context("Failed to list hosts")
    }

    async fn load_last_results(&self) -> Result<Vec<ProbeResult>> {
        let limit = i64::try_from(self.log_tail_limit)?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(LAST_SUCCESSFUL_RESULTS)?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(host_id, ip, time, rtt_ns)| {
                    Ok::<_, anyhow::Error>(ProbeResult {
                        host_id,
                        ip,
                        time,
                        rtt: Duration::from_nanos(u64::try_from(rtt_ns)?),
                        success: true,
                    })
                })
                .collect()
        })
        .await
        .context("Failed to load last results")
    }

    async fn append_results(&self, batch: &[ProbeResult]) -> Result<()> {
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO ping_result (host_id, ip, ping_time, rtt_ns, success)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for result in &batch {
                    let rtt_ns = i64::try_from(result.rtt.as_nanos())?;
                    stmt.execute(params![
                        result.host_id,
                        result.ip,
                        result.time,
                        rtt_ns,
                        result.success
                    ])?;
                }
            }
            tx.commit()?;
            tracing::debug!("Stored {} results", batch.len());
            Ok(())
        })
        .await
        .context("Failed to append results")
    }
}
