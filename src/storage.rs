use anyhow::Context as _;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod billing;
mod keys;
mod usage;

pub use billing::{
    Billing, BillingPatch, RELOAD_LOCK_MS, ReloadRequest, get_billing, list_reload_requests,
    try_lock_reload, update_billing,
};
pub use keys::{
    ApiKeyRecord, CreateWorkspace, KeyLookup, Workspace, create_api_key, create_workspace,
    delete_api_key, find_api_key, get_api_key,
};
pub use usage::{CreateUsageRecord, UsageRecord, list_usage, record_usage};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_db(db_path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open(db_path).with_context(|| "failed to open SQLite file")?;

    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .with_context(|| "failed to enable WAL journal")?;
    tracing::debug!(journal_mode = %mode, db = %db_path.display(), "sqlite opened");

    let migration = include_str!("../migrations/001_init.sql");
    conn.execute_batch(migration)
        .with_context(|| "failed to apply migrations/001_init.sql")?;

    Ok(())
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

async fn with_conn<T, F>(db_path: PathBuf, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open SQLite file: {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        f(&mut conn)
    })
    .await
    .context("sqlite blocking task failed")?
}

/// Starts a write transaction that takes the database write lock up front, so
/// concurrent writers queue on the busy timeout instead of failing on upgrade.
fn immediate_tx(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}
