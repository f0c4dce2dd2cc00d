use rusqlite::{OptionalExtension as _, Row, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::{immediate_tx, with_conn};

/// How long a won reload lock keeps other gateway instances from reloading.
pub const RELOAD_LOCK_MS: i64 = 60_000;

pub(super) const BILLING_COLUMNS: &str = "b.workspace_id, b.balance, b.payment_method_id, \
     b.monthly_limit, b.monthly_usage, b.time_monthly_usage_updated, b.reload, \
     b.time_reload_locked_till";

/// Billing row of a workspace. Money columns are micro-cents except
/// `monthly_limit`, which is whole dollars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Billing {
    pub workspace_id: String,
    pub balance: i64,
    pub payment_method_id: Option<String>,
    pub monthly_limit: Option<i64>,
    pub monthly_usage: i64,
    pub time_monthly_usage_updated: Option<i64>,
    pub reload: bool,
    pub time_reload_locked_till: Option<i64>,
}

pub(super) fn billing_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Billing> {
    Ok(Billing {
        workspace_id: row.get(offset)?,
        balance: row.get(offset + 1)?,
        payment_method_id: row.get(offset + 2)?,
        monthly_limit: row.get(offset + 3)?,
        monthly_usage: row.get(offset + 4)?,
        time_monthly_usage_updated: row.get(offset + 5)?,
        reload: row.get(offset + 6)?,
        time_reload_locked_till: row.get(offset + 7)?,
    })
}

pub(super) fn select_billing(
    conn: &rusqlite::Connection,
    workspace_id: &str,
) -> rusqlite::Result<Option<Billing>> {
    conn.query_row(
        &format!("SELECT {BILLING_COLUMNS} FROM billing b WHERE b.workspace_id = ?1"),
        params![workspace_id],
        |row| billing_from_row(row, 0),
    )
    .optional()
}

/// Account-provisioning edits. Nullable columns take `Some(None)` to clear.
#[derive(Debug, Clone, Default)]
pub struct BillingPatch {
    pub balance: Option<i64>,
    pub payment_method_id: Option<Option<String>>,
    pub monthly_limit: Option<Option<i64>>,
    pub monthly_usage: Option<i64>,
    pub time_monthly_usage_updated: Option<Option<i64>>,
    pub reload: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadRequest {
    pub id: String,
    pub workspace_id: String,
    pub amount: i64,
    pub time_created: i64,
}

pub async fn get_billing(db_path: PathBuf, workspace_id: String) -> anyhow::Result<Option<Billing>> {
    with_conn(db_path, move |conn| Ok(select_billing(conn, &workspace_id)?)).await
}

pub async fn update_billing(
    db_path: PathBuf,
    workspace_id: String,
    patch: BillingPatch,
) -> anyhow::Result<Billing> {
    with_conn(db_path, move |conn| {
        let tx = immediate_tx(conn)?;
        let Some(mut b) = select_billing(&tx, &workspace_id)? else {
            anyhow::bail!("billing not found for workspace {workspace_id}");
        };

        if let Some(v) = patch.balance {
            b.balance = v;
        }
        if let Some(v) = patch.payment_method_id {
            b.payment_method_id = v;
        }
        if let Some(v) = patch.monthly_limit {
            b.monthly_limit = v;
        }
        if let Some(v) = patch.monthly_usage {
            b.monthly_usage = v;
        }
        if let Some(v) = patch.time_monthly_usage_updated {
            b.time_monthly_usage_updated = v;
        }
        if let Some(v) = patch.reload {
            b.reload = v;
        }

        tx.execute(
            r#"
            UPDATE billing
            SET balance = ?1, payment_method_id = ?2, monthly_limit = ?3,
                monthly_usage = ?4, time_monthly_usage_updated = ?5, reload = ?6
            WHERE workspace_id = ?7
            "#,
            params![
                b.balance,
                b.payment_method_id,
                b.monthly_limit,
                b.monthly_usage,
                b.time_monthly_usage_updated,
                b.reload,
                workspace_id,
            ],
        )?;
        tx.commit()?;
        Ok(b)
    })
    .await
}

/// Compare-and-set on the reload lock. Only the caller whose conditional
/// update changes a row gets a reload request queued; everyone else lost the
/// race and gets `None`.
pub async fn try_lock_reload(
    db_path: PathBuf,
    workspace_id: String,
    amount: i64,
    now_ms: i64,
) -> anyhow::Result<Option<ReloadRequest>> {
    with_conn(db_path, move |conn| {
        let tx = immediate_tx(conn)?;
        let won = tx.execute(
            r#"
            UPDATE billing
            SET time_reload_locked_till = ?1
            WHERE workspace_id = ?2
              AND (time_reload_locked_till IS NULL OR time_reload_locked_till < ?3)
            "#,
            params![now_ms + RELOAD_LOCK_MS, workspace_id, now_ms],
        )?;
        if won == 0 {
            return Ok(None);
        }

        let req = ReloadRequest {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            amount,
            time_created: now_ms,
        };
        tx.execute(
            r#"
            INSERT INTO reload_requests (id, workspace_id, amount, time_created)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![req.id, req.workspace_id, req.amount, req.time_created],
        )?;
        tx.commit()?;
        Ok(Some(req))
    })
    .await
}

pub async fn list_reload_requests(
    db_path: PathBuf,
    workspace_id: String,
) -> anyhow::Result<Vec<ReloadRequest>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, workspace_id, amount, time_created
            FROM reload_requests
            WHERE workspace_id = ?1
            ORDER BY time_created ASC
            "#,
        )?;
        let rows = stmt.query_map(params![workspace_id], |row| {
            Ok(ReloadRequest {
                id: row.get(0)?,
                workspace_id: row.get(1)?,
                amount: row.get(2)?,
                time_created: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}
