use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::billing::{Billing, select_billing};
use super::{immediate_tx, with_conn};
use crate::billing_period::BillingPeriod;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub workspace_id: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub reasoning_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_write_5m_tokens: Option<i64>,
    pub cache_write_1h_tokens: Option<i64>,
    /// Micro-cents.
    pub cost: i64,
    pub time_created: i64,
}

#[derive(Debug, Clone)]
pub struct CreateUsageRecord {
    pub workspace_id: String,
    pub api_key_id: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub reasoning_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_write_5m_tokens: Option<i64>,
    pub cache_write_1h_tokens: Option<i64>,
    pub cost: i64,
    /// Free-tier workspaces log usage without touching balance or the
    /// monthly accumulator.
    pub charge: bool,
    pub now_ms: i64,
}

/// Appends the usage row and debits the workspace in one transaction.
///
/// The balance is decremented in SQL (`balance = balance - cost`), never
/// written back from a value read earlier. The monthly accumulator restarts
/// from this charge when its last update is outside the current period.
/// Returns the billing row as it stands after the charge.
pub async fn record_usage(db_path: PathBuf, input: CreateUsageRecord) -> anyhow::Result<Billing> {
    with_conn(db_path, move |conn| {
        let tx = immediate_tx(conn)?;

        tx.execute(
            r#"
            INSERT INTO usage (
              id, workspace_id, model, provider,
              input_tokens, output_tokens, reasoning_tokens,
              cache_read_tokens, cache_write_5m_tokens, cache_write_1h_tokens,
              cost, time_created
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                Uuid::new_v4().to_string(),
                input.workspace_id,
                input.model,
                input.provider,
                input.input_tokens,
                input.output_tokens,
                input.reasoning_tokens,
                input.cache_read_tokens,
                input.cache_write_5m_tokens,
                input.cache_write_1h_tokens,
                input.cost,
                input.now_ms,
            ],
        )?;

        if input.charge {
            let period = BillingPeriod::containing(input.now_ms);
            tx.execute(
                r#"
                UPDATE billing
                SET balance = balance - ?1,
                    monthly_usage = CASE
                      WHEN time_monthly_usage_updated >= ?2 AND time_monthly_usage_updated < ?3
                        THEN monthly_usage + ?1
                      ELSE ?1
                    END,
                    time_monthly_usage_updated = ?4
                WHERE workspace_id = ?5
                "#,
                params![
                    input.cost,
                    period.start_ms,
                    period.end_ms,
                    input.now_ms,
                    input.workspace_id,
                ],
            )?;
        }

        tx.execute(
            "UPDATE api_keys SET time_used = ?1 WHERE id = ?2",
            params![input.now_ms, input.api_key_id],
        )?;

        let Some(billing) = select_billing(&tx, &input.workspace_id)? else {
            anyhow::bail!("billing not found for workspace {}", input.workspace_id);
        };
        tx.commit()?;
        Ok(billing)
    })
    .await
}

pub async fn list_usage(db_path: PathBuf, workspace_id: String) -> anyhow::Result<Vec<UsageRecord>> {
    with_conn(db_path, move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, workspace_id, model, provider,
                   input_tokens, output_tokens, reasoning_tokens,
                   cache_read_tokens, cache_write_5m_tokens, cache_write_1h_tokens,
                   cost, time_created
            FROM usage
            WHERE workspace_id = ?1
            ORDER BY time_created ASC
            "#,
        )?;
        let rows = stmt.query_map(params![workspace_id], |row| {
            Ok(UsageRecord {
                id: row.get(0)?,
                workspace_id: row.get(1)?,
                model: row.get(2)?,
                provider: row.get(3)?,
                input_tokens: row.get(4)?,
                output_tokens: row.get(5)?,
                reasoning_tokens: row.get(6)?,
                cache_read_tokens: row.get(7)?,
                cache_write_5m_tokens: row.get(8)?,
                cache_write_1h_tokens: row.get(9)?,
                cost: row.get(10)?,
                time_created: row.get(11)?,
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
