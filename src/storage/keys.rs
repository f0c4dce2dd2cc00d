use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::billing::{BILLING_COLUMNS, Billing, billing_from_row};
use super::{now_ms, with_conn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub free_tier: bool,
    pub data_share: bool,
    pub time_created: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateWorkspace {
    pub name: String,
    pub free_tier: bool,
    pub data_share: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub workspace_id: String,
    pub key: String,
    pub name: String,
    pub time_created: i64,
    pub time_used: Option<i64>,
    pub time_deleted: Option<i64>,
}

/// A live key joined with the workspace flags and billing row it resolves to.
#[derive(Debug, Clone)]
pub struct KeyLookup {
    pub api_key_id: String,
    pub workspace_id: String,
    pub free_tier: bool,
    pub data_share: bool,
    pub billing: Billing,
}

/// Creates a workspace together with its (empty) billing row.
pub async fn create_workspace(
    db_path: PathBuf,
    input: CreateWorkspace,
) -> anyhow::Result<Workspace> {
    with_conn(db_path, move |conn| {
        let ws = Workspace {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            free_tier: input.free_tier,
            data_share: input.data_share,
            time_created: now_ms(),
        };
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO workspaces (id, name, free_tier, data_share, time_created)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![ws.id, ws.name, ws.free_tier, ws.data_share, ws.time_created],
        )?;
        tx.execute(
            "INSERT INTO billing (workspace_id) VALUES (?1)",
            params![ws.id],
        )?;
        tx.commit()?;
        Ok(ws)
    })
    .await
}

pub async fn create_api_key(
    db_path: PathBuf,
    workspace_id: String,
    name: String,
) -> anyhow::Result<ApiKeyRecord> {
    with_conn(db_path, move |conn| {
        let rec = ApiKeyRecord {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            key: format!("sk-{}", Uuid::new_v4().simple()),
            name,
            time_created: now_ms(),
            time_used: None,
            time_deleted: None,
        };
        conn.execute(
            r#"
            INSERT INTO api_keys (id, workspace_id, key, name, time_created)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![rec.id, rec.workspace_id, rec.key, rec.name, rec.time_created],
        )?;
        Ok(rec)
    })
    .await
}

pub async fn delete_api_key(db_path: PathBuf, id: String) -> anyhow::Result<()> {
    with_conn(db_path, move |conn| {
        let n = conn.execute(
            "UPDATE api_keys SET time_deleted = ?1 WHERE id = ?2 AND time_deleted IS NULL",
            params![now_ms(), id],
        )?;
        if n == 0 {
            anyhow::bail!("api key not found: {id}");
        }
        Ok(())
    })
    .await
}

pub async fn get_api_key(db_path: PathBuf, id: String) -> anyhow::Result<Option<ApiKeyRecord>> {
    with_conn(db_path, move |conn| {
        let rec = conn
            .query_row(
                r#"
                SELECT id, workspace_id, key, name, time_created, time_used, time_deleted
                FROM api_keys
                WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(ApiKeyRecord {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        key: row.get(2)?,
                        name: row.get(3)?,
                        time_created: row.get(4)?,
                        time_used: row.get(5)?,
                        time_deleted: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(rec)
    })
    .await
}

/// Resolves a presented key string. Soft-deleted keys resolve to `None`.
pub async fn find_api_key(db_path: PathBuf, key: String) -> anyhow::Result<Option<KeyLookup>> {
    with_conn(db_path, move |conn| {
        let sql = format!(
            r#"
            SELECT k.id, k.workspace_id, w.free_tier, w.data_share, {BILLING_COLUMNS}
            FROM api_keys k
            JOIN workspaces w ON w.id = k.workspace_id
            JOIN billing b ON b.workspace_id = k.workspace_id
            WHERE k.key = ?1 AND k.time_deleted IS NULL
            "#
        );
        let found = conn
            .query_row(&sql, params![key], |row| {
                Ok(KeyLookup {
                    api_key_id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    free_tier: row.get(2)?,
                    data_share: row.get(3)?,
                    billing: billing_from_row(row, 4)?,
                })
            })
            .optional()?;
        Ok(found)
    })
    .await
}
