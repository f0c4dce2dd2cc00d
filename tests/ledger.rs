use std::path::{Path, PathBuf};
use zengate::storage::{self, BillingPatch, CreateUsageRecord, CreateWorkspace, RELOAD_LOCK_MS};

fn temp_db_path() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("zengate-ledger-{}.sqlite", uuid::Uuid::new_v4()));
    p
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

async fn workspace(db: &Path, balance: i64) -> (String, String) {
    let ws = storage::create_workspace(
        db.to_path_buf(),
        CreateWorkspace {
            name: "ledger".to_string(),
            ..CreateWorkspace::default()
        },
    )
    .await
    .expect("create workspace");
    storage::update_billing(
        db.to_path_buf(),
        ws.id.clone(),
        BillingPatch {
            balance: Some(balance),
            payment_method_id: Some(Some("pm_test".to_string())),
            ..BillingPatch::default()
        },
    )
    .await
    .expect("fund");
    let key = storage::create_api_key(db.to_path_buf(), ws.id.clone(), "k".to_string())
        .await
        .expect("key");
    (ws.id, key.id)
}

fn charge(workspace_id: &str, api_key_id: &str, cost: i64, now_ms: i64) -> CreateUsageRecord {
    CreateUsageRecord {
        workspace_id: workspace_id.to_string(),
        api_key_id: api_key_id.to_string(),
        model: "gpt-test".to_string(),
        provider: "openai".to_string(),
        input_tokens: 10,
        output_tokens: 5,
        reasoning_tokens: None,
        cache_read_tokens: Some(2),
        cache_write_5m_tokens: None,
        cache_write_1h_tokens: None,
        cost,
        charge: true,
        now_ms,
    }
}

#[tokio::test]
async fn concurrent_charges_all_land() {
    let db = temp_db_path();
    storage::init_db(&db).expect("init_db");
    let (ws, key) = workspace(&db, 1_000_000).await;
    let now = storage::now_ms();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let db = db.clone();
        let input = charge(&ws, &key, 1_000, now);
        tasks.push(tokio::spawn(storage::record_usage(db, input)));
    }
    for t in tasks {
        t.await.expect("join").expect("record_usage");
    }

    let billing = storage::get_billing(db.clone(), ws.clone())
        .await
        .expect("get_billing")
        .expect("billing");
    assert_eq!(billing.balance, 1_000_000 - 20 * 1_000);
    assert_eq!(billing.monthly_usage, 20 * 1_000);
    assert_eq!(
        storage::list_usage(db, ws).await.expect("list_usage").len(),
        20
    );
}

#[tokio::test]
async fn monthly_usage_restarts_in_a_new_period() {
    let db = temp_db_path();
    storage::init_db(&db).expect("init_db");
    let (ws, key) = workspace(&db, 1_000_000).await;
    let now = storage::now_ms();

    storage::update_billing(
        db.clone(),
        ws.clone(),
        BillingPatch {
            monthly_usage: Some(999_999),
            time_monthly_usage_updated: Some(Some(now - 40 * DAY_MS)),
            ..BillingPatch::default()
        },
    )
    .await
    .expect("stale usage");

    let after = storage::record_usage(db.clone(), charge(&ws, &key, 300, now))
        .await
        .expect("first charge");
    assert_eq!(after.monthly_usage, 300);
    assert_eq!(after.time_monthly_usage_updated, Some(now));

    let after = storage::record_usage(db.clone(), charge(&ws, &key, 200, now))
        .await
        .expect("second charge");
    assert_eq!(after.monthly_usage, 500);
    assert_eq!(after.balance, 1_000_000 - 500);
}

#[tokio::test]
async fn uncharged_usage_leaves_balance_alone() {
    let db = temp_db_path();
    storage::init_db(&db).expect("init_db");
    let (ws, key) = workspace(&db, 42).await;

    let mut input = charge(&ws, &key, 9_999, storage::now_ms());
    input.charge = false;
    let after = storage::record_usage(db.clone(), input)
        .await
        .expect("record_usage");
    assert_eq!(after.balance, 42);
    assert_eq!(after.monthly_usage, 0);

    let rows = storage::list_usage(db.clone(), ws).await.expect("list_usage");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cost, 9_999);
    assert_eq!(rows[0].cache_read_tokens, Some(2));

    let key = storage::get_api_key(db, key)
        .await
        .expect("get_api_key")
        .expect("key");
    assert!(key.time_used.is_some());
}

#[tokio::test]
async fn reload_lock_has_a_single_winner() {
    let db = temp_db_path();
    storage::init_db(&db).expect("init_db");
    let (ws, _) = workspace(&db, 0).await;
    let now = storage::now_ms();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn(storage::try_lock_reload(
            db.clone(),
            ws.clone(),
            2_000,
            now,
        )));
    }
    let mut winners = 0;
    for t in tasks {
        if t.await.expect("join").expect("try_lock_reload").is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let billing = storage::get_billing(db.clone(), ws.clone())
        .await
        .expect("get_billing")
        .expect("billing");
    assert_eq!(billing.time_reload_locked_till, Some(now + RELOAD_LOCK_MS));

    // Once the lock expires the next attempt wins again.
    let later = now + RELOAD_LOCK_MS + 1;
    let again = storage::try_lock_reload(db.clone(), ws.clone(), 2_000, later)
        .await
        .expect("try_lock_reload");
    assert!(again.is_some());

    let queued = storage::list_reload_requests(db, ws)
        .await
        .expect("list_reload_requests");
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|r| r.amount == 2_000));
}

#[tokio::test]
async fn deleted_keys_do_not_resolve() {
    let db = temp_db_path();
    storage::init_db(&db).expect("init_db");
    let (ws, key_id) = workspace(&db, 0).await;
    let key = storage::get_api_key(db.clone(), key_id.clone())
        .await
        .expect("get_api_key")
        .expect("key");

    let found = storage::find_api_key(db.clone(), key.key.clone())
        .await
        .expect("find_api_key")
        .expect("live key");
    assert_eq!(found.workspace_id, ws);
    assert_eq!(found.billing.payment_method_id.as_deref(), Some("pm_test"));

    storage::delete_api_key(db.clone(), key_id.clone())
        .await
        .expect("delete_api_key");
    assert!(
        storage::find_api_key(db.clone(), key.key)
            .await
            .expect("find_api_key")
            .is_none()
    );
    let deleted = storage::get_api_key(db, key_id)
        .await
        .expect("get_api_key")
        .expect("row kept");
    assert!(deleted.time_deleted.is_some());
}
