//! API key resolution and the billing gate.

use axum::http::{HeaderMap, HeaderName, header};
use std::path::PathBuf;

use crate::billing_period::is_current_billing_period;
use crate::models::ProviderOption;
use crate::proxy::{ProxyError, Rejection};
use crate::storage::{self, Billing};

pub const MICRO_CENTS_PER_DOLLAR: i64 = 100 * 1_000_000;

#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub api_key_id: String,
    pub workspace_id: String,
    pub free_tier: bool,
    pub data_share: bool,
    pub billing: Billing,
}

/// Who is calling. A missing key is not an error here: it only becomes one
/// once the selected provider turns out not to accept anonymous traffic.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Key(AuthInfo),
}

impl Caller {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Caller::Anonymous)
    }

    pub fn data_share(&self) -> bool {
        match self {
            Caller::Anonymous => false,
            Caller::Key(info) => info.data_share,
        }
    }
}

/// Key presented by the caller: `Authorization: Bearer <key>`, or the
/// Anthropic-style `x-api-key` header.
pub fn presented_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, rest) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| rest.trim())
        });
    let x_api_key = headers
        .get(HeaderName::from_static("x-api-key"))
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    bearer
        .or(x_api_key)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

pub async fn authenticate(headers: &HeaderMap, db_path: PathBuf) -> Result<Caller, ProxyError> {
    let Some(key) = presented_key(headers) else {
        return Ok(Caller::Anonymous);
    };
    let Some(found) = storage::find_api_key(db_path, key).await? else {
        return Err(Rejection::Auth("Invalid API key.".to_string()).into());
    };
    Ok(Caller::Key(AuthInfo {
        api_key_id: found.api_key_id,
        workspace_id: found.workspace_id,
        free_tier: found.free_tier,
        data_share: found.data_share,
        billing: found.billing,
    }))
}

/// Decides whether a keyed caller may spend on `provider` right now.
///
/// Checks run in order: payment method, balance, then the monthly cap. The
/// stored monthly usage only counts while its timestamp is in the current
/// UTC month.
pub fn validate_billing(
    caller: &Caller,
    provider: &ProviderOption,
    now_ms: i64,
) -> Result<(), Rejection> {
    let Caller::Key(info) = caller else {
        return Ok(());
    };
    if info.free_tier || provider.allow_anonymous {
        return Ok(());
    }

    let billing = &info.billing;
    if billing.payment_method_id.is_none() {
        return Err(Rejection::Credits("No payment method".to_string()));
    }
    if billing.balance <= 0 {
        return Err(Rejection::Credits("Insufficient balance".to_string()));
    }
    if let Some(limit) = billing.monthly_limit
        && let Some(updated) = billing.time_monthly_usage_updated
        && is_current_billing_period(updated, now_ms)
        && billing.monthly_usage >= limit.saturating_mul(MICRO_CENTS_PER_DOLLAR)
    {
        return Err(Rejection::MonthlyLimit(limit));
    }
    Ok(())
}
