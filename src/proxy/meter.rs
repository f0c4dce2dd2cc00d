use std::path::PathBuf;
use std::time::Instant;

use crate::auth::{Caller, MICRO_CENTS_PER_DOLLAR};
use crate::cost;
use crate::models::ModelDefinition;
use crate::storage::{self, Billing, CreateUsageRecord};
use crate::usage::TokenUsage;

/// Auto-reload knobs, in micro-cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadPolicy {
    /// Balance below which a reload is queued.
    pub trigger: i64,
    /// Amount a queued reload asks for.
    pub amount: i64,
}

impl Default for ReloadPolicy {
    fn default() -> Self {
        Self {
            trigger: 5 * MICRO_CENTS_PER_DOLLAR,
            amount: 20 * MICRO_CENTS_PER_DOLLAR,
        }
    }
}

/// What the response relay reports once the exchange is over.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Exchange {
    pub(crate) response_bytes: u64,
    pub(crate) ttfb_ms: Option<u64>,
}

/// Everything needed to bill one upstream exchange after the fact.
pub(crate) struct UsageMeter {
    pub(crate) db_path: PathBuf,
    pub(crate) caller: Caller,
    pub(crate) model: ModelDefinition,
    pub(crate) provider_id: String,
    pub(crate) stream: bool,
    pub(crate) reload: ReloadPolicy,
    pub(crate) started: Instant,
}

impl UsageMeter {
    /// Prices the usage, writes the ledger row with its debit, then runs the
    /// reload check. Anonymous callers have no workspace and are only logged.
    pub(crate) async fn track(&self, usage: TokenUsage, exchange: Exchange) -> anyhow::Result<()> {
        let cost = cost::charge_micro_cents(&self.model, &usage);

        tracing::info!(
            target: "zengate::metrics",
            model = %self.model.id,
            provider = %self.provider_id,
            stream = self.stream,
            response_bytes = exchange.response_bytes,
            ttfb_ms = exchange.ttfb_ms.map(|v| v as i64).unwrap_or(-1),
            duration_ms = self.started.elapsed().as_millis() as u64,
            input_tokens = usage.input.unwrap_or(0),
            output_tokens = usage.output.unwrap_or(0),
            reasoning_tokens = usage.reasoning.unwrap_or(0),
            cache_read_tokens = usage.cache_read.unwrap_or(0),
            cache_write_5m_tokens = usage.cache_write_5m.unwrap_or(0),
            cache_write_1h_tokens = usage.cache_write_1h.unwrap_or(0),
            high_volume = cost::is_high_volume(&self.model, &usage),
            cost_micro_cents = cost,
            "request metered"
        );

        let Caller::Key(info) = &self.caller else {
            return Ok(());
        };

        let billing = storage::record_usage(
            self.db_path.clone(),
            CreateUsageRecord {
                workspace_id: info.workspace_id.clone(),
                api_key_id: info.api_key_id.clone(),
                model: self.model.id.clone(),
                provider: self.provider_id.clone(),
                input_tokens: to_i64(usage.input.unwrap_or(0)),
                output_tokens: to_i64(usage.output.unwrap_or(0)),
                reasoning_tokens: usage.reasoning.map(to_i64),
                cache_read_tokens: usage.cache_read.map(to_i64),
                cache_write_5m_tokens: usage.cache_write_5m.map(to_i64),
                cache_write_1h_tokens: usage.cache_write_1h.map(to_i64),
                cost,
                charge: !info.free_tier,
                now_ms: storage::now_ms(),
            },
        )
        .await?;

        if !info.free_tier {
            self.reload_check(&billing).await?;
        }
        Ok(())
    }

    async fn reload_check(&self, billing: &Billing) -> anyhow::Result<()> {
        if !billing.reload
            || billing.payment_method_id.is_none()
            || billing.balance >= self.reload.trigger
        {
            return Ok(());
        }
        let queued = storage::try_lock_reload(
            self.db_path.clone(),
            billing.workspace_id.clone(),
            self.reload.amount,
            storage::now_ms(),
        )
        .await?;
        match queued {
            Some(req) => tracing::info!(
                workspace_id = %req.workspace_id,
                amount = req.amount,
                balance = billing.balance,
                "reload queued"
            ),
            None => tracing::debug!(
                workspace_id = %billing.workspace_id,
                "reload already in flight"
            ),
        }
        Ok(())
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
