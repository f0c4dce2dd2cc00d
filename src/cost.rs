use serde::{Deserialize, Serialize};

use crate::models::ModelDefinition;
use crate::usage::TokenUsage;

/// Prompt-side token volume above which a model's high-volume table prices
/// the entire request.
pub const HIGH_VOLUME_THRESHOLD: u64 = 200_000;

const MICRO_CENTS_PER_CENT: f64 = 1_000_000.0;

/// Dollars per token for each category. Unpriced categories cost nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    #[serde(default)]
    pub input: Option<f64>,
    #[serde(default)]
    pub output: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<f64>,
    #[serde(default)]
    pub cache_read: Option<f64>,
    #[serde(default)]
    pub cache_write_5m: Option<f64>,
    #[serde(default)]
    pub cache_write_1h: Option<f64>,
}

/// Whether the request is priced from the model's high-volume table.
pub fn is_high_volume(model: &ModelDefinition, usage: &TokenUsage) -> bool {
    model.cost_200k.is_some() && usage.prompt_volume() > HIGH_VOLUME_THRESHOLD
}

pub fn select_tier<'a>(model: &'a ModelDefinition, usage: &TokenUsage) -> &'a CostTable {
    match model.cost_200k.as_ref() {
        Some(high) if is_high_volume(model, usage) => high,
        _ => &model.cost,
    }
}

pub fn cost_cents(usage: &TokenUsage, table: &CostTable) -> f64 {
    [
        (usage.input, table.input),
        (usage.output, table.output),
        (usage.reasoning, table.reasoning),
        (usage.cache_read, table.cache_read),
        (usage.cache_write_5m, table.cache_write_5m),
        (usage.cache_write_1h, table.cache_write_1h),
    ]
    .into_iter()
    .filter_map(|(tokens, price)| match (tokens, price) {
        (Some(t), Some(p)) if t > 0 && p > 0.0 && p.is_finite() => Some(t as f64 * p * 100.0),
        _ => None,
    })
    .sum()
}

pub fn cents_to_micro_cents(cents: f64) -> i64 {
    (cents * MICRO_CENTS_PER_CENT).round() as i64
}

/// Ledger charge in micro-cents for a request against a model.
pub fn charge_micro_cents(model: &ModelDefinition, usage: &TokenUsage) -> i64 {
    cents_to_micro_cents(cost_cents(usage, select_tier(model, usage)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input: Some(input),
            output: Some(output),
            ..TokenUsage::default()
        }
    }

    fn table(input: f64, output: f64) -> CostTable {
        CostTable {
            input: Some(input),
            output: Some(output),
            ..CostTable::default()
        }
    }

    #[test]
    fn sums_priced_categories_in_cents() {
        let cents = cost_cents(&usage(1000, 500), &table(0.000001, 0.000002));
        assert!((cents - 0.2).abs() < 1e-9, "{cents}");
        assert_eq!(cents_to_micro_cents(cents), 200_000);
    }

    #[test]
    fn unpriced_and_absent_categories_contribute_nothing() {
        let u = TokenUsage {
            input: Some(1000),
            output: Some(500),
            reasoning: Some(10_000),
            cache_read: Some(10_000),
            ..TokenUsage::default()
        };
        let with_extra = cost_cents(&u, &table(0.000001, 0.000002));
        assert!((with_extra - 0.2).abs() < 1e-9);

        let only_input = cost_cents(
            &TokenUsage {
                input: Some(1000),
                ..TokenUsage::default()
            },
            &table(0.000001, 0.000002),
        );
        assert!((only_input - 0.1).abs() < 1e-9);
    }

    fn model_with_tiers() -> ModelDefinition {
        ModelDefinition {
            id: "m".to_string(),
            cost: CostTable {
                input: Some(0.000001),
                output: Some(0.000002),
                cache_read: Some(0.0000001),
                ..CostTable::default()
            },
            cost_200k: Some(CostTable {
                input: Some(0.000002),
                output: Some(0.000004),
                cache_read: Some(0.0000002),
                ..CostTable::default()
            }),
            providers: Vec::new(),
        }
    }

    #[test]
    fn high_volume_tier_prices_whole_request() {
        let m = model_with_tiers();
        let u = TokenUsage {
            input: Some(100_000),
            output: Some(1_000),
            cache_read: Some(50_000),
            cache_write_5m: Some(40_000),
            cache_write_1h: Some(10_001),
            ..TokenUsage::default()
        };
        assert_eq!(u.prompt_volume(), 200_001);
        assert!(is_high_volume(&m, &u));
        let tier = select_tier(&m, &u);
        assert_eq!(tier, m.cost_200k.as_ref().unwrap());

        // 100_000*2e-6*100 + 1_000*4e-6*100 + 50_000*2e-7*100 = 20 + 0.4 + 1
        let cents = cost_cents(&u, tier);
        assert!((cents - 21.4).abs() < 1e-9, "{cents}");
        assert_eq!(charge_micro_cents(&m, &u), 21_400_000);
    }

    #[test]
    fn at_threshold_stays_on_standard_tier() {
        let m = model_with_tiers();
        let u = usage(200_000, 10);
        assert!(!is_high_volume(&m, &u));
        assert_eq!(select_tier(&m, &u), &m.cost);
    }

    #[test]
    fn missing_high_volume_table_keeps_standard() {
        let mut m = model_with_tiers();
        m.cost_200k = None;
        assert!(!is_high_volume(&m, &usage(1_000_000, 0)));
        assert_eq!(select_tier(&m, &usage(1_000_000, 0)), &m.cost);
        assert_eq!(charge_micro_cents(&m, &usage(1_000_000, 0)), 100_000_000);
    }
}
