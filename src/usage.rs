//! Provider usage telemetry normalized into one token tuple.

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod sse;

pub use sse::SseUsageTracker;

/// Token counts per billing category. Categories are disjoint: cached prompt
/// tokens are not also counted as input, reasoning tokens are not also
/// counted as output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub reasoning: Option<u64>,
    pub cache_read: Option<u64>,
    pub cache_write_5m: Option<u64>,
    pub cache_write_1h: Option<u64>,
}

impl TokenUsage {
    /// Prompt-side volume that decides the pricing tier.
    pub fn prompt_volume(&self) -> u64 {
        [
            self.input,
            self.cache_read,
            self.cache_write_5m,
            self.cache_write_1h,
        ]
        .into_iter()
        .flatten()
        .fold(0u64, u64::saturating_add)
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }

    /// Later reports win per field; fields the later report lacks are kept.
    pub fn merge(&mut self, later: TokenUsage) {
        fn pick(slot: &mut Option<u64>, v: Option<u64>) {
            if v.is_some() {
                *slot = v;
            }
        }
        pick(&mut self.input, later.input);
        pick(&mut self.output, later.output);
        pick(&mut self.reasoning, later.reasoning);
        pick(&mut self.cache_read, later.cache_read);
        pick(&mut self.cache_write_5m, later.cache_write_5m);
        pick(&mut self.cache_write_1h, later.cache_write_1h);
    }
}

/// Usage payload shape, one per upstream API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageFormat {
    /// Anthropic Messages.
    Anthropic,
    /// OpenAI Chat Completions and Responses, and compatible APIs.
    #[serde(rename = "openai")]
    OpenAi,
    /// Gemini `usageMetadata`.
    Google,
}

impl UsageFormat {
    pub fn for_provider_id(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "anthropic" => UsageFormat::Anthropic,
            "google" | "gemini" | "vertex" => UsageFormat::Google,
            _ => UsageFormat::OpenAi,
        }
    }

    /// Wire family implied by the inbound API path (below `/v1`). The route
    /// fixes the response shape, whichever provider serves it.
    pub fn for_route(suffix: &str) -> Option<Self> {
        match suffix.trim_end_matches('/') {
            "/messages" => Some(UsageFormat::Anthropic),
            "/chat/completions" | "/responses" => Some(UsageFormat::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UsageFormat::Anthropic => "anthropic",
            UsageFormat::OpenAi => "openai",
            UsageFormat::Google => "google",
        }
    }

    /// Normalizes a raw usage object. `None` when nothing recognizable is in it.
    pub fn normalize(self, raw: &Value) -> Option<TokenUsage> {
        if !raw.is_object() {
            return None;
        }
        let usage = match self {
            UsageFormat::Anthropic => normalize_anthropic(raw),
            UsageFormat::OpenAi => normalize_openai(raw),
            UsageFormat::Google => normalize_google(raw),
        };
        (!usage.is_empty()).then_some(usage)
    }

    /// Usage of a complete (non-streamed) response body.
    pub fn from_response(self, body: &Value) -> Option<TokenUsage> {
        let raw = match self {
            UsageFormat::Anthropic | UsageFormat::OpenAi => body.get("usage"),
            UsageFormat::Google => body.get("usageMetadata"),
        }?;
        self.normalize(raw)
    }

    /// Usage carried by one SSE event block, if any.
    pub fn from_event(self, block: &str) -> Option<TokenUsage> {
        let data = event_data(block)?;
        if data == "[DONE]" {
            return None;
        }
        let v: Value = serde_json::from_str(&data).ok()?;
        let raw = match self {
            UsageFormat::Anthropic => match v.get("type").and_then(Value::as_str) {
                Some("message_start") => v.get("message").and_then(|m| m.get("usage")),
                _ => v.get("usage"),
            },
            UsageFormat::OpenAi => match v.get("type").and_then(Value::as_str) {
                Some(t) if t.starts_with("response.") => {
                    v.get("response").and_then(|r| r.get("usage"))
                }
                _ => v.get("usage"),
            },
            UsageFormat::Google => v.get("usageMetadata"),
        }?;
        self.normalize(raw)
    }
}

/// Joins the `data:` lines of one event block.
fn event_data(block: &str) -> Option<String> {
    let mut out: Option<String> = None;
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match out.as_mut() {
            Some(s) => {
                s.push('\n');
                s.push_str(rest);
            }
            None => out = Some(rest.to_string()),
        }
    }
    out
}

fn uint(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(Value::as_u64)
}

fn nested_uint(v: &Value, outer: &str, key: &str) -> Option<u64> {
    v.get(outer).and_then(|o| uint(o, key))
}

fn normalize_anthropic(raw: &Value) -> TokenUsage {
    let split_5m = nested_uint(raw, "cache_creation", "ephemeral_5m_input_tokens");
    let split_1h = nested_uint(raw, "cache_creation", "ephemeral_1h_input_tokens");
    let (cache_write_5m, cache_write_1h) = if split_5m.is_some() || split_1h.is_some() {
        (split_5m, split_1h)
    } else {
        (uint(raw, "cache_creation_input_tokens"), None)
    };
    TokenUsage {
        input: uint(raw, "input_tokens"),
        output: uint(raw, "output_tokens"),
        reasoning: None,
        cache_read: uint(raw, "cache_read_input_tokens"),
        cache_write_5m,
        cache_write_1h,
    }
}

fn normalize_openai(raw: &Value) -> TokenUsage {
    // Chat Completions names first, Responses names second.
    let (prompt, completion, cached, reasoning) = if raw.get("prompt_tokens").is_some() {
        (
            uint(raw, "prompt_tokens"),
            uint(raw, "completion_tokens"),
            nested_uint(raw, "prompt_tokens_details", "cached_tokens"),
            nested_uint(raw, "completion_tokens_details", "reasoning_tokens"),
        )
    } else {
        (
            uint(raw, "input_tokens"),
            uint(raw, "output_tokens"),
            nested_uint(raw, "input_tokens_details", "cached_tokens"),
            nested_uint(raw, "output_tokens_details", "reasoning_tokens"),
        )
    };
    TokenUsage {
        input: prompt.map(|p| p.saturating_sub(cached.unwrap_or(0))),
        output: completion.map(|c| c.saturating_sub(reasoning.unwrap_or(0))),
        reasoning,
        cache_read: cached,
        cache_write_5m: None,
        cache_write_1h: None,
    }
}

fn normalize_google(raw: &Value) -> TokenUsage {
    let cached = uint(raw, "cachedContentTokenCount");
    TokenUsage {
        input: uint(raw, "promptTokenCount").map(|p| p.saturating_sub(cached.unwrap_or(0))),
        output: uint(raw, "candidatesTokenCount"),
        reasoning: uint(raw, "thoughtsTokenCount"),
        cache_read: cached,
        cache_write_5m: None,
        cache_write_1h: None,
    }
}
