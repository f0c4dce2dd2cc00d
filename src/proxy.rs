use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, header};
use futures_util::StreamExt as _;
use reqwest::Url;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::auth;
use crate::models::{self, ModelRegistry, ProviderOption};
use crate::storage;
use crate::usage::{SseUsageTracker, UsageFormat};

mod error;
mod meter;
mod stream;

pub use error::{ErrorEnvelope, ProxyError, Rejection};
pub use meter::ReloadPolicy;

use meter::{Exchange, UsageMeter};
use stream::MeteredStream;

const MAX_INBOUND_BODY_BYTES: usize = 64 * 1024 * 1024;
const API_ROOT: &str = "/v1";
const ROUTE_PREFIX: &str = "/zen";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Shared dependencies of the proxy core.
#[derive(Clone)]
pub struct Gateway {
    pub client: reqwest::Client,
    pub db_path: PathBuf,
    pub models: Arc<ModelRegistry>,
    pub reload: ReloadPolicy,
}

/// Authenticates, resolves model and provider, checks billing, forwards the
/// request and relays the response, billing whatever usage it reports.
///
/// Everything up to the upstream call can fail with a [`Rejection`]; once the
/// upstream call has started, failures are plain errors.
pub async fn forward(gw: &Gateway, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let caller = auth::authenticate(&parts.headers, gw.db_path.clone()).await?;

    let body_bytes = to_bytes(body, MAX_INBOUND_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::ReadBody(e.to_string()))?;
    let mut payload: Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid JSON body: {e}")))?;
    let Some(model_id) = payload.get("model").and_then(Value::as_str).map(str::to_string) else {
        return Err(ProxyError::InvalidRequest(
            "request body has no model".to_string(),
        ));
    };
    let is_stream = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let config = gw.models.snapshot();
    let model = models::validate_model(&config, &model_id, &caller)?;
    let provider = models::select_provider(model, &caller, &mut rand::rng())?;
    auth::validate_billing(&caller, provider, storage::now_ms())?;

    let suffix = api_suffix(parts.uri.path());
    let format = UsageFormat::for_route(suffix).unwrap_or_else(|| provider.usage_format());
    rewrite_body(&mut payload, provider, format, is_stream, suffix)?;
    let url = build_upstream_url(&provider.api, &parts.uri)?;
    let out_headers = upstream_headers(&parts.headers, provider, provider.usage_format())?;
    let out_body =
        serde_json::to_vec(&payload).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    tracing::debug!(
        model = %model_id,
        provider = %provider.id,
        upstream = %url,
        format = format.as_str(),
        stream = is_stream,
        anonymous = caller.is_anonymous(),
        "forwarding request"
    );

    let upstream = gw
        .client
        .post(url)
        .headers(out_headers)
        .body(out_body)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = upstream.status();
    let mut resp = Response::builder().status(status);
    if let Some(h) = resp.headers_mut() {
        h.extend(scrubbed_response_headers(upstream.headers()));
    }

    let meter = UsageMeter {
        db_path: gw.db_path.clone(),
        caller,
        model: model.clone(),
        provider_id: provider.id.clone(),
        stream: is_stream,
        reload: gw.reload,
        started,
    };

    if is_stream {
        let inner = upstream.bytes_stream().boxed();
        let metered = MeteredStream::new(inner, SseUsageTracker::new(format), meter);
        return resp
            .body(Body::from_stream(metered))
            .map_err(|e| ProxyError::Upstream(e.to_string()));
    }

    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    let ttfb_ms = started.elapsed().as_millis() as u64;
    let json: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::Upstream(format!("invalid upstream response: {e}")))?;

    match format.from_response(&json) {
        Some(usage) => {
            let exchange = Exchange {
                response_bytes: bytes.len() as u64,
                ttfb_ms: Some(ttfb_ms),
            };
            meter.track(usage, exchange).await?;
        }
        None => tracing::debug!(
            model = %model_id,
            provider = %provider.id,
            http_status = status.as_u16(),
            "response carried no usage"
        ),
    }

    let out = serde_json::to_vec(&json).map_err(|e| ProxyError::Upstream(e.to_string()))?;
    resp.body(Body::from(out))
        .map_err(|e| ProxyError::Upstream(e.to_string()))
}

/// Inbound path with the `/zen` prefix and the `/v1` root removed.
fn api_suffix(path: &str) -> &str {
    let path = path.strip_prefix(ROUTE_PREFIX).unwrap_or(path);
    path.strip_prefix(API_ROOT).unwrap_or(path)
}

fn rewrite_body(
    payload: &mut Value,
    provider: &ProviderOption,
    format: UsageFormat,
    is_stream: bool,
    suffix: &str,
) -> Result<(), ProxyError> {
    let Some(obj) = payload.as_object_mut() else {
        return Err(ProxyError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ));
    };
    obj.insert("model".to_string(), Value::String(provider.model.clone()));

    // Chat Completions only reports usage on a stream when asked to.
    if is_stream && suffix == "/chat/completions" && format == UsageFormat::OpenAi {
        let opts = obj
            .entry("stream_options")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(opts) = opts.as_object_mut() {
            opts.insert("include_usage".to_string(), Value::Bool(true));
        }
    }
    Ok(())
}

/// Provider base URL joined with the inbound API path. A base without a
/// path takes the inbound path whole (minus `/zen`); any other base is the
/// API root and takes the path below `/v1`.
fn build_upstream_url(base_url: &str, inbound_uri: &axum::http::Uri) -> Result<Url, ProxyError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ProxyError::Upstream(format!("invalid provider url {base_url} ({e})")))?;

    let inbound_path = inbound_uri.path();
    let inbound_path = inbound_path
        .strip_prefix(ROUTE_PREFIX)
        .unwrap_or(inbound_path);
    let base_path = url.path().trim_end_matches('/');

    let merged_path = if base_path.is_empty() {
        inbound_path.to_string()
    } else {
        format!("{base_path}{}", api_suffix(inbound_path))
    };

    url.set_path(&merged_path);
    url.set_query(inbound_uri.query());
    Ok(url)
}

fn upstream_headers(
    src: &HeaderMap,
    provider: &ProviderOption,
    format: UsageFormat,
) -> Result<HeaderMap, ProxyError> {
    let mut out = filtered_headers(src);

    // Caller credentials are for the gateway, never for upstream.
    out.remove(header::AUTHORIZATION);
    out.remove(HeaderName::from_static("x-api-key"));
    // The HTTP client negotiates and decodes compression itself.
    out.remove(header::ACCEPT_ENCODING);
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let token = provider.api_key.trim();
    if format == UsageFormat::Anthropic {
        if !token.is_empty() {
            out.insert(
                HeaderName::from_static("x-api-key"),
                token
                    .parse()
                    .map_err(|e| ProxyError::Upstream(format!("bad x-api-key: {e}")))?,
            );
        }
        if !out.contains_key("anthropic-version") {
            out.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }
    } else if !token.is_empty() {
        out.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|e| ProxyError::Upstream(format!("bad bearer: {e}")))?,
        );
    }

    for (to, from) in &provider.header_mappings {
        let Some(value) = src.get(from.as_str()) else {
            continue;
        };
        match HeaderName::from_bytes(to.as_bytes()) {
            Ok(name) => {
                out.insert(name, value.clone());
            }
            Err(e) => tracing::warn!(
                provider = %provider.id,
                header = %to,
                err = %e,
                "skipping invalid header mapping"
            ),
        }
    }

    Ok(out)
}

fn filtered_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();

    let mut connection_tokens = Vec::<String>::new();
    if let Some(v) = src.get(header::CONNECTION)
        && let Ok(s) = v.to_str()
    {
        for token in s.split(',') {
            let t = token.trim().to_ascii_lowercase();
            if !t.is_empty() {
                connection_tokens.push(t);
            }
        }
    }

    for (name, value) in src.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        if name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        if connection_tokens.iter().any(|t| t == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    out
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Only the headers a client needs to read the body make it back.
fn scrubbed_response_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::CACHE_CONTROL] {
        for value in src.get_all(&name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}
