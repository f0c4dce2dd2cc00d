pub(super) mod admin;
pub(super) mod health;
pub(super) mod models;
pub(super) mod proxy;

pub(super) use admin::require_admin_token;
pub(super) use health::health;
pub(super) use models::{list_models, reload_models};
pub(super) use proxy::{proxy_anthropic, proxy_openai};
