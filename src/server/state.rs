use std::net::SocketAddr;
use std::sync::Arc;

use crate::proxy::Gateway;

#[derive(Clone)]
pub struct AppState {
    pub listen_addr: SocketAddr,
    pub gateway: Gateway,
    /// Bearer token for `/api` admin routes; `None` keeps them closed.
    pub admin_token: Option<Arc<str>>,
}
