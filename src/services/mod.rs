use std::time::Duration;
use crate::errors::ToolkitResult;
use crate::utils::credential::AccountInfo;
use crate::utils::proxy::ProxyData;
use crate::utils::region::Service;

pub mod amazon_s3;
pub mod client_cache;
pub mod endpoint;
pub(crate) mod sdk_http;
pub mod tasks;

/// Everything a service client is built from.
#[derive(Clone, Debug)]
pub struct ClientContext {
    pub endpoint: String,
    /// Region requests are signed for.
    pub signing_region: String,
    /// Region metadata of the service at `endpoint`, when the catalog knows it.
    pub service: Option<Service>,
    pub account: AccountInfo,
    /// Proxy resolved for `endpoint`, [None] for a direct connection.
    pub proxy: Option<ProxyData>,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
}

/// A client type the [client_cache::ClientCache] can construct.
pub trait ServiceClient: Send + Sync + 'static {
    fn build(context: &ClientContext) -> ToolkitResult<Self> where Self: Sized;
}
