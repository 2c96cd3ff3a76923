use std::time::Duration;
use reqwest::{Client, Proxy};
use crate::errors::ToolkitError::ClientBuildError;
use crate::errors::ToolkitResult;
use crate::utils::proxy::{ProxyData, SharedProxySettings};

pub(crate) const USER_AGENT: &str = concat!("aws-toolkit-core/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used for metadata and flag icon downloads.
///
/// The proxy is picked per request URL from the shared settings, so hosts listed in
/// `non_proxy_hosts` keep connecting directly and later proxy changes apply too.
pub(crate) fn get_http_client(proxy: &SharedProxySettings, connect_timeout: Duration, timeout: Duration) -> ToolkitResult<Client> {
    let settings = proxy.clone();
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        // Replaces the proxies reqwest would read from the environment.
        .proxy(Proxy::custom(move |url| {
            settings.select(url).and_then(|data| data.to_url())
        }))
        .build()
        .map_err(|e| ClientBuildError(format!("Failed to build http client: {:#?}", e)))?;

    Ok(client)
}

/// Build a client bound to one proxy already resolved for its endpoint.
pub(crate) fn get_endpoint_http_client(proxy: Option<&ProxyData>, connect_timeout: Duration, timeout: Duration) -> ToolkitResult<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .timeout(timeout);

    builder = match proxy.and_then(|data| data.to_url()) {
        Some(proxy_url) => {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| ClientBuildError(format!("Invalid proxy: {:#?}", e)))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| ClientBuildError(format!("Failed to build http client: {:#?}", e)))
}
