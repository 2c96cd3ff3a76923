use log::error;
use reqwest::Client;
use url::Url;
use crate::errors::ToolkitError::{ClientBuildError, InvalidArgumentError};
use crate::errors::ToolkitResult;
use crate::services::{ClientContext, ServiceClient};
use crate::utils::reqwest::get_endpoint_http_client;

/// Plain HTTP client bound to one service endpoint, for services reached without an
/// SDK such as the ones registered in the local region.
///
/// Requests are unsigned: the account and signing region of the [ClientContext] are
/// not used, only its endpoint, proxy and timeouts.
pub struct EndpointClient {
    client: Client,
    base_url: String,
}

impl EndpointClient {
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn generate_endpoint(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        format!("{}{}", self.base_url, path)
    }

    pub fn request_url(&self, path: &str) -> ToolkitResult<Url> {
        let endpoint = self.generate_endpoint(path);
        match Url::parse(&endpoint) {
            Ok(url) => Ok(url),
            Err(e) => {
                error!("Failed to parse endpoint: {:?}", e);
                Err(InvalidArgumentError(format!("Invalid request url {}", endpoint)))
            }
        }
    }
}

impl ServiceClient for EndpointClient {
    fn build(context: &ClientContext) -> ToolkitResult<Self> {
        let endpoint = Url::parse(&context.endpoint)
            .map_err(|e| ClientBuildError(format!("Malformed endpoint {}: {}", context.endpoint, e)))?;
        let client = get_endpoint_http_client(context.proxy.as_ref(), context.connect_timeout, context.socket_timeout)?;

        Ok(Self {
            client,
            base_url: endpoint.as_str().trim_end_matches('/').to_string(),
        })
    }
}
