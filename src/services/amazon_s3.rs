use std::sync::Arc;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region as SdkRegion;
use log::debug;
use url::Url;
use crate::errors::ToolkitError::{ClientBuildError, NetworkError};
use crate::errors::ToolkitResult;
use crate::services::client_cache::ClientCache;
use crate::services::sdk_http::ReqwestHttpClient;
use crate::services::tasks::ProgressMonitor;
use crate::services::{ClientContext, ServiceClient};
use crate::utils::credential::Credential;
use crate::utils::region::{ServiceAbbreviations, US_EAST_1};
use crate::utils::reqwest::get_endpoint_http_client;

impl ServiceClient for Client {
    fn build(context: &ClientContext) -> ToolkitResult<Self> {
        let endpoint = Url::parse(&context.endpoint)
            .map_err(|e| ClientBuildError(format!("Malformed S3 endpoint {}: {}", context.endpoint, e)))?;
        let http = get_endpoint_http_client(context.proxy.as_ref(), context.connect_timeout, context.socket_timeout)?;

        let timeouts = TimeoutConfig::builder()
            .connect_timeout(context.connect_timeout)
            .read_timeout(context.socket_timeout)
            .build();
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(SdkRegion::new(context.signing_region.clone()))
            .endpoint_url(endpoint.as_str().trim_end_matches('/'))
            .credentials_provider(context.account.get_credential())
            .timeout_config(timeouts)
            .http_client(ReqwestHttpClient::new(http))
            // Virtual hosted buckets don't resolve on loopback hosts.
            .force_path_style(is_loopback(&endpoint))
            .build();
        debug!("Built S3 client for {} signing {} (proxy: {:?})", context.endpoint, context.signing_region, context.proxy);

        Ok(Client::from_conf(config))
    }
}

fn is_loopback(endpoint: &Url) -> bool {
    match endpoint.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

/// Map a `GetBucketLocation` constraint to a region id. Buckets in us-east-1 report no
/// constraint (or `US`), and old eu-west-1 buckets report `EU`.
pub fn normalize_bucket_location(location: Option<&str>) -> String {
    match location {
        None | Some("") | Some("US") => US_EAST_1.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

/// The region `bucket` lives in.
pub async fn bucket_region(client: &Client, bucket: &str) -> ToolkitResult<String> {
    let output = client
        .get_bucket_location()
        .bucket(bucket)
        .send()
        .await
        .map_err(|e| NetworkError(format!("Failed to get the location of bucket {}: {}", bucket, e)))?;

    Ok(normalize_bucket_location(output.location_constraint().map(|c| c.as_str())))
}

/// A client for the region `bucket` lives in, looked up with the current region's client.
pub async fn s3_client_for_bucket(cache: &ClientCache, bucket: &str) -> ToolkitResult<Arc<Client>> {
    let lookup = match cache.get_client_for_current_region::<Client>(ServiceAbbreviations::S3) {
        Ok(client) => client,
        Err(e) => {
            debug!("Looking up bucket {} from {}: {}", bucket, US_EAST_1, e);
            cache.get_client_for_region::<Client>(ServiceAbbreviations::S3, US_EAST_1)?
        }
    };
    let region = bucket_region(&lookup, bucket).await?;
    cache.get_client_for_region::<Client>(ServiceAbbreviations::S3, &region)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3ObjectSummary {
    pub key: String,
    pub size: Option<i64>,
}

/// List every object under `prefix`, one page at a time. Cancellation is checked
/// before each page is requested.
pub async fn list_objects(client: &Client, bucket: &str, prefix: Option<&str>, monitor: &ProgressMonitor) -> ToolkitResult<Vec<S3ObjectSummary>> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        monitor.check()?;
        let page = client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(|p| p.to_string()))
            .set_continuation_token(continuation_token.take())
            .send()
            .await
            .map_err(|e| NetworkError(format!("Failed to list objects in {}: {}", bucket, e)))?;

        objects.extend(page.contents().iter().filter_map(|object| {
            object.key().map(|key| S3ObjectSummary { key: key.to_string(), size: object.size() })
        }));

        match page.next_continuation_token() {
            Some(token) if page.is_truncated().unwrap_or(false) => continuation_token = Some(token.to_string()),
            _ => break,
        }
    }
    debug!("Listed {} objects in {}", objects.len(), bucket);

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, Uri};
    use axum::routing::get;
    use axum::Router;
    use crate::errors::ToolkitError::Canceled;
    use crate::utils::credential::AccountInfo;
    use crate::utils::proxy::ProxyData;
    use super::*;

    fn context(endpoint: &str, signing_region: &str) -> ClientContext {
        ClientContext {
            endpoint: endpoint.to_string(),
            signing_region: signing_region.to_string(),
            service: None,
            account: AccountInfo::new_profile_account("default", "AKIATEST", "secret"),
            proxy: None,
            connect_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(2),
        }
    }

    async fn location(Path(bucket): Path<String>, Query(query): Query<HashMap<String, String>>) -> String {
        assert!(query.contains_key("location"));
        let constraint = match bucket.as_str() {
            "old-eu-bucket" => "EU",
            "tokyo-bucket" => "ap-northeast-1",
            _ => "",
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><LocationConstraint xmlns="http://s3.amazonaws.com/doc/2006-03-01/">{}</LocationConstraint>"#,
            constraint
        )
    }

    async fn serve() -> String {
        let app = Router::new().route("/:bucket", get(location));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[test]
    fn test_normalize_bucket_location() {
        assert_eq!(normalize_bucket_location(None), "us-east-1");
        assert_eq!(normalize_bucket_location(Some("")), "us-east-1");
        assert_eq!(normalize_bucket_location(Some("US")), "us-east-1");
        assert_eq!(normalize_bucket_location(Some("EU")), "eu-west-1");
        assert_eq!(normalize_bucket_location(Some("ap-south-1")), "ap-south-1");
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback(&Url::parse("http://localhost:4566").unwrap()));
        assert!(is_loopback(&Url::parse("http://127.0.0.1:4566").unwrap()));
        assert!(is_loopback(&Url::parse("http://[::1]:4566").unwrap()));
        assert!(!is_loopback(&Url::parse("https://s3.amazonaws.com").unwrap()));
    }

    #[test]
    fn test_build_uses_signing_region() {
        let client = Client::build(&context("https://s3.eu-west-1.amazonaws.com", "eu-west-1")).unwrap();
        assert_eq!(client.config().region().map(|r| r.as_ref()), Some("eu-west-1"));

        assert!(matches!(Client::build(&context("s3 endpoint", "eu-west-1")), Err(ClientBuildError(_))));
    }

    #[tokio::test]
    async fn test_bucket_region() {
        let endpoint = serve().await;
        let client = Client::build(&context(&endpoint, US_EAST_1)).unwrap();

        assert_eq!(bucket_region(&client, "old-eu-bucket").await.unwrap(), "eu-west-1");
        assert_eq!(bucket_region(&client, "tokyo-bucket").await.unwrap(), "ap-northeast-1");
        assert_eq!(bucket_region(&client, "virginia-bucket").await.unwrap(), "us-east-1");
    }

    type Seen = Arc<Mutex<Vec<(String, String)>>>;

    async fn forward(State(seen): State<Seen>, uri: Uri, headers: HeaderMap) -> String {
        let host = headers.get("host").and_then(|h| h.to_str().ok()).unwrap_or("").to_string();
        seen.lock().unwrap().push((host, uri.to_string()));
        r#"<?xml version="1.0" encoding="UTF-8"?><LocationConstraint xmlns="http://s3.amazonaws.com/doc/2006-03-01/">EU</LocationConstraint>"#.to_string()
    }

    #[tokio::test]
    async fn test_requests_go_through_proxy() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(forward).with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut context = context("http://s3.proxied.test", US_EAST_1);
        context.proxy = Some(ProxyData {
            host: address.ip().to_string(),
            port: address.port(),
            username: None,
            password: None,
        });
        let client = Client::build(&context).unwrap();

        // The endpoint host doesn't resolve, so the answer can only come from the proxy.
        assert_eq!(bucket_region(&client, "old-eu-bucket").await.unwrap(), "eu-west-1");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "old-eu-bucket.s3.proxied.test");
        assert!(seen[0].1.starts_with("http://old-eu-bucket.s3.proxied.test/"), "{}", seen[0].1);
    }

    #[tokio::test]
    async fn test_list_objects_stops_when_canceled() {
        let client = Client::build(&context("http://127.0.0.1:9", US_EAST_1)).unwrap();
        let monitor = ProgressMonitor::new();
        monitor.cancel();

        assert!(matches!(list_objects(&client, "bucket", None, &monitor).await, Err(Canceled)));
    }
}
