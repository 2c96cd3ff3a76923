use std::path::Path;
use async_trait::async_trait;
use log::debug;
use reqwest::header::LAST_MODIFIED;
use reqwest::Client;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tokio::fs;
use crate::errors::ToolkitError::NetworkError;
use crate::errors::ToolkitResult;

/// Remote side of the region metadata chain: the metadata document and the flag icons.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// `Last-Modified` of the remote object, [None] when the server doesn't say.
    async fn last_modified(&self, url: &str) -> ToolkitResult<Option<OffsetDateTime>>;

    /// Download the object to `destination`, replacing it.
    async fn download(&self, url: &str, destination: &Path) -> ToolkitResult<()>;
}

/// HTTP dates are RFC 2822 dates with a `GMT` zone.
fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    OffsetDateTime::parse(value, &Rfc2822).ok().or_else(|| {
        let value = value.strip_suffix("GMT")?;
        OffsetDateTime::parse(&format!("{}+0000", value), &Rfc2822).ok()
    })
}

pub struct HttpMetadataFetcher {
    client: Client,
}

impl HttpMetadataFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn last_modified(&self, url: &str) -> ToolkitResult<Option<OffsetDateTime>> {
        let response = self.client
            .head(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| NetworkError(format!("HEAD {} failed: {}", url, e)))?;

        let last_modified = response.headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);
        debug!("Remote {} last modified: {:?}", url, last_modified);

        Ok(last_modified)
    }

    async fn download(&self, url: &str, destination: &Path) -> ToolkitResult<()> {
        let response = self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| NetworkError(format!("GET {} failed: {}", url, e)))?;
        let body = response.bytes()
            .await
            .map_err(|e| NetworkError(format!("Failed to read body of {}: {}", url, e)))?;

        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(destination, &body).await?;
        debug!("Downloaded {} ({} bytes) to {}", url, body.len(), destination.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::header::LAST_MODIFIED;
    use axum::routing::get;
    use axum::Router;
    use time::macros::datetime;
    use super::*;

    async fn serve() -> String {
        let app = Router::new()
            .route("/regions.xml", get(|| async {
                ([(LAST_MODIFIED, "Wed, 21 Oct 2015 07:28:00 GMT")], "<XmlFile/>")
            }))
            .route("/plain", get(|| async { "plain" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[test]
    fn test_parse_http_date() {
        assert_eq!(parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"), Some(datetime!(2015-10-21 07:28:00 UTC)));
        assert_eq!(parse_http_date("Wed, 21 Oct 2015 07:28:00 +0000"), Some(datetime!(2015-10-21 07:28:00 UTC)));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[tokio::test]
    async fn test_head_and_download() {
        let base = serve().await;
        let fetcher = HttpMetadataFetcher::new(Client::new());

        let last_modified = fetcher.last_modified(&format!("{}/regions.xml", base)).await.unwrap();
        assert_eq!(last_modified, Some(datetime!(2015-10-21 07:28:00 UTC)));
        assert_eq!(fetcher.last_modified(&format!("{}/plain", base)).await.unwrap(), None);

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("regions/regions.xml");
        fetcher.download(&format!("{}/regions.xml", base), &destination).await.unwrap();
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "<XmlFile/>");
    }

    #[tokio::test]
    async fn test_missing_object_is_a_network_error() {
        let base = serve().await;
        let fetcher = HttpMetadataFetcher::new(Client::new());
        let dir = tempfile::tempdir().unwrap();

        let result = fetcher.download(&format!("{}/missing", base), &dir.path().join("x")).await;
        assert!(matches!(result, Err(NetworkError(_))));
        assert!(!dir.path().join("x").exists());
    }
}
