use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::fs;
use crate::config::ToolkitConfig;
use crate::errors::ToolkitError::RegionLoadError;
use crate::errors::ToolkitResult;
use crate::utils::region::fetcher::MetadataFetcher;
use crate::utils::region::flags::{bundled_flags, cache_flags, FlagIcon};
use crate::utils::region::parser::parse_region_metadata;
use crate::utils::region::{Region, ServiceAbbreviations, S3_US_EAST_1_REGIONAL_ENDPOINT, US_EAST_1};

const CACHED_REGIONS_FILE: &str = "regions.xml";

/// Region documents shipped inside the toolkit.
#[derive(Clone, Debug)]
pub struct BundledResources {
    /// Last resort when nothing else could be loaded.
    pub regions: Cow<'static, str>,
    /// Takes priority over the remote document when present, used for private partitions.
    pub regions_override: Option<Cow<'static, str>>,
}

impl Default for BundledResources {
    fn default() -> Self {
        Self {
            regions: Cow::Borrowed(include_str!("../../../resources/regions.xml")),
            regions_override: None,
        }
    }
}

/// The step of the chain that produced the region list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionSource {
    OverrideFile,
    BundledOverride,
    Remote,
    BundledFallback,
}

impl Display for RegionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverrideFile => write!(f, "override file"),
            Self::BundledOverride => write!(f, "bundled override"),
            Self::Remote => write!(f, "remote metadata"),
            Self::BundledFallback => write!(f, "bundled fallback"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadedRegions {
    pub regions: Vec<Region>,
    pub source: RegionSource,
    pub flags: HashMap<String, FlagIcon>,
}

/// Loads the region list, trying in order:
///
/// 1. the override file from [ToolkitConfig::regions_file_override]
/// 2. the bundled override document, if the toolkit ships one
/// 3. the remote `ServiceEndPoints.xml`, cached under the state directory
///    (skipped when [ToolkitConfig::use_local_region_file] is set)
/// 4. the bundled fallback document
///
/// Steps 1 and 2 exclude the remote step: when they fail, loading goes straight to the
/// bundled fallback.
pub struct RegionLoader {
    config: ToolkitConfig,
    resources: BundledResources,
    fetcher: Arc<dyn MetadataFetcher>,
}

impl RegionLoader {
    pub fn new(config: ToolkitConfig, resources: BundledResources, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self {
            config,
            resources,
            fetcher,
        }
    }

    pub async fn load_regions(&self) -> ToolkitResult<LoadedRegions> {
        if let Some(override_file) = &self.config.regions_file_override {
            match self.load_override_file(override_file).await {
                Ok(loaded) => return Ok(loaded),
                Err(e) => error!("Couldn't load regions override {}: {}", override_file.display(), e),
            }
        } else if let Some(document) = &self.resources.regions_override {
            match parse_document(document) {
                Ok(regions) => {
                    let flags = bundled_flags(&regions);
                    return Ok(LoadedRegions { regions, source: RegionSource::BundledOverride, flags });
                }
                Err(e) => error!("Couldn't load bundled regions override: {}", e),
            }
        } else if !self.config.use_local_region_file {
            match self.load_remote().await {
                Ok(loaded) => return Ok(loaded),
                Err(e) => error!("Couldn't load remote regions metadata: {}", e),
            }
        }

        self.load_bundled_fallback()
    }

    async fn load_override_file(&self, override_file: &Path) -> ToolkitResult<LoadedRegions> {
        let document = fs::read_to_string(override_file).await?;
        let regions = parse_document(&document)?;
        info!("Loaded {} regions from override file {}", regions.len(), override_file.display());

        let flags = match override_file.parent() {
            Some(dir) => cache_flags(&regions, dir, &self.config.remote_metadata_base_url, self.fetcher.as_ref()).await,
            None => HashMap::new(),
        };

        Ok(LoadedRegions { regions, source: RegionSource::OverrideFile, flags })
    }

    async fn load_remote(&self) -> ToolkitResult<LoadedRegions> {
        let regions_dir = self.config.regions_cache_dir();
        let regions_file = regions_dir.join(CACHED_REGIONS_FILE);

        if let Err(e) = self.cache_regions_file(&regions_file).await {
            // The previously cached copy, if any, is still usable.
            error!("Failed to cache regions file: {}", e);
        }

        let regions = match read_cached_regions(&regions_file).await {
            Ok(regions) => regions,
            Err(e) => {
                // Remove it so the next start fetches a clean copy.
                if regions_file.exists() {
                    if let Err(remove_err) = fs::remove_file(&regions_file).await {
                        warn!("Failed to remove broken regions file {}: {}", regions_file.display(), remove_err);
                    }
                }
                return Err(e);
            }
        };
        info!("Loaded {} regions from {}", regions.len(), regions_file.display());

        let flags = cache_flags(&regions, &regions_dir, &self.config.remote_metadata_base_url, self.fetcher.as_ref()).await;

        Ok(LoadedRegions { regions, source: RegionSource::Remote, flags })
    }

    /// Download the remote document to `regions_file` unless the local copy is up to date.
    async fn cache_regions_file(&self, regions_file: &Path) -> ToolkitResult<()> {
        let local_last_modified = match fs::metadata(regions_file).await {
            Ok(metadata) => metadata.modified()
                .map(OffsetDateTime::from)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            Err(_) => {
                if let Some(dir) = regions_file.parent() {
                    fs::create_dir_all(dir).await?;
                }
                OffsetDateTime::UNIX_EPOCH
            }
        };

        let url = self.config.regions_metadata_url();
        let remote_last_modified = self.fetcher.last_modified(&url).await?;
        let outdated = match remote_last_modified {
            Some(remote) => remote > local_last_modified,
            None => true,
        };

        if outdated {
            debug!("Local regions file is outdated. Downloading {}", url);
            let download_path = partial_path(regions_file);
            self.fetcher.download(&url, &download_path).await?;
            fs::rename(&download_path, regions_file).await?;
        } else {
            debug!("Local regions file is up to date");
        }

        Ok(())
    }

    fn load_bundled_fallback(&self) -> ToolkitResult<LoadedRegions> {
        let regions = parse_document(&self.resources.regions)
            .map_err(|e| RegionLoadError(format!("Every region source failed, the bundled one with: {}", e)))?;
        info!("Loaded {} regions from the bundled fallback", regions.len());
        let flags = bundled_flags(&regions);

        Ok(LoadedRegions { regions, source: RegionSource::BundledFallback, flags })
    }
}

async fn read_cached_regions(regions_file: &Path) -> ToolkitResult<Vec<Region>> {
    let document = fs::read_to_string(regions_file).await?;
    parse_document(&document)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".download");
    PathBuf::from(partial)
}

/// Parse a document and apply the adjustments every loaded list gets.
pub(crate) fn parse_document(document: &str) -> ToolkitResult<Vec<Region>> {
    let mut regions = parse_region_metadata(document)?;
    append_local_region(&mut regions);
    replace_s3_global_endpoint_with_regional(&mut regions);
    Ok(regions)
}

fn append_local_region(regions: &mut Vec<Region>) {
    regions.retain(|region| {
        if region.is_local() {
            warn!("Ignoring the local region defined by the metadata document");
        }
        !region.is_local()
    });
    regions.push(Region::local());
}

/// The S3 global endpoint is ambiguous for bucket location lookups, so us-east-1 always
/// uses the explicit regional one.
fn replace_s3_global_endpoint_with_regional(regions: &mut [Region]) {
    for region in regions.iter_mut().filter(|region| region.id() == US_EAST_1) {
        region.put_service_endpoint(ServiceAbbreviations::S3, S3_US_EAST_1_REGIONAL_ENDPOINT);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::borrow::Cow;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use async_trait::async_trait;
    use time::OffsetDateTime;
    use crate::config::ToolkitConfig;
    use crate::errors::ToolkitError::NetworkError;
    use crate::errors::ToolkitResult;
    use crate::utils::region::fetcher::MetadataFetcher;
    use crate::utils::region::flags::FlagIcon;
    use crate::utils::region::{LOCAL_REGION_ID, S3_US_EAST_1_REGIONAL_ENDPOINT};
    use super::*;

    pub(crate) const REMOTE_METADATA: &str = r#"<regions>
  <region>
    <displayname>US East (Virginia)</displayname>
    <systemname>us-east-1</systemname>
    <flag-icon>flags/usa.png</flag-icon>
    <service name="S3">https://s3.amazonaws.com</service>
    <service name="SQS">https://sqs.us-east-1.amazonaws.com</service>
  </region>
  <region>
    <displayname>Remote Only</displayname>
    <systemname>xx-remote-1</systemname>
    <flag-icon>flags/remote.png</flag-icon>
    <service name="SQS">https://sqs.xx-remote-1.amazonaws.com</service>
  </region>
</regions>"#;

    /// In-memory stand-in for the remote distribution.
    #[derive(Default)]
    pub(crate) struct StaticFetcher {
        pub(crate) objects: HashMap<String, (Option<OffsetDateTime>, Vec<u8>)>,
        pub(crate) offline: bool,
        pub(crate) downloads: Mutex<Vec<String>>,
    }

    impl StaticFetcher {
        pub(crate) fn with_object(mut self, url: &str, last_modified: Option<OffsetDateTime>, body: &[u8]) -> Self {
            self.objects.insert(url.to_string(), (last_modified, body.to_vec()));
            self
        }

        pub(crate) fn download_count(&self) -> usize {
            self.downloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MetadataFetcher for StaticFetcher {
        async fn last_modified(&self, url: &str) -> ToolkitResult<Option<OffsetDateTime>> {
            if self.offline {
                return Err(NetworkError("offline".to_string()));
            }
            self.objects.get(url)
                .map(|(last_modified, _)| *last_modified)
                .ok_or_else(|| NetworkError(format!("404 {}", url)))
        }

        async fn download(&self, url: &str, destination: &Path) -> ToolkitResult<()> {
            if self.offline {
                return Err(NetworkError("offline".to_string()));
            }
            let (_, body) = self.objects.get(url).ok_or_else(|| NetworkError(format!("404 {}", url)))?;
            if let Some(dir) = destination.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(destination, body)?;
            self.downloads.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn config(state_dir: &Path) -> ToolkitConfig {
        let mut config = ToolkitConfig::with_state_dir(state_dir.to_path_buf());
        config.remote_metadata_base_url = "https://metadata.test/".to_string();
        config
    }

    fn build_loader(config: ToolkitConfig, resources: BundledResources, fetcher: StaticFetcher) -> (RegionLoader, Arc<StaticFetcher>) {
        let fetcher = Arc::new(fetcher);
        (RegionLoader::new(config, resources, fetcher.clone()), fetcher)
    }

    fn remote_fetcher() -> StaticFetcher {
        StaticFetcher::default()
            .with_object("https://metadata.test/ServiceEndPoints.xml", None, REMOTE_METADATA.as_bytes())
            .with_object("https://metadata.test/flags/usa.png", None, b"usa")
    }

    fn assert_invariants(loaded: &LoadedRegions) {
        let locals = loaded.regions.iter().filter(|r| r.id() == LOCAL_REGION_ID).count();
        assert_eq!(locals, 1);
        let virginia = loaded.regions.iter().find(|r| r.id() == "us-east-1").unwrap();
        assert_eq!(virginia.service_endpoint("S3"), Some(S3_US_EAST_1_REGIONAL_ENDPOINT));
    }

    #[tokio::test]
    async fn test_remote_metadata_is_cached_and_used() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let (loader, fetcher) = build_loader(config(dir.path()), BundledResources::default(), remote_fetcher());

        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::Remote);
        assert!(loaded.regions.iter().any(|r| r.id() == "xx-remote-1"));
        assert_invariants(&loaded);
        assert!(dir.path().join("regions/regions.xml").exists());

        // The usa flag is fetched, the remote one is missing and only logged.
        assert_eq!(
            loaded.flags.get("us-east-1"),
            Some(&FlagIcon::Cached(dir.path().join("regions/flags/usa.png")))
        );
        assert!(!loaded.flags.contains_key("xx-remote-1"));
        assert_eq!(fetcher.download_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_not_downloaded_when_cache_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("regions/regions.xml");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, REMOTE_METADATA).unwrap();

        let fetcher = StaticFetcher::default().with_object(
            "https://metadata.test/ServiceEndPoints.xml",
            Some(OffsetDateTime::UNIX_EPOCH),
            b"<broken",
        );
        let (loader, fetcher) = build_loader(config(dir.path()), BundledResources::default(), fetcher);

        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::Remote);
        assert!(loaded.regions.iter().any(|r| r.id() == "xx-remote-1"));
        // Neither the document nor the missing flags could be fetched.
        assert_eq!(fetcher.download_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_uses_previous_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("regions/regions.xml");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, REMOTE_METADATA).unwrap();

        let fetcher = StaticFetcher { offline: true, ..Default::default() };
        let (loader, _) = build_loader(config(dir.path()), BundledResources::default(), fetcher);

        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::Remote);
        assert_invariants(&loaded);
    }

    #[tokio::test]
    async fn test_broken_cache_is_deleted_and_bundled_used() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("regions/regions.xml");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, "<regions><region>").unwrap();

        let fetcher = StaticFetcher { offline: true, ..Default::default() };
        let (loader, _) = build_loader(config(dir.path()), BundledResources::default(), fetcher);

        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::BundledFallback);
        assert_invariants(&loaded);
        assert!(!cached.exists());
        assert!(matches!(loaded.flags.get("us-east-1"), Some(FlagIcon::Bundled(_))));
    }

    #[tokio::test]
    async fn test_override_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let override_file = dir.path().join("override/regions.xml");
        std::fs::create_dir_all(override_file.parent().unwrap()).unwrap();
        std::fs::write(&override_file, r#"<regions><region>
            <systemname>us-east-1</systemname>
            <service name="SQS">https://sqs.private.example.com</service>
            <flag-icon>flags/usa.png</flag-icon>
        </region></regions>"#).unwrap();

        let mut config = config(dir.path());
        config.regions_file_override = Some(override_file.clone());
        let (loader, _) = build_loader(config, BundledResources::default(), remote_fetcher());

        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::OverrideFile);
        assert_eq!(loaded.regions.len(), 2);
        assert_invariants(&loaded);
        assert_eq!(
            loaded.flags.get("us-east-1"),
            Some(&FlagIcon::Cached(dir.path().join("override/flags/usa.png")))
        );
    }

    #[tokio::test]
    async fn test_broken_override_skips_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.regions_file_override = Some(PathBuf::from("/does/not/exist.xml"));
        let (loader, fetcher) = build_loader(config, BundledResources::default(), remote_fetcher());

        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::BundledFallback);
        assert_eq!(fetcher.download_count(), 0);
    }

    #[tokio::test]
    async fn test_bundled_override_and_local_only() {
        let dir = tempfile::tempdir().unwrap();
        let resources = BundledResources {
            regions_override: Some(Cow::Borrowed(REMOTE_METADATA)),
            ..Default::default()
        };
        let (loader, fetcher) = build_loader(config(dir.path()), resources, remote_fetcher());
        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::BundledOverride);
        assert_invariants(&loaded);
        assert_eq!(fetcher.download_count(), 0);

        let mut local_only = config(dir.path());
        local_only.use_local_region_file = true;
        let (loader, fetcher) = build_loader(local_only, BundledResources::default(), remote_fetcher());
        let loaded = loader.load_regions().await.unwrap();
        assert_eq!(loaded.source, RegionSource::BundledFallback);
        assert_invariants(&loaded);
        assert_eq!(fetcher.download_count(), 0);
    }

    #[tokio::test]
    async fn test_every_source_failing() {
        let dir = tempfile::tempdir().unwrap();
        let resources = BundledResources { regions: Cow::Borrowed("<regions/>"), regions_override: None };
        let fetcher = StaticFetcher { offline: true, ..Default::default() };
        let (loader, _) = build_loader(config(dir.path()), resources, fetcher);

        assert!(matches!(loader.load_regions().await, Err(RegionLoadError(_))));
    }

    #[test]
    fn test_document_local_region_is_replaced() {
        let regions = parse_document(r#"<regions>
            <region><systemname>local</systemname><service name="S3">http://bogus</service></region>
            <region><systemname>eu-west-1</systemname></region>
        </regions>"#).unwrap();
        assert_eq!(regions.len(), 2);
        let local = regions.iter().find(|r| r.is_local()).unwrap();
        assert!(!local.is_service_supported("S3"));
    }

    #[test]
    fn test_bundled_document_is_valid() {
        let regions = parse_document(&BundledResources::default().regions).unwrap();
        assert!(regions.len() > 2);
        let virginia = regions.iter().find(|r| r.id() == "us-east-1").unwrap();
        assert_eq!(virginia.service_endpoint("S3"), Some(S3_US_EAST_1_REGIONAL_ENDPOINT));
    }
}
