use std::collections::HashMap;
use std::path::{Path, PathBuf};
use log::{debug, error};
use crate::errors::ToolkitResult;
use crate::utils::region::fetcher::MetadataFetcher;
use crate::utils::region::Region;

/// Prefix of bundled flag icons, relative to the resources directory.
pub const BUNDLED_ICONS_PREFIX: &str = "icons/";

/// Where the flag image of a region can be found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagIcon {
    /// Downloaded next to the metadata document.
    Cached(PathBuf),
    /// Shipped with the toolkit resources.
    Bundled(String),
}

/// Flags for regions loaded from bundled documents. Nothing is fetched.
pub(crate) fn bundled_flags(regions: &[Region]) -> HashMap<String, FlagIcon> {
    regions.iter()
        .filter(|region| !region.is_local())
        .filter_map(|region| {
            region.flag_icon_path()
                .map(|path| (region.id().to_string(), FlagIcon::Bundled(format!("{}{}", BUNDLED_ICONS_PREFIX, path))))
        })
        .collect()
}

/// Make sure every region flag exists in `regions_dir`, downloading the missing ones
/// from `base_url`. A failed download is logged and that region simply has no flag.
pub(crate) async fn cache_flags(regions: &[Region],
                                regions_dir: &Path,
                                base_url: &str,
                                fetcher: &dyn MetadataFetcher) -> HashMap<String, FlagIcon> {
    let mut flags = HashMap::new();
    if !regions_dir.exists() {
        return flags;
    }

    for region in regions.iter().filter(|region| !region.is_local()) {
        let Some(icon_path) = region.flag_icon_path() else {
            continue;
        };
        match cache_flag(icon_path, regions_dir, base_url, fetcher).await {
            Ok(icon) => {
                flags.insert(region.id().to_string(), FlagIcon::Cached(icon));
            }
            Err(e) => error!("Couldn't cache flag icon {} for {}: {}", icon_path, region.id(), e),
        }
    }

    flags
}

async fn cache_flag(icon_path: &str, regions_dir: &Path, base_url: &str, fetcher: &dyn MetadataFetcher) -> ToolkitResult<PathBuf> {
    let icon = regions_dir.join(icon_path);
    if !icon.exists() {
        let icon_url = format!("{}{}", base_url, icon_path);
        debug!("Fetching flag icon {}", icon_url);
        fetcher.download(&icon_url, &icon).await?;
    }
    Ok(icon)
}
