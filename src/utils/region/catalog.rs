use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use log::{debug, error, info, warn};
use url::Url;
use crate::errors::ToolkitError::{InvalidArgumentError, NotFoundError};
use crate::errors::ToolkitResult;
use crate::utils::listeners::{Listeners, Subscription};
use crate::utils::preferences::{PreferenceStore, P_DEFAULT_REGION};
use crate::utils::region::flags::FlagIcon;
use crate::utils::region::source::{LoadedRegions, RegionLoader, RegionSource};
use crate::utils::region::{Region, Service, S3_US_EAST_1_REGIONAL_ENDPOINT, US_EAST_1};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionEvent {
    /// The list was replaced by a reload.
    Reloaded,
    /// The selected region changed, carries the new region id.
    CurrentRegionChanged(String),
}

struct CatalogState {
    regions: Vec<Region>,
    // None when every source failed and only the local region is known.
    source: Option<RegionSource>,
    flags: HashMap<String, FlagIcon>,
}

impl CatalogState {
    fn minimal() -> Self {
        Self {
            regions: vec![Region::local()],
            source: None,
            flags: HashMap::new(),
        }
    }
}

/// The process-wide list of regions plus the user's selected region.
///
/// The list is replaced as a whole by [RegionCatalog::reinit]. Services registered in
/// the local region survive reloads.
pub struct RegionCatalog {
    loader: RegionLoader,
    preferences: Arc<PreferenceStore>,
    state: RwLock<CatalogState>,
    local_services: Mutex<Vec<Service>>,
    listeners: Listeners<RegionEvent>,
}

impl RegionCatalog {
    /// Run the loader once and build the catalog. When every source fails the catalog
    /// starts with the local region only.
    pub async fn load(loader: RegionLoader, preferences: Arc<PreferenceStore>) -> Self {
        let catalog = Self {
            loader,
            preferences,
            state: RwLock::new(CatalogState::minimal()),
            local_services: Mutex::new(Vec::new()),
            listeners: Listeners::new(),
        };

        if let Err(e) = catalog.reload().await {
            error!("No region metadata could be loaded, only the local region is available: {}", e);
            catalog.correct_default_region();
        }

        catalog
    }

    /// Reload the list from the source chain, fully replacing the previous one. On
    /// failure the previous list stays in place.
    pub async fn reinit(&self) -> ToolkitResult<()> {
        self.reload().await?;
        self.listeners.notify(&RegionEvent::Reloaded);
        Ok(())
    }

    async fn reload(&self) -> ToolkitResult<()> {
        let LoadedRegions { mut regions, source, flags } = self.loader.load_regions().await?;
        info!("Region list loaded from {}: {} regions", source, regions.len());

        {
            // A concurrent add_local_service either finished before this point or runs
            // after the swap.
            let mut state = self.write_state();
            self.register_local_services(&mut regions);
            *state = CatalogState {
                regions,
                source: Some(source),
                flags,
            };
        }
        self.correct_default_region();

        Ok(())
    }

    /// Lock order: `state` before `local_services`.
    fn register_local_services(&self, regions: &mut [Region]) {
        let local_services = self.lock_local_services();
        if let Some(local) = regions.iter_mut().find(|region| region.is_local()) {
            for service in local_services.iter() {
                local.put_service(service.clone());
            }
        }
    }

    fn lock_local_services(&self) -> MutexGuard<'_, Vec<Service>> {
        match self.local_services.lock() {
            Ok(services) => services,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A stored default region that isn't in the list is replaced by the first region.
    fn correct_default_region(&self) {
        let stored = self.preferences.get_string(P_DEFAULT_REGION);
        if self.region(&stored).is_some() {
            return;
        }

        let first = {
            let state = self.read_state();
            state.regions.first().map(|region| region.id().to_string())
        };
        if let Some(first) = first {
            warn!("Default region '{}' is unknown, using {}", stored, first);
            self.preferences.set_value(P_DEFAULT_REGION, &first);
            if let Err(e) = self.preferences.save() {
                error!("Failed to save the default region: {}", e);
            }
        }
    }

    pub fn regions(&self) -> Vec<Region> {
        self.read_state().regions.clone()
    }

    pub fn region(&self, region_id: &str) -> Option<Region> {
        self.read_state()
            .regions
            .iter()
            .find(|region| region.id() == region_id)
            .cloned()
    }

    /// Regions that have an endpoint for the service.
    pub fn regions_for_service(&self, service_abbreviation: &str) -> Vec<Region> {
        self.read_state()
            .regions
            .iter()
            .filter(|region| region.is_service_supported(service_abbreviation))
            .cloned()
            .collect()
    }

    /// Which step of the loader chain produced the list, [None] when nothing loaded.
    pub fn source(&self) -> Option<RegionSource> {
        self.read_state().source
    }

    pub fn flag_icon(&self, region_id: &str) -> Option<FlagIcon> {
        self.read_state().flags.get(region_id).cloned()
    }

    /// Find the service running at exactly `endpoint`.
    pub fn service_by_endpoint(&self, endpoint: &str) -> ToolkitResult<Service> {
        self.read_state()
            .regions
            .iter()
            .flat_map(|region| region.services())
            .find(|service| service.endpoint() == endpoint)
            .cloned()
            .ok_or_else(|| NotFoundError(format!("Unknown service endpoint: {}", endpoint)))
    }

    /// Find the region having any service on the host of `endpoint`.
    pub fn region_by_endpoint(&self, endpoint: &str) -> ToolkitResult<Region> {
        if endpoint == S3_US_EAST_1_REGIONAL_ENDPOINT {
            return self.region(US_EAST_1)
                .ok_or_else(|| NotFoundError(format!("Region {} is not loaded", US_EAST_1)));
        }

        let target = Url::parse(endpoint)
            .map_err(|e| InvalidArgumentError(format!("Unable to parse service endpoint {}: {}", endpoint, e)))?;
        let Some(target_host) = target.host_str() else {
            return Err(InvalidArgumentError(format!("Service endpoint {} has no host", endpoint)));
        };

        let state = self.read_state();
        for region in state.regions.iter() {
            for service in region.services() {
                match Url::parse(service.endpoint()) {
                    Ok(url) if url.host_str() == Some(target_host) => return Ok(region.clone()),
                    Ok(_) => {}
                    Err(e) => debug!("Skipping malformed endpoint {} of {}: {}", service.endpoint(), region.id(), e),
                }
            }
        }

        Err(NotFoundError(format!("No region found with any service for endpoint {}", endpoint)))
    }

    /// Register a locally running service on `http://localhost:<port>` in the local region.
    pub fn add_local_service(&self, service_name: &str, service_id: &str, port: u16) -> ToolkitResult<()> {
        let service = Service::new(service_name, Some(service_id), &format!("http://localhost:{}", port), None);

        let mut state = self.write_state();
        let local = state.regions
            .iter_mut()
            .find(|region| region.is_local())
            .ok_or_else(|| NotFoundError("No local region found".to_string()))?;
        local.put_service(service.clone());

        let mut local_services = self.lock_local_services();
        local_services.retain(|existing| existing.name() != service_name);
        local_services.push(service);
        debug!("Registered local service {} on port {}", service_name, port);

        Ok(())
    }

    /// The region the user selected.
    pub fn current_region(&self) -> ToolkitResult<Region> {
        let region_id = self.preferences.get_string(P_DEFAULT_REGION);
        self.region(&region_id)
            .ok_or_else(|| NotFoundError(format!("Unable to determine default region '{}'", region_id)))
    }

    pub fn set_current_region(&self, region_id: &str) -> ToolkitResult<()> {
        if self.region(region_id).is_none() {
            return Err(NotFoundError(format!("Unknown region: {}", region_id)));
        }
        if self.preferences.get_string(P_DEFAULT_REGION) == region_id {
            return Ok(());
        }

        self.preferences.set_value(P_DEFAULT_REGION, region_id);
        self.preferences.save()?;
        info!("Current region changed to {}", region_id);
        self.listeners.notify(&RegionEvent::CurrentRegionChanged(region_id.to_string()));

        Ok(())
    }

    pub fn is_service_supported_in_current_region(&self, service_abbreviation: &str) -> bool {
        self.current_region()
            .map(|region| region.is_service_supported(service_abbreviation))
            .unwrap_or(false)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RegionEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CatalogState> {
        match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CatalogState> {
        match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for RegionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("RegionCatalog")
            .field("source", &state.source)
            .field("regions", &state.regions.iter().map(|r| r.id()).collect::<Vec<_>>())
            .finish()
    }
}
