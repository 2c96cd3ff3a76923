use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use log::{debug, info};
use crate::errors::ToolkitError::NotFoundError;
use crate::errors::ToolkitResult;
use crate::services::{ClientContext, ServiceClient};
use crate::utils::credential::AccountManager;
use crate::utils::proxy::{ProxySettings, SharedProxySettings};
use crate::utils::region::catalog::RegionCatalog;
use crate::utils::region::{Region, ServiceAbbreviations, US_EAST_1};

type CacheKey = (TypeId, String);
type CachedClient = Arc<dyn Any + Send + Sync>;

/// Services signed with the partition's global region whatever region they are used from.
const GLOBAL_SERVICES: [&str; 2] = [ServiceAbbreviations::IAM, ServiceAbbreviations::CLOUDFRONT];

/// One client per (client type, endpoint), built on first use with the current
/// account and proxy. The cache is only ever cleared as a whole.
pub struct ClientCache {
    catalog: Arc<RegionCatalog>,
    accounts: Arc<AccountManager>,
    proxy: SharedProxySettings,
    connect_timeout: Duration,
    socket_timeout: Duration,
    clients: Mutex<HashMap<CacheKey, CachedClient>>,
}

impl ClientCache {
    pub fn new(catalog: Arc<RegionCatalog>,
               accounts: Arc<AccountManager>,
               proxy: SharedProxySettings,
               connect_timeout: Duration,
               socket_timeout: Duration) -> Self {
        Self {
            catalog,
            accounts,
            proxy,
            connect_timeout,
            socket_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The cached client of type `C` for `endpoint`, built on a miss.
    ///
    /// # Errors
    /// Whatever [ServiceClient::build] returns. Failures are not cached, the next call
    /// tries again.
    pub fn get_client<C: ServiceClient>(&self, endpoint: &str) -> ToolkitResult<Arc<C>> {
        self.get_or_build(endpoint, || self.signing_region_for_endpoint(endpoint))
    }

    /// The client of type `C` for a service in a region, using the region's endpoint.
    /// Global services are signed with the partition's global region.
    pub fn get_client_for_region<C: ServiceClient>(&self, service_abbreviation: &str, region_id: &str) -> ToolkitResult<Arc<C>> {
        let region = self.catalog
            .region(region_id)
            .ok_or_else(|| NotFoundError(format!("Unknown region: {}", region_id)))?;
        let endpoint = region
            .service_endpoint(service_abbreviation)
            .ok_or_else(|| NotFoundError(format!("{} is not available in {}", service_abbreviation, region_id)))?
            .to_string();

        self.get_or_build(&endpoint, || signing_region(&region, service_abbreviation))
    }

    /// The client of type `C` for a service in the currently selected region.
    pub fn get_client_for_current_region<C: ServiceClient>(&self, service_abbreviation: &str) -> ToolkitResult<Arc<C>> {
        let region = self.catalog.current_region()?;
        self.get_client_for_region(service_abbreviation, region.id())
    }

    fn get_or_build<C, F>(&self, endpoint: &str, signing_region: F) -> ToolkitResult<Arc<C>>
    where
        C: ServiceClient,
        F: FnOnce() -> String,
    {
        let key = (TypeId::of::<C>(), endpoint.to_string());
        // Held while building so concurrent callers get the same instance.
        let mut clients = self.lock_clients();
        if let Some(client) = clients.get(&key) {
            if let Ok(client) = client.clone().downcast::<C>() {
                return Ok(client);
            }
        }

        let context = self.client_context(endpoint, signing_region());
        debug!("Building {} client for {}", std::any::type_name::<C>(), endpoint);
        let client = Arc::new(C::build(&context)?);
        clients.insert(key, client.clone());

        Ok(client)
    }

    fn client_context(&self, endpoint: &str, signing_region: String) -> ClientContext {
        ClientContext {
            endpoint: endpoint.to_string(),
            signing_region,
            service: self.catalog.service_by_endpoint(endpoint).ok(),
            account: self.accounts.current_account(),
            proxy: self.proxy.select_for(endpoint),
            connect_timeout: self.connect_timeout,
            socket_timeout: self.socket_timeout,
        }
    }

    fn signing_region_for_endpoint(&self, endpoint: &str) -> String {
        match self.catalog.region_by_endpoint(endpoint) {
            Ok(region) => {
                let service = self.catalog.service_by_endpoint(endpoint).ok();
                match service {
                    Some(service) => signing_region(&region, service.name()),
                    None => region.id().to_string(),
                }
            }
            Err(e) => {
                debug!("No region for {}, signing for {}: {}", endpoint, US_EAST_1, e);
                US_EAST_1.to_string()
            }
        }
    }

    /// Drop every cached client.
    pub fn invalidate(&self) {
        let mut clients = self.lock_clients();
        if !clients.is_empty() {
            info!("Invalidating {} cached clients", clients.len());
        }
        clients.clear();
    }

    /// Replace the proxy settings, clearing the cache when they changed.
    pub fn set_proxy_settings(&self, settings: ProxySettings) {
        if self.proxy.set(settings) {
            self.invalidate();
        }
    }

    pub fn len(&self) -> usize {
        self.lock_clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedClient>> {
        match self.clients.lock() {
            Ok(clients) => clients,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn signing_region(region: &Region, service_abbreviation: &str) -> String {
    if GLOBAL_SERVICES.contains(&service_abbreviation) {
        region.global_signing_region().to_string()
    } else {
        region.id().to_string()
    }
}
