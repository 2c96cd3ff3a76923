use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, error, info};
use crate::config::ToolkitConfig;
use crate::errors::ToolkitResult;
use crate::services::client_cache::ClientCache;
use crate::utils::credential::monitor::DEFAULT_DEBOUNCE;
use crate::utils::credential::{AccountEvent, AccountManager, CredentialsFileMonitor};
use crate::utils::listeners::Subscription;
use crate::utils::preferences::PreferenceStore;
use crate::utils::proxy::{ProxySettings, SharedProxySettings};
use crate::utils::region::catalog::{RegionCatalog, RegionEvent};
use crate::utils::region::fetcher::{HttpMetadataFetcher, MetadataFetcher};
use crate::utils::region::source::{BundledResources, RegionLoader};
use crate::utils::reqwest::get_http_client;

/// Owns the toolkit's shared state: preferences, the region catalog, the account
/// manager and the client cache, wired so that
///
/// * any account change clears the client cache,
/// * selecting a region switches to that region's default account,
/// * a proxy change clears the client cache,
/// * an edit of the credentials file reloads the accounts, when monitoring is enabled.
pub struct ToolkitContext {
    config: ToolkitConfig,
    preferences: Arc<PreferenceStore>,
    proxy: SharedProxySettings,
    regions: Arc<RegionCatalog>,
    accounts: Arc<AccountManager>,
    clients: Arc<ClientCache>,
    subscriptions: Mutex<Vec<Subscription>>,
    credentials_monitor: Mutex<Option<CredentialsFileMonitor>>,
}

impl ToolkitContext {
    /// Load preferences, regions and accounts. Region metadata is fetched over HTTP.
    ///
    /// # Errors
    /// When the HTTP client can't be built. Region and account loading failures are
    /// logged and leave the minimal state in place.
    pub async fn init(config: ToolkitConfig, resources: BundledResources) -> ToolkitResult<Arc<Self>> {
        let proxy = SharedProxySettings::new(config.proxy.clone());
        let client = get_http_client(&proxy, config.connect_timeout, config.socket_timeout)?;
        let fetcher = Arc::new(HttpMetadataFetcher::new(client));

        Ok(Self::init_with_fetcher(config, resources, fetcher, proxy).await)
    }

    pub(crate) async fn init_with_fetcher(config: ToolkitConfig,
                                          resources: BundledResources,
                                          fetcher: Arc<dyn MetadataFetcher>,
                                          proxy: SharedProxySettings) -> Arc<Self> {
        info!("Initializing toolkit state in {}", config.state_dir.display());
        let preferences = Arc::new(PreferenceStore::load(&config.preferences_file));

        let loader = RegionLoader::new(config.clone(), resources, fetcher);
        let regions = Arc::new(RegionCatalog::load(loader, preferences.clone()).await);
        let accounts = Arc::new(AccountManager::new(preferences.clone(), config.credentials_file.clone()));
        let clients = Arc::new(ClientCache::new(
            regions.clone(),
            accounts.clone(),
            proxy.clone(),
            config.connect_timeout,
            config.socket_timeout,
        ));

        // Weak references: the callbacks are owned by the objects they point at.
        let cache = Arc::downgrade(&clients);
        let account_subscription = accounts.subscribe(move |event: &AccountEvent| {
            if let Some(cache) = cache.upgrade() {
                debug!("Account event {:?}, clearing clients", event);
                cache.invalidate();
            }
        });
        let manager = Arc::downgrade(&accounts);
        let region_subscription = regions.subscribe(move |event: &RegionEvent| {
            if let (RegionEvent::CurrentRegionChanged(region_id), Some(manager)) = (event, manager.upgrade()) {
                manager.update_current_account(region_id);
            }
        });

        accounts.reload();

        let context = Arc::new(Self {
            config,
            preferences,
            proxy,
            regions,
            accounts,
            clients,
            subscriptions: Mutex::new(vec![account_subscription, region_subscription]),
            credentials_monitor: Mutex::new(None),
        });
        if context.config.monitor_credentials_file {
            if let Err(e) = context.start_credentials_file_monitor() {
                error!("{}", e);
            }
        }
        context
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    pub fn regions(&self) -> &Arc<RegionCatalog> {
        &self.regions
    }

    pub fn accounts(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    pub fn clients(&self) -> &Arc<ClientCache> {
        &self.clients
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        self.proxy.get()
    }

    /// Reload the region list. On failure the previous list is kept.
    pub async fn reload_regions(&self) -> ToolkitResult<()> {
        self.regions.reinit().await
    }

    /// Reload the accounts, which also clears the client cache.
    pub fn reload_accounts(&self) {
        self.accounts.reload();
    }

    pub fn set_proxy_settings(&self, settings: ProxySettings) {
        self.clients.set_proxy_settings(settings);
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Option<CredentialsFileMonitor>> {
        match self.credentials_monitor.lock() {
            Ok(monitor) => monitor,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Watch the configured credentials file, replacing any running monitor.
    pub fn start_credentials_file_monitor(&self) -> ToolkitResult<()> {
        let mut monitor = self.lock_monitor();
        // Stop the old watcher before the new one starts.
        *monitor = None;
        *monitor = Some(CredentialsFileMonitor::start(
            &self.config.credentials_file,
            Arc::downgrade(&self.accounts),
            DEFAULT_DEBOUNCE,
        )?);
        Ok(())
    }

    pub fn stop_credentials_file_monitor(&self) {
        self.lock_monitor().take();
    }

    pub fn is_monitoring_credentials_file(&self) -> bool {
        self.lock_monitor().is_some()
    }

    /// Stop reacting to changes, drop every client and flush the preferences.
    pub fn shutdown(&self) {
        self.stop_credentials_file_monitor();
        let subscriptions = {
            let mut subscriptions = match self.subscriptions.lock() {
                Ok(subscriptions) => subscriptions,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *subscriptions)
        };
        drop(subscriptions);
        self.clients.invalidate();

        if let Err(e) = self.preferences.save() {
            error!("Failed to save preferences on shutdown: {}", e);
        }
        info!("Toolkit state shut down");
    }
}

impl std::fmt::Debug for ToolkitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolkitContext")
            .field("config", &self.config)
            .field("regions", &self.regions)
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::path::Path;
    use std::time::Duration;
    use crate::services::endpoint::EndpointClient;
    use crate::utils::preferences::{p_region_current_default_account, P_CURRENT_ACCOUNT, P_REGIONS_WITH_DEFAULT_ACCOUNTS};
    use crate::utils::region::source::tests::{StaticFetcher, REMOTE_METADATA};
    use crate::utils::region::source::RegionSource;
    use super::*;

    const CREDENTIALS: &str = "[default]\naws_access_key_id=AKIADEFAULT\naws_secret_access_key=secret\n\n[work]\naws_access_key_id=AKIAWORK\naws_secret_access_key=secret\n";

    async fn context(dir: &Path) -> Arc<ToolkitContext> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut config = ToolkitConfig::with_state_dir(dir.to_path_buf());
        config.use_local_region_file = true;
        config.credentials_file = dir.join("credentials");
        config.monitor_credentials_file = false;
        std::fs::write(&config.credentials_file, CREDENTIALS).unwrap();

        let resources = BundledResources { regions: Cow::Borrowed(REMOTE_METADATA), regions_override: None };
        ToolkitContext::init_with_fetcher(config, resources, Arc::new(StaticFetcher::default()), SharedProxySettings::default()).await
    }

    fn account_id(context: &ToolkitContext, name: &str) -> String {
        context.accounts()
            .all_account_names()
            .into_iter()
            .find(|(_, account_name)| account_name == name)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_loads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path()).await;

        assert_eq!(context.regions().source(), Some(RegionSource::BundledFallback));
        assert_eq!(context.regions().current_region().unwrap().id(), "us-east-1");
        assert_eq!(context.accounts().current_account().account_name(), "default");
        assert!(context.accounts().valid_accounts_configured());
        assert!(context.clients().is_empty());
    }

    #[tokio::test]
    async fn test_account_change_clears_clients() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path()).await;

        let before = context.clients().get_client::<EndpointClient>("https://sqs.us-east-1.amazonaws.com").unwrap();
        context.accounts().set_current_account_id(&account_id(&context, "work"));
        assert!(context.clients().is_empty());

        let after = context.clients().get_client::<EndpointClient>("https://sqs.us-east-1.amazonaws.com").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));

        context.reload_accounts();
        assert!(context.clients().is_empty());
    }

    #[tokio::test]
    async fn test_region_change_switches_default_account() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path()).await;
        let work = account_id(&context, "work");

        let preferences = context.preferences();
        preferences.set_value(P_REGIONS_WITH_DEFAULT_ACCOUNTS, "xx-remote-1");
        preferences.set_value(&p_region_current_default_account("xx-remote-1"), &work);

        context.regions().set_current_region("xx-remote-1").unwrap();
        assert_eq!(preferences.get_string(P_CURRENT_ACCOUNT), work);
        assert_eq!(context.accounts().current_account().account_name(), "work");
    }

    #[tokio::test]
    async fn test_proxy_change_clears_clients() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path()).await;
        context.clients().get_client::<EndpointClient>("https://sqs.us-east-1.amazonaws.com").unwrap();

        context.set_proxy_settings(ProxySettings::from_proxy_url("proxy.corp:3128", vec![]).unwrap());
        assert!(context.clients().is_empty());
        assert_eq!(context.proxy_settings().port, 3128);
    }

    #[tokio::test]
    async fn test_shutdown_detaches_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path()).await;
        let preferences_file = context.config().preferences_file.clone();
        context.clients().get_client::<EndpointClient>("https://sqs.us-east-1.amazonaws.com").unwrap();

        context.shutdown();
        assert!(!context.is_monitoring_credentials_file());
        assert!(context.clients().is_empty());
        assert!(preferences_file.exists());

        context.clients().get_client::<EndpointClient>("https://sqs.us-east-1.amazonaws.com").unwrap();
        context.accounts().set_current_account_id(&account_id(&context, "work"));
        assert_eq!(context.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_credentials_file_edit_reloads_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path()).await;
        assert!(!context.is_monitoring_credentials_file());
        context.start_credentials_file_monitor().unwrap();
        assert!(context.is_monitoring_credentials_file());
        context.clients().get_client::<EndpointClient>("https://sqs.us-east-1.amazonaws.com").unwrap();

        let edited = format!("{}\n[staging]\naws_access_key_id=AKIASTAGING\naws_secret_access_key=secret\n", CREDENTIALS);
        std::fs::write(&context.config().credentials_file, edited).unwrap();

        let mut waited = Duration::ZERO;
        while (context.accounts().all_accounts().len() < 3 || !context.clients().is_empty()) && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        assert!(!account_id(&context, "staging").is_empty());
        assert!(context.clients().is_empty());

        context.shutdown();
        assert!(!context.is_monitoring_credentials_file());
    }
}
