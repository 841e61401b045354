// src/session.rs
//
// A storage session: resolves credentials once per account and caches one backend
// client per (account, container). Sessions are cheap to clone and fully
// independent of each other, so tests can build as many as they like.

use async_trait::async_trait;
use object_store::ObjectStore;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::azure_client::AzureBackendFactory;
use crate::config::StorageSettings;
use crate::credentials::{Credential, CredentialChain, EnvSource, ProcessEnv};
use crate::error::{ErrorKind, Result, StorageError};
use crate::memory::InMemoryBackendFactory;
use crate::storage_object::StorageObject;
use crate::uri_utils::{account_from_endpoint_url, StorageQuery};

// ----------------------------------------------------------------------------
// Backend seams
// ----------------------------------------------------------------------------

/// Container-level operations the object API does not cover.
#[async_trait]
pub trait ContainerAdmin: Send + Sync {
    async fn container_exists(&self) -> Result<bool>;

    /// `Ok(true)` if created, `Ok(false)` if it already existed.
    async fn create_container(&self) -> Result<bool>;
}

/// Client pair bound to one container.
#[derive(Clone)]
pub struct BlobBackend {
    pub store: Arc<dyn ObjectStore>,
    pub admin: Arc<dyn ContainerAdmin>,
}

impl BlobBackend {
    pub fn new(store: Arc<dyn ObjectStore>, admin: Arc<dyn ContainerAdmin>) -> Self {
        Self { store, admin }
    }
}

impl fmt::Debug for BlobBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobBackend({})", self.store)
    }
}

/// Turns a resolved credential into a backend for `{account, container}`.
pub trait BackendFactory: Send + Sync {
    fn build(
        &self,
        account: &str,
        container: &str,
        credential: &Credential,
        settings: &StorageSettings,
    ) -> Result<BlobBackend>;
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

type ContainerKey = (String, String);

struct SessionInner {
    settings: StorageSettings,
    chain: CredentialChain,
    env: Arc<dyn EnvSource>,
    factory: Arc<dyn BackendFactory>,
    credentials: RwLock<HashMap<String, Credential>>,
    clients: RwLock<HashMap<ContainerKey, BlobBackend>>,
    ensured: Mutex<HashSet<ContainerKey>>,
}

#[derive(Clone)]
pub struct AzureSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for AzureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureSession")
            .field("settings", &self.inner.settings)
            .field("chain", &self.inner.chain)
            .finish_non_exhaustive()
    }
}

/// Assembles a session; defaults to the real environment and the Azure backend.
pub struct SessionBuilder {
    settings: StorageSettings,
    env: Option<Arc<dyn EnvSource>>,
    factory: Option<Arc<dyn BackendFactory>>,
}

impl SessionBuilder {
    pub fn env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<AzureSession> {
        self.settings.validate()?;
        let factory: Arc<dyn BackendFactory> = match self.factory {
            Some(f) => f,
            None => Arc::new(AzureBackendFactory::new(&self.settings)?),
        };
        let env = self.env.unwrap_or_else(|| Arc::new(ProcessEnv));
        let chain = CredentialChain::from_settings(&self.settings);
        debug!("new session, credential chain: {:?}", chain.sources());
        Ok(AzureSession {
            inner: Arc::new(SessionInner {
                settings: self.settings,
                chain,
                env,
                factory,
                credentials: RwLock::new(HashMap::new()),
                clients: RwLock::new(HashMap::new()),
                ensured: Mutex::new(HashSet::new()),
            }),
        })
    }
}

impl AzureSession {
    pub fn builder(settings: StorageSettings) -> SessionBuilder {
        SessionBuilder {
            settings,
            env: None,
            factory: None,
        }
    }

    /// Session against Azure (or the configured emulator endpoint).
    pub fn new(settings: StorageSettings) -> Result<Self> {
        Self::builder(settings).build()
    }

    /// Session backed by process memory; credentials are still resolved.
    pub fn in_memory(settings: StorageSettings) -> Result<Self> {
        Self::builder(settings)
            .factory(Arc::new(InMemoryBackendFactory::new()))
            .build()
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.inner.settings
    }

    /// Parse `query`, merging the out-of-band account and checking it against
    /// the configured endpoint.
    pub fn parse(&self, query: &str) -> Result<StorageQuery> {
        let settings = &self.inner.settings;
        let parsed = StorageQuery::parse(query, settings.default_account().as_deref())?;
        if let Some(endpoint_account) = settings.endpoint_url.as_deref().and_then(account_from_endpoint_url) {
            if endpoint_account != parsed.account {
                return Err(StorageError::malformed(
                    query,
                    format!(
                        "account '{}' does not match endpoint account '{}'",
                        parsed.account, endpoint_account
                    ),
                ));
            }
        }
        Ok(parsed)
    }

    pub fn object(&self, query: &str) -> Result<StorageObject> {
        Ok(StorageObject::new(self.clone(), self.parse(query)?))
    }

    pub fn object_for(&self, query: StorageQuery) -> StorageObject {
        StorageObject::new(self.clone(), query)
    }

    /// Credential for `account`, resolved through the chain on first use.
    pub async fn credential(&self, account: &str) -> Result<Credential> {
        if let Some(c) = self.inner.credentials.read().await.get(account) {
            return Ok(c.clone());
        }
        let mut cache = self.inner.credentials.write().await;
        if let Some(c) = cache.get(account) {
            return Ok(c.clone());
        }
        let credential = self.inner.chain.resolve(account, self.inner.env.as_ref())?;
        cache.insert(account.to_string(), credential.clone());
        Ok(credential)
    }

    /// Cached backend for the query's `{account, container}`.
    pub async fn backend(&self, query: &StorageQuery) -> Result<BlobBackend> {
        let key = (query.account.clone(), query.container.clone());
        if let Some(b) = self.inner.clients.read().await.get(&key) {
            return Ok(b.clone());
        }
        let credential = self.credential(&query.account).await?;
        let mut clients = self.inner.clients.write().await;
        if let Some(b) = clients.get(&key) {
            return Ok(b.clone());
        }
        debug!(
            "building {} client for {}/{}",
            credential.kind_name(),
            query.account,
            query.container
        );
        let backend = self
            .inner
            .factory
            .build(&query.account, &query.container, &credential, &self.inner.settings)?;
        clients.insert(key, backend.clone());
        Ok(backend)
    }

    /// Make sure the container exists before the first store into it, once per
    /// session. No-op when container creation is disabled.
    pub async fn ensure_container(&self, query: &StorageQuery) -> Result<()> {
        if !self.inner.settings.create_container {
            return Ok(());
        }
        let key = (query.account.clone(), query.container.clone());
        // The set is locked for lookup and insert only; creation runs unlocked.
        if self.inner.ensured.lock().await.contains(&key) {
            return Ok(());
        }
        let backend = self.backend(query).await?;
        match backend.admin.create_container().await {
            Ok(true) => debug!("container {}/{} created", query.account, query.container),
            Ok(false) => debug!("container {}/{} already present", query.account, query.container),
            // Blob-level write permission without container-level rights is common.
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                warn!(
                    "cannot create container {}/{} ({}); assuming it exists",
                    query.account, query.container, e
                );
            }
            Err(e) => return Err(e),
        }
        self.inner.ensured.lock().await.insert(key);
        Ok(())
    }

    /// Number of cached backend clients.
    pub async fn cached_clients(&self) -> usize {
        self.inner.clients.read().await.len()
    }
}
