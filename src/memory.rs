// src/memory.rs
//
// In-memory backend for tests and dry runs.
//
// Each (account, container) gets its own `object_store::memory::InMemory`; the
// factory hands out the same store for repeated builds so data survives across
// sessions sharing one factory. Container existence is tracked separately, the
// way the real service tracks it.

use async_trait::async_trait;
use object_store::memory::InMemory;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::StorageSettings;
use crate::credentials::Credential;
use crate::error::Result;
use crate::session::{BackendFactory, BlobBackend, ContainerAdmin};

type ContainerKey = (String, String);

#[derive(Default)]
struct MemoryState {
    stores: HashMap<ContainerKey, Arc<InMemory>>,
    containers: HashSet<ContainerKey>,
}

#[derive(Clone, Default)]
pub struct InMemoryBackendFactory {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A panic elsewhere never leaves the maps half-updated.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a container.
    pub fn with_container(self, account: &str, container: &str) -> Self {
        lock(&self.state)
            .containers
            .insert((account.to_string(), container.to_string()));
        self
    }

    pub fn container_exists(&self, account: &str, container: &str) -> bool {
        lock(&self.state)
            .containers
            .contains(&(account.to_string(), container.to_string()))
    }

    /// Raw store for `{account, container}`, for seeding fixtures.
    pub fn store(&self, account: &str, container: &str) -> Arc<InMemory> {
        let mut state = lock(&self.state);
        Arc::clone(
            state
                .stores
                .entry((account.to_string(), container.to_string()))
                .or_insert_with(|| Arc::new(InMemory::new())),
        )
    }
}

struct MemoryContainerAdmin {
    state: Arc<Mutex<MemoryState>>,
    key: ContainerKey,
}

#[async_trait]
impl ContainerAdmin for MemoryContainerAdmin {
    async fn container_exists(&self) -> Result<bool> {
        Ok(lock(&self.state).containers.contains(&self.key))
    }

    async fn create_container(&self) -> Result<bool> {
        Ok(lock(&self.state).containers.insert(self.key.clone()))
    }
}

impl BackendFactory for InMemoryBackendFactory {
    fn build(
        &self,
        account: &str,
        container: &str,
        _credential: &Credential,
        _settings: &StorageSettings,
    ) -> Result<BlobBackend> {
        let store = self.store(account, container);
        let admin = MemoryContainerAdmin {
            state: Arc::clone(&self.state),
            key: (account.to_string(), container.to_string()),
        };
        Ok(BlobBackend::new(store, Arc::new(admin)))
    }
}
