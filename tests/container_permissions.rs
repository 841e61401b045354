// tests/container_permissions.rs
//
// Container-level failures: 403 on probe and on create, and container creation
// for one container never holding up stores into another.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use azstore::{
    AzureSession, BackendFactory, BlobBackend, ContainerAdmin, Credential, ErrorKind, InMemoryBackendFactory,
    StorageError, StorageSettings, Target,
};
use common::{test_settings, RecordingEnv, ACCOUNT};

fn session_with(factory: impl BackendFactory + 'static) -> Result<AzureSession> {
    Ok(AzureSession::builder(test_settings())
        .env(Arc::new(RecordingEnv::default()))
        .factory(Arc::new(factory))
        .build()?)
}

// ----------------------------------------------------------------------------
// Credential allowed to write blobs but not to manage containers
// ----------------------------------------------------------------------------

struct DenyingAdmin {
    target: Target,
}

#[async_trait]
impl ContainerAdmin for DenyingAdmin {
    async fn container_exists(&self) -> azstore::Result<bool> {
        Err(StorageError::from_status(&self.target, 403, "AuthorizationPermissionMismatch"))
    }

    async fn create_container(&self) -> azstore::Result<bool> {
        Err(StorageError::from_status(&self.target, 403, "AuthorizationPermissionMismatch"))
    }
}

struct DenyingFactory {
    blobs: InMemoryBackendFactory,
}

impl BackendFactory for DenyingFactory {
    fn build(
        &self,
        account: &str,
        container: &str,
        _credential: &Credential,
        _settings: &StorageSettings,
    ) -> azstore::Result<BlobBackend> {
        let admin = DenyingAdmin {
            target: Target::new(account, container, ""),
        };
        Ok(BlobBackend::new(self.blobs.store(account, container), Arc::new(admin)))
    }
}

#[tokio::test]
async fn store_proceeds_when_container_creation_is_forbidden() -> Result<()> {
    let blobs = InMemoryBackendFactory::new();
    let session = session_with(DenyingFactory { blobs: blobs.clone() })?;
    let obj = session.object(&format!("az://{ACCOUNT}/locked/report.txt"))?;

    assert_eq!(obj.store_bytes("written anyway").await?, 14);
    assert!(obj.exists().await?);
    assert!(!blobs.container_exists(ACCOUNT, "locked"));
    Ok(())
}

#[tokio::test]
async fn forbidden_container_probe_names_the_container() -> Result<()> {
    let session = session_with(DenyingFactory {
        blobs: InMemoryBackendFactory::new(),
    })?;
    let obj = session.object(&format!("az://{ACCOUNT}/locked/report.txt"))?;

    let err = obj.container_exists().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(err.to_string().contains("container 'locked'"), "{}", err);

    let root = session.object(&format!("az://{ACCOUNT}/locked"))?;
    assert_eq!(root.exists().await.unwrap_err().kind(), ErrorKind::PermissionDenied);
    Ok(())
}

// ----------------------------------------------------------------------------
// Slow container creation
// ----------------------------------------------------------------------------

struct GatedAdmin {
    gated: bool,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ContainerAdmin for GatedAdmin {
    async fn container_exists(&self) -> azstore::Result<bool> {
        Ok(true)
    }

    async fn create_container(&self) -> azstore::Result<bool> {
        if self.gated {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(true)
    }
}

struct GatedFactory {
    blobs: InMemoryBackendFactory,
    gated_container: &'static str,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl BackendFactory for GatedFactory {
    fn build(
        &self,
        account: &str,
        container: &str,
        _credential: &Credential,
        _settings: &StorageSettings,
    ) -> azstore::Result<BlobBackend> {
        let admin = GatedAdmin {
            gated: container == self.gated_container,
            started: Arc::clone(&self.started),
            release: Arc::clone(&self.release),
        };
        Ok(BlobBackend::new(self.blobs.store(account, container), Arc::new(admin)))
    }
}

#[tokio::test]
async fn slow_creation_does_not_block_other_containers() -> Result<()> {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let session = session_with(GatedFactory {
        blobs: InMemoryBackendFactory::new(),
        gated_container: "slow",
        started: Arc::clone(&started),
        release: Arc::clone(&release),
    })?;

    let slow = session.object(&format!("az://{ACCOUNT}/slow/a.txt"))?;
    let pending = tokio::spawn(async move { slow.store_bytes("slow").await });
    started.notified().await;

    let fast = session.object(&format!("az://{ACCOUNT}/fast/b.txt"))?;
    let stored = tokio::time::timeout(Duration::from_secs(5), fast.store_bytes("fast"))
        .await
        .expect("store into another container waited on a pending creation")?;
    assert_eq!(stored, 4);

    release.notify_one();
    assert_eq!(pending.await??, 4);
    Ok(())
}
