// src/blocking.rs
//
// Blocking facade for synchronous callers.
//
// All async work runs on one process-wide background runtime; the calling thread
// only waits for the result. Sinks and sources are bridged through temporary
// files so a synchronous reader/writer never has to cross into the runtime.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tracing::debug;

use crate::constants::ENV_RT_THREADS;
use crate::error::{Result, StorageError, Target};
use crate::listing::DirectoryEntry;
use crate::session::AzureSession;
use crate::storage_object::{BlobHandle, Inventory, StorageObject};

static RT_HANDLE: OnceCell<Handle> = OnceCell::new();

fn runtime_error(message: impl Into<String>) -> StorageError {
    StorageError::UnexpectedBackend {
        target: Target::default(),
        message: message.into(),
    }
}

fn runtime_threads() -> usize {
    std::env::var(ENV_RT_THREADS)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or_else(|| num_cpus::get().clamp(4, 32))
}

// Create (once) a background multi-thread runtime and return its handle.
fn global_rt_handle() -> Result<&'static Handle> {
    RT_HANDLE.get_or_try_init(|| {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("azstore-rt".to_string())
            .spawn(move || {
                let threads = runtime_threads();
                debug!("creating background runtime with {} worker threads", threads);
                let rt = match TokioBuilder::new_multi_thread()
                    .enable_io()
                    .enable_time()
                    .worker_threads(threads)
                    .thread_name("azstore-rt-worker")
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                if tx.send(Ok(rt.handle().clone())).is_ok() {
                    rt.block_on(std::future::pending::<()>());
                }
            })
            .map_err(|e| runtime_error(format!("cannot spawn runtime thread: {}", e)))?;

        rx.recv()
            .map_err(|_| runtime_error("runtime thread exited during startup"))?
            .map_err(|e| runtime_error(format!("cannot build runtime: {}", e)))
    })
}

/// Run `fut` on the background runtime and block the current thread until it
/// completes. Works from inside and outside an async context.
pub fn run_on_global_rt<F, T>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = global_rt_handle()?;
    let (tx, rx) = mpsc::channel();
    handle.spawn(async move {
        let _ = tx.send(fut.await);
    });
    rx.recv()
        .map_err(|_| runtime_error("background task panicked or was dropped"))?
}

/// Synchronous view of a [`StorageObject`].
#[derive(Debug, Clone)]
pub struct BlockingStorageObject {
    inner: StorageObject,
}

impl From<StorageObject> for BlockingStorageObject {
    fn from(inner: StorageObject) -> Self {
        Self { inner }
    }
}

macro_rules! blocking_call {
    ($self:ident, |$obj:ident| $body:expr) => {{
        let $obj = $self.inner.clone();
        run_on_global_rt(async move { $body.await })
    }};
}

impl BlockingStorageObject {
    pub fn open(session: &AzureSession, query: &str) -> Result<Self> {
        Ok(session.object(query)?.into())
    }

    pub fn inner(&self) -> &StorageObject {
        &self.inner
    }

    pub fn local_suffix(&self) -> String {
        self.inner.local_suffix()
    }

    pub fn exists(&self) -> Result<bool> {
        blocking_call!(self, |obj| obj.exists())
    }

    pub fn stat(&self) -> Result<Option<BlobHandle>> {
        blocking_call!(self, |obj| obj.stat())
    }

    pub fn size(&self) -> Result<u64> {
        blocking_call!(self, |obj| obj.size())
    }

    pub fn mtime(&self) -> Result<DateTime<Utc>> {
        blocking_call!(self, |obj| obj.mtime())
    }

    pub fn container_exists(&self) -> Result<bool> {
        blocking_call!(self, |obj| obj.container_exists())
    }

    pub fn retrieve_to_path(&self, dest: impl Into<PathBuf>) -> Result<u64> {
        let dest = dest.into();
        blocking_call!(self, |obj| obj.retrieve_to_path(&dest))
    }

    pub fn store_from_path(&self, src: impl Into<PathBuf>) -> Result<u64> {
        let src = src.into();
        blocking_call!(self, |obj| obj.store_from_path(&src))
    }

    /// Stream the object into a synchronous writer (spooled through a temp file).
    pub fn retrieve<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64> {
        let target = self.inner.target();
        let spool = tempfile::NamedTempFile::new().map_err(|e| StorageError::io(&target, e))?;
        let spool_path = spool.path().to_path_buf();
        let obj = self.inner.clone();
        run_on_global_rt(async move {
            let mut file = tokio::fs::File::create(&spool_path)
                .await
                .map_err(|e| StorageError::io(&obj.target(), e))?;
            obj.retrieve(&mut file).await
        })?;

        let mut file = spool.reopen().map_err(|e| StorageError::io(&target, e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| StorageError::io(&target, e))?;
        std::io::copy(&mut file, sink).map_err(|e| StorageError::io(&target, e))
    }

    /// Store from a synchronous reader (spooled through a temp file).
    pub fn store<R: Read + ?Sized>(&self, source: &mut R) -> Result<u64> {
        let target = self.inner.target();
        let mut spool = tempfile::NamedTempFile::new().map_err(|e| StorageError::io(&target, e))?;
        std::io::copy(source, &mut spool).map_err(|e| StorageError::io(&target, e))?;
        spool.flush().map_err(|e| StorageError::io(&target, e))?;
        let stored = self.store_from_path(spool.path());
        drop(spool);
        stored
    }

    pub fn remove(&self) -> Result<()> {
        blocking_call!(self, |obj| obj.remove())
    }

    pub fn touch(&self) -> Result<DateTime<Utc>> {
        blocking_call!(self, |obj| obj.touch())
    }

    pub fn list_candidates(&self) -> Result<Vec<String>> {
        blocking_call!(self, |obj| obj.collect_candidates())
    }

    pub fn list_directory(&self) -> Result<Vec<DirectoryEntry>> {
        blocking_call!(self, |obj| obj.list_directory())
    }

    pub fn inventory(&self) -> Result<Inventory> {
        blocking_call!(self, |obj| obj.inventory())
    }
}

/// Path helper for callers that keep retrieved objects under a local root.
pub fn local_path(root: &Path, obj: &BlockingStorageObject) -> PathBuf {
    root.join(obj.local_suffix())
}
