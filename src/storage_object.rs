// src/storage_object.rs
//
// The per-query object the caller drives: existence and metadata probes,
// streaming retrieve/store, prefix listing, remove and touch.
//
// Nothing here caches remote state; every probe asks the backend. The only shared
// state is the session's client cache.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::ObjectMeta;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{KEY_SEPARATOR, MTIME_RESOLUTION_MS};
use crate::error::{Result, StorageError, Target};
use crate::listing::{directory_entries, DirectoryEntry, ListingPlan};
use crate::session::{AzureSession, BlobBackend};
use crate::transfer::{self, TransferOptions};
use crate::uri_utils::StorageQuery;

/// Listing results buffered ahead of the consumer.
const LIST_CHANNEL_DEPTH: usize = 256;

/// Re-upload attempts before touch gives up on observing a newer mtime.
const TOUCH_ATTEMPTS: usize = 3;

/// Metadata of an object known to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl BlobHandle {
    fn from_meta(meta: ObjectMeta) -> Self {
        Self {
            key: meta.location.to_string(),
            size: meta.size as u64,
            etag: meta.e_tag,
            last_modified: meta.last_modified,
        }
    }
}

/// Snapshot of a whole container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub container_exists: bool,
    pub blobs: BTreeMap<String, BlobHandle>,
}

#[derive(Debug, Clone)]
pub struct StorageObject {
    session: AzureSession,
    query: StorageQuery,
    cancel: CancellationToken,
}

impl StorageObject {
    pub(crate) fn new(session: AzureSession, query: StorageQuery) -> Self {
        Self {
            session,
            query,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight transfers and listings when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn query(&self) -> &StorageQuery {
        &self.query
    }

    pub fn key(&self) -> &str {
        &self.query.key
    }

    pub fn target(&self) -> Target {
        self.query.target()
    }

    /// `<container>/<key>`, where a retrieved copy lives under a local root.
    pub fn local_suffix(&self) -> String {
        if self.query.key.is_empty() {
            self.query.container.clone()
        } else {
            format!("{}/{}", self.query.container, self.query.key)
        }
    }

    fn path(&self) -> Result<ObjectPath> {
        backend_path(&self.query, &self.query.key)
    }

    async fn backend(&self) -> Result<BlobBackend> {
        self.session.backend(&self.query).await
    }

    /// Object operations need a concrete key, not a container or a prefix.
    fn require_key(&self) -> Result<()> {
        if self.query.key.is_empty() {
            return Err(StorageError::malformed(
                self.query.to_string(),
                "query names a container, not an object",
            ));
        }
        if self.query.key.ends_with(KEY_SEPARATOR) {
            return Err(StorageError::malformed(
                self.query.to_string(),
                "query names a prefix, not an object",
            ));
        }
        backend_path(&self.query, &self.query.key).map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Metadata probes
    // ------------------------------------------------------------------------

    pub async fn container_exists(&self) -> Result<bool> {
        let backend = self.backend().await?;
        backend.admin.container_exists().await.map_err(|e| match e {
            StorageError::PermissionDenied { target, message } => StorageError::PermissionDenied {
                target,
                message: format!(
                    "credential may not probe container '{}' in account '{}': {}",
                    self.query.container, self.query.account, message
                ),
            },
            other => other,
        })
    }

    /// Metadata if the object exists, `None` otherwise. Never transfers content.
    pub async fn stat(&self) -> Result<Option<BlobHandle>> {
        self.require_key()?;
        let backend = self.backend().await?;
        match backend.store.head(&self.path()?).await {
            Ok(meta) => Ok(Some(BlobHandle::from_meta(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(StorageError::from_object_store(&self.target(), e)),
        }
    }

    /// For a container-root query this reports whether the container exists.
    pub async fn exists(&self) -> Result<bool> {
        if self.query.is_container_root() {
            return self.container_exists().await;
        }
        Ok(self.stat().await?.is_some())
    }

    async fn stat_required(&self) -> Result<BlobHandle> {
        self.stat()
            .await?
            .ok_or_else(|| StorageError::not_found(&self.target(), "object does not exist"))
    }

    pub async fn size(&self) -> Result<u64> {
        Ok(self.stat_required().await?.size)
    }

    pub async fn mtime(&self) -> Result<DateTime<Utc>> {
        Ok(self.stat_required().await?.last_modified)
    }

    // ------------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------------

    /// Stream the object into `sink`; returns the number of bytes written.
    pub async fn retrieve<W>(&self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.require_key()?;
        let backend = self.backend().await?;
        transfer::download(backend.store.as_ref(), &self.path()?, &self.target(), sink, &self.cancel).await
    }

    /// Download next to `dest` and rename into place; `dest` is never left partial.
    pub async fn retrieve_to_path(&self, dest: &Path) -> Result<u64> {
        let target = self.target();
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&target, e))?;

        let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&target, e))?;
        let std_file = tmp.reopen().map_err(|e| StorageError::io(&target, e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let written = self.retrieve(&mut file).await?;
        file.sync_all().await.map_err(|e| StorageError::io(&target, e))?;
        drop(file);

        tmp.persist(dest).map_err(|e| StorageError::io(&target, e.error))?;
        debug!("retrieved {} to {}", target, dest.display());
        Ok(written)
    }

    /// Stream `source` to the object, overwriting it. Creates the container on
    /// first use when the session allows it.
    pub async fn store<R>(&self, source: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.require_key()?;
        self.session.ensure_container(&self.query).await?;
        self.upload(source).await
    }

    async fn upload<R>(&self, source: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let backend = self.backend().await?;
        let opts = TransferOptions::from(self.session.settings());
        transfer::upload(backend.store, &self.path()?, &self.target(), source, opts, &self.cancel).await
    }

    pub async fn store_bytes(&self, data: impl Into<Bytes>) -> Result<u64> {
        let data: Bytes = data.into();
        self.store(&mut data.as_ref()).await
    }

    pub async fn store_from_path(&self, src: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::open(src)
            .await
            .map_err(|e| StorageError::io(&self.target(), e))?;
        self.store(&mut file).await
    }

    // ------------------------------------------------------------------------
    // Remove & touch
    // ------------------------------------------------------------------------

    /// Delete the object; an absent object is not an error.
    pub async fn remove(&self) -> Result<()> {
        self.require_key()?;
        let backend = self.backend().await?;
        match backend.store.delete(&self.path()?).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                debug!("remove: {} already absent", self.target());
                Ok(())
            }
            Err(e) => Err(StorageError::from_object_store(&self.target(), e)),
        }
    }

    /// Advance the last-modified time without changing content.
    ///
    /// The backend has no such primitive, so this reads the full object into a
    /// temporary file and writes it back: O(size) in both directions. Returns the
    /// new last-modified time.
    pub async fn touch(&self) -> Result<DateTime<Utc>> {
        let target = self.target();
        let before = self.stat_required().await?;

        let spool = tempfile::tempfile().map_err(|e| StorageError::io(&target, e))?;
        let mut spool = tokio::fs::File::from_std(spool);
        self.retrieve(&mut spool).await?;

        for attempt in 1..=TOUCH_ATTEMPTS {
            // Last-modified has whole-second resolution on the service.
            let earliest = before.last_modified + ChronoDuration::milliseconds(MTIME_RESOLUTION_MS * attempt as i64);
            if let Ok(wait) = (earliest - Utc::now()).to_std() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(StorageError::cancelled(&target)),
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            spool
                .seek(SeekFrom::Start(0))
                .await
                .map_err(|e| StorageError::io(&target, e))?;
            self.upload(&mut spool).await?;

            let after = self.mtime().await?;
            if after > before.last_modified {
                info!("touched {} ({} -> {})", target, before.last_modified, after);
                return Ok(after);
            }
            warn!("touch attempt {} on {} did not advance mtime", attempt, target);
        }
        Err(StorageError::UnexpectedBackend {
            target,
            message: "last-modified did not advance after re-upload".to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------------

    /// Keys under this query's key, relative to it, lazily.
    ///
    /// The key is a literal prefix (segment-anchored) unless it carries glob or
    /// workflow wildcards. The object's own key is never part of the result.
    /// Each call starts a fresh enumeration.
    pub fn list_candidates(&self) -> BoxStream<'static, Result<String>> {
        let session = self.session.clone();
        let query = self.query.clone();
        let cancel = self.cancel.clone();
        stream::once(async move {
            let (mut tx, rx) = mpsc::channel(LIST_CHANNEL_DEPTH);
            tokio::spawn(async move {
                if let Err(e) = produce_candidates(&session, &query, &cancel, &mut tx).await {
                    let _ = tx.send(Err(e)).await;
                }
            });
            rx
        })
        .flatten()
        .boxed()
    }

    pub async fn collect_candidates(&self) -> Result<Vec<String>> {
        self.list_candidates().try_collect().await
    }

    /// Immediate children of this query's key, with synthesized directories.
    pub async fn list_directory(&self) -> Result<Vec<DirectoryEntry>> {
        let candidates = self.collect_candidates().await?;
        Ok(directory_entries(candidates.iter().map(String::as_str)))
    }

    /// Every blob in the container. An absent container yields an empty
    /// inventory flagged as such.
    pub async fn inventory(&self) -> Result<Inventory> {
        if !self.container_exists().await? {
            return Ok(Inventory::default());
        }
        let backend = self.backend().await?;
        let target = self.query.with_key("").target();
        let mut listing = backend.store.list(None);
        let mut blobs = BTreeMap::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StorageError::cancelled(&target)),
                n = listing.next() => n,
            };
            let Some(meta) = next else { break };
            let handle = BlobHandle::from_meta(meta.map_err(|e| StorageError::from_object_store(&target, e))?);
            blobs.insert(handle.key.clone(), handle);
        }
        debug!("inventory of {}: {} blobs", target, blobs.len());
        Ok(Inventory {
            container_exists: true,
            blobs,
        })
    }
}

/// The key exactly as the service names it. `Path::from` would percent-encode
/// characters such as `#` and collapse `//`, so the raw key is validated instead.
fn backend_path(query: &StorageQuery, key: &str) -> Result<ObjectPath> {
    if key.starts_with(KEY_SEPARATOR) {
        return Err(StorageError::malformed(query.to_string(), "blob key starts with '/'"));
    }
    ObjectPath::parse(key).map_err(|e| StorageError::malformed(query.to_string(), format!("unusable blob key: {}", e)))
}

async fn produce_candidates(
    session: &AzureSession,
    query: &StorageQuery,
    cancel: &CancellationToken,
    tx: &mut mpsc::Sender<Result<String>>,
) -> Result<()> {
    let target = query.target();
    let plan = ListingPlan::new(&query.key)?;
    let backend = session.backend(query).await?;
    let root = plan.root().map(|r| backend_path(query, r)).transpose()?;
    let mut listing = backend.store.list(root.as_ref());
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::cancelled(&target)),
            n = listing.next() => n,
        };
        let Some(meta) = next else {
            return Ok(());
        };
        let meta = meta.map_err(|e| StorageError::from_object_store(&target, e))?;
        if let Some(rel) = plan.relative(meta.location.as_ref()) {
            if tx.send(Ok(rel)).await.is_err() {
                // Consumer dropped the stream.
                return Ok(());
            }
        }
    }
}
