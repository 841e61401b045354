// src/transfer.rs
//
// Streaming transfer engine: download a blob into an async sink and upload an
// async source into a blob, chunk by chunk, never holding the whole object.
//
// Uploads smaller than one chunk go out as a single put. Larger ones are staged
// as blocks and committed only after the last chunk, so a failed or cancelled
// upload leaves the key exactly as it was.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, WriteMultipart};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::StorageSettings;
use crate::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY, MIN_CHUNK_SIZE};
use crate::error::{Result, StorageError, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub chunk_size: usize,
    pub max_concurrency: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl From<&StorageSettings> for TransferOptions {
    fn from(s: &StorageSettings) -> Self {
        Self {
            chunk_size: s.chunk_size.max(MIN_CHUNK_SIZE),
            max_concurrency: s.max_concurrency.max(1),
        }
    }
}

/// Stream `path` into `sink`; returns the number of bytes written.
pub async fn download<W>(
    store: &dyn ObjectStore,
    path: &Path,
    target: &Target,
    sink: &mut W,
    cancel: &CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StorageError::cancelled(target)),
        r = store.get(path) => r.map_err(|e| StorageError::from_object_store(target, e))?,
    };

    let mut stream = response.into_stream();
    let mut written: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::cancelled(target)),
            n = stream.next() => n,
        };
        match next {
            Some(Ok(chunk)) => {
                sink.write_all(&chunk).await.map_err(|e| StorageError::io(target, e))?;
                written += chunk.len() as u64;
            }
            Some(Err(e)) => return Err(StorageError::from_object_store(target, e)),
            None => break,
        }
    }
    sink.flush().await.map_err(|e| StorageError::io(target, e))?;
    tracing::debug!("downloaded {} bytes from {}", written, target);
    Ok(written)
}

/// Read up to `chunk_size` bytes; shorter only at end of input.
async fn read_chunk<R>(source: &mut R, chunk_size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut buf = BytesMut::with_capacity(chunk_size);
    while buf.len() < chunk_size {
        let remaining = (chunk_size - buf.len()) as u64;
        let n = (&mut *source).take(remaining).read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}

async fn read_chunk_or_cancel<R>(
    source: &mut R,
    chunk_size: usize,
    target: &Target,
    cancel: &CancellationToken,
) -> Result<Bytes>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::cancelled(target)),
        r = read_chunk(source, chunk_size) => r.map_err(|e| StorageError::io(target, e)),
    }
}

/// Stream `source` into `path`, overwriting it; returns the number of bytes stored.
pub async fn upload<R>(
    store: Arc<dyn ObjectStore>,
    path: &Path,
    target: &Target,
    source: &mut R,
    opts: TransferOptions,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let chunk_size = opts.chunk_size.max(MIN_CHUNK_SIZE);
    let first = read_chunk_or_cancel(source, chunk_size, target, cancel).await?;

    if first.len() < chunk_size {
        let len = first.len() as u64;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::cancelled(target)),
            r = store.put(path, PutPayload::from(first)) => {
                r.map_err(|e| StorageError::from_object_store(target, e))?;
            }
        }
        tracing::debug!("stored {} bytes to {} in one request", len, target);
        return Ok(len);
    }

    let upload = store
        .put_multipart(path)
        .await
        .map_err(|e| StorageError::from_object_store(target, e))?;
    let mut writer = WriteMultipart::new_with_chunk_size(upload, chunk_size);
    let mut total = first.len() as u64;
    writer.put(first);

    let staged: Result<()> = async {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StorageError::cancelled(target)),
                r = writer.wait_for_capacity(opts.max_concurrency) => {
                    r.map_err(|e| StorageError::from_object_store(target, e))?;
                }
            }
            let chunk = read_chunk_or_cancel(source, chunk_size, target, cancel).await?;
            let last = chunk.len() < chunk_size;
            if !chunk.is_empty() {
                total += chunk.len() as u64;
                writer.put(chunk);
            }
            if last {
                return Ok(());
            }
        }
    }
    .await;

    if let Err(e) = staged {
        tracing::warn!("aborting staged upload to {}: {}", target, e);
        if let Err(abort_err) = writer.abort().await {
            tracing::debug!("abort of {} failed: {}", target, abort_err);
        }
        return Err(e);
    }
    if cancel.is_cancelled() {
        let _ = writer.abort().await;
        return Err(StorageError::cancelled(target));
    }

    writer
        .finish()
        .await
        .map_err(|e| StorageError::from_object_store(target, e))?;
    tracing::debug!("stored {} bytes to {} in staged blocks", total, target);
    Ok(total)
}
