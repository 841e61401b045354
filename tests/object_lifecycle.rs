// tests/object_lifecycle.rs
//
// Store / probe / retrieve / remove against the in-memory backend.

mod common;

use anyhow::Result;
use azstore::ErrorKind;
use common::{memory_session, memory_session_with, query, random_bytes, random_key, test_settings, ACCOUNT, CONTAINER};

#[tokio::test]
async fn hello_world_scenario() -> Result<()> {
    let (session, _) = memory_session();
    let obj = session.object(&query("dir/file.txt"))?;

    assert!(!obj.exists().await?);
    let stored = obj.store_bytes("Hello, World!\n").await?;
    assert_eq!(stored, 14);
    assert!(obj.exists().await?);
    assert_eq!(obj.size().await?, 14);

    let mut out = Vec::new();
    obj.retrieve(&mut out).await?;
    assert_eq!(out, b"Hello, World!\n");

    let dir = session.object(&query("dir/"))?;
    assert_eq!(dir.collect_candidates().await?, vec!["file.txt".to_string()]);

    obj.remove().await?;
    assert!(!obj.exists().await?);
    Ok(())
}

#[tokio::test]
async fn round_trip_larger_than_one_chunk() -> Result<()> {
    // Smallest chunk size so a few hundred KiB takes the staged-block path.
    let (session, _) = memory_session_with(test_settings().with_chunk_size(0));
    let obj = session.object(&query(&random_key("big")))?;
    let data = random_bytes(64 * 1024 * 5 + 123);

    let stored = obj.store(&mut &data[..]).await?;
    assert_eq!(stored, data.len() as u64);
    assert_eq!(obj.size().await?, data.len() as u64);

    let mut first = Vec::new();
    obj.retrieve(&mut first).await?;
    let mut second = Vec::new();
    obj.retrieve(&mut second).await?;
    assert_eq!(first, data);
    assert_eq!(first, second, "repeated retrieval must be byte-identical");
    Ok(())
}

#[tokio::test]
async fn store_overwrites_existing_object() -> Result<()> {
    let (session, _) = memory_session();
    let obj = session.object(&query("over.txt"))?;
    obj.store_bytes("first version, longer").await?;
    obj.store_bytes("second").await?;

    let mut out = Vec::new();
    obj.retrieve(&mut out).await?;
    assert_eq!(out, b"second");
    assert_eq!(obj.size().await?, 6);
    Ok(())
}

#[tokio::test]
async fn remove_is_idempotent() -> Result<()> {
    let (session, _) = memory_session();
    let obj = session.object(&query("never-stored.txt"))?;
    obj.remove().await?;
    obj.store_bytes("x").await?;
    obj.remove().await?;
    obj.remove().await?;
    assert!(!obj.exists().await?);
    Ok(())
}

#[tokio::test]
async fn probes_on_missing_object() -> Result<()> {
    let (session, _) = memory_session();
    let obj = session.object(&query("missing.bin"))?;
    assert!(!obj.exists().await?);
    assert!(obj.stat().await?.is_none());
    assert_eq!(obj.size().await.unwrap_err().kind(), ErrorKind::NotFound);
    let err = obj.mtime().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("container/missing.bin"));

    let mut out = Vec::new();
    assert_eq!(obj.retrieve(&mut out).await.unwrap_err().kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn stat_reports_metadata() -> Result<()> {
    let (session, _) = memory_session();
    let obj = session.object(&query("meta/one.txt"))?;
    obj.store_bytes(vec![0u8; 42]).await?;
    let handle = obj.stat().await?.expect("stored object");
    assert_eq!(handle.key, "meta/one.txt");
    assert_eq!(handle.size, 42);
    assert_eq!(obj.mtime().await?, handle.last_modified);
    Ok(())
}

#[tokio::test]
async fn missing_container_is_malformed() {
    let (session, _) = memory_session();
    let err = session.object(&format!("az://{ACCOUNT}")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedQuery);
}

#[tokio::test]
async fn object_operations_reject_prefix_queries() -> Result<()> {
    let (session, _) = memory_session();
    let prefix = session.object(&query("dir/"))?;
    assert_eq!(prefix.store_bytes("x").await.unwrap_err().kind(), ErrorKind::MalformedQuery);
    let root = session.object(&format!("az://{ACCOUNT}/{CONTAINER}"))?;
    assert_eq!(root.size().await.unwrap_err().kind(), ErrorKind::MalformedQuery);
    Ok(())
}

#[tokio::test]
async fn container_created_on_first_store() -> Result<()> {
    let (session, factory) = memory_session();
    let root = session.object(&format!("az://{ACCOUNT}/{CONTAINER}"))?;
    assert!(!factory.container_exists(ACCOUNT, CONTAINER));
    assert!(!root.exists().await?);

    session.object(&query("a.txt"))?.store_bytes("a").await?;
    assert!(factory.container_exists(ACCOUNT, CONTAINER));
    assert!(root.exists().await?);
    Ok(())
}

#[tokio::test]
async fn container_creation_can_be_disabled() -> Result<()> {
    let (session, factory) = memory_session_with(test_settings().with_create_container(false));
    session.object(&query("a.txt"))?.store_bytes("a").await?;
    assert!(!factory.container_exists(ACCOUNT, CONTAINER));
    Ok(())
}

#[tokio::test]
async fn file_transfers() -> Result<()> {
    let (session, _) = memory_session();
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("src.bin");
    let data = random_bytes(100_000);
    std::fs::write(&src, &data)?;

    let obj = session.object(&query("files/src.bin"))?;
    assert_eq!(obj.store_from_path(&src).await?, data.len() as u64);

    let dest = dir.path().join("out").join(obj.local_suffix());
    obj.retrieve_to_path(&dest).await?;
    assert_eq!(std::fs::read(&dest)?, data);
    assert!(dest.ends_with("container/files/src.bin"));
    Ok(())
}

#[tokio::test]
async fn failed_retrieve_leaves_no_file() -> Result<()> {
    let (session, _) = memory_session();
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("nothing.bin");
    let obj = session.object(&query("nothing.bin"))?;
    assert_eq!(obj.retrieve_to_path(&dest).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0, "temp file must be cleaned up");
    Ok(())
}

#[tokio::test]
async fn inventory_of_container() -> Result<()> {
    let (session, _) = memory_session();
    let root = session.object(&format!("az://{ACCOUNT}/{CONTAINER}"))?;
    let inv = root.inventory().await?;
    assert!(!inv.container_exists);
    assert!(inv.blobs.is_empty());

    session.object(&query("x/1.txt"))?.store_bytes("1").await?;
    session.object(&query("x/22.txt"))?.store_bytes("22").await?;
    let inv = root.inventory().await?;
    assert!(inv.container_exists);
    assert_eq!(inv.blobs.len(), 2);
    assert_eq!(inv.blobs["x/22.txt"].size, 2);
    Ok(())
}

#[tokio::test]
async fn account_merged_out_of_band() -> Result<()> {
    let (session, _) = memory_session_with(test_settings().with_account_name(ACCOUNT));
    let short = session.object(&format!("az://{CONTAINER}/k.txt"))?;
    let long = session.object(&query("k.txt"))?;
    assert_eq!(short.query(), long.query());
    short.store_bytes("k").await?;
    assert!(long.exists().await?);
    Ok(())
}

#[tokio::test]
async fn concurrent_operations_on_distinct_keys() -> Result<()> {
    let (session, _) = memory_session();
    let mut handles = Vec::new();
    for i in 0..16 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            let obj = session.object(&query(&format!("par/{i}.bin")))?;
            obj.store_bytes(vec![i as u8; 1000 + i]).await?;
            obj.size().await
        }));
    }
    for (i, h) in handles.into_iter().enumerate() {
        assert_eq!(h.await??, (1000 + i) as u64);
    }
    assert_eq!(session.cached_clients().await, 1);
    Ok(())
}
