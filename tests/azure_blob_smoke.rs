// Azure backend smoke test against a real account or Azurite.
//
// Runs only when AZSTORE_TEST_PREFIX names a writable location, e.g.
//   AZSTORE_TEST_PREFIX=az://myacct/scratch/azstore-smoke
// Credentials come from the usual AZSTORE_* variables or the default chain.

use anyhow::{Context, Result};
use crc32fast::Hasher as Crc32;
use rand::distr::Alphanumeric;
use rand::{rng, Rng};
use std::env;

use azstore::{AzureSession, StorageSettings};

fn opt_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn random_key(prefix: &str) -> String {
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

fn settings_from_env() -> StorageSettings {
    let mut s = StorageSettings::new();
    if let Some(v) = opt_env("AZSTORE_ACCOUNT_NAME") {
        s = s.with_account_name(v);
    }
    if let Some(v) = opt_env("AZSTORE_ENDPOINT_URL") {
        s = s.with_endpoint_url(v);
    }
    if let Some(v) = opt_env("AZSTORE_CONNECTION_STRING") {
        s = s.with_connection_string(v);
    }
    if let Some(v) = opt_env("AZSTORE_ACCOUNT_KEY") {
        s = s.with_account_key(v);
    }
    if let Some(v) = opt_env("AZSTORE_SAS_TOKEN") {
        s = s.with_sas_token(v);
    }
    s
}

#[tokio::test]
async fn store_stat_list_touch_remove_smoke() -> Result<()> {
    // Skip with a friendly note if not configured
    let Some(prefix) = opt_env("AZSTORE_TEST_PREFIX") else {
        eprintln!("SKIP: set AZSTORE_TEST_PREFIX (and AZSTORE_* credentials) to run the azure blob smoke test");
        return Ok(());
    };
    let prefix = prefix.trim_end_matches('/').to_string();

    let session = AzureSession::new(settings_from_env()).context("building session")?;
    let dir = format!("{}/{}/", prefix, random_key("azstore-smoke"));
    let obj = session.object(&format!("{dir}hello.txt"))?;

    let payload = "hello azure blob 👋".as_bytes();
    let crc_in = crc32(payload);

    // store
    assert!(!obj.exists().await?);
    obj.store_bytes(payload.to_vec()).await?;

    // retrieve
    let mut got = Vec::new();
    obj.retrieve(&mut got).await?;
    assert_eq!(&got[..], payload, "roundtrip mismatch");
    assert_eq!(crc32(&got), crc_in, "crc mismatch after retrieve");

    // stat
    assert_eq!(obj.size().await?, payload.len() as u64);
    let before = obj.mtime().await?;

    // list
    let listed = session.object(&dir)?.collect_candidates().await?;
    assert_eq!(listed, vec!["hello.txt".to_string()]);

    // touch
    let after = obj.touch().await?;
    assert!(after > before, "touch did not advance mtime");

    // remove (twice: the second is a no-op)
    obj.remove().await?;
    obj.remove().await?;
    assert!(!obj.exists().await?);
    Ok(())
}

#[tokio::test]
async fn multi_chunk_upload_smoke() -> Result<()> {
    let Some(prefix) = opt_env("AZSTORE_TEST_PREFIX") else {
        eprintln!("SKIP: set AZSTORE_TEST_PREFIX to run the azure blob multi-chunk test");
        return Ok(());
    };
    let prefix = prefix.trim_end_matches('/').to_string();

    let session = AzureSession::new(settings_from_env().with_chunk_size(1024 * 1024))?;
    let obj = session.object(&format!("{}/{}.bin", prefix, random_key("azstore-big")))?;

    let mut data = vec![0u8; 5 * 1024 * 1024 + 17];
    rng().fill(&mut data[..]);
    obj.store(&mut &data[..]).await?;
    assert_eq!(obj.size().await?, data.len() as u64);

    let mut got = Vec::with_capacity(data.len());
    obj.retrieve(&mut got).await?;
    assert_eq!(crc32(&got), crc32(&data));

    obj.remove().await?;
    Ok(())
}
