// src/lib.rs
//
// Crate root: module declarations and the public re-exports callers use.

//! Azure Blob Storage adapter for workflow orchestrators.
//!
//! Exposes a filesystem-flavoured object lifecycle (exists, size, mtime,
//! retrieve, store, remove, list, touch) over the flat account/container/blob
//! namespace.
//!
//! ```no_run
//! use azstore::{AzureSession, StorageSettings};
//!
//! # async fn example() -> azstore::Result<()> {
//! let session = AzureSession::new(StorageSettings::new().with_account_name("myacct"))?;
//! let obj = session.object("az://data/dir/file.txt")?;
//! obj.store_bytes("Hello, World!\n").await?;
//! assert_eq!(obj.size().await?, 14);
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod config;
pub mod uri_utils;
pub mod credentials;
pub mod azure_client;
pub mod memory;
pub mod session;
pub mod listing;
pub mod transfer;
pub mod storage_object;
pub mod blocking;

pub use blocking::{run_on_global_rt, BlockingStorageObject};
pub use config::{ConnectionString, StorageSettings};
pub use credentials::{Credential, CredentialChain, CredentialSource, DefaultCredential, EnvSource, ProcessEnv};
pub use error::{ErrorKind, Result, StorageError, Target};
pub use listing::DirectoryEntry;
pub use memory::InMemoryBackendFactory;
pub use session::{AzureSession, BackendFactory, BlobBackend, ContainerAdmin};
pub use storage_object::{BlobHandle, Inventory, StorageObject};
pub use uri_utils::{example_queries, validate_query, QueryValidation, StorageQuery};
