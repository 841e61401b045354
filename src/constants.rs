// src/constants.rs
//
// Centralized constants for azstore to avoid hardcoded values throughout the codebase

/// URI scheme accepted for storage queries (`az://...`)
pub const QUERY_SCHEME: &str = "az";

/// Path separator used to emulate directories over the flat blob namespace
pub const KEY_SEPARATOR: char = '/';

/// Public blob endpoint suffix
pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Maximum length of a blob name accepted by the service
pub const MAX_BLOB_NAME_LEN: usize = 1024;

// ============================================================================
// Transfer tuning
// ============================================================================

/// Default chunk (block) size for streaming transfers (8 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Smallest chunk size we accept from configuration (64 KiB)
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of blocks staged concurrently during a multipart store
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Backend last-modified resolution; touch waits at least this long past the
/// previous timestamp so mtime strictly advances
pub const MTIME_RESOLUTION_MS: i64 = 1000;

// ============================================================================
// Transport client defaults (retry lives in the transport, not in this crate)
// ============================================================================

/// Default request timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default transport-level retry count
pub const DEFAULT_MAX_RETRIES: usize = 10;

/// Default transport-level retry budget (seconds)
pub const DEFAULT_RETRY_TIMEOUT_SECS: u64 = 180;

// ============================================================================
// Container REST API
// ============================================================================

/// `x-ms-version` sent with container management requests
pub const AZURE_STORAGE_API_VERSION: &str = "2021-08-06";

// ============================================================================
// Local emulator (Azurite) well-known values
// ============================================================================

pub const AZURITE_ACCOUNT: &str = "devstoreaccount1";

pub const AZURITE_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

pub const AZURITE_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

// ============================================================================
// Environment variables consulted by the default credential chain
// ============================================================================

pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const ENV_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
pub const ENV_IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
pub const ENV_MSI_ENDPOINT: &str = "MSI_ENDPOINT";

/// Azure CLI executable probed for the interactive-login step
pub const AZURE_CLI_PROGRAM: &str = "az";

/// Override for the background runtime's worker count
pub const ENV_RT_THREADS: &str = "AZSTORE_RT_THREADS";
