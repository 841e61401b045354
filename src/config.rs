// src/config.rs
//
// Caller-supplied options for a storage session, plus the connection-string parser.
//
// Every option is optional. Credential-bearing fields select an entry of the
// credential chain (see credentials.rs); the endpoint override points the session
// at a non-default, self-hosted or emulated service.

use std::fmt;
use std::time::Duration;

use crate::constants::{
    AZURITE_ACCOUNT, AZURITE_ACCOUNT_KEY, AZURITE_BLOB_ENDPOINT, DEFAULT_CHUNK_SIZE,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_ENDPOINT_SUFFIX, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, MIN_CHUNK_SIZE,
};
use crate::error::{Result, StorageError};
use crate::uri_utils::{account_from_endpoint_url, is_valid_blob_endpoint, is_valid_mock_endpoint};

/// Runtime parameters for one storage session.
#[derive(Clone)]
pub struct StorageSettings {
    pub account_name: Option<String>,
    pub endpoint_url: Option<String>,
    pub connection_string: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    /// User-assigned identity for the managed-identity step of the default chain
    pub managed_identity_client_id: Option<String>,

    /// Create a missing container on first store
    pub create_container: bool,

    pub chunk_size: usize,
    pub max_concurrency: usize,

    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: usize,
    pub retry_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            account_name: None,
            endpoint_url: None,
            connection_string: None,
            account_key: None,
            sas_token: None,
            managed_identity_client_id: None,
            create_container: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_timeout: Duration::from_secs(DEFAULT_RETRY_TIMEOUT_SECS),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("account_name", &self.account_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "<redacted>"))
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("managed_identity_client_id", &self.managed_identity_client_id)
            .field("create_container", &self.create_container)
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl StorageSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account_name(mut self, account: impl Into<String>) -> Self {
        self.account_name = Some(account.into());
        self
    }

    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_connection_string(mut self, conn: impl Into<String>) -> Self {
        self.connection_string = Some(conn.into());
        self
    }

    pub fn with_account_key(mut self, key: impl Into<String>) -> Self {
        self.account_key = Some(key.into());
        self
    }

    pub fn with_sas_token(mut self, token: impl Into<String>) -> Self {
        self.sas_token = Some(token.into());
        self
    }

    pub fn with_managed_identity_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.managed_identity_client_id = Some(client_id.into());
        self
    }

    pub fn with_create_container(mut self, create: bool) -> Self {
        self.create_container = create;
        self
    }

    /// Values below the 64 KiB floor are raised to it.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Structural checks that do not need the network.
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.endpoint_url {
            if !(is_valid_blob_endpoint(endpoint) || is_valid_mock_endpoint(endpoint)) {
                return Err(StorageError::malformed(
                    endpoint.clone(),
                    "endpoint must be https://<account>.blob.core.windows.net or a local emulator endpoint",
                ));
            }
        }
        if let Some(conn) = &self.connection_string {
            ConnectionString::parse(conn)?;
        }
        Ok(())
    }

    /// Account supplied out-of-band (not embedded in the query).
    pub fn default_account(&self) -> Option<String> {
        if let Some(account) = &self.account_name {
            return Some(account.clone());
        }
        if let Some(account) = self
            .connection_string
            .as_deref()
            .and_then(|c| ConnectionString::parse(c).ok())
            .and_then(|c| c.account_name)
        {
            return Some(account);
        }
        self.endpoint_url.as_deref().and_then(account_from_endpoint_url)
    }
}

// ----------------------------------------------------------------------------
// Connection strings
// ----------------------------------------------------------------------------

/// Parsed `Key=Value;...` storage connection string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub protocol: Option<String>,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub blob_endpoint: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub shared_access_signature: Option<String>,
    pub use_development_storage: bool,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("protocol", &self.protocol)
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("blob_endpoint", &self.blob_endpoint)
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("shared_access_signature", &self.shared_access_signature.as_ref().map(|_| "<redacted>"))
            .field("use_development_storage", &self.use_development_storage)
            .finish()
    }
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self> {
        let mut out = ConnectionString::default();
        for (idx, part) in input.split(';').map(str::trim).filter(|p| !p.is_empty()).enumerate() {
            // Keys and SAS values contain '=', only the first one separates.
            let (key, value) = part.split_once('=').ok_or_else(|| {
                StorageError::auth("<connection-string>", format!("segment {} is not Key=Value", idx + 1))
            })?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => out.protocol = Some(value),
                "accountname" => out.account_name = Some(value),
                "accountkey" => out.account_key = Some(value),
                "blobendpoint" => out.blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "endpointsuffix" => out.endpoint_suffix = Some(value),
                "sharedaccesssignature" => out.shared_access_signature = Some(value),
                "usedevelopmentstorage" => out.use_development_storage = value.eq_ignore_ascii_case("true"),
                // Queue/table/file endpoints are irrelevant for blobs.
                other => tracing::debug!("ignoring connection string key '{}'", other),
            }
        }

        if out.use_development_storage {
            out.account_name.get_or_insert_with(|| AZURITE_ACCOUNT.to_string());
            out.account_key.get_or_insert_with(|| AZURITE_ACCOUNT_KEY.to_string());
            out.blob_endpoint.get_or_insert_with(|| AZURITE_BLOB_ENDPOINT.to_string());
        }

        if out.account_key.is_none() && out.shared_access_signature.is_none() {
            return Err(StorageError::auth(
                out.account_name.clone().unwrap_or_default(),
                "connection string carries neither AccountKey nor SharedAccessSignature",
            ));
        }
        if out.account_name.is_none() && out.blob_endpoint.is_none() {
            return Err(StorageError::auth(
                "<connection-string>",
                "connection string names neither AccountName nor BlobEndpoint",
            ));
        }
        Ok(out)
    }

    /// Account URL the blob client talks to.
    pub fn blob_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.blob_endpoint {
            return Some(endpoint.clone());
        }
        let account = self.account_name.as_ref()?;
        let protocol = self.protocol.as_deref().unwrap_or("https");
        let suffix = self.endpoint_suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
        Some(format!("{protocol}://{account}.blob.{suffix}"))
    }

    /// Account name, falling back to the one encoded in the blob endpoint.
    pub fn account(&self) -> Option<String> {
        self.account_name
            .clone()
            .or_else(|| self.blob_endpoint.as_deref().and_then(account_from_endpoint_url))
    }
}
