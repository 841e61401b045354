// src/azure_client.rs
//
// Azure backend for a session: an object_store `MicrosoftAzure` client bound to one
// container, plus a small REST client for the container operations object_store
// does not offer (existence probe and creation).

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use object_store::azure::{AzureCredential, AzureCredentialProvider, MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::{ClientOptions, RetryConfig};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::StorageSettings;
use crate::constants::AZURE_STORAGE_API_VERSION;
use crate::credentials::{parse_sas_token, Credential, DefaultCredential};
use crate::error::{Result, StorageError, Target};
use crate::session::{BackendFactory, BlobBackend, ContainerAdmin};
use crate::uri_utils::default_blob_endpoint;

/// Endpoint precedence: explicit override, then the connection string's blob
/// endpoint, then the public endpoint for the account.
pub fn resolve_endpoint(settings: &StorageSettings, credential: &Credential, account: &str) -> String {
    settings
        .endpoint_url
        .clone()
        .or_else(|| credential.endpoint())
        .unwrap_or_else(|| default_blob_endpoint(account))
        .trim_end_matches('/')
        .to_string()
}

fn client_options(settings: &StorageSettings, endpoint: &str) -> ClientOptions {
    ClientOptions::default()
        .with_timeout(settings.timeout)
        .with_connect_timeout(settings.connect_timeout)
        .with_allow_http(endpoint.starts_with("http://"))
}

fn retry_config(settings: &StorageSettings) -> RetryConfig {
    RetryConfig {
        backoff: Default::default(),
        max_retries: settings.max_retries,
        retry_timeout: settings.retry_timeout,
    }
}

/// Build the blob client for `{account, container}` with the resolved credential.
pub fn build_azure_store(
    account: &str,
    container: &str,
    credential: &Credential,
    settings: &StorageSettings,
) -> Result<MicrosoftAzure> {
    let endpoint = resolve_endpoint(settings, credential, account);
    let mut builder = MicrosoftAzureBuilder::new()
        .with_account(account)
        .with_container_name(container)
        .with_client_options(client_options(settings, &endpoint))
        .with_retry(retry_config(settings));

    if endpoint != default_blob_endpoint(account) {
        debug!("account '{}': using endpoint {}", account, endpoint);
        builder = builder.with_endpoint(endpoint);
    }

    builder = match credential {
        Credential::ConnectionString(cs) => match (&cs.account_key, &cs.shared_access_signature) {
            (Some(key), _) => builder.with_access_key(key),
            (None, Some(sas)) => builder.with_sas_authorization(parse_sas_token(sas)),
            (None, None) => return Err(StorageError::auth(account, "connection string has no secret")),
        },
        Credential::AccountKey { key, .. } => builder.with_access_key(key),
        Credential::SasToken { pairs } => builder.with_sas_authorization(pairs.clone()),
        Credential::Default(DefaultCredential::ClientSecret {
            tenant_id,
            client_id,
            client_secret,
        }) => builder
            .with_tenant_id(tenant_id)
            .with_client_id(client_id)
            .with_client_secret(client_secret),
        Credential::Default(DefaultCredential::WorkloadIdentity {
            tenant_id,
            client_id,
            token_file,
        }) => builder
            .with_tenant_id(tenant_id)
            .with_client_id(client_id)
            .with_federated_token_file(token_file.to_string_lossy()),
        Credential::Default(DefaultCredential::AzureCli) => builder.with_use_azure_cli(true),
        Credential::Default(DefaultCredential::ManagedIdentity { client_id, endpoint }) => {
            if let Some(id) = client_id {
                builder = builder.with_client_id(id);
            }
            if let Some(msi) = endpoint {
                builder = builder.with_msi_endpoint(msi);
            }
            builder
        }
    };

    builder
        .build()
        .map_err(|e| StorageError::auth(account, format!("cannot build blob client: {}", e)))
}

// ----------------------------------------------------------------------------
// Container REST admin
// ----------------------------------------------------------------------------

enum AdminAuth {
    SharedKey { key: Vec<u8> },
    Sas(Vec<(String, String)>),
    /// Token-based identities: ask the blob client's provider
    Provider(AzureCredentialProvider),
}

impl AdminAuth {
    fn for_credential(account: &str, credential: &Credential, store: &MicrosoftAzure) -> Result<Self> {
        let decode = |key: &str| {
            base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .map_err(|_| StorageError::auth(account, "account key is not valid base64"))
        };
        Ok(match credential {
            Credential::ConnectionString(cs) => match (&cs.account_key, &cs.shared_access_signature) {
                (Some(key), _) => AdminAuth::SharedKey { key: decode(key)? },
                (None, Some(sas)) => AdminAuth::Sas(parse_sas_token(sas)),
                (None, None) => return Err(StorageError::auth(account, "connection string has no secret")),
            },
            Credential::AccountKey { key, .. } => AdminAuth::SharedKey { key: decode(key)? },
            Credential::SasToken { pairs } => AdminAuth::Sas(pairs.clone()),
            Credential::Default(_) => AdminAuth::Provider(Arc::clone(store.credentials())),
        })
    }
}

/// Container-level REST calls (`?restype=container`).
pub struct AzureContainerAdmin {
    http: reqwest::Client,
    container_url: Url,
    account: String,
    container: String,
    auth: AdminAuth,
}

impl AzureContainerAdmin {
    fn new(http: reqwest::Client, endpoint: &str, account: &str, container: &str, auth: AdminAuth) -> Result<Self> {
        let mut container_url = Url::parse(endpoint)
            .map_err(|e| StorageError::malformed(endpoint, format!("invalid endpoint URL: {}", e)))?;
        container_url
            .path_segments_mut()
            .map_err(|_| StorageError::malformed(endpoint, "endpoint URL cannot carry a path"))?
            .pop_if_empty()
            .push(container);
        Ok(Self {
            http,
            container_url,
            account: account.to_string(),
            container: container.to_string(),
            auth,
        })
    }

    fn target(&self) -> Target {
        Target::new(&self.account, &self.container, "")
    }

    /// `StringToSign` for Shared Key; only `x-ms-*` headers are set on these requests.
    fn string_to_sign(&self, method: &Method, date: &str) -> String {
        format!(
            "{}\n\n\n\n\n\n\n\n\n\n\n\nx-ms-date:{}\nx-ms-version:{}\n/{}{}\nrestype:container",
            method.as_str(),
            date,
            AZURE_STORAGE_API_VERSION,
            self.account,
            self.container_url.path()
        )
    }

    async fn send(&self, method: Method) -> Result<(StatusCode, String)> {
        let target = self.target();
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut url = self.container_url.clone();
        url.query_pairs_mut().append_pair("restype", "container");

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_STORAGE_API_VERSION);

        match &self.auth {
            AdminAuth::SharedKey { key } => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|e| StorageError::auth(&self.account, format!("unusable account key: {}", e)))?;
                mac.update(self.string_to_sign(&method, &date).as_bytes());
                let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
                request = request.header("Authorization", format!("SharedKey {}:{}", self.account, signature));
            }
            AdminAuth::Sas(pairs) => {
                request = request.query(pairs);
            }
            AdminAuth::Provider(provider) => {
                let credential = provider
                    .get_credential()
                    .await
                    .map_err(|e| StorageError::from_object_store(&target, e))?;
                request = match credential.as_ref() {
                    AzureCredential::BearerToken(token) => request.bearer_auth(token),
                    AzureCredential::SASToken(pairs) => request.query(pairs),
                    _ => {
                        return Err(StorageError::auth(
                            &self.account,
                            "identity produced an account key; container calls need a token",
                        ))
                    }
                };
            }
        }

        if method == Method::PUT {
            request = request.header("Content-Length", "0");
        }

        let response = request.send().await.map_err(|e| StorageError::from_http(&target, e))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

fn short_body(body: &str) -> String {
    body.chars().take(256).collect()
}

#[async_trait]
impl ContainerAdmin for AzureContainerAdmin {
    async fn container_exists(&self) -> Result<bool> {
        let (status, body) = self.send(Method::GET).await?;
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(StorageError::from_status(
                &self.target(),
                s.as_u16(),
                format!("container probe failed: {} {}", s, short_body(&body)),
            )),
        }
    }

    async fn create_container(&self) -> Result<bool> {
        let (status, body) = self.send(Method::PUT).await?;
        match status {
            StatusCode::CREATED => {
                info!("created container '{}' in account '{}'", self.container, self.account);
                Ok(true)
            }
            StatusCode::CONFLICT => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(StorageError::from_status(
                &self.target(),
                s.as_u16(),
                format!("container creation failed: {} {}", s, short_body(&body)),
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// Factory
// ----------------------------------------------------------------------------

/// Builds Azure backends; one shared HTTP client for all container admin calls.
pub struct AzureBackendFactory {
    http: reqwest::Client,
}

impl AzureBackendFactory {
    pub fn new(settings: &StorageSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| StorageError::UnexpectedBackend {
                target: Target::default(),
                message: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self { http })
    }
}

impl BackendFactory for AzureBackendFactory {
    fn build(
        &self,
        account: &str,
        container: &str,
        credential: &Credential,
        settings: &StorageSettings,
    ) -> Result<BlobBackend> {
        let store = build_azure_store(account, container, credential, settings)?;
        let endpoint = resolve_endpoint(settings, credential, account);
        let auth = AdminAuth::for_credential(account, credential, &store)?;
        let admin = AzureContainerAdmin::new(self.http.clone(), &endpoint, account, container, auth)?;
        Ok(BlobBackend::new(Arc::new(store), Arc::new(admin)))
    }
}
