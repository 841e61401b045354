// src/credentials.rs
//
// Credential chain: an ordered list of sources, each able to try-resolve a
// credential for an account. The first source that yields one wins.
//
// Explicit sources (connection string, account key, SAS token) either resolve or
// fail; they never fall through to the ambient sources behind them. Ambient
// sources (environment, CLI login, managed identity) only check availability here.
// Token acquisition happens later in the transport client, on first request.

use base64::Engine as _;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::config::{ConnectionString, StorageSettings};
use crate::constants::{
    AZURE_CLI_PROGRAM, ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_FEDERATED_TOKEN_FILE,
    ENV_IDENTITY_ENDPOINT, ENV_MSI_ENDPOINT, ENV_TENANT_ID,
};
use crate::error::{Result, StorageError};

// ----------------------------------------------------------------------------
// Environment access seam
// ----------------------------------------------------------------------------

/// Read access to ambient process state. Tests substitute a fake.
pub trait EnvSource: Send + Sync {
    /// Value of an environment variable; empty values count as unset.
    fn var(&self, name: &str) -> Option<String>;

    /// Whether an executable with this name is reachable on `PATH`.
    fn has_program(&self, program: &str) -> bool;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    fn has_program(&self, program: &str) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| {
            let candidate = dir.join(program);
            candidate.is_file() || (cfg!(windows) && candidate.with_extension("cmd").is_file())
        })
    }
}

// ----------------------------------------------------------------------------
// Resolved credentials
// ----------------------------------------------------------------------------

/// Ambient identity picked by the default chain.
#[derive(Clone, PartialEq, Eq)]
pub enum DefaultCredential {
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    WorkloadIdentity {
        tenant_id: String,
        client_id: String,
        token_file: PathBuf,
    },
    AzureCli,
    ManagedIdentity {
        client_id: Option<String>,
        endpoint: Option<String>,
    },
}

/// Exactly one of these is active per session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ConnectionString(ConnectionString),
    AccountKey { account: String, key: String },
    /// Decoded query pairs of the token
    SasToken { pairs: Vec<(String, String)> },
    Default(DefaultCredential),
}

impl Credential {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Credential::ConnectionString(_) => "connection-string",
            Credential::AccountKey { .. } => "account-key",
            Credential::SasToken { .. } => "sas-token",
            Credential::Default(DefaultCredential::ClientSecret { .. }) => "default/client-secret",
            Credential::Default(DefaultCredential::WorkloadIdentity { .. }) => "default/workload-identity",
            Credential::Default(DefaultCredential::AzureCli) => "default/azure-cli",
            Credential::Default(DefaultCredential::ManagedIdentity { .. }) => "default/managed-identity",
        }
    }

    /// Endpoint implied by the credential itself (connection strings only).
    pub fn endpoint(&self) -> Option<String> {
        match self {
            Credential::ConnectionString(cs) => cs.blob_endpoint(),
            _ => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AccountKey { account, .. } => {
                f.debug_struct("AccountKey").field("account", account).finish_non_exhaustive()
            }
            _ => f.write_str(self.kind_name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Sources
// ----------------------------------------------------------------------------

/// One entry of the chain.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    ConnectionString(String),
    AccountKey(String),
    SasToken(String),
    Environment,
    AzureCli,
    ManagedIdentity { client_id: Option<String> },
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl CredentialSource {
    pub fn name(&self) -> &'static str {
        match self {
            CredentialSource::ConnectionString(_) => "connection-string",
            CredentialSource::AccountKey(_) => "account-key",
            CredentialSource::SasToken(_) => "sas-token",
            CredentialSource::Environment => "environment",
            CredentialSource::AzureCli => "azure-cli",
            CredentialSource::ManagedIdentity { .. } => "managed-identity",
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(
            self,
            CredentialSource::ConnectionString(_) | CredentialSource::AccountKey(_) | CredentialSource::SasToken(_)
        )
    }

    /// `Ok(None)` means "not available, try the next source".
    pub fn try_resolve(&self, account: &str, env: &dyn EnvSource) -> Result<Option<Credential>> {
        match self {
            CredentialSource::ConnectionString(raw) => {
                let cs = ConnectionString::parse(raw).map_err(|e| match e {
                    StorageError::Authentication { reason, .. } => StorageError::auth(account, reason),
                    other => other,
                })?;
                if let Some(cs_account) = cs.account() {
                    if !account.is_empty() && cs_account != account {
                        return Err(StorageError::auth(
                            account,
                            format!("connection string is for account '{}'", cs_account),
                        ));
                    }
                }
                Ok(Some(Credential::ConnectionString(cs)))
            }
            CredentialSource::AccountKey(key) => {
                if account.is_empty() {
                    return Err(StorageError::auth(account, "account key given without an account name"));
                }
                let key = key.trim();
                if base64::engine::general_purpose::STANDARD.decode(key).is_err() {
                    return Err(StorageError::auth(account, "account key is not valid base64"));
                }
                Ok(Some(Credential::AccountKey {
                    account: account.to_string(),
                    key: key.to_string(),
                }))
            }
            CredentialSource::SasToken(token) => {
                let pairs = parse_sas_token(token);
                if !pairs.iter().any(|(k, _)| k == "sig") {
                    return Err(StorageError::auth(account, "SAS token carries no signature ('sig')"));
                }
                Ok(Some(Credential::SasToken { pairs }))
            }
            CredentialSource::Environment => {
                let (Some(tenant_id), Some(client_id)) = (env.var(ENV_TENANT_ID), env.var(ENV_CLIENT_ID)) else {
                    return Ok(None);
                };
                if let Some(client_secret) = env.var(ENV_CLIENT_SECRET) {
                    return Ok(Some(Credential::Default(DefaultCredential::ClientSecret {
                        tenant_id,
                        client_id,
                        client_secret,
                    })));
                }
                Ok(env.var(ENV_FEDERATED_TOKEN_FILE).map(|file| {
                    Credential::Default(DefaultCredential::WorkloadIdentity {
                        tenant_id,
                        client_id,
                        token_file: PathBuf::from(file),
                    })
                }))
            }
            CredentialSource::AzureCli => Ok(env
                .has_program(AZURE_CLI_PROGRAM)
                .then_some(Credential::Default(DefaultCredential::AzureCli))),
            CredentialSource::ManagedIdentity { client_id } => {
                let endpoint = env.var(ENV_IDENTITY_ENDPOINT).or_else(|| env.var(ENV_MSI_ENDPOINT));
                if endpoint.is_none() && client_id.is_none() {
                    return Ok(None);
                }
                Ok(Some(Credential::Default(DefaultCredential::ManagedIdentity {
                    client_id: client_id.clone(),
                    endpoint,
                })))
            }
        }
    }
}

/// Split a SAS token into decoded query pairs; a leading `?` is ignored.
pub fn parse_sas_token(token: &str) -> Vec<(String, String)> {
    let token = token.trim().trim_start_matches('?');
    url::form_urlencoded::parse(token.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

// ----------------------------------------------------------------------------
// Chain
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialChain {
    sources: Vec<CredentialSource>,
}

impl CredentialChain {
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        Self { sources }
    }

    /// Explicit options first (connection string, key, SAS), then the default
    /// chain: environment, CLI login, managed identity.
    pub fn from_settings(settings: &StorageSettings) -> Self {
        let mut sources = Vec::new();
        if let Some(cs) = &settings.connection_string {
            sources.push(CredentialSource::ConnectionString(cs.clone()));
        }
        if let Some(key) = &settings.account_key {
            sources.push(CredentialSource::AccountKey(key.clone()));
        }
        if let Some(sas) = &settings.sas_token {
            sources.push(CredentialSource::SasToken(sas.clone()));
        }
        sources.extend(Self::default_sources(settings.managed_identity_client_id.clone()));
        Self { sources }
    }

    pub fn default_sources(managed_identity_client_id: Option<String>) -> Vec<CredentialSource> {
        vec![
            CredentialSource::Environment,
            CredentialSource::AzureCli,
            CredentialSource::ManagedIdentity {
                client_id: managed_identity_client_id,
            },
        ]
    }

    pub fn sources(&self) -> &[CredentialSource] {
        &self.sources
    }

    pub fn resolve(&self, account: &str, env: &dyn EnvSource) -> Result<Credential> {
        for source in &self.sources {
            match source.try_resolve(account, env)? {
                Some(credential) => {
                    debug!("account '{}': using {} credential", account, credential.kind_name());
                    return Ok(credential);
                }
                None => trace!("account '{}': credential source {} unavailable", account, source.name()),
            }
        }
        let tried: Vec<&str> = self.sources.iter().map(CredentialSource::name).collect();
        Err(StorageError::auth(
            account,
            format!("no credential source yielded a credential (tried: {})", tried.join(", ")),
        ))
    }
}
