// tests/common/mod.rs
//
// Shared fixtures: in-memory sessions, random keys and a recording environment.

#![allow(dead_code)]

use rand::distr::Alphanumeric;
use rand::{rng, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use azstore::constants::AZURITE_ACCOUNT_KEY;
use azstore::{AzureSession, EnvSource, InMemoryBackendFactory, StorageSettings};

pub const ACCOUNT: &str = "testacct";
pub const CONTAINER: &str = "container";

/// Settings with an explicit account key, so no ambient credential is needed.
pub fn test_settings() -> StorageSettings {
    StorageSettings::new().with_account_key(AZURITE_ACCOUNT_KEY)
}

/// Fresh in-memory session plus the factory holding its data.
pub fn memory_session_with(settings: StorageSettings) -> (AzureSession, InMemoryBackendFactory) {
    let factory = InMemoryBackendFactory::new();
    let session = AzureSession::builder(settings)
        .env(Arc::new(RecordingEnv::default()))
        .factory(Arc::new(factory.clone()))
        .build()
        .expect("in-memory session");
    (session, factory)
}

pub fn memory_session() -> (AzureSession, InMemoryBackendFactory) {
    memory_session_with(test_settings())
}

pub fn query(key: &str) -> String {
    format!("az://{ACCOUNT}/{CONTAINER}/{key}")
}

pub fn random_key(prefix: &str) -> String {
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rng().fill(&mut data[..]);
    data
}

/// Fake environment that records every variable and program it is asked about.
#[derive(Default)]
pub struct RecordingEnv {
    pub vars: HashMap<String, String>,
    pub programs: Vec<String>,
    consulted: Mutex<Vec<String>>,
}

impl RecordingEnv {
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.push(program.to_string());
        self
    }

    pub fn consulted(&self) -> Vec<String> {
        self.consulted.lock().unwrap().clone()
    }
}

impl EnvSource for RecordingEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.consulted.lock().unwrap().push(name.to_string());
        self.vars.get(name).cloned()
    }

    fn has_program(&self, program: &str) -> bool {
        self.consulted.lock().unwrap().push(format!("PATH:{program}"));
        self.programs.iter().any(|p| p == program)
    }
}
