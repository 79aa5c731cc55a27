use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Language;

/// Settings a host platform can persist and hand to
/// [`XccClientBuilder::from_config`](crate::XccClientBuilder::from_config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_entity_prefix")]
    pub entity_prefix: String,
    #[serde(default)]
    pub ignore_visibility: bool,
    /// Skip discovery when both page lists are given.
    #[serde(default)]
    pub descriptor_pages: Vec<String>,
    #[serde(default)]
    pub data_pages: Vec<String>,
    #[serde(default)]
    pub session_cache_dir: Option<PathBuf>,
}

pub(crate) const DEFAULT_USERNAME: &str = "xcc";
pub(crate) const DEFAULT_PASSWORD: &str = "xcc";
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_REQUEST_DELAY_MS: u64 = 200;
pub(crate) const DEFAULT_ENTITY_PREFIX: &str = "xcc";

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_request_delay_ms() -> u64 {
    DEFAULT_REQUEST_DELAY_MS
}

fn default_entity_prefix() -> String {
    DEFAULT_ENTITY_PREFIX.to_string()
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: default_username(),
            password: default_password(),
            language: Language::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            request_delay_ms: DEFAULT_REQUEST_DELAY_MS,
            entity_prefix: default_entity_prefix(),
            ignore_visibility: false,
            descriptor_pages: Vec::new(),
            data_pages: Vec::new(),
            session_cache_dir: None,
        }
    }

    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
