use serde::{Deserialize, Serialize};

pub const CURRENT_CONFIG_VERSION: &str = "v1";

pub const DEFAULT_VISION_API_BASE: &str = "https://aip.baidubce.com";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://gz.bcebos.com";

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessControlMode {
    #[default]
    Disabled,
    Token,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessControlConfig {
    pub mode: AccessControlMode,
    pub token: Option<String>,
    #[serde(alias = "allowLocalhostBypass")]
    pub allow_localhost_bypass: bool,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            mode: AccessControlMode::Disabled,
            token: None,
            allow_localhost_bypass: true,
        }
    }
}

/// Credentials and endpoint for the similar-image search index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    #[serde(alias = "apiBase")]
    pub api_base: String,
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(alias = "secretKey")]
    pub secret_key: Option<String>,
    #[serde(alias = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_VISION_API_BASE.to_string(),
            api_key: None,
            secret_key: None,
            request_timeout_secs: 30,
        }
    }
}

/// Object storage bucket plus the public domain used to build image URLs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: Option<String>,
    pub domain: Option<String>,
    #[serde(alias = "accessKey")]
    pub access_key: Option<String>,
    #[serde(alias = "secretKey")]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            bucket: None,
            domain: None,
            access_key: None,
            secret_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Uploads larger than this are compressed before they reach the search index.
    #[serde(alias = "compressThresholdBytes")]
    pub compress_threshold_bytes: usize,
    #[serde(alias = "maxSearchBytes")]
    pub max_search_bytes: usize,
    #[serde(alias = "minWidth")]
    pub min_width: u32,
    #[serde(alias = "maxWidth")]
    pub max_width: u32,
    pub quality: u8,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            compress_threshold_bytes: 3 * MIB,
            max_search_bytes: 100 * MIB,
            min_width: 50,
            max_width: 1024,
            quality: 80,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "configVersion")]
    pub config_version: String,
    pub vision: VisionConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    #[serde(alias = "accessControl")]
    pub access_control: AccessControlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION.to_string(),
            vision: VisionConfig::default(),
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            access_control: AccessControlConfig::default(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn trimmed_base(value: &str, fallback: &str) -> String {
    let value = value.trim().trim_end_matches('/');
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

impl Config {
    pub fn from_raw(raw_config: &str) -> Self {
        match serde_json::from_str::<Config>(raw_config) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config (line {}, column {}): {}, using default",
                    e.line(),
                    e.column(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.config_version = CURRENT_CONFIG_VERSION.to_string();

        self.vision.api_base = trimmed_base(&self.vision.api_base, DEFAULT_VISION_API_BASE);
        self.vision.api_key = non_blank(self.vision.api_key);
        self.vision.secret_key = non_blank(self.vision.secret_key);
        if self.vision.request_timeout_secs == 0 {
            self.vision.request_timeout_secs = VisionConfig::default().request_timeout_secs;
        }

        self.storage.endpoint = trimmed_base(&self.storage.endpoint, DEFAULT_STORAGE_ENDPOINT);
        self.storage.bucket = non_blank(self.storage.bucket);
        self.storage.domain = non_blank(self.storage.domain)
            .map(|domain| domain.trim_end_matches('/').to_string())
            .filter(|domain| !domain.is_empty());
        self.storage.access_key = non_blank(self.storage.access_key);
        self.storage.secret_key = non_blank(self.storage.secret_key);

        let defaults = IngestConfig::default();
        if self.ingest.compress_threshold_bytes == 0 {
            self.ingest.compress_threshold_bytes = defaults.compress_threshold_bytes;
        }
        if self.ingest.max_search_bytes < self.ingest.compress_threshold_bytes {
            self.ingest.max_search_bytes = self.ingest.compress_threshold_bytes;
        }
        self.ingest.min_width = self.ingest.min_width.max(1);
        if self.ingest.max_width < self.ingest.min_width {
            tracing::warn!(
                "ingest.max_width {} is below ingest.min_width {}, using min_width",
                self.ingest.max_width,
                self.ingest.min_width
            );
            self.ingest.max_width = self.ingest.min_width;
        }
        self.ingest.quality = self.ingest.quality.clamp(1, 100);

        self
    }

    /// Layer environment values over the file config. Variable names match the
    /// deployment environment the service has always used.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| non_blank(lookup(name));

        if let Some(value) = get(super::ENV_API_KEY) {
            self.vision.api_key = Some(value);
        }
        if let Some(value) = get(super::ENV_SECRET_KEY) {
            self.vision.secret_key = Some(value);
        }
        if let Some(value) = get(super::ENV_API_BASE) {
            self.vision.api_base = value;
        }
        if let Some(value) = get(super::ENV_BOS_ENDPOINT) {
            self.storage.endpoint = value;
        }
        if let Some(value) = get(super::ENV_BOS_BUCKET) {
            self.storage.bucket = Some(value);
        }
        if let Some(value) = get(super::ENV_BOS_DOMAIN) {
            self.storage.domain = Some(value);
        }
        if let Some(value) = get(super::ENV_BOS_AK) {
            self.storage.access_key = Some(value);
        }
        if let Some(value) = get(super::ENV_BOS_SK) {
            self.storage.secret_key = Some(value);
        }

        self.normalized()
    }

    /// Storage credentials fall back to the search API key pair.
    pub fn storage_access_key(&self) -> Option<&str> {
        self.storage
            .access_key
            .as_deref()
            .or(self.vision.api_key.as_deref())
    }

    pub fn storage_secret_key(&self) -> Option<&str> {
        self.storage
            .secret_key
            .as_deref()
            .or(self.vision.secret_key.as_deref())
    }

    /// Copy with every credential removed, safe to return from the API.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.vision.api_key = None;
        config.vision.secret_key = None;
        config.storage.access_key = None;
        config.storage.secret_key = None;
        config.access_control.token = None;
        config
    }

    /// Human-readable list of settings the upload pipeline cannot work without.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.vision.api_key.is_none() {
            missing.push(super::ENV_API_KEY);
        }
        if self.vision.secret_key.is_none() {
            missing.push(super::ENV_SECRET_KEY);
        }
        if self.storage.bucket.is_none() {
            missing.push(super::ENV_BOS_BUCKET);
        }
        if self.storage.domain.is_none() {
            missing.push(super::ENV_BOS_DOMAIN);
        }
        missing
    }
}
