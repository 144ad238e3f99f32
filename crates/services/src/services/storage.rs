//! Object storage (BOS) uploads and public URL construction.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use url::Url;
use utils_core::text::{now_millis, sanitize_object_name};

use super::config::Config;

const SIGNATURE_EXPIRATION_SECS: u32 = 1800;
const KEY_PREFIX: &str = "images";
const KEPT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("Object storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Object storage rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid object storage endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: usize,
}

struct BosCredentials {
    access_key: String,
    secret_key: SecretString,
}

/// Object key for an upload.
///
/// With a content signature the key is derived from it, so re-uploading the
/// same image overwrites the same object. Otherwise the key is timestamped and
/// built from the sanitized file name.
pub fn object_key(filename: Option<&str>, cont_sign: Option<&str>) -> String {
    if let Some(sign) = cont_sign.map(str::trim).filter(|s| !s.is_empty()) {
        return format!("{KEY_PREFIX}/{}.png", sign.replace([',', '/'], "_"));
    }

    let timestamp = now_millis();
    let Some(name) = filename.map(str::trim).filter(|s| !s.is_empty()) else {
        return format!("{KEY_PREFIX}/{timestamp}-image_{timestamp}.png");
    };

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext.to_ascii_lowercase()),
        _ => (name, String::new()),
    };
    let extension = if KEPT_EXTENSIONS.contains(&extension.as_str()) {
        extension
    } else {
        "png".to_string()
    };
    format!(
        "{KEY_PREFIX}/{timestamp}-{}.{extension}",
        sanitize_object_name(stem)
    )
}

/// `https://{domain}/{key}`; a domain that already carries a scheme is used as is.
pub fn public_url(domain: &str, key: &str) -> String {
    let domain = domain.trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{domain}/{key}")
    } else {
        format!("https://{domain}/{key}")
    }
}

/// Public URL for an indexed image, derived from its signature.
pub fn url_for_cont_sign(domain: &str, cont_sign: &str) -> String {
    public_url(domain, &object_key(None, Some(cont_sign)))
}

/// Percent-encode everything except RFC 3986 unreserved characters
/// (and `/` when `keep_slash` is set), with uppercase hex digits.
fn uri_encode(value: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn hmac_hex(key: &[u8], message: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).unwrap_or_else(|_| unreachable!());
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `bce-auth-v1` authorization header value.
///
/// `headers` are the signed headers as (lowercase name, value) pairs.
fn sign_request(
    access_key: &str,
    secret_key: &str,
    method: &str,
    canonical_uri: &str,
    headers: &[(&str, String)],
    timestamp: DateTime<Utc>,
) -> String {
    let auth_prefix = format!(
        "bce-auth-v1/{access_key}/{}/{SIGNATURE_EXPIRATION_SECS}",
        timestamp.format("%Y-%m-%dT%H:%M:%SZ")
    );
    let signing_key = hmac_hex(secret_key.as_bytes(), &auth_prefix);

    let mut canonical_headers: Vec<String> = headers
        .iter()
        .map(|(name, value)| format!("{}:{}", uri_encode(name, false), uri_encode(value.trim(), false)))
        .collect();
    canonical_headers.sort();

    let mut signed_names: Vec<&str> = headers.iter().map(|(name, _)| *name).collect();
    signed_names.sort_unstable();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n\n{}",
        canonical_headers.join("\n")
    );
    let signature = hmac_hex(signing_key.as_bytes(), &canonical_request);

    format!("{auth_prefix}/{}/{signature}", signed_names.join(";"))
}

#[derive(Clone)]
pub struct BosStorage {
    http: reqwest::Client,
    endpoint: String,
    bucket: Option<String>,
    domain: Option<String>,
    credentials: Option<Arc<BosCredentials>>,
}

impl BosStorage {
    pub fn new(config: &Config) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.vision.request_timeout_secs.max(60)))
            .build()?;

        let credentials = match (config.storage_access_key(), config.storage_secret_key()) {
            (Some(access_key), Some(secret_key)) => Some(Arc::new(BosCredentials {
                access_key: access_key.to_string(),
                secret_key: SecretString::from(secret_key.to_string()),
            })),
            _ => None,
        };

        Ok(Self {
            http,
            endpoint: config.storage.endpoint.trim_end_matches('/').to_string(),
            bucket: config.storage.bucket.clone(),
            domain: config.storage.domain.clone(),
            credentials,
        })
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.bucket.is_some() && self.domain.is_some() && self.credentials.is_some()
    }

    pub fn public_url(&self, key: &str) -> Option<String> {
        self.domain.as_deref().map(|domain| public_url(domain, key))
    }

    /// Upload `bytes` under `key`. `metadata` entries become `x-bce-meta-*` headers.
    pub async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, String)],
    ) -> Result<StoredObject, StorageError> {
        let bucket = self
            .bucket
            .as_deref()
            .ok_or(StorageError::NotConfigured("BAIDU_BOS_BUCKET"))?;
        let domain = self
            .domain
            .as_deref()
            .ok_or(StorageError::NotConfigured("BAIDU_BOS_DOMAIN"))?;
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(StorageError::NotConfigured("BAIDU_BOS_AK"))?;

        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| StorageError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(StorageError::InvalidEndpoint(self.endpoint.clone())),
        };
        let base_path = endpoint.path().trim_end_matches('/');
        let canonical_uri = uri_encode(&format!("{base_path}/{bucket}/{key}"), true);
        let url = format!("{}://{host}{canonical_uri}", endpoint.scheme());

        let size = bytes.len();
        let timestamp = Utc::now();
        let signed_headers = [
            ("content-length", size.to_string()),
            ("content-type", content_type.to_string()),
            ("host", host.clone()),
        ];
        let authorization = sign_request(
            &credentials.access_key,
            credentials.secret_key.expose_secret(),
            "PUT",
            &canonical_uri,
            &signed_headers,
            timestamp,
        );

        let mut request = self
            .http
            .put(&url)
            .header(HOST, host)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .header("x-bce-date", timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .header(AUTHORIZATION, authorization);
        for (name, value) in metadata {
            request = request.header(format!("x-bce-meta-{name}"), uri_encode(value, false));
        }

        let response = request.body(bytes).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(key, status = status.as_u16(), "Object storage upload rejected");
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(key, size, "Uploaded object");
        Ok(StoredObject {
            key: key.to_string(),
            url: public_url(domain, key),
            size,
        })
    }
}
