//! Client for the vendor's real-time similar-image search index.
//!
//! Every call needs an OAuth access token obtained with the API key pair. The
//! token is cached in memory and refreshed five minutes before it expires.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::RwLock;

use super::config::VisionConfig;

/// Vendor error code for "this image is already in the index".
pub const DUPLICATE_IMAGE_ERROR_CODE: i64 = 216681;
/// The index refuses images above this size.
pub const MAX_INDEX_IMAGE_BYTES: usize = 3 * 1024 * 1024;

const TOKEN_PATH: &str = "/oauth/2.0/token";
const ADD_PATH: &str = "/rest/2.0/image-classify/v1/realtime_search/similar/add";
const SEARCH_PATH: &str = "/rest/2.0/image-classify/v1/realtime_search/similar/search";
const UPDATE_PATH: &str = "/rest/2.0/image-classify/v1/realtime_search/similar/update";
const LIST_PATH: &str = "/rest/2.0/image-classify/v1/realtime_search/similar/list";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Image search credentials are not configured")]
    NotConfigured,
    #[error("Image search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to obtain access token: {0}")]
    Token(String),
    #[error("Image search error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("Image is {size} bytes, the search index accepts at most {max}")]
    TooLarge { size: usize, max: usize },
    #[error("Unexpected image search response: {0}")]
    UnexpectedResponse(String),
}

struct Credentials {
    api_key: String,
    secret_key: SecretString,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Result of registering an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// The vendor may omit the signature when it reports a duplicate.
    pub cont_sign: Option<String>,
    pub is_existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub score: f64,
    pub cont_sign: String,
    #[serde(default)]
    pub brief: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedImage {
    pub cont_sign: String,
    #[serde(default)]
    pub brief: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexPage {
    pub total: u64,
    pub images: Vec<IndexedImage>,
}

/// Brief attached when an image is first registered.
pub fn registration_brief(
    filename: &str,
    filesize: usize,
    file_type: &str,
    upload_time: DateTime<Utc>,
) -> Value {
    json!({
        "fileName": filename,
        "fileSize": filesize,
        "fileType": file_type,
        "uploadTime": upload_time.to_rfc3339(),
    })
}

/// Brief written after the image is stored, pointing back at the public URL.
/// `metadata` must be a JSON object; its keys are merged in.
pub fn storage_brief(
    cont_sign: &str,
    image_url: &str,
    bos_key: &str,
    metadata: &Value,
    update_time: DateTime<Utc>,
) -> Value {
    let mut brief = json!({
        "imageUrl": image_url,
        "bosUrl": image_url,
        "bosKey": bos_key,
    });
    if let (Some(target), Some(extra)) = (brief.as_object_mut(), metadata.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    brief["updateTime"] = json!(update_time.to_rfc3339());
    brief["cont_sign"] = json!(cont_sign);
    brief
}

/// Parse a brief string. Invalid JSON yields an empty object.
pub fn parse_brief(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            tracing::warn!(brief = raw, "Ignoring unparseable image brief");
            json!({})
        }
    }
}

fn vendor_error(body: &Value) -> Option<VisionError> {
    let code = body.get("error_code")?.as_i64()?;
    let message = body
        .get("error_msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Some(VisionError::Api { code, message })
}

#[derive(Clone)]
pub struct SimilarSearchClient {
    http: reqwest::Client,
    api_base: String,
    credentials: Option<Arc<Credentials>>,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl SimilarSearchClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let credentials = match (config.api_key.as_deref(), config.secret_key.as_deref()) {
            (Some(api_key), Some(secret_key)) => Some(Arc::new(Credentials {
                api_key: api_key.to_string(),
                secret_key: SecretString::from(secret_key.to_string()),
            })),
            _ => None,
        };

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub async fn access_token(&self) -> Result<String, VisionError> {
        if let Some(token) = self.token.read().await.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let credentials = self.credentials.as_ref().ok_or(VisionError::NotConfigured)?;
        let response: TokenResponse = self
            .http
            .get(self.endpoint(TOKEN_PATH))
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.api_key.as_str()),
                ("client_secret", credentials.secret_key.expose_secret()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let Some(value) = response.access_token.filter(|t| !t.is_empty()) else {
            let reason = response
                .error_description
                .or(response.error)
                .unwrap_or_else(|| "no access_token in response".to_string());
            return Err(VisionError::Token(reason));
        };

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(0));
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in = lifetime.as_secs(), "Obtained image search access token");

        *slot = Some(CachedToken {
            value: value.clone(),
            refresh_at,
        });
        Ok(value)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, VisionError> {
        let token = self.access_token().await?;
        let body = self
            .http
            .post(self.endpoint(path))
            .query(&[("access_token", token.as_str())])
            .form(form)
            .send()
            .await?
            .json::<Value>()
            .await?;
        Ok(body)
    }

    fn check_size(image: &[u8]) -> Result<(), VisionError> {
        if image.len() > MAX_INDEX_IMAGE_BYTES {
            return Err(VisionError::TooLarge {
                size: image.len(),
                max: MAX_INDEX_IMAGE_BYTES,
            });
        }
        Ok(())
    }

    /// Register an image. A duplicate is reported as success with `is_existing`.
    pub async fn add(&self, image: &[u8], brief: &Value) -> Result<AddOutcome, VisionError> {
        Self::check_size(image)?;
        let encoded = BASE64.encode(image);
        let brief = brief.to_string();
        let body = self
            .post_form(ADD_PATH, &[("image", &encoded), ("brief", &brief)])
            .await?;

        let cont_sign = body
            .get("cont_sign")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match vendor_error(&body) {
            Some(VisionError::Api { code, .. }) if code == DUPLICATE_IMAGE_ERROR_CODE => {
                tracing::info!(cont_sign = ?cont_sign, "Image already present in search index");
                Ok(AddOutcome {
                    cont_sign,
                    is_existing: true,
                })
            }
            Some(err) => Err(err),
            None => {
                let cont_sign = cont_sign.ok_or_else(|| {
                    VisionError::UnexpectedResponse("add response has no cont_sign".to_string())
                })?;
                Ok(AddOutcome {
                    cont_sign: Some(cont_sign),
                    is_existing: false,
                })
            }
        }
    }

    pub async fn search(&self, image: &[u8]) -> Result<Vec<SearchHit>, VisionError> {
        Self::check_size(image)?;
        let encoded = BASE64.encode(image);
        let body = self.post_form(SEARCH_PATH, &[("image", &encoded)]).await?;
        if let Some(err) = vendor_error(&body) {
            return Err(err);
        }

        let hits = match body.get("result") {
            Some(result) => serde_json::from_value::<Vec<SearchHit>>(result.clone())
                .map_err(|e| VisionError::UnexpectedResponse(e.to_string()))?,
            None => Vec::new(),
        };
        Ok(hits)
    }

    pub async fn update_brief(&self, cont_sign: &str, brief: &Value) -> Result<(), VisionError> {
        let brief = brief.to_string();
        let body = self
            .post_form(UPDATE_PATH, &[("cont_sign", cont_sign), ("brief", &brief)])
            .await?;
        match vendor_error(&body) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn list(&self, start: u32, num: u32) -> Result<IndexPage, VisionError> {
        let token = self.access_token().await?;
        let body = self
            .http
            .get(self.endpoint(LIST_PATH))
            .query(&[
                ("access_token", token),
                ("start", start.to_string()),
                ("num", num.to_string()),
            ])
            .send()
            .await?
            .json::<Value>()
            .await?;
        if let Some(err) = vendor_error(&body) {
            return Err(err);
        }

        let images = match body.get("result") {
            Some(result) => serde_json::from_value::<Vec<IndexedImage>>(result.clone())
                .map_err(|e| VisionError::UnexpectedResponse(e.to_string()))?,
            None => Vec::new(),
        };
        let total = body
            .get("result_num")
            .and_then(Value::as_u64)
            .unwrap_or(images.len() as u64);
        Ok(IndexPage { total, images })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use test_support::vendor::{AddBehavior, MockVendor};

    use super::*;

    fn client_for(vendor: &MockVendor) -> SimilarSearchClient {
        SimilarSearchClient::new(&VisionConfig {
            api_base: vendor.base_url.clone(),
            api_key: Some("mock-ak".to_string()),
            secret_key: Some("mock-sk".to_string()),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn storage_brief_merges_metadata() {
        let now = Utc::now();
        let brief = storage_brief(
            "1,2",
            "https://cdn/x.png",
            "images/1_2.png",
            &json!({ "filename": "x.png", "isCompressed": true }),
            now,
        );
        assert_eq!(brief["imageUrl"], "https://cdn/x.png");
        assert_eq!(brief["bosUrl"], "https://cdn/x.png");
        assert_eq!(brief["filename"], "x.png");
        assert_eq!(brief["isCompressed"], true);
        assert_eq!(brief["cont_sign"], "1,2");
    }

    #[test]
    fn parse_brief_tolerates_garbage() {
        assert_eq!(parse_brief("not json"), json!({}));
        assert_eq!(parse_brief("[1,2]"), json!({}));
        assert_eq!(parse_brief(r#"{"a":1}"#)["a"], 1);
    }

    #[tokio::test]
    async fn token_is_cached_between_calls() {
        let vendor = MockVendor::start().await;
        let client = client_for(&vendor);

        let first = client.access_token().await.unwrap();
        let second = client.access_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(vendor.state.token_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_calls() {
        let client = SimilarSearchClient::new(&VisionConfig::default()).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.access_token().await,
            Err(VisionError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn add_returns_signature() {
        let vendor = MockVendor::start().await;
        let client = client_for(&vendor);

        let outcome = client
            .add(b"fake-image-bytes", &json!({ "fileName": "a.png" }))
            .await
            .unwrap();
        assert!(!outcome.is_existing);
        assert!(outcome.cont_sign.is_some());
        assert_eq!(vendor.indexed_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_error_is_soft_success() {
        let vendor = MockVendor::start().await;
        vendor.set_add_behavior(AddBehavior::Duplicate {
            cont_sign: Some("11,22".to_string()),
        });
        let client = client_for(&vendor);

        let outcome = client.add(b"bytes", &json!({})).await.unwrap();
        assert_eq!(
            outcome,
            AddOutcome {
                cont_sign: Some("11,22".to_string()),
                is_existing: true
            }
        );
    }

    #[tokio::test]
    async fn other_vendor_errors_fail() {
        let vendor = MockVendor::start().await;
        vendor.set_add_behavior(AddBehavior::Fail {
            code: 216201,
            message: "image format error".to_string(),
        });
        let client = client_for(&vendor);

        let err = client.add(b"bytes", &json!({})).await.unwrap_err();
        assert!(matches!(err, VisionError::Api { code: 216201, .. }));
    }

    #[tokio::test]
    async fn oversized_images_are_rejected_locally() {
        let vendor = MockVendor::start().await;
        let client = client_for(&vendor);

        let big = vec![0u8; MAX_INDEX_IMAGE_BYTES + 1];
        assert!(matches!(
            client.add(&big, &json!({})).await,
            Err(VisionError::TooLarge { .. })
        ));
        assert_eq!(vendor.state.add_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_update_and_list_round_trip() {
        let vendor = MockVendor::start().await;
        let client = client_for(&vendor);

        let added = client
            .add(b"walnut", &json!({ "fileName": "walnut.png" }))
            .await
            .unwrap();
        let cont_sign = added.cont_sign.unwrap();

        client
            .update_brief(&cont_sign, &json!({ "imageUrl": "https://cdn/w.png" }))
            .await
            .unwrap();

        let hits = client.search(b"walnut").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].cont_sign, cont_sign);
        assert_eq!(parse_brief(&hits[0].brief)["imageUrl"], "https://cdn/w.png");

        let page = client.list(0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.images[0].cont_sign, cont_sign);
    }
}
