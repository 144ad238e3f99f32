//! In-process stand-in for the image search API and object storage.
//!
//! One axum server answers the token, add, search, update and list endpoints
//! of the search index, and PUT/GET object requests under `/bos/{bucket}/...`.

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};

pub const API_KEY: &str = "mock-ak";
pub const SECRET_KEY: &str = "mock-sk";
pub const ACCESS_TOKEN: &str = "mock-token";
pub const BUCKET: &str = "catalog-test";

const DUPLICATE_CODE: i64 = 216681;
const INVALID_TOKEN_CODE: i64 = 110;

/// How the add endpoint answers.
#[derive(Debug, Clone, Default)]
pub enum AddBehavior {
    /// Index new images; report already-indexed bytes as duplicates.
    #[default]
    Accept,
    /// Always report a duplicate, optionally carrying a signature.
    Duplicate { cont_sign: Option<String> },
    Fail { code: i64, message: String },
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    cont_sign: String,
    image: String,
    brief: String,
}

#[derive(Default)]
pub struct VendorState {
    pub token_requests: AtomicUsize,
    pub add_requests: AtomicUsize,
    pub search_requests: AtomicUsize,
    pub storage_puts: AtomicUsize,
    add_behavior: Mutex<AddBehavior>,
    fail_storage: AtomicBool,
    next_sign: AtomicU64,
    index: Mutex<Vec<IndexEntry>>,
    last_indexed_size: Mutex<Option<usize>>,
    objects: Mutex<HashMap<String, StoredObject>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl VendorState {
    fn mint_sign(&self) -> String {
        let n = self.next_sign.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{},{}", 1_000_000 + n, 7_000_000 + n * 7)
    }
}

pub struct MockVendor {
    pub base_url: String,
    pub state: Arc<VendorState>,
    task: JoinHandle<()>,
}

impl MockVendor {
    pub async fn start() -> Self {
        let state = Arc::new(VendorState::default());
        let app = router(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap_or_else(|err| panic!("mock vendor failed to bind: {err}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("mock vendor has no address: {err}"));
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!("mock vendor stopped: {err}");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn storage_endpoint(&self) -> String {
        format!("{}/bos", self.base_url)
    }

    /// Domain whose `{domain}/{key}` URLs are served by this mock.
    pub fn public_domain(&self) -> String {
        format!("{}/bos/{BUCKET}", self.base_url)
    }

    /// Value of a configuration environment variable pointing at this mock.
    pub fn env_var(&self, name: &str) -> Option<String> {
        let value = match name {
            "BAIDU_API_KEY" => API_KEY.to_string(),
            "BAIDU_SECRET_KEY" => SECRET_KEY.to_string(),
            "BAIDU_API_BASE" => self.base_url.clone(),
            "BAIDU_BOS_ENDPOINT" => self.storage_endpoint(),
            "BAIDU_BOS_BUCKET" => BUCKET.to_string(),
            "BAIDU_BOS_DOMAIN" => self.public_domain(),
            _ => return None,
        };
        Some(value)
    }

    /// Every variable `env_var` answers for.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        [
            "BAIDU_API_KEY",
            "BAIDU_SECRET_KEY",
            "BAIDU_API_BASE",
            "BAIDU_BOS_ENDPOINT",
            "BAIDU_BOS_BUCKET",
            "BAIDU_BOS_DOMAIN",
        ]
        .into_iter()
        .filter_map(|name| self.env_var(name).map(|value| (name, value)))
        .collect()
    }

    pub fn set_add_behavior(&self, behavior: AddBehavior) {
        *lock(&self.state.add_behavior) = behavior;
    }

    pub fn fail_storage(&self, fail: bool) {
        self.state.fail_storage.store(fail, Ordering::SeqCst);
    }

    pub fn indexed_count(&self) -> usize {
        lock(&self.state.index).len()
    }

    /// Decoded size of the most recent image sent to the add endpoint.
    pub fn last_indexed_size(&self) -> Option<usize> {
        *lock(&self.state.last_indexed_size)
    }

    pub fn brief(&self, cont_sign: &str) -> Option<String> {
        lock(&self.state.index)
            .iter()
            .find(|entry| entry.cont_sign == cont_sign)
            .map(|entry| entry.brief.clone())
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.state.objects).get(key).cloned()
    }

    /// Place an object directly in storage and return its public URL.
    pub fn store_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> String {
        lock(&self.state.objects).insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: Some(content_type.to_string()),
                authorization: None,
                metadata: BTreeMap::new(),
            },
        );
        format!("{}/{key}", self.public_domain())
    }
}

impl Drop for MockVendor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn router(state: Arc<VendorState>) -> Router {
    Router::new()
        .route("/oauth/2.0/token", get(token))
        .route(
            "/rest/2.0/image-classify/v1/realtime_search/similar/add",
            post(add),
        )
        .route(
            "/rest/2.0/image-classify/v1/realtime_search/similar/search",
            post(search),
        )
        .route(
            "/rest/2.0/image-classify/v1/realtime_search/similar/update",
            post(update),
        )
        .route(
            "/rest/2.0/image-classify/v1/realtime_search/similar/list",
            get(list),
        )
        .route("/bos/{*path}", get(get_object).put(put_object))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

#[derive(Deserialize)]
struct TokenQuery {
    client_id: Option<String>,
    client_secret: Option<String>,
}

async fn token(State(state): State<Arc<VendorState>>, Query(query): Query<TokenQuery>) -> Json<Value> {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    if query.client_id.as_deref() != Some(API_KEY) || query.client_secret.as_deref() != Some(SECRET_KEY)
    {
        return Json(json!({
            "error": "invalid_client",
            "error_description": "unknown client id"
        }));
    }
    Json(json!({ "access_token": ACCESS_TOKEN, "expires_in": 2_592_000 }))
}

#[derive(Deserialize)]
struct TokenParam {
    access_token: Option<String>,
}

fn invalid_token(param: &TokenParam) -> Option<Json<Value>> {
    (param.access_token.as_deref() != Some(ACCESS_TOKEN)).then(|| {
        Json(json!({
            "error_code": INVALID_TOKEN_CODE,
            "error_msg": "Access token invalid or no longer valid"
        }))
    })
}

#[derive(Deserialize)]
struct AddForm {
    image: String,
    #[serde(default)]
    brief: String,
}

async fn add(
    State(state): State<Arc<VendorState>>,
    Query(param): Query<TokenParam>,
    Form(form): Form<AddForm>,
) -> Json<Value> {
    if let Some(rejection) = invalid_token(&param) {
        return rejection;
    }
    state.add_requests.fetch_add(1, Ordering::SeqCst);
    *lock(&state.last_indexed_size) = BASE64.decode(&form.image).ok().map(|b| b.len());

    let behavior = lock(&state.add_behavior).clone();
    match behavior {
        AddBehavior::Fail { code, message } => {
            Json(json!({ "error_code": code, "error_msg": message }))
        }
        AddBehavior::Duplicate { cont_sign } => {
            let mut body = json!({ "error_code": DUPLICATE_CODE, "error_msg": "image exist" });
            if let Some(sign) = cont_sign {
                body["cont_sign"] = json!(sign);
            }
            Json(body)
        }
        AddBehavior::Accept => {
            let mut index = lock(&state.index);
            if let Some(existing) = index.iter().find(|entry| entry.image == form.image) {
                return Json(json!({
                    "error_code": DUPLICATE_CODE,
                    "error_msg": "image exist",
                    "cont_sign": existing.cont_sign,
                }));
            }
            let cont_sign = state.mint_sign();
            index.push(IndexEntry {
                cont_sign: cont_sign.clone(),
                image: form.image,
                brief: form.brief,
            });
            Json(json!({ "log_id": 1, "cont_sign": cont_sign }))
        }
    }
}

#[derive(Deserialize)]
struct SearchForm {
    image: String,
}

async fn search(
    State(state): State<Arc<VendorState>>,
    Query(param): Query<TokenParam>,
    Form(form): Form<SearchForm>,
) -> Json<Value> {
    if let Some(rejection) = invalid_token(&param) {
        return rejection;
    }
    state.search_requests.fetch_add(1, Ordering::SeqCst);

    let index = lock(&state.index);
    let mut result: Vec<Value> = index
        .iter()
        .map(|entry| {
            let score = if entry.image == form.image { 1.0 } else { 0.5 };
            json!({ "score": score, "cont_sign": entry.cont_sign, "brief": entry.brief })
        })
        .collect();
    result.sort_by(|a, b| {
        let (a, b) = (a["score"].as_f64(), b["score"].as_f64());
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    Json(json!({ "log_id": 2, "result_num": result.len(), "result": result }))
}

#[derive(Deserialize)]
struct UpdateForm {
    cont_sign: String,
    brief: String,
}

async fn update(
    State(state): State<Arc<VendorState>>,
    Query(param): Query<TokenParam>,
    Form(form): Form<UpdateForm>,
) -> Json<Value> {
    if let Some(rejection) = invalid_token(&param) {
        return rejection;
    }
    let mut index = lock(&state.index);
    match index.iter_mut().find(|entry| entry.cont_sign == form.cont_sign) {
        Some(entry) => entry.brief = form.brief,
        None => index.push(IndexEntry {
            cont_sign: form.cont_sign,
            image: String::new(),
            brief: form.brief,
        }),
    }
    Json(json!({ "log_id": 3 }))
}

#[derive(Deserialize)]
struct ListQuery {
    access_token: Option<String>,
    start: Option<usize>,
    num: Option<usize>,
}

async fn list(State(state): State<Arc<VendorState>>, Query(query): Query<ListQuery>) -> Json<Value> {
    let param = TokenParam {
        access_token: query.access_token,
    };
    if let Some(rejection) = invalid_token(&param) {
        return rejection;
    }
    let index = lock(&state.index);
    let result: Vec<Value> = index
        .iter()
        .skip(query.start.unwrap_or(0))
        .take(query.num.unwrap_or(100))
        .map(|entry| json!({ "cont_sign": entry.cont_sign, "brief": entry.brief }))
        .collect();
    Json(json!({ "log_id": 4, "result_num": index.len(), "result": result }))
}

/// `{bucket}/{key}` to `key`; other buckets are not served.
fn object_key(path: &str) -> Option<&str> {
    path.strip_prefix(BUCKET)?.strip_prefix('/')
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn put_object(
    State(state): State<Arc<VendorState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.storage_puts.fetch_add(1, Ordering::SeqCst);
    if state.fail_storage.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "InternalError").into_response();
    }
    let Some(key) = object_key(&path) else {
        return (StatusCode::NOT_FOUND, "NoSuchBucket").into_response();
    };
    let authorization = header_string(&headers, header::AUTHORIZATION);
    if !authorization
        .as_deref()
        .is_some_and(|auth| auth.starts_with("bce-auth-v1/"))
    {
        return (StatusCode::FORBIDDEN, "AccessDenied").into_response();
    }

    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix("x-bce-meta-")?;
            Some((name.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();
    lock(&state.objects).insert(
        key.to_string(),
        StoredObject {
            bytes: body.to_vec(),
            content_type: header_string(&headers, header::CONTENT_TYPE),
            authorization,
            metadata,
        },
    );
    StatusCode::OK.into_response()
}

async fn get_object(State(state): State<Arc<VendorState>>, Path(path): Path<String>) -> Response {
    let object = object_key(&path).and_then(|key| lock(&state.objects).get(key).cloned());
    match object {
        Some(object) => {
            let content_type = object
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            ([(header::CONTENT_TYPE, content_type)], object.bytes).into_response()
        }
        None => (StatusCode::NOT_FOUND, "NoSuchKey").into_response(),
    }
}
