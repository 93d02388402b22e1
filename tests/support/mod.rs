//! In-process mock of the object store and the record service.
//!
//! Routes:
//!   - `GET|PUT|DELETE /nodes/{*path}`: node probe, creation, deletion
//!   - `POST /synctrans`: transfer intent, answers 303 to the job's details
//!   - `GET  /synctrans/{job}`: job document
//!   - `GET  /synctrans/{job}/results/transferDetails`: negotiated endpoint
//!   - `PUT  /put/{job}`: delegated upload endpoint
//!   - `GET  /files/{*path}`: direct reads
//!   - `POST /records`, `GET|POST|DELETE /records/{id}`: record persistence

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use raft_portal_core::{config::AppConfig, services::credentials::StaticToken};
use serde_json::{Value, json};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::net::TcpListener;

pub const TOKEN: &str = "test-token";
pub const AUTHORITY: &str = "test.authority~vault";

#[derive(Default)]
pub struct Store {
    pub base: String,
    pub nodes: HashSet<String>,
    /// path -> (bytes, content type)
    pub files: HashMap<String, (Bytes, String)>,
    /// job id -> target path
    pub jobs: HashMap<String, String>,
    pub records: HashMap<String, Value>,
    pub next_id: usize,

    pub reads: usize,
    pub puts: usize,
    pub negotiations: usize,
    pub job_fetches: usize,
    pub node_creates: usize,
    pub node_updates: Vec<Value>,

    /// Jobs report ERROR with this message.
    pub job_error: Option<String>,
    /// Jobs stay in this phase and never publish results.
    pub job_phase: Option<String>,
    /// Node creation answers 500.
    pub fail_node_create: bool,
    /// The delegated PUT answers this status.
    pub fail_put: Option<u16>,
    pub fail_delete: bool,
    /// Refuse workflow updates that would replace an assigned reviewer.
    pub guard_reviewer: bool,
    /// Record updates answer this status. Creation is unaffected.
    pub fail_updates: Option<u16>,
}

pub type Shared = Arc<Mutex<Store>>;

pub struct MockServer {
    pub base: String,
    pub state: Shared,
}

impl MockServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(Store::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        state.lock().unwrap().base = base.clone();

        let app = routes().with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, state }
    }

    pub fn config(&self) -> AppConfig {
        AppConfig {
            nodes_url: format!("{}/nodes", self.base),
            synctrans_url: format!("{}/synctrans", self.base),
            files_url: format!("{}/files", self.base),
            records_url: format!("{}/records", self.base),
            vospace_authority: AUTHORITY.into(),
            token: StaticToken::new(TOKEN),
            job_poll_interval: Duration::from_millis(5),
            ..AppConfig::default()
        }
    }

    pub fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.state.lock().unwrap()
    }

    /// Seed a record as the service would hold it.
    pub fn seed_record(&self, id: &str, record: Value) {
        let mut record = record;
        record["id"] = json!(id);
        self.store().records.insert(id.to_string(), record);
    }

    pub fn seed_file(&self, path: &str, bytes: &'static [u8], content_type: &str) {
        let mut store = self.store();
        store.nodes.insert(path.to_string());
        store.files.insert(
            path.to_string(),
            (Bytes::from_static(bytes), content_type.to_string()),
        );
    }
}

fn routes() -> Router<Shared> {
    Router::new()
        .route(
            "/nodes/{*path}",
            get(probe_node).put(create_node).delete(delete_node),
        )
        .route("/synctrans", post(submit_transfer))
        .route("/synctrans/{job}", get(job_document))
        .route(
            "/synctrans/{job}/results/transferDetails",
            get(transfer_details),
        )
        .route("/put/{job}", put(accept_upload))
        .route("/files/{*path}", get(read_file))
        .route("/records", post(create_record))
        .route(
            "/records/{id}",
            get(get_record).post(update_record).delete(delete_record),
        )
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("CADC_SSO={}", TOKEN))
        .unwrap_or(false)
}

fn status(code: StatusCode, body: &str) -> Response {
    (code, body.to_string()).into_response()
}

fn see_other(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap()
}

fn xml(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/xml")
        .body(Body::from(body))
        .unwrap()
}

async fn probe_node(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let store = state.lock().unwrap();
    if store.nodes.contains(&path) {
        status(StatusCode::OK, "<node/>")
    } else {
        status(StatusCode::NOT_FOUND, "node not found")
    }
}

async fn create_node(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let mut store = state.lock().unwrap();
    if store.fail_node_create {
        return status(StatusCode::INTERNAL_SERVER_ERROR, "node service down");
    }
    if !body.contains("xsi:type=") {
        return status(StatusCode::BAD_REQUEST, "missing node type");
    }
    if !store.nodes.insert(path) {
        return status(StatusCode::CONFLICT, "node exists");
    }
    store.node_creates += 1;
    status(StatusCode::CREATED, "")
}

async fn delete_node(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let mut store = state.lock().unwrap();
    if store.fail_delete {
        return status(StatusCode::INTERNAL_SERVER_ERROR, "delete refused");
    }
    let had_node = store.nodes.remove(&path);
    let had_file = store.files.remove(&path).is_some();
    if had_node || had_file {
        status(StatusCode::OK, "")
    } else {
        status(StatusCode::NOT_FOUND, "node not found")
    }
}

async fn submit_transfer(
    State(state): State<Shared>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let Some(target) = between(&body, "<vos:target>", "</vos:target>") else {
        return status(StatusCode::BAD_REQUEST, "no target");
    };
    if !body.contains("<vos:direction>pushToVoSpace</vos:direction>") {
        return status(StatusCode::BAD_REQUEST, "unsupported direction");
    }
    let prefix = format!("vos://{}/", AUTHORITY);
    let Some(path) = target.strip_prefix(&prefix) else {
        return status(StatusCode::BAD_REQUEST, "foreign authority");
    };

    let mut store = state.lock().unwrap();
    store.negotiations += 1;
    let job = format!("job{}", store.negotiations);
    store.jobs.insert(job.clone(), path.to_string());
    see_other(&format!("/synctrans/{}/results/transferDetails", job))
}

async fn job_document(
    State(state): State<Shared>,
    Path(job): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let mut store = state.lock().unwrap();
    if !store.jobs.contains_key(&job) {
        return status(StatusCode::NOT_FOUND, "no such job");
    }
    store.job_fetches += 1;

    let inner = if let Some(message) = &store.job_error {
        format!(
            "<uws:phase>ERROR</uws:phase><uws:errorSummary type=\"fatal\"><uws:message>{}</uws:message></uws:errorSummary>",
            message
        )
    } else if let Some(phase) = &store.job_phase {
        format!("<uws:phase>{}</uws:phase>", phase)
    } else {
        format!(
            "<uws:phase>COMPLETED</uws:phase><uws:results><uws:result id=\"transferDetails\" xlink:href=\"{}/synctrans/{}/results/transferDetails\"/></uws:results>",
            store.base, job
        )
    };
    xml(format!(
        "<?xml version=\"1.0\"?><uws:job xmlns:uws=\"http://www.ivoa.net/xml/UWS/v1.0\" xmlns:xlink=\"http://www.w3.org/1999/xlink\"><uws:jobId>{}</uws:jobId>{}</uws:job>",
        job, inner
    ))
}

async fn transfer_details(
    State(state): State<Shared>,
    Path(job): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let store = state.lock().unwrap();
    if !store.jobs.contains_key(&job) {
        return status(StatusCode::NOT_FOUND, "no such job");
    }
    xml(format!(
        "<vos:transfer xmlns:vos=\"http://www.ivoa.net/xml/VOSpace/v2.0\" version=\"2.1\"><vos:direction>pushToVoSpace</vos:direction><vos:protocol uri=\"ivo://ivoa.net/vospace/core#httpsput\"><vos:endpoint>{}/put/{}</vos:endpoint></vos:protocol></vos:transfer>",
        store.base, job
    ))
}

async fn accept_upload(
    State(state): State<Shared>,
    Path(job): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut store = state.lock().unwrap();
    if let Some(code) = store.fail_put {
        return status(
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "upload refused",
        );
    }
    let Some(path) = store.jobs.get(&job).cloned() else {
        return status(StatusCode::NOT_FOUND, "no such job");
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    store.puts += 1;
    store.nodes.insert(path.clone());
    store.files.insert(path, (body, content_type));
    status(StatusCode::OK, "")
}

async fn read_file(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let mut store = state.lock().unwrap();
    store.reads += 1;
    match store.files.get(&path) {
        Some((bytes, content_type)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type.as_str())
            .body(Body::from(bytes.clone()))
            .unwrap(),
        None => status(StatusCode::NOT_FOUND, "file not found"),
    }
}

/// Parts of a record write, by name.
async fn read_parts(mut multipart: Multipart) -> HashMap<String, Value> {
    let mut parts = HashMap::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap();
        parts.insert(name, serde_json::from_slice(&bytes).unwrap());
    }
    parts
}

async fn create_record(
    State(state): State<Shared>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let parts = read_parts(multipart).await;
    let Some(mut record) = parts.get("doiMetaData").cloned() else {
        return status(StatusCode::BAD_REQUEST, "doiMetaData part required");
    };

    let mut store = state.lock().unwrap();
    store.next_id += 1;
    let id = format!("RAFTS-{}", store.next_id);
    record["id"] = json!(id);
    record["status"] = json!("in progress");
    if let Some(fields) = record.as_object_mut() {
        fields.remove("reviewer");
    }
    store.records.insert(id.clone(), record);
    see_other(&format!("/records/{}", id))
}

async fn update_record(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let parts = read_parts(multipart).await;

    let mut store = state.lock().unwrap();
    if let Some(code) = store.fail_updates {
        return status(
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "record service unavailable",
        );
    }
    let guard_reviewer = store.guard_reviewer;
    let Some(current) = store.records.get(&id).cloned() else {
        return status(StatusCode::NOT_FOUND, "record not found");
    };
    let mut next = current.clone();

    if let Some(metadata) = parts.get("doiMetaData") {
        next = metadata.clone();
        next["id"] = json!(id);
        next["status"] = current["status"].clone();
        match current.get("reviewer") {
            Some(reviewer) => next["reviewer"] = reviewer.clone(),
            None => {
                if let Some(fields) = next.as_object_mut() {
                    fields.remove("reviewer");
                }
            }
        }
    }

    if let Some(node) = parts.get("doiNodeData") {
        let assigned = current
            .get("reviewer")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let incoming = node["reviewer"].as_str().unwrap_or_default();
        if guard_reviewer && !assigned.is_empty() && !incoming.is_empty() && assigned != incoming {
            return status(StatusCode::CONFLICT, "record already claimed");
        }
        next["status"] = node["status"].clone();
        if incoming.is_empty() {
            if let Some(fields) = next.as_object_mut() {
                fields.remove("reviewer");
            }
        } else {
            next["reviewer"] = json!(incoming);
        }
        store.node_updates.push(node.clone());
    }

    store.records.insert(id.clone(), next);
    see_other(&format!("/records/{}", id))
}

async fn get_record(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let store = state.lock().unwrap();
    match store.records.get(&id) {
        Some(record) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(record.to_string()))
            .unwrap(),
        None => status(StatusCode::NOT_FOUND, "record not found"),
    }
}

async fn delete_record(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return status(StatusCode::UNAUTHORIZED, "no session");
    }
    let mut store = state.lock().unwrap();
    match store.records.remove(&id) {
        Some(_) => status(StatusCode::OK, ""),
        None => status(StatusCode::NOT_FOUND, "record not found"),
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}
