//! Mock SiYuan note store for integration tests.

use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct MockDoc {
    pub id: String,
    pub box_id: String,
    pub title: String,
    pub hpath: String,
    pub updated: String,
    pub kramdown: String,
}

#[derive(Default)]
pub struct MockState {
    pub notebooks: Mutex<Vec<(String, String)>>,
    pub docs: Mutex<Vec<MockDoc>>,
    pub changed_roots: Mutex<Vec<String>>,
    pub fulltext_blocks: Mutex<Vec<Value>>,
    pub fail_sql: Mutex<bool>,
    /// Doc ids whose single-document lookup fails with a remote error.
    pub fail_doc_lookups: Mutex<Vec<String>>,
    /// Endpoint paths in call order.
    pub calls: Mutex<Vec<String>>,
}

impl MockState {
    pub fn record(&self, endpoint: &str) {
        self.calls.lock().unwrap().push(endpoint.to_string());
    }

    pub fn called(&self, endpoint: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == endpoint)
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({"code": 0, "msg": "", "data": data}))
}

async fn version(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.record("version");
    envelope(json!("3.1.0"))
}

async fn notebooks(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.record("lsNotebooks");
    let notebooks: Vec<Value> = state
        .notebooks
        .lock()
        .unwrap()
        .iter()
        .map(|(id, name)| json!({"id": id, "name": name}))
        .collect();
    envelope(json!({"notebooks": notebooks}))
}

fn doc_row(doc: &MockDoc) -> Value {
    json!({
        "id": doc.id,
        "content": doc.title,
        "hpath": doc.hpath,
        "box": doc.box_id,
        "updated": doc.updated,
        "tag": "",
        "type": "d",
    })
}

async fn sql(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.record("sql");
    if *state.fail_sql.lock().unwrap() {
        return Json(json!({"code": 500, "msg": "sql backend unavailable", "data": null}));
    }

    let stmt = body.get("stmt").and_then(Value::as_str).unwrap_or_default();
    let docs = state.docs.lock().unwrap();

    // Incremental change feed.
    if stmt.contains("DISTINCT root_id") {
        let rows: Vec<Value> = state
            .changed_roots
            .lock()
            .unwrap()
            .iter()
            .map(|id| json!({"root_id": id}))
            .collect();
        return envelope(json!(rows));
    }

    // Single-document lookup.
    if let Some(rest) = stmt.split("WHERE id = '").nth(1) {
        let id = rest.split('\'').next().unwrap_or_default();
        if state
            .fail_doc_lookups
            .lock()
            .unwrap()
            .iter()
            .any(|failing| failing == id)
        {
            return Json(json!({"code": 500, "msg": "doc lookup failed", "data": null}));
        }
        let rows: Vec<Value> = docs
            .iter()
            .filter(|doc| doc.id == id)
            .map(doc_row)
            .collect();
        return envelope(json!(rows));
    }

    // Notebook page walk.
    if let Some(rest) = stmt.split("box = '").nth(1) {
        let box_id = rest.split('\'').next().unwrap_or_default();
        let rows: Vec<Value> = docs
            .iter()
            .filter(|doc| doc.box_id == box_id)
            .map(doc_row)
            .collect();
        return envelope(json!(rows));
    }

    // Keyword LIKE recall: naive contains-match over doc kramdown.
    if stmt.contains("content LIKE") {
        let rows: Vec<Value> = docs
            .iter()
            .filter(|doc| {
                stmt.split("LIKE '%")
                    .skip(1)
                    .filter_map(|part| part.split("%'").next())
                    .any(|term| doc.kramdown.contains(term))
            })
            .map(|doc| {
                json!({
                    "id": format!("{}-blk", doc.id),
                    "root_id": doc.id,
                    "hpath": doc.hpath,
                    "content": doc.kramdown,
                    "updated": doc.updated,
                    "type": "p",
                })
            })
            .collect();
        return envelope(json!(rows));
    }

    envelope(json!([]))
}

async fn fulltext(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.record("fullTextSearchBlock");
    let blocks = state.fulltext_blocks.lock().unwrap().clone();
    envelope(json!({"blocks": blocks}))
}

async fn block_info(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.record("getBlockInfo");
    let id = body.get("id").and_then(Value::as_str).unwrap_or_default();
    let docs = state.docs.lock().unwrap();
    match docs.iter().find(|doc| doc.id == id) {
        Some(doc) => envelope(json!({"hPath": doc.hpath, "updated": doc.updated, "box": doc.box_id})),
        None => envelope(Value::Null),
    }
}

async fn kramdown(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.record("getBlockKramdown");
    let id = body.get("id").and_then(Value::as_str).unwrap_or_default();
    let docs = state.docs.lock().unwrap();
    match docs.iter().find(|doc| doc.id == id) {
        Some(doc) => envelope(json!({"id": doc.id, "kramdown": doc.kramdown})),
        None => envelope(Value::Null),
    }
}

/// Start the mock store on an ephemeral port; returns its base URL.
pub async fn spawn_mock(state: Arc<MockState>) -> String {
    let app = Router::new()
        .route("/api/system/version", post(version))
        .route("/api/query/sql", post(sql))
        .route("/api/search/fullTextSearchBlock", post(fulltext))
        .route("/api/block/getBlockInfo", post(block_info))
        .route("/api/block/getBlockKramdown", post(kramdown))
        .route("/api/notebook/lsNotebooks", post(notebooks))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });
    format!("http://{addr}")
}
