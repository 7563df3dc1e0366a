//! HTTP API integration tests
//!
//! Each test serves the full router on an ephemeral port and talks to it
//! with `reqwest`.

#![cfg(feature = "http-api")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use studio_runtime::api::HttpApiServer;
use studio_runtime::{Config, InMemoryTaskStore, SimulatedBackend, StudioRuntime};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const API_KEY: &str = "test-key";

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.api.api_keys = vec![API_KEY.to_string()];
        config.api.rate_limit.enabled = false;
        configure(&mut config);

        let backend = Arc::new(
            SimulatedBackend::new()
                .with_file_delay(Duration::from_millis(5))
                .with_cached(vec!["bert-base-uncased".to_string()]),
        );
        let runtime = Arc::new(StudioRuntime::with_components(
            config.clone(),
            backend,
            Arc::new(InMemoryTaskStore::default()),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = HttpApiServer::new(config.api, runtime);
        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(API_KEY)
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(API_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn wait_until_loaded(&self, id: &str) {
        for _ in 0..400 {
            let loaded: Vec<String> = self.get("/models/loaded").await.json().await.unwrap();
            if loaded.iter().any(|m| m == id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never loaded", id);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_public_and_protected_routes() {
    let server = TestServer::start(|_| {}).await;

    let root: Value = server
        .client
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root, json!({"message": "Backend is running!"}));

    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let anonymous = server.client.get(server.url("/stats")).send().await.unwrap();
    assert_eq!(anonymous.status(), 401);
    let body: Value = anonymous.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    let via_header = server
        .client
        .get(server.url("/stats"))
        .header("X-API-Key", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(via_header.status(), 200);
    let stats: Value = via_header.json().await.unwrap();
    assert_eq!(stats["available_models"], "1000+");
    assert_eq!(stats["loaded_models"], 0);
}

#[tokio::test]
async fn test_download_load_and_embed() {
    let server = TestServer::start(|_| {}).await;

    let started: Value = server
        .post("/models/download", json!({"model_id": "m1"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(started["message"], "Started downloading m1");

    let repeated: Value = server
        .post("/models/download", json!({"model_id": "m1"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(
        repeated["message"],
        "Model m1 already downloaded or is downloading."
    );

    let missing = server.post("/models/download", json!({"model_id": "  "})).await;
    assert_eq!(missing.status(), 400);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "model_id must be a non-empty string");

    for _ in 0..400 {
        let downloaded: Value = server.get("/models/downloaded").await.json().await.unwrap();
        if downloaded["m1"]["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let load: Value = server
        .post("/models/load", json!({"model_id": "m1"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(load["message"], "Started loading m1");
    server.wait_until_loaded("m1").await;

    let loading: Value = server.get("/models/loading").await.json().await.unwrap();
    assert_eq!(loading[0]["model_id"], "m1");

    let response = server
        .post("/embed", json!({"texts": ["hello world", "bye"], "model": "m1"}))
        .await;
    assert_eq!(response.status(), 200);
    let embed: Value = response.json().await.unwrap();
    assert_eq!(embed["embeddings"].as_array().unwrap().len(), 2);

    let stats: Value = server.get("/stats").await.json().await.unwrap();
    assert_eq!(stats["embeddings_generated"], 2);
    assert_eq!(stats["loaded_models"], 1);

    let status: Value = server.get("/models/status/m1").await.json().await.unwrap();
    assert_eq!(status["load_state"], "loaded");
}

#[tokio::test]
async fn test_model_errors_map_to_status_codes() {
    let server = TestServer::start(|_| {}).await;

    let unavailable = server.post("/models/load", json!({"model_id": "m2"})).await;
    assert_eq!(unavailable.status(), 400);
    let body: Value = unavailable.json().await.unwrap();
    assert_eq!(body["code"], "MODEL_NOT_AVAILABLE");

    let not_ready = server
        .post("/embed", json!({"texts": ["x"], "model": "m2"}))
        .await;
    assert_eq!(not_ready.status(), 400);

    let delete = server
        .client
        .delete(server.url("/models/downloaded/ProsusAI/finbert"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 404);
    let body: Value = delete.json().await.unwrap();
    assert_eq!(body["error"], "Model not found");

    let status = server.get("/models/status/unknown").await;
    assert_eq!(status.status(), 404);
}

#[tokio::test]
async fn test_custom_task_envelopes() {
    let server = TestServer::start(|_| {}).await;
    server
        .post("/models/load", json!({"model_id": "bert-base-uncased"}))
        .await;
    server.wait_until_loaded("bert-base-uncased").await;

    let tokenizer = "from transformers import AutoTokenizer\ntokenizer = AutoTokenizer.from_pretrained(model_id)";
    let model = "from transformers import AutoModel\nmodel = AutoModel.from_pretrained(model_id)";

    let rejected = server
        .post(
            "/custom-task",
            json!({
                "tokenizer_code": "import subprocess",
                "model_code": model,
                "function_code": "def custom_function(t) { return t }",
                "input_text": "x",
                "model_id": "bert-base-uncased"
            }),
        )
        .await;
    assert_eq!(rejected.status(), 400);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["code"], "ADMISSION_REJECTED");
    assert_eq!(body["details"]["violations"][0]["fragment"], "tokenizer");

    let single: Value = server
        .post(
            "/custom-task",
            json!({
                "tokenizer_code": tokenizer,
                "model_code": model,
                "function_code": "def custom_function(t) { return t.upper() }",
                "input_text": "shout",
                "model_id": "bert-base-uncased"
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(single["result"], "SHOUT");
    assert!(single["error"].is_null());

    let batch: Value = server
        .post(
            "/custom-task/batch",
            json!({
                "tokenizer_code": tokenizer,
                "model_code": model,
                "function_code": "def custom_function(ts) { return [ts[0], ts[1]] }",
                "input_texts": ["a", "b", "c"],
                "model_id": "bert-base-uncased"
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    let errors = batch["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].is_string());
    assert!(errors.iter().all(|e| e == &errors[0]));
    assert!(batch["results"].as_array().unwrap().iter().all(Value::is_null));

    let verdict: Value = server
        .post(
            "/custom-task/validate",
            json!({
                "tokenizer_code": tokenizer,
                "model_code": "import requests",
                "function_code": "def custom_function(t) { return t }"
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(verdict["valid"], false);
    assert_eq!(verdict["violations"][0]["rule"], "disallowed_import");
}

#[tokio::test]
async fn test_saved_task_lifecycle() {
    let server = TestServer::start(|_| {}).await;
    server
        .post("/models/load", json!({"model_id": "bert-base-uncased"}))
        .await;
    server.wait_until_loaded("bert-base-uncased").await;

    let created = server
        .post(
            "/custom-tasks",
            json!({
                "name": "Length",
                "description": "Token count",
                "model_id": "bert-base-uncased",
                "tokenizer_code": "tokenizer = 1",
                "model_code": "model = 1",
                "function_code": "def custom_function(t) { return len(t) }",
                "tags": "demo"
            }),
        )
        .await;
    assert_eq!(created.status(), 201);
    let task: Value = created.json().await.unwrap();
    let id = task["id"].as_str().unwrap().to_string();

    let run: Value = server
        .post(&format!("/custom-tasks/{}/run", id), json!({"input_text": "four"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(run["result"], 4);

    let found: Value = server.get("/custom-tasks/search?q=DEMO").await.json().await.unwrap();
    assert_eq!(found.as_array().unwrap().len(), 1);

    let exported: Value = server.get("/custom-tasks/export").await.json().await.unwrap();
    let imported: Value = server
        .post("/custom-tasks/import", exported)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(imported["imported"], 1);

    let by_model: Value = server
        .get("/custom-tasks/model/bert-base-uncased")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(by_model.as_array().unwrap().len(), 2);

    let task_stats: Value = server.get("/custom-tasks/stats").await.json().await.unwrap();
    assert_eq!(task_stats["total_tasks"], 2);
    assert_eq!(task_stats["unique_models"], 1);
    assert_eq!(task_stats["models"], json!(["bert-base-uncased"]));
    assert_eq!(task_stats["top_tags"], json!([{"tag": "demo", "count": 2}]));

    let deleted = server
        .client
        .delete(server.url(&format!("/custom-tasks/{}", id)))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    assert_eq!(server.get(&format!("/custom-tasks/{}", id)).await.status(), 404);

    let stats: Value = server.get("/stats").await.json().await.unwrap();
    assert_eq!(stats["playground_sessions"], 1);
}

#[tokio::test]
async fn test_settings_update_ignores_unknown_keys() {
    let server = TestServer::start(|_| {}).await;

    let updated: Value = server
        .post(
            "/settings",
            json!({"server_url": "http://studio:9000", "unknown": true}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(updated["message"], "Settings updated");

    let settings: Value = server.get("/settings").await.json().await.unwrap();
    assert_eq!(settings["server_url"], "http://studio:9000");
    assert!(settings.get("unknown").is_none());
    assert_eq!(settings["notifications"]["download_complete"], true);
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_requests() {
    let server = TestServer::start(|config| {
        config.api.rate_limit.enabled = true;
        config.api.rate_limit.requests = 2;
        config.api.rate_limit.period = Duration::from_secs(3600);
    })
    .await;

    assert_eq!(server.get("/stats").await.status(), 200);
    assert_eq!(server.get("/stats").await.status(), 200);
    let limited = server.get("/stats").await;
    assert_eq!(limited.status(), 429);
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let server = TestServer::start(|_| {}).await;
    let doc: Value = server.get("/api-docs/openapi.json").await.json().await.unwrap();
    assert!(doc["paths"].get("/custom-task/batch").is_some());
    assert!(doc["paths"].get("/models/download").is_some());
    assert!(doc["paths"].get("/custom-tasks/stats").is_some());
}
