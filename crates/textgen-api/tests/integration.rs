use std::sync::Arc;

use axum::Router;
use textgen_api::{app_with, router};
use textgen_backend::mock::{MockBatchBackend, MockTokenizer};
use textgen_backend::LoadedModel;
use textgen_common::config::ServerConfig;
use textgen_common::GenerationState;
use textgen_core::{SessionManager, TextGenerator};

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}:{}", addr.ip(), addr.port()), srv)
}

fn mock_app(reply: &str) -> Router {
    let model = LoadedModel::batch("mock", Arc::new(MockBatchBackend::fixed(reply)), Arc::new(MockTokenizer::new()));
    let generator = TextGenerator::new(SessionManager::new()).with_model(model);
    app_with(Arc::new(generator), GenerationState::new())
}

#[tokio::test]
async fn health_metrics_and_openapi() {
    let (base, srv) = serve(router(&ServerConfig::default())).await;
    let client = reqwest::Client::new();

    let r = client.get(format!("{}/healthz", base)).send().await.unwrap();
    assert_eq!(r.text().await.unwrap(), "ok");

    let r = client.get(format!("{}/readyz", base)).send().await.unwrap();
    assert!(r.status().is_success());

    // generate once so the request counter has a sample
    let body = serde_json::json!({"prompt": "Hi"});
    let r = client.post(format!("{}/v1/generate", base)).json(&body).send().await.unwrap();
    assert!(r.status().is_success());

    let r = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert!(r.status().is_success());
    assert!(r.text().await.unwrap().contains("textgen_requests_total"));

    let r = client.get(format!("{}/openapi.json", base)).send().await.unwrap();
    let spec: serde_json::Value = r.json().await.unwrap();
    assert!(spec["paths"]["/v1/generate/stream"].is_object());

    drop(srv);
}

#[tokio::test]
async fn generate_returns_final_reply() {
    let (base, srv) = serve(mock_app("Hello\nYou: more")).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({"prompt": "Hi", "state": {"seed": 42}});
    let r = client.post(format!("{}/v1/generate", base)).json(&body).send().await.unwrap();
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["text"], "Hello\nYou: more");

    let body = serde_json::json!({"prompt": "Hi", "stopping_strings": ["\nYou:"]});
    let r = client.post(format!("{}/v1/generate", base)).json(&body).send().await.unwrap();
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["text"], "Hello");

    drop(srv);
}

#[tokio::test]
async fn invalid_seed_is_a_bad_request() {
    let (base, srv) = serve(mock_app("abc")).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({"prompt": "Hi", "state": {"seed": "soon"}});
    let r = client.post(format!("{}/v1/generate", base)).json(&body).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);
    let v: serde_json::Value = r.json().await.unwrap();
    assert!(v["error"].as_str().unwrap().contains("seed"));

    let r = client.post(format!("{}/v1/generate/stream", base)).json(&body).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);

    // the slot was released, so a valid request still goes through
    let body = serde_json::json!({"prompt": "Hi"});
    let r = client.post(format!("{}/v1/generate", base)).json(&body).send().await.unwrap();
    assert!(r.status().is_success());

    drop(srv);
}

#[tokio::test]
async fn stream_emits_partial_replies_as_events() {
    let (base, srv) = serve(mock_app("Hello there")).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({"prompt": "Hi", "state": {"max_tokens_second": 1000.0}});
    let r = client.post(format!("{}/v1/generate/stream", base)).json(&body).send().await.unwrap();
    assert!(r.status().is_success());
    let text = r.text().await.unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| serde_json::from_str(d.trim_start()).unwrap())
        .collect();
    assert_eq!(events.first().unwrap()["text"], "");
    assert_eq!(events.last().unwrap()["text"], "Hello there");
    assert!(events.len() > 2);

    drop(srv);
}

#[tokio::test]
async fn tokenizer_helpers_and_stop() {
    let (base, srv) = serve(mock_app("abc")).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({"prompt": "hi"});
    let r = client.post(format!("{}/v1/token-count", base)).json(&body).send().await.unwrap();
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["length"], 2);

    let r = client.post(format!("{}/v1/tokens", base)).json(&body).send().await.unwrap();
    let v: serde_json::Value = r.json().await.unwrap();
    assert!(v["tokens"].as_str().unwrap().starts_with("104"));

    let r = client.post(format!("{}/v1/stop", base)).send().await.unwrap();
    assert!(r.status().is_success());

    drop(srv);
}

#[tokio::test]
async fn no_model_is_reported() {
    let generator = TextGenerator::new(SessionManager::new());
    let (base, srv) = serve(app_with(Arc::new(generator), GenerationState::new())).await;
    let client = reqwest::Client::new();

    let r = client.get(format!("{}/readyz", base)).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let body = serde_json::json!({"prompt": "Hi"});
    let r = client.post(format!("{}/v1/generate", base)).json(&body).send().await.unwrap();
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["text"], "");

    let r = client.post(format!("{}/v1/token-count", base)).json(&body).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    drop(srv);
}
