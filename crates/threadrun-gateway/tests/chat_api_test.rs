use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use threadrun_agents::{OpenAiAssistantGateway, Orchestrator, PollPolicy, ToolRegistry};
use threadrun_config::AppConfig;
use threadrun_gateway::{AppState, build_router};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_gateway(upstream: &MockServer, greeting: Option<&str>) -> SocketAddr {
    let openai = Arc::new(OpenAiAssistantGateway::new(
        "test-key".to_string(),
        Some(upstream.uri()),
    ));
    let orchestrator = Orchestrator::builder(openai.clone(), "asst_default")
        .tools(ToolRegistry::with_builtins())
        .poll_policy(PollPolicy::constant(
            Duration::from_millis(10),
            Duration::from_secs(5),
        ))
        .greeting(greeting.map(str::to_string))
        .build();
    let state = Arc::new(AppState::new(AppConfig::default(), openai, orchestrator));
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn mount_happy_turn(upstream: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "thread_1" })))
        .expect(1)
        .mount(upstream)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_in", "created_at": 1, "role": "user", "content": "hi", "metadata": {}
        })))
        .mount(upstream)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "run_1", "thread_id": "thread_1", "status": "queued"
        })))
        .mount(upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/threads/thread_1/runs/run_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "run_1", "thread_id": "thread_1", "status": "completed"
        })))
        .mount(upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/threads/thread_1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "msg_greet", "created_at": 1, "role": "assistant", "content": "Welcome!",
                  "metadata": { "hidden": "true", "origin_role": "system" } },
                { "id": "msg_in", "created_at": 2, "role": "user", "content": "hi" },
                { "id": "msg_out", "created_at": 3, "role": "assistant", "content": "Hello there", "run_id": "run_1" }
            ],
            "has_more": false
        })))
        .mount(upstream)
        .await;
}

#[tokio::test]
async fn test_chat_returns_assistant_reply() {
    let upstream = MockServer::start().await;
    mount_happy_turn(&upstream).await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&json!({ "user_id": "u1", "message": "hi" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "response": "Hello there" }));
}

#[tokio::test]
async fn test_chat_routes_to_requested_assistant() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .and(body_partial_json(json!({ "assistant_id": "asst_other" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "run_1", "thread_id": "thread_1", "status": "queued"
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    mount_happy_turn(&upstream).await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&json!({
            "user_id": "u1",
            "assistant_id": "asst_other",
            "conversation_id": "c1",
            "message": "hi"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_history_hides_greeting() {
    let upstream = MockServer::start().await;
    mount_happy_turn(&upstream).await;
    let addr = spawn_gateway(&upstream, Some("Welcome!")).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({ "user_id": "u1", "message": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("http://{addr}/chat/history?user_id=u1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let messages = body["messages"].as_array().unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["msg_in", "msg_out"]);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello there");
}

#[tokio::test]
async fn test_history_of_unknown_conversation_is_empty() {
    let upstream = MockServer::start().await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::get(format!("http://{addr}/chat/history?user_id=nobody"))
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "messages": [] }));
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_user_is_bad_request() {
    let upstream = MockServer::start().await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&json!({ "user_id": "  ", "message": "hi" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_request");
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let upstream = MockServer::start().await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .header("content-type", "application/json")
        .body("{\"user_id\": 42")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_upstream_error_is_bad_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
        })))
        .mount(&upstream)
        .await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&json!({ "user_id": "u1", "message": "hi" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "provider");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Incorrect API key provided")
    );
}

#[tokio::test]
async fn test_liveness_endpoints() {
    let upstream = MockServer::start().await;
    let addr = spawn_gateway(&upstream, None).await;

    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");

    let smoke: Value = reqwest::get(format!("http://{addr}/test"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(smoke, json!({ "message": "API is running" }));

    let status: Value = reqwest::get(format!("http://{addr}/api/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["threads"], 0);
    assert_eq!(status["assistant_id"], "asst_default");
    let tools = status["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "current_time");
    assert_eq!(tools[0]["parameters"]["type"], "object");
    assert!(tools[0]["parameters"]["properties"]["timezone"].is_object());
}

#[tokio::test]
async fn test_cors_preflight_allows_configured_origin() {
    let upstream = MockServer::start().await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/chat"))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();

    let headers = resp.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "http://localhost:3000"
    );
    assert_eq!(headers["access-control-allow-credentials"], "true");
}

#[tokio::test]
async fn test_openai_test_relays_completion() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "gpt-4" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "pong" } }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/openai-test"))
        .json(&json!({ "prompt": "ping" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "response": "pong" }));
    // no thread is created for a credential check
    assert!(
        upstream
            .received_requests()
            .await
            .unwrap()
            .iter()
            .all(|r| r.url.path() == "/chat/completions")
    );
}

#[tokio::test]
async fn test_openai_test_surfaces_provider_detail() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "Rate limit reached for gpt-4", "type": "requests" }
        })))
        .mount(&upstream)
        .await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/openai-test"))
        .json(&json!({ "prompt": "ping" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "provider");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Rate limit reached for gpt-4")
    );
}

#[tokio::test]
async fn test_openai_test_rejects_blank_prompt() {
    let upstream = MockServer::start().await;
    let addr = spawn_gateway(&upstream, None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/openai-test"))
        .json(&json!({ "prompt": " " }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert!(upstream.received_requests().await.unwrap().is_empty());
}
