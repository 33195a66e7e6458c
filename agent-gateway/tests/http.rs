mod common;

use std::sync::Arc;

use agent_gateway::{Gateway, router};
use agent_primitives::{ContainerImage, ErrorResponse};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::{
    FakePlatform, RENEWED_TOKEN, TOKEN, gateway_with_mailbox, jam_mailbox, open_gateway, secured_gateway, spawn_worker,
};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn call(gateway: &Gateway, request: Request<Body>) -> Response {
    router(gateway.clone()).oneshot(request).await.unwrap()
}

fn post(uri: &str, token: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body.into()).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn error_body(response: Response) -> ErrorResponse {
    serde_json::from_value(json_body(response).await).unwrap()
}

#[tokio::test]
async fn invoke_returns_the_action_result() {
    let gateway = open_gateway();
    spawn_worker(&gateway, "worker-1").await;

    let response = call(&gateway, post("/invoke/Add", None, r#"{"x": 2, "y": 3}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!(5));

    let response = call(
        &gateway,
        post("/invoke/Add/worker-1?timeout=10&containerId=c&forward=false", None, r#"{"x": 1, "y": 1}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!(2));
}

#[tokio::test]
async fn failures_render_structured_bodies() {
    let gateway = open_gateway();
    spawn_worker(&gateway, "worker-1").await;

    let response = call(&gateway, post("/invoke/Missing", None, "{}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = error_body(response).await;
    assert_eq!(body.status_code, 404);
    assert_eq!(body.message, "Action Missing of Agent <any> not found");
    assert!(body.cause.is_none());

    let response = call(&gateway, post("/invoke/Fail", None, "{}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(response).await.message, "Action Failed (as expected)");

    let response = call(&gateway, post("/invoke/Teapot", None, "{}")).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

    let response = call(&gateway, post("/invoke/Add", None, "{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.status_code, 400);

    let response = call(&gateway, get("/agents/ghost", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registered_kinds_are_honoured_at_the_boundary() {
    let gateway = Gateway::builder(
        agent_config::ContainerConfig::standalone("container-1"),
        ContainerImage::new("test-image"),
    )
    .status_map(agent_gateway::ErrorStatusMap::default().with("io", 502))
    .arguments(Default::default())
    .build()
    .unwrap();
    spawn_worker(&gateway, "worker-1").await;

    let response = call(&gateway, post("/invoke/Io", None, "")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_body(response).await.message, "disk on fire");
}

#[tokio::test]
async fn every_route_requires_the_current_token() {
    let platform = Arc::new(FakePlatform::default());
    let gateway = secured_gateway(platform);
    spawn_worker(&gateway, "worker-1").await;

    for request in [
        get("/info", None),
        get("/agents", Some("wrong")),
        post("/invoke/Add", None, r#"{"x": 1, "y": 2}"#),
        post("/send/worker-1", Some("wrong"), r#"{"payload": 1}"#),
        get("/stream/Bytes", None),
    ] {
        let response = call(&gateway, request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_body(response).await.message, "Unauthorized: Token does not match");
    }

    let response = call(&gateway, post("/invoke/Add", Some(TOKEN), r#"{"x": 1, "y": 2}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);

    gateway.renew_credential().await.unwrap();
    let response = call(&gateway, get("/agents", Some(TOKEN))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = call(&gateway, get("/agents", Some(RENEWED_TOKEN))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_scheme_is_case_insensitive() {
    let platform = Arc::new(FakePlatform::default());
    let gateway = secured_gateway(platform);

    for value in [format!("bearer {TOKEN}"), format!("BEARER {TOKEN}"), TOKEN.to_owned()] {
        let request = Request::get("/agents")
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&gateway, request).await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn info_and_agents_describe_the_container() {
    let gateway = open_gateway();
    spawn_worker(&gateway, "worker-1").await;

    let info = json_body(call(&gateway, get("/info", None)).await).await;
    assert_eq!(info["containerId"], json!("container-1"));
    assert_eq!(info["image"]["imageName"], json!("test-image"));
    assert_eq!(info["agents"][0]["agentId"], json!("worker-1"));
    assert!(info["runningSince"].is_string());

    let agents = json_body(call(&gateway, get("/agents", None)).await).await;
    assert_eq!(agents.as_array().map(Vec::len), Some(1));

    let agent = json_body(call(&gateway, get("/agents/worker-1", None)).await).await;
    assert_eq!(agent["agentId"], json!("worker-1"));
}

#[tokio::test]
async fn send_and_broadcast_accept_messages() {
    let gateway = open_gateway();
    let journal = spawn_worker(&gateway, "worker-1").await;

    let response = call(&gateway, post("/send/worker-1", None, r#"{"payload": "hi"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = call(&gateway, post("/broadcast/topic", None, r#"{"payload": "all"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(common::eventually(|| journal.messages.lock().unwrap().len() == 1).await);
    assert!(common::eventually(|| journal.broadcasts.lock().unwrap().len() == 1).await);

    let response = call(&gateway, post("/send/ghost", None, r#"{"payload": "hi"}"#)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn busy_agent_answers_send_with_503() {
    let gateway = gateway_with_mailbox(1);
    spawn_worker(&gateway, "worker-1").await;
    jam_mailbox(&gateway, "worker-1").await;

    let response = call(&gateway, post("/send/worker-1", None, r#"{"payload": "hi"}"#)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_body(response).await.message, "Agent worker-1 is busy");

    let response = call(&gateway, post("/broadcast/topic", None, r#"{"payload": "all"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn streams_are_proxied_as_octets() {
    let gateway = open_gateway();
    let journal = spawn_worker(&gateway, "worker-1").await;

    let response = call(&gateway, get("/stream/Bytes/worker-1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello world");

    let request = Request::post("/stream/Upload")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(vec![1_u8, 2, 3, 4]))
        .unwrap();
    let response = call(&gateway, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*journal.uploads.lock().unwrap(), vec![1, 2, 3, 4]);

    let response = call(&gateway, get("/stream/Missing", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        error_body(response).await.message,
        "Stream Missing of Agent <any> not found"
    );
}
