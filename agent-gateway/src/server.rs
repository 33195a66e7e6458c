//! HTTP surface of the container.
//!
//! Every route sits behind the bearer-token gate. Failures are rendered as
//! an [`ErrorResponse`] body with the status chosen by the gateway's
//! [`ErrorStatusMap`](crate::ErrorStatusMap).

use std::future::Future;
use std::io;

use agent_kernel::{ByteStream, Parameters};
use agent_primitives::{AgentDescriptor, ContainerInfo, ErrorResponse, Message};
use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::credential::bearer_token;
use crate::error::{GatewayError, GatewayResult};
use crate::facade::Gateway;

/// Failure rendered at the HTTP boundary.
#[derive(Debug)]
pub struct Rejection {
    status: StatusCode,
    body: ErrorResponse,
}

impl Rejection {
    fn new(gateway: &Gateway, err: &GatewayError) -> Self {
        let body = gateway.status_map().render(err);
        let status =
            StatusCode::from_u16(body.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        warn!(status = status.as_u16(), kind = err.kind(), %err, "request failed");
        Self { status, body }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, Rejection>;

fn reject(gateway: &Gateway) -> impl Fn(GatewayError) -> Rejection + '_ {
    move |err| Rejection::new(gateway, &err)
}

#[derive(Debug, Deserialize)]
struct InvokeQuery {
    #[serde(default = "default_timeout")]
    timeout: i64,
}

const fn default_timeout() -> i64 {
    -1
}

/// Routes of the container API bound to `gateway`.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/agents", get(agents))
        .route("/agents/:agent_id", get(agent))
        .route("/send/:agent_id", post(send))
        .route("/broadcast/:channel", post(broadcast))
        .route("/invoke/:action", post(invoke_any))
        .route("/invoke/:action/:agent_id", post(invoke_agent))
        .route("/stream/:stream", get(get_stream_any).post(post_stream_any))
        .route("/stream/:stream/:agent_id", get(get_stream_agent).post(post_stream_agent))
        .layer(middleware::from_fn_with_state(gateway.clone(), authenticate))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Serves [`router`] on `listener` until `shutdown` resolves. Platform
/// notifications are enabled for as long as the server runs.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve<F>(gateway: Gateway, listener: TcpListener, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    info!(%local, "container API listening");
    gateway.serving().set(true);
    let outcome = axum::serve(listener, router(gateway.clone()))
        .with_graceful_shutdown(shutdown)
        .await;
    gateway.serving().set(false);
    info!("container API stopped");
    outcome
}

async fn authenticate(State(gateway): State<Gateway>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(bearer_token);
    match gateway.verify(presented) {
        Ok(()) => next.run(request).await,
        Err(err) => Rejection::new(&gateway, &err).into_response(),
    }
}

async fn info(State(gateway): State<Gateway>) -> Json<ContainerInfo> {
    Json(gateway.container_info())
}

async fn agents(State(gateway): State<Gateway>) -> Json<Vec<AgentDescriptor>> {
    Json(gateway.list_agents())
}

async fn agent(
    State(gateway): State<Gateway>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentDescriptor>> {
    gateway.get_agent(&agent_id).map(Json).map_err(reject(&gateway))
}

async fn send(
    State(gateway): State<Gateway>,
    Path(agent_id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let message: Message = parse_json(&body).map_err(reject(&gateway))?;
    gateway
        .send(&agent_id, message)
        .map(|()| StatusCode::OK)
        .map_err(reject(&gateway))
}

async fn broadcast(
    State(gateway): State<Gateway>,
    Path(channel): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let message: Message = parse_json(&body).map_err(reject(&gateway))?;
    gateway.broadcast(&channel, message);
    Ok(StatusCode::OK)
}

async fn invoke_any(
    State(gateway): State<Gateway>,
    Path(action): Path<String>,
    query: Result<Query<InvokeQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    invoke(&gateway, &action, None, query, &body).await
}

async fn invoke_agent(
    State(gateway): State<Gateway>,
    Path((action, agent_id)): Path<(String, String)>,
    query: Result<Query<InvokeQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    invoke(&gateway, &action, Some(&agent_id), query, &body).await
}

async fn invoke(
    gateway: &Gateway,
    action: &str,
    agent_id: Option<&str>,
    query: Result<Query<InvokeQuery>, QueryRejection>,
    body: &[u8],
) -> ApiResult<Json<Value>> {
    let Query(query) = query
        .map_err(|err| GatewayError::BadRequest(err.body_text()))
        .map_err(reject(gateway))?;
    let parameters: Parameters = if body.iter().all(u8::is_ascii_whitespace) {
        Parameters::new()
    } else {
        parse_json(body).map_err(reject(gateway))?
    };
    gateway
        .invoke(action, parameters, agent_id, query.timeout)
        .await
        .map(Json)
        .map_err(reject(gateway))
}

async fn get_stream_any(State(gateway): State<Gateway>, Path(stream): Path<String>) -> ApiResult<Response> {
    stream_response(&gateway, gateway.get_stream(&stream, None).await)
}

async fn get_stream_agent(
    State(gateway): State<Gateway>,
    Path((stream, agent_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    stream_response(&gateway, gateway.get_stream(&stream, Some(&agent_id)).await)
}

fn stream_response(gateway: &Gateway, outcome: GatewayResult<ByteStream>) -> ApiResult<Response> {
    let bytes = outcome.map_err(reject(gateway))?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(bytes),
    )
        .into_response())
}

async fn post_stream_any(
    State(gateway): State<Gateway>,
    Path(stream): Path<String>,
    body: Body,
) -> ApiResult<StatusCode> {
    gateway
        .post_stream(&stream, body_stream(body), None)
        .await
        .map(|()| StatusCode::OK)
        .map_err(reject(&gateway))
}

async fn post_stream_agent(
    State(gateway): State<Gateway>,
    Path((stream, agent_id)): Path<(String, String)>,
    body: Body,
) -> ApiResult<StatusCode> {
    gateway
        .post_stream(&stream, body_stream(body), Some(&agent_id))
        .await
        .map(|()| StatusCode::OK)
        .map_err(reject(&gateway))
}

fn body_stream(body: Body) -> ByteStream {
    Box::pin(body.into_data_stream().map_err(io::Error::other))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> GatewayResult<T> {
    serde_json::from_slice(body).map_err(|err| GatewayError::BadRequest(format!("malformed body: {err}")))
}
