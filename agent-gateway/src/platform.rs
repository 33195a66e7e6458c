//! Client for the parent platform the container reports to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_kernel::Parameters;
use agent_primitives::Message;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::credential::CredentialStore;

/// Header naming the container on outbound calls.
pub const SENDER_ID_HEADER: &str = "SenderId";

/// Failure talking to the parent platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The client is misconfigured.
    #[error("platform client not configured: {reason}")]
    Configuration {
        /// Additional context.
        reason: String,
    },
    /// Network or protocol failure.
    #[error("platform transport error: {reason}")]
    Transport {
        /// Additional context.
        reason: String,
    },
    /// The platform answered with a non-success status.
    #[error("platform returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },
    /// The response body could not be decoded.
    #[error("undecodable platform response: {reason}")]
    Decode {
        /// Additional context.
        reason: String,
    },
}

impl PlatformError {
    fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    fn decode(reason: impl fmt::Display) -> Self {
        Self::Decode {
            reason: reason.to_string(),
        }
    }
}

/// Result alias for platform calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Routes of the parent platform used by the container and its agents.
#[async_trait]
pub trait ParentPlatform: Send + Sync + 'static {
    /// Tells the platform that the agent set of `container_id` changed.
    /// Returns the platform's acknowledgement flag.
    async fn notify_update_container(&self, container_id: &str) -> PlatformResult<bool>;

    /// Obtains a fresh bearer token.
    async fn renew_token(&self) -> PlatformResult<String>;

    /// Invokes an action anywhere on the platform.
    async fn invoke(
        &self,
        action: &str,
        parameters: &Parameters,
        agent_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> PlatformResult<Value> {
        let _ = (action, parameters, agent_id, timeout);
        Err(PlatformError::configuration("outbound invoke not supported"))
    }

    /// Sends a message to an agent anywhere on the platform.
    async fn send(&self, agent_id: &str, message: &Message) -> PlatformResult<()> {
        let _ = (agent_id, message);
        Err(PlatformError::configuration("outbound send not supported"))
    }

    /// Broadcasts a message on a platform-wide channel.
    async fn broadcast(&self, channel: &str, message: &Message) -> PlatformResult<()> {
        let _ = (channel, message);
        Err(PlatformError::configuration("outbound broadcast not supported"))
    }
}

/// Shared handle to a platform client.
pub type SharedPlatform = Arc<dyn ParentPlatform>;

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));
    Client::builder().build::<_, Body>(connector)
}

/// [`ParentPlatform`] over HTTP(S). Every request carries the credential
/// current at the time it is sent.
#[derive(Clone)]
pub struct HttpParentPlatform {
    base_url: String,
    credentials: CredentialStore,
    client: HyperClient,
    timeout: Duration,
}

impl fmt::Debug for HttpParentPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpParentPlatform")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpParentPlatform {
    /// Default budget of one platform request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Configuration`] if the URL is not an absolute
    /// `http://` or `https://` URL.
    pub fn new(base_url: &str, credentials: CredentialStore) -> PlatformResult<Self> {
        Ok(Self {
            base_url: sanitize_base_url(base_url)?,
            credentials,
            client: build_https_client(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> PlatformResult<Bytes> {
        let uri: Uri = format!("{}{path}", self.base_url)
            .parse()
            .map_err(|err| PlatformError::configuration(format!("invalid platform route {path}: {err}")))?;

        let credential = self.credentials.current();
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(SENDER_ID_HEADER, credential.container_id());
        if let Some(token) = credential.token() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(bytes)
            }
            None => Body::empty(),
        };
        let request = builder
            .body(body)
            .map_err(|err| PlatformError::transport(format!("failed to build request: {err}")))?;

        debug!(%method, path, "platform request");
        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| PlatformError::transport(format!("{method} {path} timed out")))?
            .map_err(|err| PlatformError::transport(format!("{method} {path} failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| PlatformError::transport(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ParentPlatform for HttpParentPlatform {
    async fn notify_update_container(&self, container_id: &str) -> PlatformResult<bool> {
        let body = serde_json::to_vec(container_id).map_err(PlatformError::decode)?;
        let bytes = self
            .request(Method::POST, "/containers/notify", Some(body))
            .await?;
        serde_json::from_slice(&bytes).map_err(PlatformError::decode)
    }

    async fn renew_token(&self) -> PlatformResult<String> {
        let bytes = self.request(Method::GET, "/token", None).await?;
        let token = String::from_utf8(bytes.to_vec()).map_err(PlatformError::decode)?;
        Ok(token.trim().to_owned())
    }

    async fn invoke(
        &self,
        action: &str,
        parameters: &Parameters,
        agent_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> PlatformResult<Value> {
        let route = match agent_id {
            Some(agent_id) => format!("/invoke/{action}/{agent_id}"),
            None => format!("/invoke/{action}"),
        };
        let timeout = timeout.map_or(-1, |budget| i64::try_from(budget.as_secs()).unwrap_or(i64::MAX));
        let path = format!("{route}?timeout={timeout}&forward=true");
        let body = serde_json::to_vec(parameters).map_err(PlatformError::decode)?;
        let bytes = self.request(Method::POST, &path, Some(body)).await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(PlatformError::decode)
    }

    async fn send(&self, agent_id: &str, message: &Message) -> PlatformResult<()> {
        let body = serde_json::to_vec(message).map_err(PlatformError::decode)?;
        self.request(Method::POST, &format!("/send/{agent_id}?forward=true"), Some(body))
            .await
            .map(drop)
    }

    async fn broadcast(&self, channel: &str, message: &Message) -> PlatformResult<()> {
        let body = serde_json::to_vec(message).map_err(PlatformError::decode)?;
        self.request(Method::POST, &format!("/broadcast/{channel}?forward=true"), Some(body))
            .await
            .map(drop)
    }
}

fn sanitize_base_url(input: &str) -> PlatformResult<String> {
    let base = input.trim().trim_end_matches('/').to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(PlatformError::configuration(
            "platform URL must start with http:// or https://",
        ));
    }
    base.parse::<Uri>()
        .map_err(|err| PlatformError::configuration(format!("invalid platform URL: {err}")))?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;

    fn credentials() -> CredentialStore {
        CredentialStore::new(Credential::new(None, None, "container-1"))
    }

    #[test]
    fn base_url_requires_scheme() {
        let err = HttpParentPlatform::new("platform:8000", credentials()).unwrap_err();
        assert!(matches!(err, PlatformError::Configuration { .. }));
    }

    #[tokio::test]
    async fn trailing_slash_is_dropped() {
        let platform = HttpParentPlatform::new("http://platform:8000/", credentials()).unwrap();
        assert_eq!(platform.base_url(), "http://platform:8000");
    }
}
