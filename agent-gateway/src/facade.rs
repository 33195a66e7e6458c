//! The externally facing operation set the HTTP routes call into.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_config::ContainerConfig;
use agent_kernel::{
    AgentRef, AgentSystem, ByteStream, Envelope, Parameters, Reply, Request, SystemConfig,
    SystemError,
};
use agent_primitives::{AgentDescriptor, AgentId, ContainerImage, ContainerInfo, Message};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::DispatchBridge;
use crate::containerized::{ContainerizedAgent, spawn_containerized};
use crate::credential::{Credential, CredentialStore};
use crate::error::{ErrorStatusMap, GatewayError, GatewayResult};
use crate::platform::{HttpParentPlatform, SharedPlatform};
use crate::protocol::{ProtocolParts, Registrar, ServingFlag, spawn_protocol};
use crate::registry::{AgentRegistry, Target};

/// How long [`Gateway::spawn_agent`] waits for the new agent to register.
pub const REGISTRATION_WAIT: Duration = Duration::from_secs(5);

/// Stream calls always use the bridge's default budget.
const STREAM_TIMEOUT: i64 = -1;

/// Collects what a [`Gateway`] is built from.
pub struct GatewayBuilder {
    config: ContainerConfig,
    image: ContainerImage,
    platform: Option<SharedPlatform>,
    status_map: ErrorStatusMap,
    system: Option<AgentSystem>,
    arguments: Option<BTreeMap<String, String>>,
}

impl GatewayBuilder {
    /// Uses `platform` instead of an HTTP client built from the configured URL.
    #[must_use]
    pub fn platform(mut self, platform: SharedPlatform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Replaces the error-to-status table.
    #[must_use]
    pub fn status_map(mut self, status_map: ErrorStatusMap) -> Self {
        self.status_map = status_map;
        self
    }

    /// Hosts agents on an existing runtime.
    #[must_use]
    pub fn system(mut self, system: AgentSystem) -> Self {
        self.system = Some(system);
        self
    }

    /// Uses these launch arguments instead of resolving the image parameters
    /// from the process environment.
    #[must_use]
    pub fn arguments(mut self, arguments: BTreeMap<String, String>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Starts the registration handler and returns the gateway.
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when the configured platform URL
    /// cannot be turned into a client.
    pub fn build(self) -> GatewayResult<Gateway> {
        let Self {
            config,
            image,
            platform,
            status_map,
            system,
            arguments,
        } = self;

        let credentials = CredentialStore::new(Credential::new(
            config.token.clone(),
            config.platform_url.clone(),
            config.container_id.clone(),
        ));
        let platform = match (platform, config.platform_url.as_deref()) {
            (Some(platform), _) => Some(platform),
            (None, Some(url)) => {
                let client = HttpParentPlatform::new(url, credentials.clone())
                    .map_err(|err| GatewayError::Unavailable(err.to_string()))?;
                Some(Arc::new(client) as SharedPlatform)
            }
            (None, None) => None,
        };
        let system = system.unwrap_or_else(|| AgentSystem::new(SystemConfig::new(config.mailbox_capacity)));
        let arguments = arguments.unwrap_or_else(|| image.resolve_parameters(|key| std::env::var(key).ok()));

        let registry = AgentRegistry::new(config.resolve_policy);
        let serving = ServingFlag::default();
        let (registrar, protocol) = spawn_protocol(ProtocolParts {
            registry: registry.clone(),
            credentials: credentials.clone(),
            platform: platform.clone(),
            system: system.clone(),
            serving: serving.clone(),
        });

        info!(
            container_id = %config.container_id,
            platform = ?config.platform_url,
            auth = config.token.is_some(),
            policy = %config.resolve_policy,
            "gateway started"
        );

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                bridge: DispatchBridge::new(system.clone(), config.invoke_timeout),
                running_since: Utc::now(),
                config,
                image,
                arguments,
                registry,
                credentials,
                platform,
                system,
                registrar,
                serving,
                status_map,
                protocol: Mutex::new(Some(protocol)),
            }),
        })
    }
}

/// Cloneable handle to the container gateway.
///
/// # Panics
///
/// [`shutdown`](Self::shutdown) panics if an internal lock was poisoned.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: ContainerConfig,
    image: ContainerImage,
    arguments: BTreeMap<String, String>,
    running_since: DateTime<Utc>,
    registry: AgentRegistry,
    credentials: CredentialStore,
    platform: Option<SharedPlatform>,
    system: AgentSystem,
    bridge: DispatchBridge,
    registrar: Registrar,
    serving: ServingFlag,
    status_map: ErrorStatusMap,
    protocol: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Starts building a gateway for `config` and `image`.
    #[must_use]
    pub fn builder(config: ContainerConfig, image: ContainerImage) -> GatewayBuilder {
        GatewayBuilder {
            config,
            image,
            platform: None,
            status_map: ErrorStatusMap::default(),
            system: None,
            arguments: None,
        }
    }

    /// Read-only snapshot of the container.
    #[must_use]
    pub fn container_info(&self) -> ContainerInfo {
        debug!("GET INFO");
        ContainerInfo {
            container_id: self.inner.config.container_id.clone(),
            image: self.inner.image.clone(),
            arguments: self.inner.arguments.clone(),
            agents: self.inner.registry.list(),
            owner: self.inner.config.owner.clone(),
            running_since: self.inner.running_since,
        }
    }

    /// Registered agents in registration order.
    #[must_use]
    pub fn list_agents(&self) -> Vec<AgentDescriptor> {
        debug!("GET AGENTS");
        self.inner.registry.list()
    }

    /// Descriptor of one agent.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for unknown ids.
    pub fn get_agent(&self, agent_id: &str) -> GatewayResult<AgentDescriptor> {
        debug!(agent_id, "GET AGENT");
        self.inner.registry.get(agent_id)
    }

    /// Delivers `message` to one agent without waiting for it to be handled.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if no running agent has this id and
    /// [`GatewayError::Unavailable`] if its mailbox is full.
    pub fn send(&self, agent_id: &str, message: Message) -> GatewayResult<()> {
        debug!(agent_id, "SEND");
        let agent = self.running(Target::agent(agent_id))?;
        agent.try_tell(Envelope::Message(message)).map_err(|err| match err {
            SystemError::MailboxFull(_) => {
                warn!(agent_id, %err, "message dropped");
                GatewayError::Unavailable(format!("Agent {agent_id} is busy"))
            }
            _ => GatewayError::not_found(format!("Agent {agent_id} is not running")),
        })
    }

    /// Publishes `message` on `channel` and returns how many agents got it.
    /// Subscribers with a full mailbox miss the message.
    pub fn broadcast(&self, channel: &str, message: Message) -> usize {
        debug!(channel, "BROADCAST");
        self.inner.system.publish(channel, message)
    }

    /// Runs `action` on the resolved agent and returns its result.
    /// A non-positive `timeout_secs` applies the default budget.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] before any dispatch when nothing
    /// matches, and the classified failure of the call otherwise.
    pub async fn invoke(
        &self,
        action: &str,
        parameters: Parameters,
        agent_id: Option<&str>,
        timeout_secs: i64,
    ) -> GatewayResult<Value> {
        debug!(action, agent_id, timeout_secs, "INVOKE ACTION OF AGENT");
        let target = self.inner.registry.resolve(Target::action(action, agent_id))?;
        let request = Request::Invoke {
            action: action.to_owned(),
            parameters,
        };
        self.inner
            .bridge
            .call_and_wait(&target, request, timeout_secs)
            .await
            .map(Reply::into_value)
    }

    /// Opens the GET stream `stream` of the resolved agent.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] when nothing matches, and the
    /// classified failure of the call otherwise.
    pub async fn get_stream(&self, stream: &str, agent_id: Option<&str>) -> GatewayResult<ByteStream> {
        debug!(stream, agent_id, "GET STREAM");
        let target = self.inner.registry.resolve(Target::stream(stream, agent_id))?;
        let request = Request::StreamGet {
            stream: stream.to_owned(),
        };
        match self.inner.bridge.call_and_wait(&target, request, STREAM_TIMEOUT).await? {
            Reply::Stream(bytes) => Ok(bytes),
            _ => Err(GatewayError::application(format!(
                "Stream {stream} of Agent {target} produced no bytes"
            ))),
        }
    }

    /// Hands `body` to the POST stream `stream` of the resolved agent.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] when nothing matches, and the
    /// classified failure of the call otherwise.
    pub async fn post_stream(
        &self,
        stream: &str,
        body: ByteStream,
        agent_id: Option<&str>,
    ) -> GatewayResult<()> {
        debug!(stream, agent_id, "POST STREAM");
        let target = self.inner.registry.resolve(Target::stream(stream, agent_id))?;
        let request = Request::StreamPost {
            stream: stream.to_owned(),
            body,
        };
        self.inner
            .bridge
            .call_and_wait(&target, request, STREAM_TIMEOUT)
            .await
            .map(drop)
    }

    /// Checks an inbound bearer token against the current credential.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] on mismatch.
    pub fn verify(&self, presented: Option<&str>) -> GatewayResult<()> {
        self.inner.credentials.verify(presented)
    }

    /// Starts `agent` under `agent_id` and waits until it is registered.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when the runtime refuses the
    /// agent or it does not register within [`REGISTRATION_WAIT`].
    pub async fn spawn_agent<B: ContainerizedAgent>(
        &self,
        agent_id: AgentId,
        agent: B,
    ) -> GatewayResult<AgentRef> {
        let agent = spawn_containerized(
            &self.inner.system,
            self.inner.registrar.clone(),
            agent_id.clone(),
            agent,
        )?;
        self.wait_for_agent(&agent_id, REGISTRATION_WAIT).await?;
        Ok(agent)
    }

    /// Waits until `agent_id` is listed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when `within` expires first.
    pub async fn wait_for_agent(&self, agent_id: &AgentId, within: Duration) -> GatewayResult<()> {
        let listed = async {
            while self.inner.registry.get(agent_id.as_str()).is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(within, listed)
            .await
            .map_err(|_| GatewayError::Unavailable(format!("Agent {agent_id} did not register")))
    }

    /// Fetches and distributes a fresh credential right away.
    ///
    /// # Errors
    ///
    /// See [`Registrar::renew_credential`].
    pub async fn renew_credential(&self) -> GatewayResult<()> {
        self.inner.registrar.renew_credential().await
    }

    /// Starts periodic renewal when a platform and a credential are
    /// configured.
    #[must_use]
    pub fn start_renewal(&self) -> Option<JoinHandle<()>> {
        if self.inner.platform.is_none() || self.inner.credentials.current().token().is_none() {
            debug!("credential renewal disabled");
            return None;
        }
        let period = self.inner.config.token_renewal_interval;
        info!(?period, "credential renewal scheduled");
        Some(self.inner.registrar.spawn_renewal(period))
    }

    /// Stops every agent, then the registration handler.
    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.inner.serving.set(false);
        self.inner.system.shutdown().await;
        self.inner.registrar.shutdown().await;
        let protocol = self.inner.protocol.lock().expect("protocol lock poisoned").take();
        if let Some(protocol) = protocol {
            if let Err(err) = protocol.await {
                warn!(%err, "registration handler ended abnormally");
            }
        }
    }

    /// Boot configuration.
    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Agent registry.
    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    /// Runtime hosting the agents.
    #[must_use]
    pub fn system(&self) -> &AgentSystem {
        &self.inner.system
    }

    /// Handle to the registration handler.
    #[must_use]
    pub fn registrar(&self) -> &Registrar {
        &self.inner.registrar
    }

    /// Current credential as seen by the inbound gate.
    #[must_use]
    pub fn credential(&self) -> Arc<Credential> {
        self.inner.credentials.current()
    }

    /// Error-to-status table used by the HTTP surface.
    #[must_use]
    pub fn status_map(&self) -> &ErrorStatusMap {
        &self.inner.status_map
    }

    /// Flag raised while the HTTP surface accepts requests.
    #[must_use]
    pub fn serving(&self) -> &ServingFlag {
        &self.inner.serving
    }

    fn running(&self, target: Target<'_>) -> GatewayResult<AgentRef> {
        let agent_id = self.inner.registry.resolve(target)?;
        self.inner.system.resolve(&agent_id).ok_or_else(|| {
            warn!(agent_id = %agent_id, "registered agent is not running");
            GatewayError::not_found(format!("Agent {agent_id} is not running"))
        })
    }
}
