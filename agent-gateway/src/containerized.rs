//! Adapter turning business logic into a kernel agent that registers itself
//! with the gateway.

use std::sync::Arc;

use agent_kernel::{
    ActionError, ActionResult, Agent, AgentContext, AgentRef, AgentSystem, ByteStream, HandlerError,
    HandlerResult, Parameters, Reply, Request,
};
use agent_primitives::{AgentDescriptor, AgentId, Message};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::credential::{Credential, CredentialStore};
use crate::error::{GatewayError, GatewayResult};
use crate::platform::{HttpParentPlatform, ParentPlatform, SharedPlatform};
use crate::protocol::{Registrar, Session};

/// Business logic of an agent exposed through the container.
///
/// Every method runs on the agent's own mailbox task, one call at a time.
#[async_trait]
pub trait ContainerizedAgent: Send + 'static {
    /// Capability snapshot submitted on every (re-)registration.
    ///
    /// # Errors
    ///
    /// Returns the validation error of an inconsistent descriptor.
    fn descriptor(&self, agent_id: &AgentId) -> agent_primitives::Result<AgentDescriptor>;

    /// Channels the agent listens on.
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs an action.
    async fn invoke(
        &mut self,
        scope: &mut AgentScope<'_>,
        action: &str,
        parameters: Parameters,
    ) -> ActionResult<Value>;

    /// Produces the bytes of a GET stream.
    async fn stream_get(&mut self, scope: &mut AgentScope<'_>, stream: &str) -> ActionResult<ByteStream> {
        let _ = scope;
        Err(ActionError::unsupported(format_args!("stream {stream}")))
    }

    /// Consumes the bytes of a POST stream.
    async fn stream_post(
        &mut self,
        scope: &mut AgentScope<'_>,
        stream: &str,
        body: ByteStream,
    ) -> ActionResult<()> {
        let _ = (scope, body);
        Err(ActionError::unsupported(format_args!("stream {stream}")))
    }

    /// Reacts to a direct message.
    async fn on_message(&mut self, scope: &mut AgentScope<'_>, message: Message) -> HandlerResult {
        let _ = (scope, message);
        Err(HandlerError::Unsupported("message"))
    }

    /// Reacts to a message published on a subscribed channel.
    async fn on_broadcast(
        &mut self,
        scope: &mut AgentScope<'_>,
        channel: &str,
        message: Message,
    ) -> HandlerResult {
        let _ = (scope, channel, message);
        Err(HandlerError::Unsupported("broadcast"))
    }
}

#[derive(Debug, Default)]
struct Effects {
    reregister: Option<bool>,
    stop: bool,
}

/// What an agent may do while handling an envelope.
///
/// Re-registration and stopping are applied right after the handler
/// returns and before a reply is delivered.
pub struct AgentScope<'a> {
    ctx: &'a AgentContext,
    session: &'a Session,
    registrar: &'a Registrar,
    outbound: Option<&'a SharedPlatform>,
    effects: Effects,
}

impl<'a> AgentScope<'a> {
    /// Identifier of the running agent.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        self.ctx.agent_id()
    }

    /// Session data received at registration.
    #[must_use]
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Hosting runtime.
    #[must_use]
    pub fn system(&self) -> Option<AgentSystem> {
        self.ctx.system()
    }

    /// Client for calls through the parent platform, when one is configured.
    #[must_use]
    pub fn outbound(&self) -> Option<&'a dyn ParentPlatform> {
        self.outbound.map(|platform| &**platform)
    }

    /// Submits a fresh descriptor snapshot once the current handler returns.
    pub fn reregister(&mut self, notify: bool) {
        self.effects.reregister = Some(notify);
    }

    /// Deregisters without notifying the platform and stops the agent once
    /// the current handler returns.
    pub fn stop(&mut self) {
        self.effects.stop = true;
    }

    /// Starts another containerized agent in the same runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when the runtime is gone or
    /// refuses the agent.
    pub fn spawn<B: ContainerizedAgent>(&self, agent_id: AgentId, agent: B) -> GatewayResult<AgentRef> {
        let system = self
            .system()
            .ok_or_else(|| GatewayError::Unavailable("agent system is gone".into()))?;
        spawn_containerized(&system, self.registrar.clone(), agent_id, agent)
    }
}

/// Starts `agent` under `agent_id` wrapped in [`Containerized`].
///
/// # Errors
///
/// Returns [`GatewayError::Unavailable`] when the runtime refuses the agent.
pub fn spawn_containerized<B: ContainerizedAgent>(
    system: &AgentSystem,
    registrar: Registrar,
    agent_id: AgentId,
    agent: B,
) -> GatewayResult<AgentRef> {
    system
        .spawn(agent_id, Containerized::new(agent, registrar))
        .map_err(|err| GatewayError::Unavailable(err.to_string()))
}

/// Kernel agent registering `A` with the gateway on start and removing it on
/// stop.
pub struct Containerized<A> {
    inner: A,
    registrar: Registrar,
    session: Session,
    credentials: Option<CredentialStore>,
    outbound: Option<SharedPlatform>,
    registered: bool,
}

impl<A: ContainerizedAgent> Containerized<A> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: A, registrar: Registrar) -> Self {
        Self {
            inner,
            registrar,
            session: Session::default(),
            credentials: None,
            outbound: None,
            registered: false,
        }
    }

    async fn register(&mut self, agent_id: &AgentId, notify: bool) -> Result<(), String> {
        let descriptor = self
            .inner
            .descriptor(agent_id)
            .map_err(|err| format!("invalid descriptor: {err}"))?;
        let session = self
            .registrar
            .register(descriptor, notify)
            .await
            .map_err(|err| err.to_string())?;
        info!(agent_id = %agent_id, platform = ?session.platform_url, "registered");

        if !self.registered && self.outbound.is_none() {
            self.connect_outbound(&session);
        }
        self.session = session;
        self.registered = true;
        Ok(())
    }

    fn connect_outbound(&mut self, session: &Session) {
        let Some(url) = session.platform_url.as_deref() else {
            return;
        };
        let credentials = CredentialStore::new(Credential::new(
            session.token.clone(),
            session.platform_url.clone(),
            session.container_id.clone(),
        ));
        match HttpParentPlatform::new(url, credentials.clone()) {
            Ok(client) => {
                self.outbound = Some(Arc::new(client));
                self.credentials = Some(credentials);
            }
            Err(err) => warn!(%err, "outbound platform client unavailable"),
        }
    }

    fn split<'s>(&'s mut self, ctx: &'s AgentContext) -> (&'s mut A, AgentScope<'s>) {
        let scope = AgentScope {
            ctx,
            session: &self.session,
            registrar: &self.registrar,
            outbound: self.outbound.as_ref(),
            effects: Effects::default(),
        };
        (&mut self.inner, scope)
    }

    async fn apply(&mut self, ctx: &AgentContext, effects: Effects) {
        let agent_id = ctx.agent_id().clone();
        if effects.stop {
            if let Err(err) = self.registrar.deregister(agent_id.clone(), false).await {
                warn!(agent_id = %agent_id, %err, "deregistration failed");
            }
            self.registered = false;
            ctx.stop();
            return;
        }
        if let Some(notify) = effects.reregister {
            if let Err(err) = self.register(&agent_id, notify).await {
                warn!(agent_id = %agent_id, %err, "re-registration failed");
            }
        }
    }
}

#[async_trait]
impl<A: ContainerizedAgent> Agent for Containerized<A> {
    async fn started(&mut self, ctx: &AgentContext) -> HandlerResult {
        let agent_id = ctx.agent_id().clone();
        self.register(&agent_id, true).await.map_err(HandlerError::custom)?;
        if let Some(system) = ctx.system() {
            for channel in self.inner.subscriptions() {
                system.subscribe(channel, agent_id.clone());
            }
        }
        Ok(())
    }

    async fn handle_request(&mut self, ctx: &AgentContext, request: Request) -> ActionResult<Reply> {
        let (inner, mut scope) = self.split(ctx);
        let outcome = match request {
            Request::Invoke { action, parameters } => {
                inner.invoke(&mut scope, &action, parameters).await.map(Reply::Value)
            }
            Request::StreamGet { stream } => inner.stream_get(&mut scope, &stream).await.map(Reply::Stream),
            Request::StreamPost { stream, body } => inner
                .stream_post(&mut scope, &stream, body)
                .await
                .map(|()| Reply::Done),
        };
        let effects = scope.effects;
        self.apply(ctx, effects).await;
        outcome
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: Message) -> HandlerResult {
        let (inner, mut scope) = self.split(ctx);
        let outcome = inner.on_message(&mut scope, message).await;
        let effects = scope.effects;
        self.apply(ctx, effects).await;
        outcome
    }

    async fn handle_broadcast(
        &mut self,
        ctx: &AgentContext,
        channel: &str,
        message: Message,
    ) -> HandlerResult {
        let (inner, mut scope) = self.split(ctx);
        let outcome = inner.on_broadcast(&mut scope, channel, message).await;
        let effects = scope.effects;
        self.apply(ctx, effects).await;
        outcome
    }

    async fn handle_renew_token(&mut self, ctx: &AgentContext, token: String) -> HandlerResult {
        info!(agent_id = %ctx.agent_id(), "credential renewed");
        if let Some(credentials) = &self.credentials {
            credentials.replace_token(token.clone());
        }
        self.session.token = Some(token);
        Ok(())
    }

    async fn stopped(&mut self, ctx: &AgentContext) {
        if !self.registered {
            return;
        }
        if let Err(err) = self.registrar.deregister(ctx.agent_id().clone(), true).await {
            warn!(agent_id = %ctx.agent_id(), %err, "deregistration on stop failed");
        }
        self.registered = false;
    }
}
