//! Address book, mailbox loops, and the topic broker.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use agent_primitives::{AgentId, Message};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::mailbox::{
    ActionError, Agent, Envelope, HandlerError, HandlerResult, Reply, Request, Responder,
    envelope_label,
};
use crate::scheduler::{SchedulerConfig, TaskScheduler};

/// How long [`AgentSystem::shutdown`] waits for agents to wind down.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Sizing of the runtime.
#[derive(Debug, Clone, Copy)]
pub struct SystemConfig {
    mailbox_capacity: NonZeroUsize,
    scheduler: SchedulerConfig,
}

impl SystemConfig {
    /// Default number of envelopes an agent mailbox buffers.
    pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

    /// Creates a configuration with the given mailbox capacity.
    #[must_use]
    pub fn new(mailbox_capacity: NonZeroUsize) -> Self {
        Self {
            mailbox_capacity,
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Replaces the scheduler configuration.
    #[must_use]
    pub const fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Mailbox capacity per agent.
    #[must_use]
    pub const fn mailbox_capacity(&self) -> NonZeroUsize {
        self.mailbox_capacity
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::new(
            NonZeroUsize::new(Self::DEFAULT_MAILBOX_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        )
    }
}

/// Errors raised by [`AgentSystem`] and [`AgentRef`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SystemError {
    /// An agent with this identifier is already running.
    #[error("agent {0} is already running")]
    DuplicateAgent(AgentId),
    /// The addressed agent stopped and no longer accepts envelopes.
    #[error("mailbox of agent {0} is closed")]
    MailboxClosed(AgentId),
    /// The addressed agent's mailbox has no free slot.
    #[error("mailbox of agent {0} is full")]
    MailboxFull(AgentId),
    /// The system was shut down.
    #[error("agent system is shut down")]
    ShutDown,
}

/// Result alias for runtime operations.
pub type SystemResult<T> = Result<T, SystemError>;

/// Failure of an [`AgentRef::ask`] exchange.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AskError {
    /// No answer arrived within the budget.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The agent answered with an error.
    #[error(transparent)]
    Agent(#[from] ActionError),
    /// The agent dropped the request without answering.
    #[error("agent {0} dropped the request without replying")]
    Dropped(AgentId),
    /// The agent's mailbox is closed.
    #[error("mailbox of agent {0} is closed")]
    MailboxClosed(AgentId),
}

/// Cloneable handle used to deliver envelopes to one running agent.
#[derive(Debug, Clone)]
pub struct AgentRef {
    id: AgentId,
    incarnation: u64,
    tx: mpsc::Sender<Envelope>,
}

impl AgentRef {
    /// Identifier of the addressed agent.
    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Returns `true` once the agent stopped processing its mailbox.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues an envelope, waiting while the mailbox is full.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::MailboxClosed`] when the agent has stopped.
    pub async fn tell(&self, envelope: Envelope) -> SystemResult<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SystemError::MailboxClosed(self.id.clone()))
    }

    /// Queues an envelope only if the mailbox has a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::MailboxFull`] when no slot is free and
    /// [`SystemError::MailboxClosed`] when the agent has stopped.
    pub fn try_tell(&self, envelope: Envelope) -> SystemResult<()> {
        self.tx.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => SystemError::MailboxFull(self.id.clone()),
            TrySendError::Closed(_) => SystemError::MailboxClosed(self.id.clone()),
        })
    }

    /// Queues a request whose outcome is delivered through `responder`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::MailboxClosed`] when the agent has stopped.
    pub async fn submit(&self, request: Request, responder: Responder) -> SystemResult<()> {
        self.tell(Envelope::Ask { request, responder }).await
    }

    /// Sends a request and waits for its answer. The budget covers both
    /// queueing into a full mailbox and waiting for the reply.
    ///
    /// # Errors
    ///
    /// See [`AskError`].
    pub async fn ask(&self, request: Request, timeout: Duration) -> Result<Reply, AskError> {
        let (responder, rx) = Responder::channel();
        let exchange = async {
            self.submit(request, responder)
                .await
                .map_err(|_| AskError::MailboxClosed(self.id.clone()))?;
            match rx.await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(err)) => Err(AskError::Agent(err)),
                Err(_) => Err(AskError::Dropped(self.id.clone())),
            }
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| AskError::Timeout(timeout))?
    }

    /// Pushes a renewed credential to the agent.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::MailboxClosed`] when the agent has stopped.
    pub async fn renew_token(&self, token: impl Into<String>) -> SystemResult<()> {
        self.tell(Envelope::RenewToken(token.into())).await
    }

    /// Asks the agent to stop after the envelopes already queued.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::MailboxClosed`] when the agent has stopped.
    pub async fn stop(&self) -> SystemResult<()> {
        self.tell(Envelope::Stop).await
    }
}

/// Per-agent view of the runtime handed to every handler call.
#[derive(Debug)]
pub struct AgentContext {
    agent_id: AgentId,
    system: Weak<SystemInner>,
    stop_requested: AtomicBool,
}

impl AgentContext {
    /// Identifier of the agent being run.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The hosting runtime, unless it was dropped already.
    #[must_use]
    pub fn system(&self) -> Option<AgentSystem> {
        self.system.upgrade().map(|inner| AgentSystem { inner })
    }

    /// Stops the agent once the current envelope has been handled.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct SystemInner {
    config: SystemConfig,
    agents: RwLock<HashMap<AgentId, AgentRef>>,
    channels: RwLock<HashMap<String, BTreeSet<AgentId>>>,
    incarnations: AtomicU64,
    scheduler: TaskScheduler,
    closed: AtomicBool,
}

/// In-process message-passing runtime: every agent owns a bounded FIFO
/// mailbox drained by its own task, so distinct agents run concurrently
/// while each agent handles one envelope at a time.
///
/// # Panics
///
/// Methods panic if an internal lock was poisoned by a panicking writer.
#[derive(Debug, Clone)]
pub struct AgentSystem {
    inner: Arc<SystemInner>,
}

impl AgentSystem {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new(config: SystemConfig) -> Self {
        Self {
            inner: Arc::new(SystemInner {
                config,
                agents: RwLock::new(HashMap::new()),
                channels: RwLock::new(HashMap::new()),
                incarnations: AtomicU64::new(0),
                scheduler: TaskScheduler::new(config.scheduler),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> SystemConfig {
        self.inner.config
    }

    /// Scheduler for detached background work.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    /// Starts `agent` under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::DuplicateAgent`] if an agent with the same id is
    /// still running or has not finished its `stopped` hook yet, and [`SystemError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn spawn<A: Agent>(&self, id: AgentId, agent: A) -> SystemResult<AgentRef> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(SystemError::ShutDown);
        }

        let (tx, rx) = mpsc::channel(self.inner.config.mailbox_capacity.get());
        let agent_ref = AgentRef {
            id: id.clone(),
            incarnation: self.inner.incarnations.fetch_add(1, Ordering::Relaxed),
            tx,
        };

        {
            let mut agents = self.inner.agents.write().expect("agent map poisoned");
            // The entry stays until the previous incarnation has been forgotten.
            if agents.contains_key(&id) {
                return Err(SystemError::DuplicateAgent(id));
            }
            agents.insert(id.clone(), agent_ref.clone());
        }

        let ctx = AgentContext {
            agent_id: id.clone(),
            system: Arc::downgrade(&self.inner),
            stop_requested: AtomicBool::new(false),
        };
        let incarnation = agent_ref.incarnation;
        tokio::spawn(async move {
            run_mailbox(agent, &ctx, rx).await;
            if let Some(system) = ctx.system() {
                system.forget(&ctx.agent_id, incarnation);
            }
        });

        info!(agent_id = %id, "agent spawned");
        Ok(agent_ref)
    }

    /// Handle of a running agent.
    #[must_use]
    pub fn resolve(&self, id: &AgentId) -> Option<AgentRef> {
        let agents = self.inner.agents.read().expect("agent map poisoned");
        agents.get(id).filter(|agent| !agent.is_closed()).cloned()
    }

    /// Identifiers of all running agents, sorted.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let agents = self.inner.agents.read().expect("agent map poisoned");
        let mut ids: Vec<AgentId> = agents
            .values()
            .filter(|agent| !agent.is_closed())
            .map(|agent| agent.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Subscribes `id` to `channel`. Returns `false` if it already was.
    pub fn subscribe(&self, channel: impl Into<String>, id: AgentId) -> bool {
        let mut channels = self.inner.channels.write().expect("channel map poisoned");
        channels.entry(channel.into()).or_default().insert(id)
    }

    /// Removes the subscription of `id` to `channel`.
    pub fn unsubscribe(&self, channel: &str, id: &AgentId) -> bool {
        let mut channels = self.inner.channels.write().expect("channel map poisoned");
        let Some(members) = channels.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(id);
        if members.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Delivers `message` to every running subscriber of `channel` and
    /// returns how many received it. Never waits: a subscriber whose mailbox
    /// is full misses the message.
    pub fn publish(&self, channel: &str, message: Message) -> usize {
        let recipients: Vec<AgentRef> = {
            let channels = self.inner.channels.read().expect("channel map poisoned");
            let Some(members) = channels.get(channel) else {
                debug!(channel, "publish without subscribers");
                return 0;
            };
            members.iter().filter_map(|id| self.resolve(id)).collect()
        };

        let mut delivered = 0;
        for recipient in recipients {
            let envelope = Envelope::Broadcast {
                channel: channel.to_owned(),
                message: message.clone(),
            };
            match recipient.try_tell(envelope) {
                Ok(()) => delivered += 1,
                Err(err @ SystemError::MailboxFull(_)) => {
                    warn!(channel, agent_id = %recipient.id, %err, "broadcast dropped");
                }
                Err(err) => debug!(channel, %err, "subscriber gone"),
            }
        }
        delivered
    }

    /// Asks a running agent to stop. Returns `false` if it was not running.
    pub async fn stop(&self, id: &AgentId) -> bool {
        match self.resolve(id) {
            Some(agent) => agent.stop().await.is_ok(),
            None => false,
        }
    }

    /// Stops every agent and refuses further spawns. Waits up to
    /// [`SHUTDOWN_GRACE`] for the agents to finish their `stopped` hooks.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let agents: Vec<AgentRef> = {
            let agents = self.inner.agents.read().expect("agent map poisoned");
            agents.values().cloned().collect()
        };
        for agent in agents {
            if let Err(SystemError::MailboxFull(_)) = agent.try_tell(Envelope::Stop) {
                tokio::spawn(async move {
                    let _ = agent.stop().await;
                });
            }
        }

        let drained = async {
            while self.running_agents() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drained).await.is_err() {
            warn!(remaining = self.running_agents(), "agents still running after shutdown grace");
        }
        self.inner.scheduler.close();
        info!("agent system shut down");
    }

    fn running_agents(&self) -> usize {
        self.inner.agents.read().expect("agent map poisoned").len()
    }

    fn forget(&self, id: &AgentId, incarnation: u64) {
        {
            let mut agents = self.inner.agents.write().expect("agent map poisoned");
            if agents
                .get(id)
                .is_some_and(|current| current.incarnation == incarnation)
            {
                agents.remove(id);
            } else {
                // A newer agent took over the id and keeps its subscriptions.
                return;
            }
        }
        let mut channels = self.inner.channels.write().expect("channel map poisoned");
        channels.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }
}

impl Default for AgentSystem {
    fn default() -> Self {
        Self::new(SystemConfig::default())
    }
}

async fn run_mailbox<A: Agent>(mut agent: A, ctx: &AgentContext, mut rx: mpsc::Receiver<Envelope>) {
    let id = ctx.agent_id().clone();

    let started = guarded(&id, "started", agent.started(ctx)).await;
    match started {
        Ok(()) => serve(&mut agent, ctx, &mut rx).await,
        Err(err) => error!(agent_id = %id, %err, "agent failed to start"),
    }

    rx.close();
    if AssertUnwindSafe(agent.stopped(ctx)).catch_unwind().await.is_err() {
        error!(agent_id = %id, "stopped hook panicked");
    }
    info!(agent_id = %id, "agent stopped");
}

async fn serve<A: Agent>(agent: &mut A, ctx: &AgentContext, rx: &mut mpsc::Receiver<Envelope>) {
    let id = ctx.agent_id().clone();

    while let Some(envelope) = rx.recv().await {
        let label = envelope_label(&envelope);
        debug!(agent_id = %id, envelope = %label, "processing envelope");

        match envelope {
            Envelope::Ask { request, responder } => {
                if responder.is_abandoned() {
                    debug!(agent_id = %id, envelope = %label, "caller gave up; skipping");
                    continue;
                }
                let outcome = AssertUnwindSafe(agent.handle_request(ctx, request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        error!(agent_id = %id, envelope = %label, "handler panicked");
                        Err(ActionError::new(panic_message(panic.as_ref())))
                    });
                if !responder.respond(outcome) {
                    debug!(agent_id = %id, envelope = %label, "reply discarded; caller gone");
                }
            }
            Envelope::Message(message) => {
                let outcome = guarded(&id, &label, agent.handle_message(ctx, message)).await;
                report(&id, &label, outcome);
            }
            Envelope::Broadcast { channel, message } => {
                let outcome =
                    guarded(&id, &label, agent.handle_broadcast(ctx, &channel, message)).await;
                report(&id, &label, outcome);
            }
            Envelope::RenewToken(token) => {
                let outcome = guarded(&id, &label, agent.handle_renew_token(ctx, token)).await;
                report(&id, &label, outcome);
            }
            Envelope::Stop => ctx.stop(),
        }

        if ctx.is_stopping() {
            break;
        }
    }
}

/// Runs a fire-and-forget handler, turning a panic into a handler error.
async fn guarded<F>(id: &AgentId, label: &str, handler: F) -> HandlerResult
where
    F: Future<Output = HandlerResult>,
{
    AssertUnwindSafe(handler).catch_unwind().await.unwrap_or_else(|panic| {
        error!(agent_id = %id, envelope = label, "handler panicked");
        Err(HandlerError::custom(panic_message(panic.as_ref())))
    })
}

fn report(id: &AgentId, label: &str, result: Result<(), HandlerError>) {
    match result {
        Ok(()) => {}
        Err(HandlerError::Unsupported(what)) => {
            debug!(agent_id = %id, envelope = label, what, "envelope ignored");
        }
        Err(err) => warn!(agent_id = %id, envelope = label, %err, "handler failed"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "agent panicked".to_owned())
}
