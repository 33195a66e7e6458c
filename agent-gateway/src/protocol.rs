//! Registration protocol handler: the single writer of the registry and the
//! credential.
//!
//! Every mutation travels through one control channel and is applied by one
//! task, in arrival order. The task never waits on an agent mailbox or on the
//! parent platform; both happen on detached scheduler tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agent_kernel::{AgentSystem, TaskScheduler};
use agent_primitives::{AgentDescriptor, AgentId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::credential::CredentialStore;
use crate::error::{GatewayError, GatewayResult};
use crate::lifecycle::{Lifecycle, RegistrationEvent, Transition};
use crate::platform::SharedPlatform;
use crate::registry::AgentRegistry;

const CONTROL_CAPACITY: usize = 256;

/// What a registering agent needs for its own outbound calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Parent platform, if any.
    pub platform_url: Option<String>,
    /// Hosting container.
    pub container_id: String,
    /// Current bearer token, if any.
    pub token: Option<String>,
}

enum Control {
    Register {
        descriptor: AgentDescriptor,
        notify: bool,
        reply: oneshot::Sender<Session>,
    },
    Deregister {
        agent_id: AgentId,
        notify: bool,
        done: oneshot::Sender<()>,
    },
    RenewCredential {
        done: Option<oneshot::Sender<GatewayResult<()>>>,
    },
    ApplyCredential {
        token: String,
        done: Option<oneshot::Sender<GatewayResult<()>>>,
    },
    Shutdown,
}

/// Cloneable handle to the registration protocol handler.
#[derive(Debug, Clone)]
pub struct Registrar {
    tx: mpsc::Sender<Control>,
}

impl Registrar {
    /// Inserts or replaces the descriptor and returns the session data.
    /// With `notify`, the parent platform is told about the change.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] once the handler stopped.
    pub async fn register(&self, descriptor: AgentDescriptor, notify: bool) -> GatewayResult<Session> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Register {
            descriptor,
            notify,
            reply,
        })
        .await?;
        rx.await.map_err(|_| unavailable())
    }

    /// Removes the agent's entry. Absent ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] once the handler stopped.
    pub async fn deregister(&self, agent_id: AgentId, notify: bool) -> GatewayResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(Control::Deregister {
            agent_id,
            notify,
            done,
        })
        .await?;
        rx.await.map_err(|_| unavailable())
    }

    /// Fetches a fresh credential, stores it, and pushes it to every
    /// registered agent. Resolves once the new credential is in effect; the
    /// pushes themselves are fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when no platform is configured,
    /// the platform call fails, or the handler stopped.
    pub async fn renew_credential(&self) -> GatewayResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(Control::RenewCredential { done: Some(done) }).await?;
        rx.await.map_err(|_| unavailable())?
    }

    /// Stops the handler after the messages already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Control::Shutdown).await;
    }

    /// Runs [`renew_credential`](Self::renew_credential) every `period`,
    /// starting one period from now. Failures are logged and retried on the
    /// next tick. The loop ends with the handler.
    #[must_use]
    pub fn spawn_renewal(&self, period: Duration) -> JoinHandle<()> {
        let registrar = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if registrar.tx.is_closed() {
                    break;
                }
                let (done, rx) = oneshot::channel();
                if registrar
                    .send(Control::RenewCredential { done: Some(done) })
                    .await
                    .is_err()
                {
                    break;
                }
                match rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(%err, "credential renewal failed; retrying next interval"),
                    Err(_) => break,
                }
            }
            debug!("credential renewal loop stopped");
        })
    }

    async fn send(&self, control: Control) -> GatewayResult<()> {
        self.tx.send(control).await.map_err(|_| unavailable())
    }
}

fn unavailable() -> GatewayError {
    GatewayError::Unavailable("registration handler is not running".to_owned())
}

/// Shared flag telling whether the HTTP surface accepts requests.
/// Notifications are only sent while it is set.
#[derive(Debug, Clone, Default)]
pub struct ServingFlag(Arc<AtomicBool>);

impl ServingFlag {
    /// Marks the surface as serving or not.
    pub fn set(&self, serving: bool) {
        self.0.store(serving, Ordering::Release);
    }

    /// Returns `true` while serving.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Collaborators of the protocol handler.
pub(crate) struct ProtocolParts {
    pub registry: AgentRegistry,
    pub credentials: CredentialStore,
    pub platform: Option<SharedPlatform>,
    pub system: AgentSystem,
    pub serving: ServingFlag,
}

struct ProtocolHandler {
    parts: ProtocolParts,
    states: HashMap<AgentId, Lifecycle>,
    loopback: mpsc::WeakSender<Control>,
}

/// Starts the handler task and returns its handle.
pub(crate) fn spawn_protocol(parts: ProtocolParts) -> (Registrar, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
    let handler = ProtocolHandler {
        parts,
        states: HashMap::new(),
        loopback: tx.downgrade(),
    };
    let task = tokio::spawn(handler.run(rx));
    (Registrar { tx }, task)
}

impl ProtocolHandler {
    async fn run(mut self, mut rx: mpsc::Receiver<Control>) {
        while let Some(control) = rx.recv().await {
            match control {
                Control::Register {
                    descriptor,
                    notify,
                    reply,
                } => {
                    let session = self.register(descriptor, notify);
                    let _ = reply.send(session);
                }
                Control::Deregister {
                    agent_id,
                    notify,
                    done,
                } => {
                    self.deregister(&agent_id, notify);
                    let _ = done.send(());
                }
                Control::RenewCredential { done } => self.start_renewal(done),
                Control::ApplyCredential { token, done } => {
                    self.apply_credential(token);
                    if let Some(done) = done {
                        let _ = done.send(Ok(()));
                    }
                }
                Control::Shutdown => break,
            }
        }
        info!("registration handler stopped");
    }

    fn scheduler(&self) -> &TaskScheduler {
        self.parts.system.scheduler()
    }

    fn session(&self) -> Session {
        let credential = self.parts.credentials.current();
        Session {
            platform_url: credential.platform_url().map(str::to_owned),
            container_id: credential.container_id().to_owned(),
            token: credential.token().map(str::to_owned),
        }
    }

    fn register(&mut self, descriptor: AgentDescriptor, notify: bool) -> Session {
        let agent_id = descriptor.agent_id().clone();
        let lifecycle = self
            .states
            .entry(agent_id.clone())
            .or_insert_with(|| Lifecycle::new(agent_id.clone()));
        let transition = lifecycle.transition(RegistrationEvent::Register);

        info!(
            agent_id = %agent_id,
            actions = descriptor.actions().len(),
            streams = descriptor.streams().len(),
            update = matches!(transition, Ok(Transition::Updated)),
            "registering agent"
        );
        self.parts.registry.insert(descriptor);

        if notify {
            self.notify_platform();
        }
        self.session()
    }

    fn deregister(&mut self, agent_id: &AgentId, notify: bool) {
        let lifecycle = self
            .states
            .entry(agent_id.clone())
            .or_insert_with(|| Lifecycle::new(agent_id.clone()));
        if let Err(err) = lifecycle.transition(RegistrationEvent::Deregister) {
            debug!(%err, "deregistration ignored");
            return;
        }

        info!(agent_id = %agent_id, "de-registering agent");
        self.parts.registry.remove(agent_id);
        if notify {
            self.notify_platform();
        }
    }

    fn notify_platform(&self) {
        let Some(platform) = self.parts.platform.clone() else {
            return;
        };
        if !self.parts.serving.is_serving() {
            debug!("surface not serving yet; platform notification skipped");
            return;
        }

        let container_id = self.parts.credentials.current().container_id().to_owned();
        self.scheduler().spawn_detached("notify-platform", async move {
            match platform.notify_update_container(&container_id).await {
                Ok(true) => debug!(%container_id, "platform notified"),
                Ok(false) => warn!(%container_id, "platform declined the container update"),
                Err(err) => error!(%container_id, %err, "failed to notify parent platform"),
            }
        });
    }

    fn start_renewal(&self, done: Option<oneshot::Sender<GatewayResult<()>>>) {
        let reject = |done: Option<oneshot::Sender<GatewayResult<()>>>, err: GatewayError| {
            if let Some(done) = done {
                let _ = done.send(Err(err));
            }
        };

        let Some(platform) = self.parts.platform.clone() else {
            reject(done, GatewayError::Unavailable("no parent platform configured".into()));
            return;
        };
        if self.parts.credentials.current().token().is_none() {
            debug!("no credential configured; renewal skipped");
            if let Some(done) = done {
                let _ = done.send(Ok(()));
            }
            return;
        }
        let Some(loopback) = self.loopback.upgrade() else {
            reject(done, unavailable());
            return;
        };

        info!("renewing credential");
        self.scheduler().spawn_detached("renew-credential", async move {
            match platform.renew_token().await {
                Ok(token) => {
                    let _ = loopback.send(Control::ApplyCredential { token, done }).await;
                }
                Err(err) => {
                    error!(%err, "error during credential renewal");
                    if let Some(done) = done {
                        let _ = done.send(Err(GatewayError::Unavailable(format!(
                            "credential renewal failed: {err}"
                        ))));
                    }
                }
            }
        });
    }

    fn apply_credential(&self, token: String) {
        self.parts.credentials.replace_token(token.clone());

        let recipients = self.parts.registry.ids();
        info!(agents = recipients.len(), "credential renewed; pushing to agents");
        for agent_id in recipients {
            let Some(agent) = self.parts.system.resolve(&agent_id) else {
                debug!(agent_id = %agent_id, "registered agent not running; push skipped");
                continue;
            };
            let token = token.clone();
            self.scheduler().spawn_detached("push-credential", async move {
                if let Err(err) = agent.renew_token(token).await {
                    warn!(agent_id = %agent_id, %err, "credential push failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::platform::{ParentPlatform, PlatformResult};
    use crate::registry::Target;
    use agent_primitives::ActionSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlatform {
        notified: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ParentPlatform for RecordingPlatform {
        async fn notify_update_container(&self, container_id: &str) -> PlatformResult<bool> {
            self.notified.lock().unwrap().push(container_id.to_owned());
            Ok(true)
        }

        async fn renew_token(&self) -> PlatformResult<String> {
            Ok("fresh".into())
        }
    }

    fn descriptor(id: &str, actions: &[&str]) -> AgentDescriptor {
        actions
            .iter()
            .fold(AgentDescriptor::builder(AgentId::new(id).unwrap()), |builder, action| {
                builder.action(ActionSpec::new(*action).unwrap())
            })
            .build()
            .unwrap()
    }

    fn start(platform: Option<SharedPlatform>, serving: bool) -> (Registrar, AgentRegistry, CredentialStore) {
        let registry = AgentRegistry::default();
        let credentials = CredentialStore::new(Credential::new(
            Some("initial".into()),
            Some("http://platform".into()),
            "container-1",
        ));
        let flag = ServingFlag::default();
        flag.set(serving);
        let (registrar, _task) = spawn_protocol(ProtocolParts {
            registry: registry.clone(),
            credentials: credentials.clone(),
            platform,
            system: AgentSystem::default(),
            serving: flag,
        });
        (registrar, registry, credentials)
    }

    #[tokio::test]
    async fn register_replies_with_session() {
        let (registrar, registry, _) = start(None, true);
        let session = registrar.register(descriptor("sample1", &["Add"]), true).await.unwrap();

        assert_eq!(session.container_id, "container-1");
        assert_eq!(session.platform_url.as_deref(), Some("http://platform"));
        assert_eq!(session.token.as_deref(), Some("initial"));
        assert!(registry.resolve(Target::action("Add", None)).is_ok());
    }

    #[tokio::test]
    async fn notifications_wait_for_the_surface() {
        let platform = Arc::new(RecordingPlatform::default());
        let (registrar, _, _) = start(Some(platform.clone()), false);
        registrar.register(descriptor("quiet", &[]), true).await.unwrap();
        tokio::task::yield_now().await;
        assert!(platform.notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notify_flag_reaches_the_platform() {
        let platform = Arc::new(RecordingPlatform::default());
        let (registrar, _, _) = start(Some(platform.clone()), true);
        registrar.register(descriptor("loud", &[]), true).await.unwrap();
        registrar.register(descriptor("loud", &["Extra"]), false).await.unwrap();
        registrar.deregister(AgentId::new("loud").unwrap(), true).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while platform.notified.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(platform.notified.lock().unwrap().as_slice(), ["container-1", "container-1"]);
    }

    #[tokio::test]
    async fn deregistering_unknown_agent_is_a_no_op() {
        let (registrar, registry, _) = start(None, true);
        registrar.deregister(AgentId::new("ghost").unwrap(), true).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn renewal_replaces_the_credential() {
        let platform: SharedPlatform = Arc::new(RecordingPlatform::default());
        let (registrar, _, credentials) = start(Some(platform), true);
        registrar.renew_credential().await.unwrap();
        assert_eq!(credentials.current().token(), Some("fresh"));
    }

    #[tokio::test]
    async fn renewal_without_platform_is_unavailable() {
        let (registrar, _, credentials) = start(None, true);
        let err = registrar.renew_credential().await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert_eq!(credentials.current().token(), Some("initial"));
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_unavailable() {
        let (registrar, _, _) = start(None, true);
        registrar.shutdown().await;
        let err = registrar.register(descriptor("late", &[]), false).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
}
