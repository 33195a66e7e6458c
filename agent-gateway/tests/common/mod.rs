#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_config::ContainerConfig;
use agent_gateway::{AgentScope, ContainerizedAgent, Gateway, GatewayError, ParentPlatform, PlatformResult};
use agent_kernel::{ActionError, ActionResult, ByteStream, HandlerResult, Parameters};
use agent_primitives::{
    ActionSpec, AgentDescriptor, AgentId, ContainerImage, Message, ParameterSpec, StreamMode, StreamSpec,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde_json::{Value, json};

pub const TOKEN: &str = "token-1";
pub const RENEWED_TOKEN: &str = "token-2";

/// Everything a [`Worker`] observed, shared with the test body.
#[derive(Debug, Default, Clone)]
pub struct Journal {
    pub records: Arc<Mutex<Vec<i64>>>,
    pub messages: Arc<Mutex<Vec<Value>>>,
    pub broadcasts: Arc<Mutex<Vec<(String, Value)>>>,
    pub uploads: Arc<Mutex<Vec<u8>>>,
}

/// Test agent exposing a small calculator, a few failure modes, and two
/// streams.
pub struct Worker {
    journal: Journal,
    extra_actions: Vec<String>,
}

impl Worker {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            extra_actions: Vec::new(),
        }
    }
}

fn int(parameters: &Parameters, name: &str) -> ActionResult<i64> {
    parameters
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| ActionError::new(format!("missing integer parameter {name}")))
}

#[async_trait]
impl ContainerizedAgent for Worker {
    fn descriptor(&self, agent_id: &AgentId) -> agent_primitives::Result<AgentDescriptor> {
        let mut builder = AgentDescriptor::builder(agent_id.clone())
            .agent_type("worker")
            .action(
                ActionSpec::new("Add")?
                    .with_parameter("x", ParameterSpec::new("integer"))
                    .with_parameter("y", ParameterSpec::new("integer"))
                    .with_result(ParameterSpec::new("integer")),
            )
            .action(ActionSpec::new("Fail")?)
            .action(ActionSpec::new("Sleep")?.with_parameter("millis", ParameterSpec::new("integer")))
            .action(ActionSpec::new("Record")?.with_parameter("value", ParameterSpec::new("integer")))
            .action(ActionSpec::new("AddAction")?.with_parameter("name", ParameterSpec::new("string")))
            .action(ActionSpec::new("Token")?)
            .action(ActionSpec::new("Stop")?)
            .action(ActionSpec::new("Teapot")?)
            .action(ActionSpec::new("Io")?)
            .stream(StreamSpec::new("Bytes", StreamMode::Get)?)
            .stream(StreamSpec::new("Upload", StreamMode::Post)?);
        for name in &self.extra_actions {
            builder = builder.action(ActionSpec::new(name.clone())?);
        }
        builder.build()
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["topic".into()]
    }

    async fn invoke(
        &mut self,
        scope: &mut AgentScope<'_>,
        action: &str,
        parameters: Parameters,
    ) -> ActionResult<Value> {
        match action {
            "Add" => Ok(json!(int(&parameters, "x")? + int(&parameters, "y")?)),
            "Fail" => Err(ActionError::new("Action Failed (as expected)")),
            "Sleep" => {
                let millis = int(&parameters, "millis")?;
                tokio::time::sleep(Duration::from_millis(millis.unsigned_abs())).await;
                Ok(json!(millis))
            }
            "Record" => {
                let value = int(&parameters, "value")?;
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.journal.records.lock().unwrap().push(value);
                Ok(json!(value))
            }
            "AddAction" => {
                let name = parameters
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ActionError::new("missing name"))?;
                self.extra_actions.push(name.to_owned());
                scope.reregister(true);
                Ok(Value::Null)
            }
            "Token" => Ok(json!(scope.session().token)),
            "Stop" => {
                scope.stop();
                Ok(Value::Null)
            }
            "Teapot" => Err(ActionError::custom(418, "short and stout")),
            "Io" => Err(ActionError::with_kind("io", "disk on fire")),
            other if self.extra_actions.iter().any(|name| name == other) => Ok(json!(other)),
            other => Err(ActionError::not_found(format!("Action {other} not found"))),
        }
    }

    async fn stream_get(&mut self, _scope: &mut AgentScope<'_>, stream: &str) -> ActionResult<ByteStream> {
        if stream != "Bytes" {
            return Err(ActionError::not_found(format!("Stream {stream} not found")));
        }
        let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn stream_post(
        &mut self,
        _scope: &mut AgentScope<'_>,
        stream: &str,
        mut body: ByteStream,
    ) -> ActionResult<()> {
        if stream != "Upload" {
            return Err(ActionError::not_found(format!("Stream {stream} not found")));
        }
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| ActionError::with_kind("io", err.to_string()))?;
            self.journal.uploads.lock().unwrap().extend_from_slice(&chunk);
        }
        Ok(())
    }

    async fn on_message(&mut self, _scope: &mut AgentScope<'_>, message: Message) -> HandlerResult {
        assert_ne!(message.payload, json!("panic"), "message handler blew up");
        self.journal.messages.lock().unwrap().push(message.payload);
        Ok(())
    }

    async fn on_broadcast(
        &mut self,
        _scope: &mut AgentScope<'_>,
        channel: &str,
        message: Message,
    ) -> HandlerResult {
        self.journal
            .broadcasts
            .lock()
            .unwrap()
            .push((channel.to_owned(), message.payload));
        Ok(())
    }
}

/// Parent platform double recording what the container told it.
#[derive(Debug, Default)]
pub struct FakePlatform {
    pub notified: Mutex<Vec<String>>,
    pub renewals: Mutex<usize>,
}

#[async_trait]
impl ParentPlatform for FakePlatform {
    async fn notify_update_container(&self, container_id: &str) -> PlatformResult<bool> {
        self.notified.lock().unwrap().push(container_id.to_owned());
        Ok(true)
    }

    async fn renew_token(&self) -> PlatformResult<String> {
        *self.renewals.lock().unwrap() += 1;
        Ok(RENEWED_TOKEN.to_owned())
    }
}

pub fn agent_id(id: &str) -> AgentId {
    AgentId::new(id).unwrap()
}

pub fn parameters(value: Value) -> Parameters {
    value.as_object().cloned().unwrap_or_default()
}

/// Standalone gateway without credential.
pub fn open_gateway() -> Gateway {
    Gateway::builder(ContainerConfig::standalone("container-1"), ContainerImage::new("test-image"))
        .arguments(Default::default())
        .build()
        .unwrap()
}

/// Gateway with a credential and a fake parent platform.
pub fn secured_gateway(platform: Arc<FakePlatform>) -> Gateway {
    let mut config = ContainerConfig::standalone("container-1");
    config.platform_url = Some("http://platform.test".into());
    config.token = Some(TOKEN.into());
    Gateway::builder(config, ContainerImage::new("test-image"))
        .platform(platform)
        .arguments(Default::default())
        .build()
        .unwrap()
}

/// Standalone gateway whose agents buffer at most `capacity` envelopes.
pub fn gateway_with_mailbox(capacity: usize) -> Gateway {
    let mut config = ContainerConfig::standalone("container-1");
    config.mailbox_capacity = std::num::NonZeroUsize::new(capacity).unwrap();
    Gateway::builder(config, ContainerImage::new("test-image"))
        .arguments(Default::default())
        .build()
        .unwrap()
}

pub async fn spawn_worker(gateway: &Gateway, id: &str) -> Journal {
    let journal = Journal::default();
    gateway
        .spawn_agent(agent_id(id), Worker::new(journal.clone()))
        .await
        .unwrap();
    journal
}

/// Parks `id` in a minute-long action and fills its mailbox behind it.
/// Expects a gateway built by [`gateway_with_mailbox`] with capacity one.
pub async fn jam_mailbox(gateway: &Gateway, id: &str) {
    let sleeper = gateway.clone();
    let target = id.to_owned();
    tokio::spawn(async move {
        let _ = sleeper
            .invoke("Sleep", parameters(json!({"millis": 60_000})), Some(&target), 120)
            .await;
    });
    // Let the sleeper take the first slot before filling the rest.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let filled = tokio::time::timeout(Duration::from_secs(2), async {
        let mut accepted = 0;
        loop {
            match gateway.send(id, Message::new(json!("filler"))) {
                Ok(()) => accepted += 1,
                Err(GatewayError::Unavailable(_)) if accepted > 0 => break,
                Err(GatewayError::Unavailable(_)) => {}
                Err(err) => panic!("unexpected {err}"),
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(filled.is_ok(), "mailbox of {id} never filled up");
}

/// Polls `condition` every few milliseconds for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
