use std::time::Duration;

use agent_container::gateway::{AgentScope, ContainerizedAgent};
use agent_container::kernel::{ActionError, ActionResult, ByteStream, HandlerResult, Parameters};
use agent_container::primitives::{
    ActionSpec, AgentDescriptor, AgentId, Message, ParameterSpec, StreamMode, StreamSpec,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde_json::{Value, json};
use tracing::info;

/// Agent showing off everything a containerized agent can do.
#[derive(Debug, Default)]
pub struct SampleAgent {
    last_message: Option<Value>,
    last_broadcast: Option<Value>,
    last_posted_stream: Option<String>,
    extra_actions: Vec<String>,
}

impl SampleAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

fn required<'p>(parameters: &'p Parameters, name: &str) -> ActionResult<&'p Value> {
    parameters
        .get(name)
        .ok_or_else(|| ActionError::new(format!("missing parameter {name}")))
}

fn required_str<'p>(parameters: &'p Parameters, name: &str) -> ActionResult<&'p str> {
    required(parameters, name)?
        .as_str()
        .ok_or_else(|| ActionError::new(format!("parameter {name} must be a string")))
}

fn required_int(parameters: &Parameters, name: &str) -> ActionResult<i64> {
    required(parameters, name)?
        .as_i64()
        .ok_or_else(|| ActionError::new(format!("parameter {name} must be an integer")))
}

fn error_test(hint: &str) -> ActionResult<Value> {
    match hint {
        "no-error" => Ok(json!("no error")),
        "not-found-error" => Err(ActionError::not_found("does not exist")),
        "io-error" => Err(ActionError::with_kind("io", "io exception")),
        "runtime-error" => Err(ActionError::new("some runtime error")),
        "custom-error" => Err(ActionError::custom(666, "custom exception")),
        _ => Ok(json!("default")),
    }
}

#[async_trait]
impl ContainerizedAgent for SampleAgent {
    fn descriptor(&self, agent_id: &AgentId) -> agent_container::primitives::Result<AgentDescriptor> {
        let nested_ints = ParameterSpec::array(ParameterSpec::array(ParameterSpec::new("integer")));
        let mut builder = AgentDescriptor::builder(agent_id.clone())
            .agent_type("sample-agent")
            .action(
                ActionSpec::new("DoThis")?
                    .with_parameter("message", ParameterSpec::new("string"))
                    .with_parameter("sleep_seconds", ParameterSpec::new("integer"))
                    .with_result(ParameterSpec::new("string")),
            )
            .action(ActionSpec::new("GetInfo")?.with_result(ParameterSpec::new("object")))
            .action(
                ActionSpec::new("Add")?
                    .with_parameter("x", ParameterSpec::new("integer"))
                    .with_parameter("y", ParameterSpec::new("integer"))
                    .with_result(ParameterSpec::new("integer")),
            )
            .action(ActionSpec::new("Fail")?)
            .action(
                ActionSpec::new("CreateAction")?
                    .with_parameter("name", ParameterSpec::new("string"))
                    .with_parameter("notify", ParameterSpec::optional("boolean")),
            )
            .action(ActionSpec::new("SpawnAgent")?.with_parameter("name", ParameterSpec::new("string")))
            .action(ActionSpec::new("Deregister")?)
            .action(
                ActionSpec::new("ErrorTest")?
                    .with_parameter("hint", ParameterSpec::new("string"))
                    .with_result(ParameterSpec::new("string")),
            )
            .action(
                ActionSpec::new("ValidatorTest")?
                    .with_parameter("car", ParameterSpec::new("Car"))
                    .with_parameter("listOfLists", nested_ints)
                    .with_parameter("decimal", ParameterSpec::optional("number"))
                    .with_result(ParameterSpec::new("string")),
            )
            .stream(StreamSpec::new("GetStream", StreamMode::Get)?)
            .stream(StreamSpec::new("PostStream", StreamMode::Post)?);
        for name in &self.extra_actions {
            builder = builder.action(ActionSpec::new(name.clone())?.with_result(ParameterSpec::new("string")));
        }
        builder.build()
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["topic".to_owned()]
    }

    async fn invoke(
        &mut self,
        scope: &mut AgentScope<'_>,
        action: &str,
        parameters: Parameters,
    ) -> ActionResult<Value> {
        match action {
            "DoThis" => {
                let message = required_str(&parameters, "message")?;
                let sleep_seconds = required_int(&parameters, "sleep_seconds")?;
                info!(agent_id = %scope.agent_id(), "in 'DoThis' action, waiting...");
                tokio::time::sleep(Duration::from_secs(sleep_seconds.unsigned_abs())).await;
                info!(agent_id = %scope.agent_id(), "done waiting");
                Ok(json!(format!(
                    "Action 'DoThis' of {} called with message={message} and sleep_seconds={sleep_seconds}",
                    scope.agent_id()
                )))
            }
            "GetInfo" => {
                let session = scope.session();
                Ok(json!({
                    "name": scope.agent_id(),
                    "lastMessage": self.last_message,
                    "lastBroadcast": self.last_broadcast,
                    "lastPostedStream": self.last_posted_stream,
                    "CONTAINER_ID": session.container_id,
                    "PLATFORM_URL": session.platform_url,
                    "TOKEN": session.token,
                }))
            }
            "Add" => Ok(json!(required_int(&parameters, "x")? + required_int(&parameters, "y")?)),
            "Fail" => Err(ActionError::new("Action Failed (as expected)")),
            "CreateAction" => {
                let name = required_str(&parameters, "name")?.to_owned();
                let notify = parameters.get("notify").and_then(Value::as_bool).unwrap_or(true);
                if !self.extra_actions.contains(&name) {
                    self.extra_actions.push(name);
                }
                scope.reregister(notify);
                Ok(Value::Null)
            }
            "SpawnAgent" => {
                let name = required_str(&parameters, "name")?;
                let agent_id = AgentId::new(name).map_err(|err| ActionError::new(err.to_string()))?;
                scope
                    .spawn(agent_id, SampleAgent::new())
                    .map_err(|err| ActionError::new(err.to_string()))?;
                Ok(Value::Null)
            }
            "Deregister" => {
                scope.stop();
                Ok(Value::Null)
            }
            "ErrorTest" => error_test(required_str(&parameters, "hint")?),
            "ValidatorTest" => {
                let car = required(&parameters, "car")?;
                let lists = required(&parameters, "listOfLists")?;
                Ok(json!(format!(
                    "ValidatorTest:\nParameter \"car\": {car}\nParameter \"listOfLists\": {lists}"
                )))
            }
            other if self.extra_actions.iter().any(|name| name == other) => {
                Ok(json!(format!("Called extra action {other}")))
            }
            other => Err(ActionError::not_found(format!(
                "Action {other} of Agent {} not found",
                scope.agent_id()
            ))),
        }
    }

    async fn stream_get(&mut self, _scope: &mut AgentScope<'_>, stream: &str) -> ActionResult<ByteStream> {
        match stream {
            "GetStream" => Ok(Box::pin(stream::once(async {
                Ok::<_, std::io::Error>(Bytes::from_static(br#"{"key":"value"}"#))
            }))),
            other => Err(ActionError::not_found(format!("Stream {other} not found"))),
        }
    }

    async fn stream_post(
        &mut self,
        _scope: &mut AgentScope<'_>,
        stream: &str,
        mut body: ByteStream,
    ) -> ActionResult<()> {
        if stream != "PostStream" {
            return Err(ActionError::not_found(format!("Stream {stream} not found")));
        }
        let mut content = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| ActionError::with_kind("io", err.to_string()))?;
            content.extend_from_slice(&chunk);
        }
        self.last_posted_stream = Some(String::from_utf8_lossy(&content).into_owned());
        Ok(())
    }

    async fn on_message(&mut self, scope: &mut AgentScope<'_>, message: Message) -> HandlerResult {
        info!(agent_id = %scope.agent_id(), payload = %message.payload, "ON message");
        self.last_message = Some(message.payload);
        Ok(())
    }

    async fn on_broadcast(
        &mut self,
        scope: &mut AgentScope<'_>,
        channel: &str,
        message: Message,
    ) -> HandlerResult {
        info!(agent_id = %scope.agent_id(), channel, payload = %message.payload, "LISTEN broadcast");
        self.last_broadcast = Some(message.payload);
        Ok(())
    }
}
