//! Turns a synchronous request into an ask on the addressed agent's mailbox
//! and waits for exactly one of reply, error, or timeout.

use std::time::Duration;

use agent_kernel::{AgentRef, AgentSystem, AskError, Reply, Request};
use agent_primitives::AgentId;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

/// One in-flight synchronous request. Created per call and consumed by
/// [`dispatch`](Self::dispatch), so it can never be reused.
#[derive(Debug)]
pub struct PendingCall {
    call_id: Uuid,
    target: AgentId,
    request: Request,
    timeout: Duration,
}

impl PendingCall {
    /// Prepares a call of `request` on `target` with the given budget.
    #[must_use]
    pub fn new(target: AgentId, request: Request, timeout: Duration) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            target,
            request,
            timeout,
        }
    }

    /// Correlation id used in log output.
    #[must_use]
    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    /// Addressed agent.
    #[must_use]
    pub fn target(&self) -> &AgentId {
        &self.target
    }

    /// Budget of the call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends the request and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the call.
    pub async fn dispatch(self, agent: &AgentRef) -> GatewayResult<Reply> {
        let Self {
            call_id,
            target,
            request,
            timeout,
        } = self;
        let label = request.label();
        debug!(%call_id, agent_id = %target, request = %label, ?timeout, "dispatching call");

        match agent.ask(request, timeout).await {
            Ok(reply) => {
                debug!(%call_id, agent_id = %target, "call resolved");
                Ok(reply)
            }
            Err(err) => {
                warn!(%call_id, agent_id = %target, request = %label, %err, "call failed");
                Err(classify(target, err))
            }
        }
    }
}

fn classify(target: AgentId, err: AskError) -> GatewayError {
    match err {
        AskError::Timeout(after) => GatewayError::Timeout {
            agent_id: target,
            after,
        },
        AskError::Agent(err) => GatewayError::from(err),
        AskError::Dropped(agent_id) => {
            GatewayError::application(format!("Agent {agent_id} dropped the request without replying"))
        }
        AskError::MailboxClosed(agent_id) => {
            GatewayError::not_found(format!("Agent {agent_id} is not running"))
        }
    }
}

/// Entry point used by the facade for every invoke and stream call.
#[derive(Debug, Clone)]
pub struct DispatchBridge {
    system: AgentSystem,
    default_timeout: Duration,
}

impl DispatchBridge {
    /// Creates a bridge into `system`. `default_timeout` applies whenever a
    /// caller does not give a positive budget.
    #[must_use]
    pub fn new(system: AgentSystem, default_timeout: Duration) -> Self {
        Self {
            system,
            default_timeout,
        }
    }

    /// Budget applied when a caller passes `timeout_secs`.
    #[must_use]
    pub fn effective_timeout(&self, timeout_secs: i64) -> Duration {
        u64::try_from(timeout_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map_or(self.default_timeout, Duration::from_secs)
    }

    /// Sends `request` to `target` and waits at most `timeout_secs` seconds
    /// (non-positive means the default budget).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if `target` is not running,
    /// [`GatewayError::Timeout`] when the budget expires, and the agent's
    /// classified failure otherwise.
    pub async fn call_and_wait(
        &self,
        target: &AgentId,
        request: Request,
        timeout_secs: i64,
    ) -> GatewayResult<Reply> {
        let agent = self
            .system
            .resolve(target)
            .ok_or_else(|| GatewayError::not_found(format!("Agent {target} is not running")))?;
        PendingCall::new(target.clone(), request, self.effective_timeout(timeout_secs))
            .dispatch(&agent)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_kernel::{ActionError, ActionResult, Agent, AgentContext, Parameters};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct Calculator;

    #[async_trait]
    impl Agent for Calculator {
        async fn handle_request(&mut self, _ctx: &AgentContext, request: Request) -> ActionResult<Reply> {
            let Request::Invoke { action, parameters } = request else {
                return Err(ActionError::unsupported("streams"));
            };
            match action.as_str() {
                "Add" => {
                    let x = parameters.get("x").and_then(Value::as_i64).unwrap_or(0);
                    let y = parameters.get("y").and_then(Value::as_i64).unwrap_or(0);
                    Ok(Reply::Value(json!(x + y)))
                }
                "Fail" => Err(ActionError::new("Action Failed (as expected)")),
                "Hang" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Reply::Done)
                }
                _ => Err(ActionError::not_found(action)),
            }
        }
    }

    fn invoke(action: &str, parameters: &Value) -> Request {
        Request::Invoke {
            action: action.into(),
            parameters: parameters.as_object().cloned().unwrap_or_else(Parameters::new),
        }
    }

    fn bridge() -> (DispatchBridge, AgentId) {
        let system = AgentSystem::default();
        let id = AgentId::new("calc").unwrap();
        system.spawn(id.clone(), Calculator).unwrap();
        (DispatchBridge::new(system, Duration::from_secs(30)), id)
    }

    #[tokio::test]
    async fn resolves_with_the_agent_value() {
        let (bridge, id) = bridge();
        let reply = bridge
            .call_and_wait(&id, invoke("Add", &json!({"x": 2, "y": 3})), -1)
            .await
            .unwrap();
        assert_eq!(reply.into_value(), json!(5));
    }

    #[tokio::test]
    async fn agent_errors_keep_their_message() {
        let (bridge, id) = bridge();
        let err = bridge.call_and_wait(&id, invoke("Fail", &json!({})), -1).await.unwrap_err();
        assert_eq!(err, GatewayError::application("Action Failed (as expected)"));
    }

    #[tokio::test]
    async fn expired_budget_is_a_timeout() {
        let (bridge, id) = bridge();
        let started = tokio::time::Instant::now();
        let err = bridge.call_and_wait(&id, invoke("Hang", &json!({})), 1).await.unwrap_err();

        assert!(matches!(err, GatewayError::Timeout { after, .. } if after == Duration::from_secs(1)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let (bridge, _) = bridge();
        let ghost = AgentId::new("ghost").unwrap();
        let err = bridge.call_and_wait(&ghost, invoke("Add", &json!({})), -1).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn non_positive_budgets_use_the_default() {
        let bridge = DispatchBridge::new(AgentSystem::default(), Duration::from_secs(30));
        assert_eq!(bridge.effective_timeout(-1), Duration::from_secs(30));
        assert_eq!(bridge.effective_timeout(0), Duration::from_secs(30));
        assert_eq!(bridge.effective_timeout(7), Duration::from_secs(7));
    }
}
