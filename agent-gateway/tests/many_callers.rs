//! One server agent, ten concurrent callers. Every caller must get a fresh
//! reply in every cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_config::ContainerConfig;
use agent_gateway::{AgentScope, ContainerizedAgent, Gateway};
use agent_kernel::{ActionError, ActionResult, Parameters};
use agent_primitives::{ActionSpec, AgentDescriptor, AgentId, ContainerImage, ParameterSpec};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};

const CLIENTS: usize = 10;
const CYCLES: usize = 5;

struct ServerAgent {
    seen: Arc<Mutex<HashMap<String, usize>>>,
}

#[async_trait]
impl ContainerizedAgent for ServerAgent {
    fn descriptor(&self, agent_id: &AgentId) -> agent_primitives::Result<AgentDescriptor> {
        AgentDescriptor::builder(agent_id.clone())
            .agent_type("server")
            .action(ActionSpec::new("Ping")?.with_parameter("client", ParameterSpec::new("string")))
            .build()
    }

    async fn invoke(
        &mut self,
        _scope: &mut AgentScope<'_>,
        action: &str,
        parameters: Parameters,
    ) -> ActionResult<Value> {
        if action != "Ping" {
            return Err(ActionError::not_found(action));
        }
        let client = parameters
            .get("client")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::new("missing client"))?
            .to_owned();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let mut seen = self.seen.lock().unwrap();
        let count = seen.entry(client).or_default();
        *count += 1;
        Ok(json!(*count))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_caller_is_served_every_cycle() {
    let gateway = Gateway::builder(ContainerConfig::standalone("container-1"), ContainerImage::new("load"))
        .arguments(Default::default())
        .build()
        .unwrap();
    let seen = Arc::new(Mutex::new(HashMap::new()));
    gateway
        .spawn_agent(AgentId::new("server").unwrap(), ServerAgent { seen: seen.clone() })
        .await
        .unwrap();

    for cycle in 1..=CYCLES {
        let calls = (0..CLIENTS).map(|client| {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let parameters = json!({"client": format!("client-{client}")});
                gateway
                    .invoke("Ping", parameters.as_object().cloned().unwrap(), None, 5)
                    .await
            })
        });
        let replies = tokio::time::timeout(Duration::from_secs(5), join_all(calls))
            .await
            .expect("cycle stalled");
        for reply in replies {
            assert_eq!(reply.unwrap().unwrap(), json!(cycle));
        }
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), CLIENTS);
    assert!(seen.values().all(|count| *count == CYCLES));
}
