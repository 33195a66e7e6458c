//! In-memory map from agent identifier to its capability snapshot.
//!
//! Only the registration protocol handler writes; everything else reads.
//! Entries keep the position of their first registration, so
//! [`ResolvePolicy::FirstRegistered`] is stable across re-registrations.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use agent_config::ResolvePolicy;
use agent_primitives::{AgentDescriptor, AgentId};

use crate::error::{GatewayError, GatewayResult};

/// Constraints of a lookup. Every `Some` field must match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Target<'a> {
    /// Exact agent identifier.
    pub agent_id: Option<&'a str>,
    /// Name of an action the agent must expose.
    pub action: Option<&'a str>,
    /// Name of a stream the agent must expose.
    pub stream: Option<&'a str>,
}

impl<'a> Target<'a> {
    /// Matches the agent with this identifier.
    #[must_use]
    pub const fn agent(agent_id: &'a str) -> Self {
        Self {
            agent_id: Some(agent_id),
            action: None,
            stream: None,
        }
    }

    /// Matches agents exposing `action`, optionally restricted to one agent.
    #[must_use]
    pub const fn action(action: &'a str, agent_id: Option<&'a str>) -> Self {
        Self {
            agent_id,
            action: Some(action),
            stream: None,
        }
    }

    /// Matches agents exposing `stream`, optionally restricted to one agent.
    #[must_use]
    pub const fn stream(stream: &'a str, agent_id: Option<&'a str>) -> Self {
        Self {
            agent_id,
            action: None,
            stream: Some(stream),
        }
    }

    fn matches(&self, descriptor: &AgentDescriptor) -> bool {
        self.agent_id
            .is_none_or(|id| descriptor.agent_id().as_str() == id)
            && self.action.is_none_or(|name| descriptor.action(name).is_some())
            && self.stream.is_none_or(|name| descriptor.stream(name).is_some())
    }

    fn not_found(&self) -> GatewayError {
        let agent = AgentLabel(self.agent_id);
        GatewayError::not_found(match (self.action, self.stream) {
            (Some(action), _) => format!("Action {action} of Agent {agent} not found"),
            (None, Some(stream)) => format!("Stream {stream} of Agent {agent} not found"),
            (None, None) => format!("Agent {agent} not found"),
        })
    }
}

struct AgentLabel<'a>(Option<&'a str>);

impl fmt::Display for AgentLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.unwrap_or("<any>"))
    }
}

/// Whether [`AgentRegistry::insert`] added or replaced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
    Inserted,
    Replaced,
}

/// Shared, concurrently readable registry.
///
/// # Panics
///
/// Methods panic if the internal lock was poisoned by a panicking writer.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    entries: RwLock<Vec<Arc<AgentDescriptor>>>,
    policy: ResolvePolicy,
    cursor: AtomicUsize,
}

impl AgentRegistry {
    /// Creates an empty registry resolving ties with `policy`.
    #[must_use]
    pub fn new(policy: ResolvePolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(Vec::new()),
                policy,
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Tie-break in use.
    #[must_use]
    pub fn policy(&self) -> ResolvePolicy {
        self.inner.policy
    }

    /// Inserts or wholesale replaces the entry of `descriptor.agent_id()`.
    pub(crate) fn insert(&self, descriptor: AgentDescriptor) -> Upsert {
        let mut entries = self.inner.entries.write().expect("registry lock poisoned");
        let descriptor = Arc::new(descriptor);
        match entries
            .iter_mut()
            .find(|entry| entry.agent_id() == descriptor.agent_id())
        {
            Some(slot) => {
                *slot = descriptor;
                Upsert::Replaced
            }
            None => {
                entries.push(descriptor);
                Upsert::Inserted
            }
        }
    }

    /// Removes the entry of `agent_id`. Absent ids are a no-op.
    pub(crate) fn remove(&self, agent_id: &AgentId) -> Option<Arc<AgentDescriptor>> {
        let mut entries = self.inner.entries.write().expect("registry lock poisoned");
        let position = entries
            .iter()
            .position(|entry| entry.agent_id() == agent_id)?;
        Some(entries.remove(position))
    }

    /// Identifier of an entry satisfying every constraint of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] when nothing matches.
    pub fn resolve(&self, target: Target<'_>) -> GatewayResult<AgentId> {
        let entries = self.inner.entries.read().expect("registry lock poisoned");
        let mut matches = entries.iter().filter(|entry| target.matches(entry));

        let picked = match self.inner.policy {
            ResolvePolicy::FirstRegistered => matches.next(),
            ResolvePolicy::RoundRobin => {
                let candidates: Vec<_> = matches.collect();
                if candidates.is_empty() {
                    None
                } else {
                    let turn = self.inner.cursor.fetch_add(1, Ordering::Relaxed);
                    Some(candidates[turn % candidates.len()])
                }
            }
        };

        picked
            .map(|entry| entry.agent_id().clone())
            .ok_or_else(|| target.not_found())
    }

    /// Snapshot of all entries in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<AgentDescriptor> {
        let entries = self.inner.entries.read().expect("registry lock poisoned");
        entries.iter().map(|entry| AgentDescriptor::clone(entry)).collect()
    }

    /// Identifiers of all entries in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<AgentId> {
        let entries = self.inner.entries.read().expect("registry lock poisoned");
        entries.iter().map(|entry| entry.agent_id().clone()).collect()
    }

    /// Entry of `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for unknown ids.
    pub fn get(&self, agent_id: &str) -> GatewayResult<AgentDescriptor> {
        let entries = self.inner.entries.read().expect("registry lock poisoned");
        entries
            .iter()
            .find(|entry| entry.agent_id().as_str() == agent_id)
            .map(|entry| AgentDescriptor::clone(entry))
            .ok_or_else(|| Target::agent(agent_id).not_found())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().expect("registry lock poisoned").len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(ResolvePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_primitives::{ActionSpec, StreamMode, StreamSpec};

    fn descriptor(id: &str, actions: &[&str], streams: &[&str]) -> AgentDescriptor {
        let mut builder = AgentDescriptor::builder(AgentId::new(id).unwrap());
        for action in actions {
            builder = builder.action(ActionSpec::new(*action).unwrap());
        }
        for stream in streams {
            builder = builder.stream(StreamSpec::new(*stream, StreamMode::Get).unwrap());
        }
        builder.build().unwrap()
    }

    #[test]
    fn resolve_by_id_then_deregister() {
        let registry = AgentRegistry::default();
        registry.insert(descriptor("sample1", &["Add"], &[]));

        assert_eq!(registry.resolve(Target::agent("sample1")).unwrap().as_str(), "sample1");
        assert!(registry.remove(&AgentId::new("sample1").unwrap()).is_some());
        assert_eq!(
            registry.resolve(Target::agent("sample1")),
            Err(GatewayError::not_found("Agent sample1 not found"))
        );
    }

    #[test]
    fn removing_absent_id_is_a_no_op() {
        let registry = AgentRegistry::default();
        assert!(registry.remove(&AgentId::new("ghost").unwrap()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn constraints_are_conjunctive() {
        let registry = AgentRegistry::default();
        registry.insert(descriptor("a", &["Add"], &[]));
        registry.insert(descriptor("b", &["Add"], &["GetStream"]));

        let hit = registry.resolve(Target {
            agent_id: None,
            action: Some("Add"),
            stream: Some("GetStream"),
        });
        assert_eq!(hit.unwrap().as_str(), "b");

        let miss = registry.resolve(Target::action("Add", Some("c"))).unwrap_err();
        assert_eq!(miss, GatewayError::not_found("Action Add of Agent c not found"));
        let miss = registry.resolve(Target::stream("Video", None)).unwrap_err();
        assert_eq!(miss, GatewayError::not_found("Stream Video of Agent <any> not found"));
    }

    #[test]
    fn re_registration_replaces_in_place() {
        let registry = AgentRegistry::default();
        registry.insert(descriptor("first", &["Add"], &[]));
        registry.insert(descriptor("second", &["Add"], &[]));
        assert_eq!(
            registry.insert(descriptor("first", &["Add", "Extra"], &[])),
            Upsert::Replaced
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve(Target::action("Add", None)).unwrap().as_str(), "first");
        assert_eq!(registry.resolve(Target::action("Extra", None)).unwrap().as_str(), "first");
        let first = registry.get("first").unwrap();
        assert_eq!(first.actions().len(), 2);
    }

    #[test]
    fn round_robin_rotates_over_matches() {
        let registry = AgentRegistry::new(ResolvePolicy::RoundRobin);
        registry.insert(descriptor("a", &["Add"], &[]));
        registry.insert(descriptor("b", &["Add"], &[]));
        registry.insert(descriptor("c", &["Other"], &[]));

        let picks: Vec<String> = (0..4)
            .map(|_| registry.resolve(Target::action("Add", None)).unwrap().to_string())
            .collect();
        assert_eq!(picks, ["a", "b", "a", "b"]);
    }

    #[test]
    fn get_unknown_agent_is_not_found() {
        let registry = AgentRegistry::default();
        assert!(matches!(registry.get("nobody"), Err(GatewayError::NotFound(_))));
    }
}
