//! Registration state machine tracked per agent identifier.

use agent_primitives::AgentId;
use thiserror::Error;
use tracing::debug;

/// Where an agent stands with respect to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Never registered.
    Unregistered,
    /// Registered at least once and currently listed.
    Registered,
    /// Removed from the registry.
    Deregistered,
}

impl RegistrationState {
    /// Returns `true` while the agent is listed.
    #[must_use]
    pub const fn is_listed(self) -> bool {
        matches!(self, Self::Registered)
    }
}

/// Events driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A descriptor was submitted.
    Register,
    /// The agent asked to be removed, or terminated.
    Deregister,
}

/// Outcome of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First registration, or registration after a deregistration.
    Registered,
    /// Re-registration replacing the previous descriptor.
    Updated,
    /// Removal of a listed agent.
    Deregistered,
}

/// Per-agent registration state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    agent_id: AgentId,
    state: RegistrationState,
}

impl Lifecycle {
    /// Creates the state of an agent that never registered.
    #[must_use]
    pub const fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            state: RegistrationState::Unregistered,
        }
    }

    /// Owning agent.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RegistrationState {
        self.state
    }

    /// Applies `event`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotListed`] when deregistering an agent that
    /// is not listed. Callers treat that as a no-op.
    pub fn transition(&mut self, event: RegistrationEvent) -> LifecycleResult<Transition> {
        let (next, transition) = match (self.state, event) {
            (RegistrationState::Registered, RegistrationEvent::Register) => {
                (RegistrationState::Registered, Transition::Updated)
            }
            (_, RegistrationEvent::Register) => {
                (RegistrationState::Registered, Transition::Registered)
            }
            (RegistrationState::Registered, RegistrationEvent::Deregister) => {
                (RegistrationState::Deregistered, Transition::Deregistered)
            }
            (from, RegistrationEvent::Deregister) => {
                return Err(LifecycleError::NotListed {
                    agent_id: self.agent_id.clone(),
                    from,
                });
            }
        };

        debug!(
            agent_id = %self.agent_id,
            from = ?self.state,
            to = ?next,
            ?transition,
            "registration transition"
        );
        self.state = next;
        Ok(transition)
    }
}

/// Errors emitted by the registration state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Deregistration of an agent that is not listed.
    #[error("agent {agent_id} is not registered (state {from:?})")]
    NotListed {
        /// Agent whose transition was refused.
        agent_id: AgentId,
        /// State prior to the attempt.
        from: RegistrationState,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
