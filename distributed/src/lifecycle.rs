//! Per-worker lifecycle state machine.
//!
//! ```text
//! Requested -> Provisioning -> AwaitingNetwork -> AwaitingPackageManager
//!           -> Ready -> Deployed -> Executing -> Completed
//! ```
//!
//! Every non-terminal state may also move to `Failed`. Anything else,
//! including skipping a state or leaving `Completed`/`Failed`, is rejected.

use std::fmt;

use log::{error, info};
use thiserror::Error;

use crate::remote::NodeHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Requested,
    Provisioning,
    AwaitingNetwork,
    AwaitingPackageManager,
    Ready,
    Deployed,
    Executing,
    Completed,
    Failed,
}

impl WorkerState {
    pub fn successor(self) -> Option<WorkerState> {
        use WorkerState::*;
        match self {
            Requested => Some(Provisioning),
            Provisioning => Some(AwaitingNetwork),
            AwaitingNetwork => Some(AwaitingPackageManager),
            AwaitingPackageManager => Some(Ready),
            Ready => Some(Deployed),
            Deployed => Some(Executing),
            Executing => Some(Completed),
            Completed | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Failed)
    }

    pub fn can_transition_to(self, next: WorkerState) -> bool {
        match next {
            WorkerState::Failed => !self.is_terminal(),
            _ => self.successor() == Some(next),
        }
    }
}

#[derive(Debug, Error)]
#[error("{worker}: invalid transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub worker: String,
    pub from: WorkerState,
    pub to: WorkerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Mapper,
    Reducer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Mapper => f.write_str("mapper"),
            Role::Reducer => f.write_str("reducer"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Worker {
    role: Role,
    index: usize,
    state: WorkerState,
    node: Option<NodeHandle>,
}

impl Worker {
    pub fn new(role: Role, index: usize) -> Self {
        Self {
            role,
            index,
            state: WorkerState::Requested,
            node: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> String {
        format!("{}-{}", self.role, self.index)
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn node(&self) -> Option<&NodeHandle> {
        self.node.as_ref()
    }

    pub(crate) fn attach(&mut self, node: NodeHandle) {
        self.node = Some(node);
    }

    pub fn advance(&mut self, next: WorkerState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                worker: self.name(),
                from: self.state,
                to: next,
            });
        }
        info!("{}: {:?} -> {:?}", self.name(), self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn fail(&mut self, reason: &dyn fmt::Display) {
        error!("{}: failed in {:?}: {}", self.name(), self.state, reason);
        if !self.state.is_terminal() {
            self.state = WorkerState::Failed;
        }
    }
}
