use thiserror::Error;

use crate::lifecycle::TransitionError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{worker}: provisioning failed after {attempts} attempts: {source}")]
    Provisioning {
        worker: String,
        attempts: u32,
        source: RemoteError,
    },

    #[error("{worker}: not ready after {attempts} readiness checks")]
    ReadinessTimeout { worker: String, attempts: u32 },

    #[error("{worker}: could not connect after {attempts} attempts: {source}")]
    Connection {
        worker: String,
        attempts: u32,
        source: RemoteError,
    },

    #[error("{worker}: `{command}` exited with status {status}: {stderr}")]
    RemoteCommand {
        worker: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// A single collaborator call failed outside any retry loop.
    #[error("{scope}: {operation} failed: {source}")]
    Remote {
        scope: String,
        operation: &'static str,
        source: RemoteError,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Data(#[from] common::Error),

    #[error("phase task aborted: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub(crate) fn remote(scope: impl Into<String>, operation: &'static str) -> impl FnOnce(RemoteError) -> Self {
        let scope = scope.into();
        move |source| JobError::Remote {
            scope,
            operation,
            source,
        }
    }
}
