//! Contracts for the collaborators the coordinator drives: whatever creates
//! nodes, and whatever moves files to them and runs commands there.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub type NodeId = String;

/// What to ask the provisioner for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub instance_type: String,
    pub image: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub id: NodeId,
    /// Unknown until the node is reachable.
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision_node(&self, spec: &NodeSpec) -> Result<NodeHandle, RemoteError>;

    async fn node_address(&self, id: &NodeId) -> Result<Option<String>, RemoteError>;

    async fn terminate_nodes(&self, ids: &[NodeId]) -> Result<(), RemoteError>;

    async fn create_credential(&self) -> Result<(), RemoteError>;

    async fn delete_credential(&self) -> Result<(), RemoteError>;

    async fn ensure_inbound_rule(&self, port: u16) -> Result<(), RemoteError>;

    async fn ensure_storage(&self, bucket: &str) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait ExecutionChannel: Send + Sync {
    /// Opens a session to `node`. The session is released when dropped.
    async fn connect(&self, node: &NodeHandle) -> Result<Box<dyn Session>, RemoteError>;
}

/// Remote paths are relative to the node's working directory.
#[async_trait]
pub trait Session: Send + Sync {
    async fn push_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    async fn fetch_file(&self, remote: &str) -> Result<Vec<u8>, RemoteError>;

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError>;
}
