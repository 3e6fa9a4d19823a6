//! In-memory collaborators for coordinator tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use app_friends::{map_lines, reduce_lines, FriendListPolicy, DEDUP_FLAG, MAPPER_BIN, REDUCER_BIN};
use async_trait::async_trait;
use itertools::Itertools;

use crate::remote::{
    CommandOutput, ExecutionChannel, NodeHandle, NodeId, NodeSpec, Provisioner, RemoteError,
    Session,
};
use crate::retry::Clock;

/// Takes one from `counter` if it is positive.
fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Debug, Default)]
pub struct FakeProvisioner {
    /// Provision calls that fail before one succeeds.
    pub provision_failures: AtomicU32,
    /// Address polls answered with `None` before a node becomes reachable.
    pub address_delay: AtomicU32,
    next_id: AtomicUsize,
    pub provisioned: Mutex<Vec<NodeSpec>>,
    pub terminated: Mutex<Vec<NodeId>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeProvisioner {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision_node(&self, spec: &NodeSpec) -> Result<NodeHandle, RemoteError> {
        if consume(&self.provision_failures) {
            return Err(RemoteError::Rejected("insufficient capacity".into()));
        }
        self.provisioned.lock().unwrap().push(spec.clone());
        let id = format!("node-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let address = if self.address_delay.load(Ordering::SeqCst) == 0 {
            Some(format!("host-{}", id))
        } else {
            None
        };
        Ok(NodeHandle { id, address })
    }

    async fn node_address(&self, id: &NodeId) -> Result<Option<String>, RemoteError> {
        if consume(&self.address_delay) {
            Ok(None)
        } else {
            Ok(Some(format!("host-{}", id)))
        }
    }

    async fn terminate_nodes(&self, ids: &[NodeId]) -> Result<(), RemoteError> {
        self.terminated.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    async fn create_credential(&self) -> Result<(), RemoteError> {
        self.record("create_credential".into());
        Ok(())
    }

    async fn delete_credential(&self) -> Result<(), RemoteError> {
        self.record("delete_credential".into());
        Ok(())
    }

    async fn ensure_inbound_rule(&self, port: u16) -> Result<(), RemoteError> {
        self.record(format!("ensure_inbound_rule {}", port));
        Ok(())
    }

    async fn ensure_storage(&self, bucket: &str) -> Result<(), RemoteError> {
        self.record(format!("ensure_storage {}", bucket));
        Ok(())
    }
}

type Files = HashMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct Shared {
    nodes: Mutex<HashMap<NodeId, Files>>,
    open: AtomicUsize,
    busy_checks: AtomicU32,
    commands: Mutex<Vec<(NodeId, String)>>,
}

/// Execution channel that keeps node files in memory and runs the job's
/// mapper and reducer in-process.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    shared: Arc<Shared>,
    /// Connection attempts refused before one succeeds.
    pub connect_failures: AtomicU32,
    /// Commands containing this text exit with status 1.
    pub failing_command: Option<String>,
}

impl MemoryChannel {
    pub fn failing(command: &str) -> Self {
        Self {
            failing_command: Some(command.to_owned()),
            ..Self::default()
        }
    }

    /// Answers the next `checks` readiness probes with "busy".
    pub fn with_busy_checks(checks: u32) -> Self {
        let channel = Self::default();
        channel.shared.busy_checks.store(checks, Ordering::SeqCst);
        channel
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<(NodeId, String)> {
        self.shared.commands.lock().unwrap().clone()
    }

    pub fn file(&self, node: &str, name: &str) -> Option<Vec<u8>> {
        self.shared.nodes.lock().unwrap().get(node)?.get(name).cloned()
    }
}

#[async_trait]
impl ExecutionChannel for MemoryChannel {
    async fn connect(&self, node: &NodeHandle) -> Result<Box<dyn Session>, RemoteError> {
        if node.address.is_none() || consume(&self.connect_failures) {
            return Err(RemoteError::Unreachable(node.id.clone()));
        }
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            node: node.id.clone(),
            shared: Arc::clone(&self.shared),
            failing_command: self.failing_command.clone(),
        }))
    }
}

struct MemorySession {
    node: NodeId,
    shared: Arc<Shared>,
    failing_command: Option<String>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemorySession {
    fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.shared.nodes.lock().unwrap().get(&self.node)?.get(name).cloned()
    }

    fn write(&self, name: &str, content: Vec<u8>) {
        self.shared
            .nodes
            .lock()
            .unwrap()
            .entry(self.node.clone())
            .or_default()
            .insert(name.to_owned(), content);
    }

    /// Runs `./<bin> [flags] < input > output`.
    fn run_job_binary(&self, command: &str) -> CommandOutput {
        let tokens = command.split_whitespace().collect_vec();
        let after = |marker: &str| {
            tokens
                .iter()
                .position(|t| *t == marker)
                .and_then(|i| tokens.get(i + 1))
                .copied()
        };
        let (input, output) = match (after("<"), after(">")) {
            (Some(input), Some(output)) => (input, output),
            _ => return not_found(command),
        };
        let input = match self.read(input) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => return not_found(input),
        };

        let binary = tokens[0].trim_start_matches("./");
        let result = if binary == MAPPER_BIN && self.read(MAPPER_BIN).is_some() {
            let policy = if tokens.contains(&DEDUP_FLAG) {
                FriendListPolicy::Dedup
            } else {
                FriendListPolicy::KeepDuplicates
            };
            map_lines(input.lines(), policy)
                .iter()
                .map(|record| format!("{}\n", record))
                .collect::<String>()
        } else if binary == REDUCER_BIN && self.read(REDUCER_BIN).is_some() {
            reduce_lines(input.lines())
                .iter()
                .map(|line| format!("{}\n", line))
                .collect::<String>()
        } else {
            return not_found(binary);
        };

        self.write(output, result.into_bytes());
        CommandOutput::default()
    }
}

fn not_found(what: &str) -> CommandOutput {
    CommandOutput {
        status: 127,
        stdout: String::new(),
        stderr: format!("{}: not found", what),
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn push_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let content = tokio::fs::read(local).await?;
        self.write(remote, content);
        Ok(())
    }

    async fn fetch_file(&self, remote: &str) -> Result<Vec<u8>, RemoteError> {
        self.read(remote)
            .ok_or_else(|| RemoteError::Rejected(format!("{}: no such file", remote)))
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.shared
            .commands
            .lock()
            .unwrap()
            .push((self.node.clone(), command.to_owned()));

        if let Some(failing) = &self.failing_command {
            if command.contains(failing.as_str()) {
                return Ok(CommandOutput {
                    status: 1,
                    stdout: String::new(),
                    stderr: "segmentation fault".into(),
                });
            }
        }

        if command.starts_with("lsof") {
            let busy = consume(&self.shared.busy_checks);
            return Ok(CommandOutput {
                stdout: if busy { String::new() } else { "free\n".into() },
                ..CommandOutput::default()
            });
        }
        if command.starts_with("chmod") || command == "true" {
            return Ok(CommandOutput::default());
        }
        Ok(self.run_job_binary(command))
    }
}
