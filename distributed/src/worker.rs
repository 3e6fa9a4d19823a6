//! Drives one worker through its lifecycle using the collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use crate::config::{LifecycleConfig, NodeTemplate};
use crate::error::JobError;
use crate::lifecycle::{Worker, WorkerState};
use crate::remote::{
    CommandOutput, ExecutionChannel, NodeHandle, NodeId, Provisioner, RemoteError, Session,
};
use crate::retry::Clock;

/// A local file to place on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local: PathBuf,
    pub remote: String,
    pub executable: bool,
}

impl Artifact {
    pub fn executable(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            executable: true,
        }
    }

    pub fn data(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            executable: false,
        }
    }
}

pub type NodeRegistry = DashMap<NodeId, NodeHandle>;

pub struct WorkerContext {
    provisioner: Arc<dyn Provisioner>,
    channel: Arc<dyn ExecutionChannel>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    template: NodeTemplate,
    registry: Arc<NodeRegistry>,
}

impl WorkerContext {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        channel: Arc<dyn ExecutionChannel>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
        template: NodeTemplate,
    ) -> Self {
        Self {
            provisioner,
            channel,
            clock,
            config,
            template,
            registry: Arc::new(NodeRegistry::new()),
        }
    }

    /// Every node provisioned through this context that has not been
    /// terminated.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// `Requested` through `Deployed`: provision a node, wait for it to be
    /// reachable and ready, and push `artifacts`.
    pub async fn bring_up(&self, mut worker: Worker, artifacts: &[Artifact]) -> Result<Worker, JobError> {
        match self.try_bring_up(&mut worker, artifacts).await {
            Ok(()) => Ok(worker),
            Err(e) => {
                worker.fail(&e);
                Err(e)
            }
        }
    }

    async fn try_bring_up(&self, worker: &mut Worker, artifacts: &[Artifact]) -> Result<(), JobError> {
        let name = worker.name();

        worker.advance(WorkerState::Provisioning)?;
        let node = self.provision(&name).await?;
        worker.attach(node.clone());

        worker.advance(WorkerState::AwaitingNetwork)?;
        let node = self.await_address(&name, node).await?;
        worker.attach(node.clone());
        self.clock.sleep(self.config.settle_delay).await;
        let session = self.connect(&name, &node).await?;

        worker.advance(WorkerState::AwaitingPackageManager)?;
        self.await_ready(&name, session.as_ref()).await?;
        for command in &self.config.setup_commands {
            run_checked(&name, session.as_ref(), command).await?;
        }

        worker.advance(WorkerState::Ready)?;
        push_all(&name, session.as_ref(), artifacts).await?;
        worker.advance(WorkerState::Deployed)?;
        Ok(())
    }

    /// `Deployed` through `Completed`: push the inputs and run `command`.
    pub async fn execute(
        &self,
        mut worker: Worker,
        inputs: Vec<Artifact>,
        command: String,
    ) -> Result<Worker, JobError> {
        match self.try_execute(&mut worker, &inputs, &command).await {
            Ok(()) => Ok(worker),
            Err(e) => {
                worker.fail(&e);
                Err(e)
            }
        }
    }

    async fn try_execute(&self, worker: &mut Worker, inputs: &[Artifact], command: &str) -> Result<(), JobError> {
        let name = worker.name();
        let session = self.session_for(worker).await?;
        push_all(&name, session.as_ref(), inputs).await?;

        worker.advance(WorkerState::Executing)?;
        run_checked(&name, session.as_ref(), command).await?;
        worker.advance(WorkerState::Completed)?;
        Ok(())
    }

    pub async fn fetch(&self, worker: &Worker, remote: &str) -> Result<Vec<u8>, JobError> {
        let session = self.session_for(worker).await?;
        let bytes = session
            .fetch_file(remote)
            .await
            .map_err(JobError::remote(worker.name(), "fetch"))?;
        info!("{}: fetched {} ({} bytes)", worker.name(), remote, bytes.len());
        Ok(bytes)
    }

    async fn session_for(&self, worker: &Worker) -> Result<Box<dyn Session>, JobError> {
        let node = worker.node().ok_or_else(|| JobError::Remote {
            scope: worker.name(),
            operation: "connect",
            source: RemoteError::Rejected("worker has no node".into()),
        })?;
        self.connect(&worker.name(), node).await
    }

    async fn provision(&self, name: &str) -> Result<NodeHandle, JobError> {
        let spec = self.template.spec_for(name.to_owned());
        let node = self
            .config
            .provision
            .retry(self.clock.as_ref(), &format!("{}: provisioning", name), |_| {
                self.provisioner.provision_node(&spec)
            })
            .await
            .map_err(|e| JobError::Provisioning {
                worker: name.to_owned(),
                attempts: e.attempts,
                source: e.last,
            })?;

        self.registry.insert(node.id.clone(), node.clone());
        info!("{}: provisioned node {}", name, node.id);
        Ok(node)
    }

    async fn await_address(&self, name: &str, mut node: NodeHandle) -> Result<NodeHandle, JobError> {
        if node.address.is_none() {
            let id = node.id.clone();
            let address = self
                .config
                .address
                .poll(self.clock.as_ref(), &format!("{}: address", name), |_| {
                    self.provisioner.node_address(&id)
                })
                .await
                .map_err(|attempts| JobError::Provisioning {
                    worker: name.to_owned(),
                    attempts,
                    source: RemoteError::Unreachable(id.clone()),
                })?;
            node.address = Some(address);
            self.registry.insert(node.id.clone(), node.clone());
        }
        info!("{}: node {} reachable at {:?}", name, node.id, node.address);
        Ok(node)
    }

    async fn connect(&self, name: &str, node: &NodeHandle) -> Result<Box<dyn Session>, JobError> {
        self.config
            .connect
            .retry(self.clock.as_ref(), &format!("{}: connect", name), |_| {
                self.channel.connect(node)
            })
            .await
            .map_err(|e| JobError::Connection {
                worker: name.to_owned(),
                attempts: e.attempts,
                source: e.last,
            })
    }

    async fn await_ready(&self, name: &str, session: &dyn Session) -> Result<(), JobError> {
        let command = self.config.readiness_command.as_str();
        let token = self.config.ready_token.as_str();
        self.config
            .readiness
            .poll(self.clock.as_ref(), &format!("{}: readiness", name), move |_| async move {
                let output = session.run_command(command).await?;
                Ok::<_, RemoteError>(if output.stdout.trim() == token {
                    Some(())
                } else {
                    None
                })
            })
            .await
            .map_err(|attempts| JobError::ReadinessTimeout {
                worker: name.to_owned(),
                attempts,
            })
    }
}

async fn run_checked(name: &str, session: &dyn Session, command: &str) -> Result<CommandOutput, JobError> {
    let output = session
        .run_command(command)
        .await
        .map_err(JobError::remote(name, "run command"))?;
    if !output.success() {
        return Err(JobError::RemoteCommand {
            worker: name.to_owned(),
            command: command.to_owned(),
            status: output.status,
            stderr: output.stderr.trim().to_owned(),
        });
    }
    Ok(output)
}

async fn push_all(name: &str, session: &dyn Session, artifacts: &[Artifact]) -> Result<(), JobError> {
    for artifact in artifacts {
        session
            .push_file(&artifact.local, &artifact.remote)
            .await
            .map_err(JobError::remote(name, "push"))?;
        if artifact.executable {
            run_checked(name, session, &format!("chmod +x {}", artifact.remote)).await?;
        }
    }
    Ok(())
}
