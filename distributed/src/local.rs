//! Process-local backend: a node is a directory under a root, and commands
//! run through `sh -c` inside it.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::try_join_all;
use log::{debug, info};
use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

use crate::remote::{
    CommandOutput, ExecutionChannel, NodeHandle, NodeId, NodeSpec, Provisioner, RemoteError,
    Session,
};

#[derive(Debug)]
pub struct LocalProvisioner {
    root: PathBuf,
    key_name: String,
    inbound_rules: Mutex<BTreeSet<u16>>,
}

impl LocalProvisioner {
    pub fn new(root: impl Into<PathBuf>, key_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key_name: key_name.into(),
            inbound_rules: Mutex::new(BTreeSet::new()),
        }
    }

    fn node_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn credential_path(&self) -> PathBuf {
        self.root.join(format!("{}.pem", self.key_name))
    }

    pub fn inbound_rules(&self) -> Vec<u16> {
        match self.inbound_rules.lock() {
            Ok(rules) => rules.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }
}

async fn remove_if_present(path: PathBuf, dir: bool) -> std::io::Result<()> {
    let result = if dir {
        fs::remove_dir_all(&path).await
    } else {
        fs::remove_file(&path).await
    };
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision_node(&self, spec: &NodeSpec) -> Result<NodeHandle, RemoteError> {
        let id = format!("{}-{}", spec.name, Uuid::new_v4());
        let dir = self.node_dir(&id);
        fs::create_dir_all(&dir).await?;
        fs::write(
            dir.join("node.txt"),
            format!(
                "name={}\ninstance_type={}\nimage={}\nregion={}\n",
                spec.name, spec.instance_type, spec.image, spec.region
            ),
        )
        .await?;
        info!("provisioned {} at {}", id, dir.display());
        Ok(NodeHandle {
            id,
            address: Some(dir.display().to_string()),
        })
    }

    async fn node_address(&self, id: &NodeId) -> Result<Option<String>, RemoteError> {
        let dir = self.node_dir(id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Some(dir.display().to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn terminate_nodes(&self, ids: &[NodeId]) -> Result<(), RemoteError> {
        try_join_all(ids.iter().map(|id| remove_if_present(self.node_dir(id), true))).await?;
        info!("terminated {} nodes", ids.len());
        Ok(())
    }

    async fn create_credential(&self) -> Result<(), RemoteError> {
        fs::create_dir_all(&self.root).await?;
        let path = self.credential_path();
        remove_if_present(path.clone(), false).await?;
        fs::write(&path, Uuid::new_v4().to_string()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o400)).await?;
        }
        info!("created credential {}", self.key_name);
        Ok(())
    }

    async fn delete_credential(&self) -> Result<(), RemoteError> {
        remove_if_present(self.credential_path(), false).await?;
        info!("deleted credential {}", self.key_name);
        Ok(())
    }

    async fn ensure_inbound_rule(&self, port: u16) -> Result<(), RemoteError> {
        let mut rules = self
            .inbound_rules
            .lock()
            .map_err(|_| RemoteError::Rejected("inbound rule table poisoned".into()))?;
        if rules.insert(port) {
            info!("allowed inbound tcp/{}", port);
        }
        Ok(())
    }

    async fn ensure_storage(&self, bucket: &str) -> Result<(), RemoteError> {
        fs::create_dir_all(self.root.join("buckets").join(bucket)).await?;
        Ok(())
    }
}

/// Opens [`LocalSession`]s on directories created by [`LocalProvisioner`].
#[derive(Debug, Default)]
pub struct LocalChannel {
    open: Arc<AtomicUsize>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions handed out and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ExecutionChannel for LocalChannel {
    async fn connect(&self, node: &NodeHandle) -> Result<Box<dyn Session>, RemoteError> {
        let address = node
            .address
            .as_ref()
            .ok_or_else(|| RemoteError::Unreachable(node.id.clone()))?;
        let dir = PathBuf::from(address);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(RemoteError::Unreachable(node.id.clone())),
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        debug!("opened session to {}", node.id);
        Ok(Box::new(LocalSession {
            node: node.id.clone(),
            dir,
            open: Arc::clone(&self.open),
        }))
    }
}

#[derive(Debug)]
pub struct LocalSession {
    node: NodeId,
    dir: PathBuf,
    open: Arc<AtomicUsize>,
}

impl LocalSession {
    fn resolve(&self, remote: &str) -> PathBuf {
        self.dir.join(remote.trim_start_matches('/'))
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        debug!("released session to {}", self.node);
    }
}

#[async_trait]
impl Session for LocalSession {
    async fn push_file(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let target = self.resolve(remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, &target).await?;
        debug!("{}: pushed {} -> {}", self.node, local.display(), remote);
        Ok(())
    }

    async fn fetch_file(&self, remote: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(fs::read(self.resolve(remote)).await?)
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!("{}: running {:?}", self.node, command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .output()
            .await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> NodeSpec {
        crate::config::NodeTemplate::default().spec_for(name.to_owned())
    }

    #[tokio::test]
    async fn node_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test-key");
        let channel = LocalChannel::new();

        let node = provisioner.provision_node(&spec("mapper-0")).await.unwrap();
        assert!(node.id.starts_with("mapper-0-"));
        assert_eq!(provisioner.node_address(&node.id).await.unwrap(), node.address);

        let local = root.path().join("split_0.txt");
        std::fs::write(&local, "1\t2,3\n").unwrap();
        {
            let session = channel.connect(&node).await.unwrap();
            assert_eq!(channel.open_sessions(), 1);

            session.push_file(&local, "split_0.txt").await.unwrap();
            let out = session
                .run_command("tr '\\t' ' ' < split_0.txt > out.txt && echo done")
                .await
                .unwrap();
            assert!(out.success());
            assert_eq!(out.stdout.trim(), "done");
            assert_eq!(session.fetch_file("out.txt").await.unwrap(), b"1 2,3\n");

            let failed = session.run_command("echo oops >&2; exit 3").await.unwrap();
            assert_eq!(failed.status, 3);
            assert_eq!(failed.stderr.trim(), "oops");

            assert!(session.fetch_file("missing.txt").await.is_err());
        }
        assert_eq!(channel.open_sessions(), 0);

        provisioner.terminate_nodes(&[node.id.clone()]).await.unwrap();
        assert_eq!(provisioner.node_address(&node.id).await.unwrap(), None);
        assert!(matches!(
            channel.connect(&node).await.err(),
            Some(RemoteError::Unreachable(_))
        ));
        // terminating twice is fine
        provisioner.terminate_nodes(&[node.id]).await.unwrap();
    }

    #[tokio::test]
    async fn environment_resources() {
        let root = tempfile::tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path().join("nodes"), "test-key");

        provisioner.create_credential().await.unwrap();
        let key = root.path().join("nodes").join("test-key.pem");
        assert!(key.exists());
        // recreating replaces the old key
        provisioner.create_credential().await.unwrap();

        provisioner.ensure_inbound_rule(22).await.unwrap();
        provisioner.ensure_inbound_rule(22).await.unwrap();
        assert_eq!(provisioner.inbound_rules(), vec![22]);

        provisioner.ensure_storage("bucket").await.unwrap();
        assert!(root.path().join("nodes/buckets/bucket").is_dir());

        provisioner.delete_credential().await.unwrap();
        assert!(!key.exists());
        provisioner.delete_credential().await.unwrap();
    }
}
