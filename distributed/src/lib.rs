//! Coordinator for the recommendation job on remote workers: worker
//! lifecycle, bounded retries and the map and reduce phases.

pub mod config;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod local;
pub mod phase;
pub mod remote;
pub mod retry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CleanupMode, JobConfig, LifecycleConfig, NodeTemplate, Opt};
pub use error::JobError;
pub use job::Job;
pub use lifecycle::{Role, Worker, WorkerState};
pub use local::{LocalChannel, LocalProvisioner};
pub use remote::{ExecutionChannel, NodeHandle, NodeId, NodeSpec, Provisioner, RemoteError, Session};
pub use retry::{Clock, RetryPolicy, TokioClock};

pub fn init_logger() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
