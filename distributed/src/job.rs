//! One end-to-end recommendation job over remote workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use app_friends::{FriendListPolicy, DEDUP_FLAG, MAPPER_BIN, REDUCER_BIN};
use common::{render_partition, split, text_lines, Collector, Partitioner};
use itertools::Itertools;
use log::info;

use crate::config::JobConfig;
use crate::error::JobError;
use crate::lifecycle::{Role, Worker};
use crate::phase::run_phase;
use crate::remote::{ExecutionChannel, NodeId, Provisioner};
use crate::retry::Clock;
use crate::worker::{Artifact, WorkerContext};

fn split_file(index: usize) -> String {
    format!("split_{}.txt", index)
}

fn mapper_output_file(index: usize) -> String {
    format!("mapper_output_{}.txt", index)
}

fn reducer_input_file(index: usize) -> String {
    format!("reducer_input_{}.txt", index)
}

fn reducer_output_file(index: usize) -> String {
    format!("reducer_output_{}.txt", index)
}

pub fn map_command(index: usize, policy: FriendListPolicy) -> String {
    let flag = match policy {
        FriendListPolicy::Dedup => format!(" {}", DEDUP_FLAG),
        FriendListPolicy::KeepDuplicates => String::new(),
    };
    format!(
        "./{}{} < {} > {}",
        MAPPER_BIN,
        flag,
        split_file(index),
        mapper_output_file(index)
    )
}

pub fn reduce_command(index: usize) -> String {
    format!(
        "./{} < {} > {}",
        REDUCER_BIN,
        reducer_input_file(index),
        reducer_output_file(index)
    )
}

pub struct Job {
    config: JobConfig,
    provisioner: Arc<dyn Provisioner>,
    context: Arc<WorkerContext>,
}

impl Job {
    pub fn new(
        config: JobConfig,
        provisioner: Arc<dyn Provisioner>,
        channel: Arc<dyn ExecutionChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context = WorkerContext::new(
            Arc::clone(&provisioner),
            channel,
            clock,
            config.lifecycle.clone(),
            config.node.clone(),
        );
        Self {
            config,
            provisioner,
            context: Arc::new(context),
        }
    }

    /// Nodes created by this job and not yet terminated, sorted by id.
    pub fn provisioned(&self) -> Vec<NodeId> {
        self.context
            .registry()
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect()
    }

    /// Credential, inbound access rule and storage bucket shared by all
    /// workers.
    pub async fn prepare_environment(&self) -> Result<(), JobError> {
        self.provisioner
            .create_credential()
            .await
            .map_err(JobError::remote("environment", "create credential"))?;
        self.provisioner
            .ensure_inbound_rule(self.config.port)
            .await
            .map_err(JobError::remote("environment", "open inbound port"))?;
        self.provisioner
            .ensure_storage(&self.config.bucket)
            .await
            .map_err(JobError::remote("environment", "create storage"))?;
        info!("environment ready");
        Ok(())
    }

    /// Splits the input, runs the map and reduce phases on fresh workers and
    /// writes the merged recommendations for the target users to the output
    /// path. Nothing is written when any stage fails.
    ///
    /// Provisioned nodes are left running; see [`Job::cleanup`].
    pub async fn run(&self) -> Result<Collector, JobError> {
        let config = &self.config;
        config.validate()?;

        let input = tokio::fs::read(&config.input).await?;
        let lines = text_lines(&input).collect_vec();
        let shards = split(&lines, config.n_mappers)?;
        let partitioner = Partitioner::new(config.n_reducers)?;
        info!(
            "{} input lines split into {} shards",
            lines.len(),
            shards.len()
        );

        tokio::fs::create_dir_all(&config.staging_dir).await?;
        self.prepare_environment().await?;

        let mappers = self
            .bring_up(Role::Mapper, config.n_mappers, &config.mapper_bin, MAPPER_BIN)
            .await?;
        let reducers = self
            .bring_up(Role::Reducer, config.n_reducers, &config.reducer_bin, REDUCER_BIN)
            .await?;

        // map
        let mut map_tasks = Vec::with_capacity(mappers.len());
        for (worker, shard) in mappers.into_iter().zip(&shards) {
            let index = worker.index();
            let text: String = shard.iter().map(|line| format!("{}\n", line)).collect();
            let input = self.stage(&split_file(index), text.as_bytes()).await?;
            map_tasks.push((worker, input, map_command(index, config.policy)));
        }
        let mappers = self.execute_phase("map", map_tasks).await?;

        // shuffle
        let fetched = self.fetch_phase("fetch intermediate", mappers, mapper_output_file).await?;
        let mut mapper_outputs = Vec::with_capacity(fetched.len());
        for (worker, bytes) in &fetched {
            self.stage(&mapper_output_file(worker.index()), bytes).await?;
            mapper_outputs.push(String::from_utf8_lossy(bytes).into_owned());
        }
        let partitions = partitioner.shuffle_lines(mapper_outputs.iter().flat_map(|out| out.lines()));
        info!("shuffled into {} partitions", partitions.len());

        // reduce
        let mut reduce_tasks = Vec::with_capacity(reducers.len());
        for (worker, partition) in reducers.into_iter().zip(&partitions) {
            let index = worker.index();
            let text = render_partition(partition);
            let input = self.stage(&reducer_input_file(index), text.as_bytes()).await?;
            reduce_tasks.push((worker, input, reduce_command(index)));
        }
        let reducers = self.execute_phase("reduce", reduce_tasks).await?;

        // collect
        let mut collector = Collector::new(config.targets.iter().copied());
        let fetched = self.fetch_phase("fetch output", reducers, reducer_output_file).await?;
        for (worker, bytes) in &fetched {
            self.stage(&reducer_output_file(worker.index()), bytes).await?;
            collector.absorb(&String::from_utf8_lossy(bytes))?;
        }
        collector.write_to(&config.output)?;
        Ok(collector)
    }

    /// Terminates every node this job provisioned and removes the job
    /// credential.
    pub async fn cleanup(&self) -> Result<(), JobError> {
        let ids = self.provisioned();
        if !ids.is_empty() {
            self.provisioner
                .terminate_nodes(&ids)
                .await
                .map_err(JobError::remote("cleanup", "terminate nodes"))?;
            for id in &ids {
                self.context.registry().remove(id);
            }
            info!("terminated {} nodes", ids.len());
        }
        self.provisioner
            .delete_credential()
            .await
            .map_err(JobError::remote("cleanup", "delete credential"))?;
        Ok(())
    }

    async fn bring_up(
        &self,
        role: Role,
        count: usize,
        binary: &Path,
        remote: &str,
    ) -> Result<Vec<Worker>, JobError> {
        let artifacts = vec![Artifact::executable(binary, remote)];
        let context = Arc::clone(&self.context);
        let workers = (0..count).map(|index| Worker::new(role, index)).collect_vec();
        run_phase(&format!("{} bring-up", role), workers, move |worker| {
            let context = Arc::clone(&context);
            let artifacts = artifacts.clone();
            async move { context.bring_up(worker, &artifacts).await }
        })
        .await
    }

    async fn execute_phase(
        &self,
        phase: &str,
        tasks: Vec<(Worker, Artifact, String)>,
    ) -> Result<Vec<Worker>, JobError> {
        let context = Arc::clone(&self.context);
        run_phase(phase, tasks, move |(worker, input, command)| {
            let context = Arc::clone(&context);
            async move { context.execute(worker, vec![input], command).await }
        })
        .await
    }

    /// Fetches `file(index)` from every worker.
    async fn fetch_phase(
        &self,
        phase: &str,
        workers: Vec<Worker>,
        file: fn(usize) -> String,
    ) -> Result<Vec<(Worker, Vec<u8>)>, JobError> {
        let context = Arc::clone(&self.context);
        run_phase(phase, workers, move |worker| {
            let context = Arc::clone(&context);
            async move {
                let bytes = context.fetch(&worker, &file(worker.index())).await?;
                Ok((worker, bytes))
            }
        })
        .await
    }

    /// Writes `content` to the staging directory and returns it as an
    /// artifact with the same remote name.
    async fn stage(&self, name: &str, content: &[u8]) -> Result<Artifact, JobError> {
        let local: PathBuf = self.config.staging_dir.join(name);
        tokio::fs::write(&local, content).await?;
        Ok(Artifact::data(local, name))
    }
}
