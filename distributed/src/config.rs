use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use app_friends::{FriendListPolicy, MAPPER_BIN, REDUCER_BIN};
use common::{Error, Result, UserId};
use structopt::StructOpt;

use crate::remote::NodeSpec;
use crate::retry::RetryPolicy;

pub const DEFAULT_READINESS_COMMAND: &str =
    "lsof /var/lib/dpkg/lock-frontend >/dev/null 2>&1 || echo 'free'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    Ask,
    Yes,
    No,
}

impl FromStr for CleanupMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ask" => Ok(CleanupMode::Ask),
            "yes" => Ok(CleanupMode::Yes),
            "no" => Ok(CleanupMode::No),
            other => Err(format!("expected ask, yes or no, got {:?}", other)),
        }
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "coordinator")]
pub struct Opt {
    #[structopt(short, long)]
    pub input: PathBuf,
    #[structopt(short = "m", long, default_value = "3")]
    pub n_mappers: usize,
    #[structopt(short = "r", long, default_value = "2")]
    pub n_reducers: usize,
    #[structopt(
        short,
        long,
        use_delimiter = true,
        default_value = "924,8941,8942,9019,9020,9021,9022,9990,9992,9993"
    )]
    pub targets: Vec<UserId>,
    #[structopt(short, long, default_value = "final_recommendations.txt")]
    pub output: PathBuf,
    /// Local directory for split and partition files.
    #[structopt(long, default_value = "staging")]
    pub staging_dir: PathBuf,
    /// Directory holding the local backend's nodes.
    #[structopt(long, default_value = "nodes")]
    pub node_root: PathBuf,

    #[structopt(long, default_value = "t2.micro")]
    pub instance_type: String,
    #[structopt(long, default_value = "ubuntu-focal-20.04")]
    pub image: String,
    #[structopt(long, default_value = "us-east-1")]
    pub region: String,
    #[structopt(long, default_value = "22")]
    pub port: u16,
    #[structopt(long, default_value = "mapreduce-socialnetwork")]
    pub bucket: String,
    #[structopt(long, default_value = "mapreduce-key")]
    pub key_name: String,

    /// Defaults to `friends-mapper` next to this executable.
    #[structopt(long)]
    pub mapper_bin: Option<PathBuf>,
    /// Defaults to `friends-reducer` next to this executable.
    #[structopt(long)]
    pub reducer_bin: Option<PathBuf>,
    #[structopt(long)]
    pub dedup_friends: bool,

    #[structopt(long, default_value = "3")]
    pub provision_attempts: u32,
    #[structopt(long, default_value = "10")]
    pub provision_interval_secs: u64,
    #[structopt(long, default_value = "60")]
    pub address_attempts: u32,
    #[structopt(long, default_value = "5")]
    pub address_interval_secs: u64,
    /// Wait after a node gets an address before the first connection.
    #[structopt(long, default_value = "90")]
    pub settle_secs: u64,
    #[structopt(long, default_value = "3")]
    pub connect_attempts: u32,
    #[structopt(long, default_value = "30")]
    pub connect_interval_secs: u64,
    #[structopt(long, default_value = "30")]
    pub ready_attempts: u32,
    #[structopt(long, default_value = "10")]
    pub ready_interval_secs: u64,
    #[structopt(
        long,
        default_value = "lsof /var/lib/dpkg/lock-frontend >/dev/null 2>&1 || echo 'free'"
    )]
    pub readiness_command: String,
    /// Run on every node once it is ready, in order.
    #[structopt(long = "setup-command", number_of_values = 1)]
    pub setup_commands: Vec<String>,

    /// Tear down nodes after the job: ask, yes or no.
    #[structopt(long, default_value = "ask")]
    pub cleanup: CleanupMode,
}

/// Knobs for bringing a single worker from `Requested` to `Ready`.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub provision: RetryPolicy,
    pub address: RetryPolicy,
    pub settle_delay: Duration,
    pub connect: RetryPolicy,
    pub readiness: RetryPolicy,
    pub readiness_command: String,
    /// Stdout (trimmed) of the readiness command once the node is ready.
    pub ready_token: String,
    pub setup_commands: Vec<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            provision: RetryPolicy::fixed(3, Duration::from_secs(10)),
            address: RetryPolicy::fixed(60, Duration::from_secs(5)),
            settle_delay: Duration::from_secs(90),
            connect: RetryPolicy::fixed(3, Duration::from_secs(30)),
            readiness: RetryPolicy::fixed(30, Duration::from_secs(10)),
            readiness_command: DEFAULT_READINESS_COMMAND.to_owned(),
            ready_token: "free".to_owned(),
            setup_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTemplate {
    pub instance_type: String,
    pub image: String,
    pub region: String,
}

impl NodeTemplate {
    pub fn spec_for(&self, name: String) -> NodeSpec {
        NodeSpec {
            name,
            instance_type: self.instance_type.clone(),
            image: self.image.clone(),
            region: self.region.clone(),
        }
    }
}

impl Default for NodeTemplate {
    fn default() -> Self {
        Self {
            instance_type: "t2.micro".to_owned(),
            image: "ubuntu-focal-20.04".to_owned(),
            region: "us-east-1".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub input: PathBuf,
    pub n_mappers: usize,
    pub n_reducers: usize,
    pub targets: Vec<UserId>,
    pub output: PathBuf,
    pub staging_dir: PathBuf,
    pub mapper_bin: PathBuf,
    pub reducer_bin: PathBuf,
    pub policy: FriendListPolicy,
    pub node: NodeTemplate,
    pub lifecycle: LifecycleConfig,
    pub port: u16,
    pub bucket: String,
}

impl JobConfig {
    pub fn from_opt(opt: &Opt) -> Result<Self> {
        let sibling = |name: &str| -> Result<PathBuf> {
            Ok(std::env::current_exe()?.with_file_name(name))
        };
        let secs = Duration::from_secs;

        let config = Self {
            input: opt.input.clone(),
            n_mappers: opt.n_mappers,
            n_reducers: opt.n_reducers,
            targets: opt.targets.clone(),
            output: opt.output.clone(),
            staging_dir: opt.staging_dir.clone(),
            mapper_bin: match &opt.mapper_bin {
                Some(path) => path.clone(),
                None => sibling(MAPPER_BIN)?,
            },
            reducer_bin: match &opt.reducer_bin {
                Some(path) => path.clone(),
                None => sibling(REDUCER_BIN)?,
            },
            policy: if opt.dedup_friends {
                FriendListPolicy::Dedup
            } else {
                FriendListPolicy::KeepDuplicates
            },
            node: NodeTemplate {
                instance_type: opt.instance_type.clone(),
                image: opt.image.clone(),
                region: opt.region.clone(),
            },
            lifecycle: LifecycleConfig {
                provision: RetryPolicy::fixed(
                    opt.provision_attempts,
                    secs(opt.provision_interval_secs),
                ),
                address: RetryPolicy::fixed(opt.address_attempts, secs(opt.address_interval_secs)),
                settle_delay: secs(opt.settle_secs),
                connect: RetryPolicy::fixed(opt.connect_attempts, secs(opt.connect_interval_secs)),
                readiness: RetryPolicy::fixed(opt.ready_attempts, secs(opt.ready_interval_secs)),
                readiness_command: opt.readiness_command.clone(),
                setup_commands: opt.setup_commands.clone(),
                ..LifecycleConfig::default()
            },
            port: opt.port,
            bucket: opt.bucket.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_mappers == 0 {
            return Err(Error::Config("number of mappers must be at least 1".into()));
        }
        if self.n_reducers == 0 {
            return Err(Error::Config("number of reducers must be at least 1".into()));
        }
        if self.targets.is_empty() {
            return Err(Error::Config("target user list is empty".into()));
        }
        Ok(())
    }
}
