use std::sync::Arc;

use distributed::{init_logger, CleanupMode, Job, JobConfig, LocalChannel, LocalProvisioner, Opt, TokioClock};
use eyre::Result;
use log::{error, info, warn};
use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};

async fn confirm_cleanup() -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Terminate all provisioned nodes? (yes/no)");
        match lines.next_line().await?.as_deref().map(str::trim) {
            Some("yes") => return Ok(true),
            Some("no") | None => return Ok(false),
            Some(other) => warn!("please answer yes or no, got {:?}", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let opt = Opt::from_args();
    let config = JobConfig::from_opt(&opt)?;
    let provisioner = Arc::new(LocalProvisioner::new(&opt.node_root, &opt.key_name));
    let job = Job::new(
        config,
        provisioner,
        Arc::new(LocalChannel::new()),
        Arc::new(TokioClock),
    );

    let result = job.run().await;
    match &result {
        Ok(collector) => info!(
            "job done: recommendations for {} of {} target users",
            collector.lines().len(),
            collector.targets().len()
        ),
        Err(e) => error!("job failed: {}", e),
    }

    let terminate = match opt.cleanup {
        CleanupMode::Yes => true,
        CleanupMode::No => false,
        CleanupMode::Ask => confirm_cleanup().await?,
    };
    if terminate {
        job.cleanup().await?;
    } else {
        info!("leaving nodes running: {:?}", job.provisioned());
    }

    result?;
    Ok(())
}
