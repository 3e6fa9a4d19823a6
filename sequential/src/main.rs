use app_friends::{map_lines, reduce_lines, FriendListPolicy};
use common::{render_partition, split, text_lines, Collector, Partitioner, UserId};
use eyre::Result;
use itertools::Itertools;
use log::info;
use std::{fs, path::PathBuf};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
struct Opt {
    #[structopt(short, long)]
    input: PathBuf,
    #[structopt(short = "m", long, default_value = "3")]
    n_mappers: usize,
    #[structopt(short = "r", long, default_value = "2")]
    n_reducers: usize,
    #[structopt(
        short,
        long,
        use_delimiter = true,
        default_value = "924,8941,8942,9019,9020,9021,9022,9990,9992,9993"
    )]
    targets: Vec<UserId>,
    #[structopt(short, long, default_value = "final_recommendations.txt")]
    output: PathBuf,
    #[structopt(long)]
    dedup_friends: bool,
}

/// Runs split, map, shuffle, reduce and collect in this process, passing
/// text between stages exactly as the distributed job does.
fn run_pipeline(
    input: &[u8],
    n_mappers: usize,
    n_reducers: usize,
    policy: FriendListPolicy,
    targets: &[UserId],
) -> Result<Collector> {
    let partitioner = Partitioner::new(n_reducers)?;
    let lines = text_lines(input).collect_vec();
    let shards = split(&lines, n_mappers)?;

    let mapper_outputs = shards
        .iter()
        .map(|shard| {
            map_lines(shard.iter().copied(), policy)
                .iter()
                .map(ToString::to_string)
                .collect_vec()
        })
        .collect_vec();
    info!("map done: {} shards", mapper_outputs.len());

    let partitions =
        partitioner.shuffle_lines(mapper_outputs.iter().flatten().map(String::as_str));
    info!("shuffle done: {} partitions", partitions.len());

    let mut collector = Collector::new(targets.iter().copied());
    for partition in &partitions {
        let text = render_partition(partition);
        let reduced = reduce_lines(text.lines())
            .into_iter()
            .map(|line| line.to_string())
            .join("\n");
        collector.absorb(&reduced)?;
    }
    Ok(collector)
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::from_args();
    let policy = if opt.dedup_friends {
        FriendListPolicy::Dedup
    } else {
        FriendListPolicy::KeepDuplicates
    };

    let input = fs::read(&opt.input)?;
    let collector = run_pipeline(&input, opt.n_mappers, opt.n_reducers, policy, &opt.targets)?;
    collector.write_to(&opt.output)?;

    Ok(())
}
