use std::io::{self, BufWriter, Read, Write};

use app_friends::{init_logger, map_lines, FriendListPolicy};
use common::text_lines;
use eyre::Result;
use log::info;
use structopt::StructOpt;

/// Reads adjacency lines on stdin, writes intermediate records to stdout.
#[derive(StructOpt, Debug)]
struct Opt {
    /// Drop repeated friend ids within a line before pairing.
    #[structopt(long)]
    dedup_friends: bool,
}

fn main() -> Result<()> {
    init_logger();
    let opt = Opt::from_args();
    let policy = if opt.dedup_friends {
        FriendListPolicy::Dedup
    } else {
        FriendListPolicy::KeepDuplicates
    };

    let mut input = Vec::new();
    io::stdin().lock().read_to_end(&mut input)?;
    let records = map_lines(text_lines(&input), policy);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for record in &records {
        writeln!(out, "{}", record)?;
    }
    out.flush()?;

    info!("emitted {} records", records.len());
    Ok(())
}
