use std::io::{self, BufWriter, Read, Write};

use app_friends::{init_logger, reduce_lines};
use common::text_lines;
use eyre::Result;
use log::info;

/// Reads one sorted partition on stdin, writes per-user top recommendations
/// to stdout.
fn main() -> Result<()> {
    init_logger();

    let mut input = Vec::new();
    io::stdin().lock().read_to_end(&mut input)?;
    let lines = reduce_lines(text_lines(&input));

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for line in &lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;

    info!("wrote recommendations for {} users", lines.len());
    Ok(())
}
