//! Final merge of reducer outputs for the target users.

use std::io::Write;
use std::path::Path;

use itertools::Itertools;
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::record::{parse_user, UserId};
use crate::recommend::RecommendationMap;

#[derive(Debug, Clone)]
pub struct Collector {
    targets: Vec<UserId>,
    merged: RecommendationMap,
}

impl Collector {
    pub fn new<I: IntoIterator<Item = UserId>>(targets: I) -> Self {
        Self {
            targets: targets.into_iter().unique().collect(),
            merged: RecommendationMap::new(),
        }
    }

    pub fn targets(&self) -> &[UserId] {
        &self.targets
    }

    /// Folds one reducer shard into the merge, keeping the highest count seen
    /// for each `(user, recommendation)`.
    pub fn absorb(&mut self, reducer_output: &str) -> Result<()> {
        for line in reducer_output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (user, entries) = match line.split('\t').collect_vec()[..] {
                [user, entries] => (user, entries),
                _ => {
                    debug!("skipping reducer line {:?}", line);
                    continue;
                }
            };
            let user = match parse_user(user, line) {
                Ok(user) if self.targets.contains(&user) => user,
                _ => continue,
            };

            for entry in entries.split(',').filter(|e| e.contains(':')) {
                let (id, count) = parse_entry(entry)?;
                self.merged.merge_max(user, id, count);
            }
        }
        Ok(())
    }

    /// Final output lines, one per target user that has recommendations, in
    /// allow-list order.
    pub fn lines(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter_map(|&user| {
                let ranked = self.merged.ranked(user);
                if ranked.is_empty() {
                    return None;
                }
                let ids = ranked.iter().map(|(id, _)| id).join(",");
                Some(format!("{} {}", user, ids))
            })
            .collect()
    }

    pub fn render(&self) -> String {
        self.lines().into_iter().map(|line| line + "\n").collect()
    }

    /// Writes the rendered output to `path` through a temporary file in the
    /// same directory, so readers never observe a partial file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(self.render().as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        info!("final recommendations written to {}", path.display());
        Ok(())
    }
}

fn parse_entry(entry: &str) -> Result<(UserId, u64)> {
    let invalid = || Error::Aggregation(format!("invalid recommendation entry {:?}", entry));
    match entry.split(':').collect_vec()[..] {
        [id, count] => {
            let id = id.trim().parse().map_err(|_| invalid())?;
            let count = count.trim().parse().map_err(|_| invalid())?;
            Ok((id, count))
        }
        _ => Err(invalid()),
    }
}
