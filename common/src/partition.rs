//! Shuffle step: route intermediate records to reducer partitions.

use std::hash::Hasher;

use fnv::FnvHasher;
use log::debug;

use crate::error::{Error, Result};
use crate::record::{IntermediateRecord, PairKey};

/// Hash used to route a pair to a reducer. Must give the same value for the
/// same key in every process.
pub trait KeyHasher: Send + Sync {
    fn hash_key(&self, key: &PairKey) -> u64;
}

/// FNV-1a (64 bit) over the key's text form `A<TAB>B`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FnvKeyHasher;

impl KeyHasher for FnvKeyHasher {
    fn hash_key(&self, key: &PairKey) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write(key.to_string().as_bytes());
        hasher.finish()
    }
}

#[derive(Debug, Clone)]
pub struct Partitioner<H = FnvKeyHasher> {
    n_reducers: usize,
    hasher: H,
}

impl Partitioner<FnvKeyHasher> {
    pub fn new(n_reducers: usize) -> Result<Self> {
        Self::with_hasher(n_reducers, FnvKeyHasher)
    }
}

impl<H: KeyHasher> Partitioner<H> {
    pub fn with_hasher(n_reducers: usize, hasher: H) -> Result<Self> {
        if n_reducers == 0 {
            return Err(Error::Config("number of reducers must be at least 1".into()));
        }
        Ok(Self { n_reducers, hasher })
    }

    pub fn n_reducers(&self) -> usize {
        self.n_reducers
    }

    pub fn partition_of(&self, key: &PairKey) -> usize {
        (self.hasher.hash_key(key) % self.n_reducers as u64) as usize
    }

    /// Routes every record to its partition and sorts each partition so equal
    /// keys are adjacent for the reducer.
    pub fn shuffle<I>(&self, records: I) -> Vec<Vec<IntermediateRecord>>
    where
        I: IntoIterator<Item = IntermediateRecord>,
    {
        let mut partitions = vec![Vec::new(); self.n_reducers];
        for record in records {
            partitions[self.partition_of(&record.pair)].push(record);
        }
        for partition in partitions.iter_mut() {
            partition.sort_unstable();
        }
        partitions
    }

    /// Like [`shuffle`](Self::shuffle) but starts from mapper output text,
    /// dropping lines that do not parse.
    pub fn shuffle_lines<'a, I>(&self, lines: I) -> Vec<Vec<IntermediateRecord>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let records = lines
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match IntermediateRecord::parse(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("skipping intermediate record: {}", e);
                    None
                }
            });
        self.shuffle(records)
    }
}

/// One record per line, in mapper output format.
pub fn render_partition(records: &[IntermediateRecord]) -> String {
    let mut out = String::with_capacity(records.len() * 16);
    for record in records {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}
