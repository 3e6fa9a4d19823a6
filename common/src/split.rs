use crate::error::{Error, Result};

/// Cuts `lines` into exactly `n_mappers` contiguous shards of
/// `ceil(len / n_mappers)` lines. Trailing shards may be short or empty.
pub fn split<T: Clone>(lines: &[T], n_mappers: usize) -> Result<Vec<Vec<T>>> {
    if n_mappers == 0 {
        return Err(Error::Config("number of mappers must be at least 1".into()));
    }

    let shard_len = (lines.len() + n_mappers - 1) / n_mappers;
    let shards = (0..n_mappers)
        .map(|i| {
            let start = (i * shard_len).min(lines.len());
            let end = (start + shard_len).min(lines.len());
            lines[start..end].to_vec()
        })
        .collect();
    Ok(shards)
}
