use common::{AdjacencyLine, IntermediateRecord, PairKey, Result, Tag};
use log::debug;

/// What to do with a friend id listed more than once on the same line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendListPolicy {
    /// Emit for every position, duplicates included.
    KeepDuplicates,
    /// Keep the first occurrence of each id.
    Dedup,
}

impl Default for FriendListPolicy {
    fn default() -> Self {
        FriendListPolicy::KeepDuplicates
    }
}

/// Emits one `direct` record per friend, and one witness record (tagged with
/// `line.user`) for every pair of friends on the line.
pub fn map_adjacency<F>(line: &AdjacencyLine, policy: FriendListPolicy, mut emit: F)
where
    F: FnMut(IntermediateRecord),
{
    let mut friends: Vec<_> = line.friends.iter().copied().collect();
    if policy == FriendListPolicy::Dedup {
        let mut seen = Vec::with_capacity(friends.len());
        friends.retain(|friend| match friend {
            Some(id) if seen.contains(id) => false,
            Some(id) => {
                seen.push(*id);
                true
            }
            None => true,
        });
    }

    for friend in friends.iter().flatten() {
        emit(IntermediateRecord::new(
            PairKey::new(line.user, *friend),
            Tag::Direct,
        ));
    }

    for (i, a) in friends.iter().enumerate() {
        for b in &friends[i + 1..] {
            if let (Some(a), Some(b)) = (a, b) {
                emit(IntermediateRecord::new(
                    PairKey::new(*a, *b),
                    Tag::Witness(line.user),
                ));
            }
        }
    }
}

/// Maps every line, skipping malformed ones.
pub fn map_lines<'a, I>(lines: I, policy: FriendListPolicy) -> Vec<IntermediateRecord>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    for line in lines {
        match AdjacencyLine::parse(line) {
            Ok(Some(adjacency)) => map_adjacency(&adjacency, policy, |record| out.push(record)),
            Ok(None) => {}
            Err(e) => debug!("skipping input line: {}", e),
        }
    }
    out
}

/// Maps one raw input line. Blank lines produce nothing; malformed lines are
/// returned as a recoverable error.
pub fn map_line(line: &str, policy: FriendListPolicy) -> Result<Vec<IntermediateRecord>> {
    let mut out = Vec::new();
    if let Some(adjacency) = AdjacencyLine::parse(line)? {
        map_adjacency(&adjacency, policy, |record| out.push(record));
    }
    Ok(out)
}
