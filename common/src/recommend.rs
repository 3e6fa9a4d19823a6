use std::cmp::Reverse;
use std::collections::BTreeMap;

use itertools::Itertools;

use crate::record::{PairKey, ReducerLine, UserId};

/// Recommendations kept per user by a reducer shard.
pub const TOP_K: usize = 10;

/// Sorts by count descending, then recommended id ascending.
pub fn rank<I>(entries: I) -> Vec<(UserId, u64)>
where
    I: IntoIterator<Item = (UserId, u64)>,
{
    entries
        .into_iter()
        .sorted_by_key(|&(id, count)| (Reverse(count), id))
        .collect()
}

/// `user -> recommended user -> count`. Missing entries read as zero and
/// inner maps are created on first write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecommendationMap {
    users: BTreeMap<UserId, BTreeMap<UserId, u64>>,
}

impl RecommendationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: UserId, recommended: UserId) -> u64 {
        self.users
            .get(&user)
            .and_then(|recs| recs.get(&recommended))
            .copied()
            .unwrap_or(0)
    }

    fn slot(&mut self, user: UserId, recommended: UserId) -> &mut u64 {
        self.users
            .entry(user)
            .or_default()
            .entry(recommended)
            .or_insert(0)
    }

    pub fn add(&mut self, user: UserId, recommended: UserId, count: u64) {
        *self.slot(user, recommended) += count;
    }

    /// Credits `count` to both members of the pair.
    pub fn add_pair(&mut self, pair: PairKey, count: u64) {
        self.add(pair.first(), pair.second(), count);
        self.add(pair.second(), pair.first(), count);
    }

    pub fn merge_max(&mut self, user: UserId, recommended: UserId, count: u64) {
        let slot = self.slot(user, recommended);
        *slot = (*slot).max(count);
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.users.keys().copied()
    }

    /// All of `user`'s entries in rank order.
    pub fn ranked(&self, user: UserId) -> Vec<(UserId, u64)> {
        self.users
            .get(&user)
            .map(|recs| rank(recs.iter().map(|(&id, &count)| (id, count))))
            .unwrap_or_default()
    }

    /// Per user (ascending id), the best `k` entries.
    pub fn top_k(&self, k: usize) -> impl Iterator<Item = ReducerLine> + '_ {
        self.users().map(move |user| {
            let mut entries = self.ranked(user);
            entries.truncate(k);
            ReducerLine { user, entries }
        })
    }
}
