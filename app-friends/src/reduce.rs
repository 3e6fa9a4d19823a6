use std::collections::BTreeSet;

use common::{IntermediateRecord, PairKey, RecommendationMap, ReducerLine, Tag, UserId, TOP_K};
use log::debug;

/// Tags seen so far for the pair being reduced.
#[derive(Debug)]
struct Group {
    pair: PairKey,
    direct: bool,
    witnesses: BTreeSet<UserId>,
}

impl Group {
    fn start(record: IntermediateRecord) -> Self {
        let mut group = Group {
            pair: record.pair,
            direct: false,
            witnesses: BTreeSet::new(),
        };
        group.add(record.tag);
        group
    }

    fn add(&mut self, tag: Tag) {
        match tag {
            Tag::Direct => self.direct = true,
            Tag::Witness(user) => {
                self.witnesses.insert(user);
            }
        }
    }

    fn close(self, recommendations: &mut RecommendationMap) {
        if self.direct {
            return;
        }
        // a friend listed twice pairs with itself
        if self.pair.first() == self.pair.second() {
            debug!("dropping self pair {}", self.pair);
            return;
        }
        recommendations.add_pair(self.pair, self.witnesses.len() as u64);
    }
}

/// Streaming reducer over one sorted partition.
///
/// Records with equal keys must arrive consecutively. Each finished group is
/// folded into a [`RecommendationMap`]: pairs that are already friends are
/// dropped, every other pair credits both users with its number of distinct
/// mutual friends.
#[derive(Debug, Default)]
pub struct RecommendationReducer {
    current: Option<Group>,
    recommendations: RecommendationMap,
}

impl RecommendationReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IntermediateRecord) {
        if let Some(group) = self.current.as_mut() {
            if group.pair == record.pair {
                group.add(record.tag);
                return;
            }
        }
        if let Some(done) = self.current.replace(Group::start(record)) {
            done.close(&mut self.recommendations);
        }
    }

    /// Closes the last group and returns everything accumulated.
    pub fn finish(mut self) -> RecommendationMap {
        if let Some(last) = self.current.take() {
            last.close(&mut self.recommendations);
        }
        self.recommendations
    }

    /// Closes the last group and returns each user's top recommendations.
    pub fn finish_top_k(self) -> Vec<ReducerLine> {
        self.finish().top_k(TOP_K).collect()
    }
}

/// Reduces partition text (mapper output format), skipping malformed lines.
pub fn reduce_lines<'a, I>(lines: I) -> Vec<ReducerLine>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut reducer = RecommendationReducer::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match IntermediateRecord::parse(line) {
            Ok(record) => reducer.push(record),
            Err(e) => debug!("skipping partition record: {}", e),
        }
    }
    reducer.finish_top_k()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(a: UserId, b: UserId, tag: Tag) -> IntermediateRecord {
        IntermediateRecord::new(PairKey::new(a, b), tag)
    }

    #[test]
    fn direct_pair_yields_nothing() {
        let mut reducer = RecommendationReducer::new();
        reducer.push(record(2, 3, Tag::Direct));
        let map = reducer.finish();
        assert!(map.is_empty());
        assert_eq!(map.get(2, 3), 0);
    }

    #[test]
    fn distinct_witnesses_counted_both_ways() {
        let mut reducer = RecommendationReducer::new();
        reducer.push(record(2, 3, Tag::Witness(7)));
        reducer.push(record(2, 3, Tag::Witness(9)));
        let map = reducer.finish();
        assert_eq!(map.get(2, 3), 2);
        assert_eq!(map.get(3, 2), 2);
    }

    #[test]
    fn repeated_witness_counts_once() {
        let lines = reduce_lines(vec!["2\t3\t7", "2\t3\t7", "2\t3\t8"]);
        assert_eq!(lines[0].to_string(), "2\t3:2");
        assert_eq!(lines[1].to_string(), "3\t2:2");
    }

    #[test]
    fn direct_marker_wins_over_witnesses() {
        let lines = reduce_lines(vec!["1\t2\tdirect", "1\t2\t5", "1\t2\t6", "1\t3\t5"]);
        let rendered: Vec<_> = lines.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1\t3:1", "3\t1:1"]);
    }

    #[test]
    fn last_group_is_not_dropped() {
        let lines = reduce_lines(vec!["1\t2\tdirect", "4\t5\t1"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].user, 4);
    }

    #[test]
    fn at_most_ten_entries_with_numeric_tie_break() {
        let mut reducer = RecommendationReducer::new();
        for other in (2..=20).rev() {
            reducer.push(record(1, other, Tag::Witness(100)));
        }
        let lines = reducer.finish_top_k();
        let first = lines.iter().find(|line| line.user == 1).unwrap();
        assert_eq!(first.entries.len(), TOP_K);
        let ids: Vec<_> = first.entries.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, (2..=11).collect::<Vec<_>>());
    }

    #[test]
    fn self_pair_is_never_recommended() {
        assert!(reduce_lines(vec!["2\t2\t1", "2\t2\t5"]).is_empty());

        let records = crate::map_line("1\t2,2,3", crate::FriendListPolicy::KeepDuplicates).unwrap();
        let text: Vec<String> = records.iter().map(ToString::to_string).collect();
        let mut text: Vec<&str> = text.iter().map(String::as_str).collect();
        text.sort_unstable();
        let rendered: Vec<_> = reduce_lines(text).iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["2\t3:1", "3\t2:1"]);
    }

    #[test]
    fn malformed_lines_skipped() {
        let lines = reduce_lines(vec!["garbage", "2\t3", "", "2\t3\t4"]);
        assert_eq!(lines.len(), 2);
    }
}
