//! Line-oriented records exchanged between the pipeline stages.
//!
//! Every stage reads and writes plain text so shards can be moved between
//! nodes as ordinary files:
//!
//! ```text
//! input         UserID<TAB>FriendID1,FriendID2,...
//! intermediate  KeyA<TAB>KeyB<TAB>Tag
//! reducer       UserID<TAB>RecID1:Count1,RecID2:Count2,...
//! final         UserID<SPACE>RecID1,RecID2,...
//! ```

use std::fmt;

use itertools::Itertools;

use crate::error::{Error, Result};

pub type UserId = u64;

/// Tag text marking a pair of users that are already friends.
pub const DIRECT_MARKER: &str = "direct";

pub(crate) fn parse_user(token: &str, line: &str) -> Result<UserId> {
    token
        .trim()
        .parse()
        .map_err(|_| Error::data_format(line, format!("{:?} is not a user id", token)))
}

/// An unordered pair of users, stored as `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    first: UserId,
    second: UserId,
}

impl PairKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    pub fn first(&self) -> UserId {
        self.first
    }

    pub fn second(&self) -> UserId {
        self.second
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.first, self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Direct,
    /// A mutual friend of both users in the pair.
    Witness(UserId),
}

impl Tag {
    fn parse(token: &str, line: &str) -> Result<Self> {
        if token == DIRECT_MARKER {
            Ok(Tag::Direct)
        } else {
            parse_user(token, line).map(Tag::Witness)
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Direct => f.write_str(DIRECT_MARKER),
            Tag::Witness(user) => write!(f, "{}", user),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntermediateRecord {
    pub pair: PairKey,
    pub tag: Tag,
}

impl IntermediateRecord {
    pub fn new(pair: PairKey, tag: Tag) -> Self {
        Self { pair, tag }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields = line.trim().split('\t').collect_vec();
        match fields[..] {
            [a, b, tag] => {
                let pair = PairKey::new(parse_user(a, line)?, parse_user(b, line)?);
                Ok(Self::new(pair, Tag::parse(tag, line)?))
            }
            _ => Err(Error::data_format(
                line,
                format!("expected 3 fields, found {}", fields.len()),
            )),
        }
    }
}

impl fmt::Display for IntermediateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.pair, self.tag)
    }
}

/// One user's adjacency list. Empty entries in the friend list are kept as
/// `None` so positions line up with the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjacencyLine {
    pub user: UserId,
    pub friends: Vec<Option<UserId>>,
}

impl AdjacencyLine {
    /// Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let fields = trimmed.split('\t').collect_vec();
        let (user, friends) = match fields[..] {
            [user, friends] => (user, friends),
            _ => {
                return Err(Error::data_format(
                    line,
                    format!("expected 2 fields, found {}", fields.len()),
                ))
            }
        };

        let friends = friends
            .split(',')
            .map(|token| match token.trim() {
                "" => Ok(None),
                id => parse_user(id, line).map(Some),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Self {
            user: parse_user(user, line)?,
            friends,
        }))
    }
}

/// A user's ranked recommendations as written by a reducer shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducerLine {
    pub user: UserId,
    pub entries: Vec<(UserId, u64)>,
}

impl fmt::Display for ReducerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .iter()
            .map(|(id, count)| format!("{}:{}", id, count))
            .join(",");
        write!(f, "{}\t{}", self.user, entries)
    }
}
