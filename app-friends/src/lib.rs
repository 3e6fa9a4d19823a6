//! Mutual-friend recommendation job: the map and reduce halves that run on
//! worker nodes.

pub mod map;
pub mod reduce;

pub use map::{map_adjacency, map_line, map_lines, FriendListPolicy};
pub use reduce::{reduce_lines, RecommendationReducer};

/// Executable names deployed to workers.
pub const MAPPER_BIN: &str = "friends-mapper";
pub const REDUCER_BIN: &str = "friends-reducer";

/// Flag accepted by the mapper binary to select [`FriendListPolicy::Dedup`].
pub const DEDUP_FLAG: &str = "--dedup-friends";

/// Stdout carries job data, so the worker binaries only log warnings (to
/// stderr) unless `RUST_LOG` says otherwise.
pub fn init_logger() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init()
}
