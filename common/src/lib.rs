pub mod collect;
pub mod error;
pub mod lines;
pub mod partition;
pub mod record;
pub mod recommend;
pub mod split;

pub use collect::Collector;
pub use error::{Error, Result};
pub use lines::text_lines;
pub use partition::{render_partition, FnvKeyHasher, KeyHasher, Partitioner};
pub use record::{AdjacencyLine, IntermediateRecord, PairKey, ReducerLine, Tag, UserId};
pub use recommend::{rank, RecommendationMap, TOP_K};
pub use split::split;
