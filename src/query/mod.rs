//! Query surfaces: free-text search over the inverted index and the
//! structured XML query translation.

pub mod search;
pub mod snippet;
pub mod tree;
pub mod xesam;

pub use search::QueryEngine;
pub use tree::{QueryTree, SearchHit};
pub use xesam::QueryFragments;
