//! Node-set and range-set algebra, the output-aggregation tree, and the
//! shared error taxonomy that every other `clustershell-rs` crate builds on
//! (spec §3 "core vocabulary"). Nothing in this crate talks to a reactor,
//! a worker, or a socket — it is pure data and pure functions, which is
//! what lets it be fuzzed and property-tested in isolation.

pub mod error;
pub mod msgtree;
pub mod nodeset;
pub mod rangeset;
pub mod rangeset_nd;
pub mod resolver;

pub use error::{NodeSetParseError, RangeSetParseError, ResolverError};
pub use msgtree::MsgTree;
pub use nodeset::NodeSet;
pub use rangeset::{FoldOptions, RangeSet, RangeToken};
pub use rangeset_nd::{FoldAxis, RangeSetND};
pub use resolver::{GroupResolver, StaticGroupResolver};
