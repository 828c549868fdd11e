//! Region checkers
//!
//! Checkers run inline on every accepted region heartbeat and propose at
//! most one repair for the reporting region.

mod merge;
mod namespace;
mod replica;

pub use merge::MergeChecker;
pub use namespace::NamespaceChecker;
pub use replica::ReplicaChecker;
