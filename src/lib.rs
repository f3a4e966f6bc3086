#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod concrete;
pub mod graph;
pub mod matcher;
pub mod pattern;

pub use graph::HostGraph;
pub use matcher::{MatchDirection, MatchOptions, NestedMatcher, PatternMatch};
pub use pattern::{GraphId, NodeId, Pattern, PatternBuilder, PatternError, PatternKind};
