//! Concrete host graph implementations.

mod dag;

pub use dag::{kind_is, OpDag, OpId, ValueId};
