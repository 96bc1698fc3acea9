// Option-name parsers: percentile reducers, order prefixes and intervals

pub mod lexer;
pub mod names;

pub use names::{interval_name, negated, percentile};
