//! Default values applied before any file or environment source.

pub mod merge_policy;
