//! rdtk: Recorded-Data Toolkit
//!
//! A metadata catalogue over embedded document stores, plus a model layer
//! that picks a loader for a file from its metadata and returns uniform
//! `(timestamps, data)` pairs.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod io;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod schema;
pub mod store;
pub mod types;

pub use error::{ApiError, StorageError};
pub use types::Document;
