//! File I/O facade
//!
//! [`FileReader`] turns a path or a metadata document into loaded data:
//! it resolves the metadata, picks a model, loads and pre-processes.
//! [`FileWriter`] goes the other way, writing the metadata sidecar and then
//! the payload.

pub mod reader;
pub mod writer;

pub use reader::{FileReader, ReadOutput, ReadRequest};
pub use writer::FileWriter;
