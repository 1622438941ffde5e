//! Shared fixtures for integration tests
//!
//! Memory-engine catalogues are keyed by host, so every test passes its own
//! host name to stay isolated from the others running in parallel.

use rdtk::catalog::HandlerOptions;
use rdtk::types::Document;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

/// Memory-backed handler options under `/data`
pub fn memory_options(host: &str) -> HandlerOptions {
    HandlerOptions::new()
        .engine("memory")
        .host(host)
        .database("meta")
        .database_id("pytest")
        .base_dir("/data")
}

/// Headerless CSV with `rows` samples at 10 Hz: `t, i`
pub fn write_ten_hz_table(dir: &Path, name: &str, rows: usize) -> PathBuf {
    let path = dir.join(name);
    let body: String = (0..rows)
        .map(|i| format!("{},{}\n", i as f64 / 10.0, i))
        .collect();
    fs::write(&path, body).unwrap();
    path
}
