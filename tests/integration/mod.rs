//! Integration tests for the recorded-data toolkit

mod catalog_scenarios;
mod cli_binary;
mod config_integration;
mod ingest_flow;
mod model_io;
mod storage_engines;
mod test_utils;
