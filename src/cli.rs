//! CLI domain: parse, route and output only.
//! No domain orchestration; a single route table dispatches to the catalogue
//! and the model layer.

mod output;
mod parse;
mod route;

pub use output::{map_error, render_json, render_table};
pub use parse::{Cli, Commands, DatabaseArgs, DbCommands, ListTarget, OutputFormat};
pub use route::RunContext;
