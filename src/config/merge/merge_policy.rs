//! Merge rules: defaults first, later sources override earlier ones.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the built-in defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let mut builder = Config::builder();
    for class in ["meta", "annotation", "statistics", "time_series"] {
        builder = builder
            .set_default(format!("db.{}.engine", class), "sled")?
            .set_default(format!("db.{}.host", class), ".rdtk/db")?
            .set_default(format!("db.{}.database", class), "rdtk")?;
    }
    builder.set_default("hash.digest_size", 4)
}
