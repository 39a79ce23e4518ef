//! Log backend setup.
//!
//! Everything in the crate logs through the `log` facade with a subsystem
//! target (`power`, `cellular`, `queue`, ...).  `env_logger` renders those
//! records to stderr or, when configured, appends them to a file.
//! `RUST_LOG` overrides the configured level when set.

use std::fs::OpenOptions;

use env_logger::{Builder, Env, Target};

use crate::config::LogConfig;
use crate::error::Result;

pub fn init(config: &LogConfig) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.level.as_str()));
    builder.format_timestamp_millis();
    if let Some(path) = &config.file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}
