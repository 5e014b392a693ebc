use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

pub mod logger {
    use super::*;

    /// Install the global subscriber: `RUST_LOG` filter (default `info`), stdout,
    /// and an optional append-only plain-text log file.
    pub fn init(log_file: Option<&str>) -> Result<()> {
        let file_layer = match log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(Path::new(path))
                    .map_err(|e| Error::Config(format!("log file {path}: {e}")))?;

                Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(fmt::layer())
            .with(file_layer)
            .try_init()
            .map_err(|e| Error::Config(format!("logging: {e}")))
    }
}
