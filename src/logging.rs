//! Opt-in file logger for applications that do not install their own `tracing` subscriber.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static SETUP: Once = Once::new();

pub const LOG_PATH_ENV: &str = "SSPI_HANDSHAKE_LOG_PATH";
pub const LOG_LEVEL_ENV: &str = "SSPI_HANDSHAKE_LOG_LEVEL";

/// Installs a global subscriber writing to the file named by `SSPI_HANDSHAKE_LOG_PATH`, filtered
/// by `SSPI_HANDSHAKE_LOG_LEVEL` (`EnvFilter` syntax).
///
/// Does nothing when the path is unset, the file cannot be opened, or a global subscriber is
/// already installed. This function can be called multiple times safely.
pub fn setup_logger() {
    SETUP.call_once(|| {
        let Ok(path) = std::env::var(LOG_PATH_ENV) else {
            return;
        };
        let path = PathBuf::from(path);

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("[sspi-handshake] couldn't open log file {}: {err}", path.display());
                return;
            }
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(file);

        let installed = tracing_subscriber::registry()
            .with(fmt_layer)
            .with(EnvFilter::from_env(LOG_LEVEL_ENV))
            .try_init();

        if installed.is_ok() {
            debug!(path = %path.display(), "Handshake logger installed");
        }
    })
}
