//! Logging setup for the binary. The library only emits `tracing` events.

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber honouring `RUST_LOG` (default `info`).
/// Logs go to stderr so query output on stdout stays pipeable.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "recon_kg=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
