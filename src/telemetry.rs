//! Diagnostic logging setup.
//!
//! Components emit `tracing` events; this module installs the stderr fmt
//! subscriber once per process. Filter precedence: `ECHW_LOG`, then the
//! `--verbose` default (`debug`), then `warn`. `ECHW_LOG=off` disables output.

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<bool> = OnceCell::new();

fn filter_directive(verbose: bool) -> String {
    env::var("ECHW_LOG")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            if verbose {
                "ech_workers_client=debug".to_string()
            } else {
                "warn".to_string()
            }
        })
}

/// Install the global subscriber. Returns true when this call (or an earlier
/// one) installed it; false when disabled or another subscriber won the race.
pub fn init(verbose: bool) -> bool {
    *INIT.get_or_init(|| {
        let directive = filter_directive(verbose);
        if directive.eq_ignore_ascii_case("off") {
            return false;
        }
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("ech-workers-client: invalid ECHW_LOG '{directive}': {e}; using 'warn'");
            EnvFilter::new("warn")
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
            .is_ok()
    })
}
