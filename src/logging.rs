//! Structured logging setup (ambient, spec §9), matching the teacher's
//! `tracing`-based init.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "bbb_recover=debug,info"
    } else {
        "bbb_recover=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
