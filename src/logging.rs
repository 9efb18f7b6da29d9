//! Logging initialization utilities.

use env_logger::Env;

/// Initialize logging. `RUST_LOG` wins; otherwise each `-v` raises the
/// default level one step above `warn`.
pub fn init(verbosity: u8) {
    let env = Env::default().default_filter_or(default_filter(verbosity));
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}
