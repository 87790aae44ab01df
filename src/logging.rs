use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

/// Environment variable holding an `EnvFilter` directive, e.g. `exec_forge=debug`.
pub const LOG_ENV: &str = "EXEC_FORGE_LOG";

/// Installs the stderr subscriber. Defaults to `warn`.
///
/// Events emitted after the streams are redirected land in the daemon's
/// stderr target, so the procedure only traces at `debug` and below.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let fmt_layer = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}
