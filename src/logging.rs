//! Structured logging setup (console + optional rolling file).

use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the host application.
///
/// Honours `RUST_LOG`; defaults to `info` globally with `debug` for this
/// crate. When `log_dir` is given, a daily rolling file sink is added next
/// to the console output. Safe to call more than once; later calls are
/// no-ops.
pub fn init(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nammaooru_pos_sync=debug"));
    let console_layer = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).ok();
            let file_appender = tracing_appender::rolling::daily(dir, "pos-sync");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init();
            // Keep the guard alive for the process lifetime — dropping it
            // stops the background log flusher.
            std::mem::forget(guard);
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    }
}
