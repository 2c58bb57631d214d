//! Logging setup for CTOWatch

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing logger with colored output
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ctowatch=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true),
        )
        .init();
}

#[macro_export]
macro_rules! log_success {
    ($module:expr, $($arg:tt)*) => {
        tracing::info!(target: $module, "✅ {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_cto {
    ($($arg:tt)*) => {
        tracing::info!(target: "CTO_MONITOR", "🔄 {}", format!($($arg)*))
    };
}
