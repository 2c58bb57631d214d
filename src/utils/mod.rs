//! Utility modules

pub mod dexscreener;
pub mod formatter;
pub mod logger;
pub mod metrics;
pub mod seen_store;
pub mod telegram;

pub use dexscreener::DexScreenerClient;
pub use logger::init_logger;
pub use metrics::MetricsService;
pub use seen_store::SeenStore;
pub use telegram::TelegramNotifier;
