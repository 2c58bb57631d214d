//! CTOWatch - DexScreener Community Takeover alerts
//!
//! Polls DexScreener for newly claimed community takeovers, enriches each
//! new token with trading data and announces it on a Telegram channel.
//! Tokens are announced at most once, across restarts.

mod config;
mod dashboard;
mod modules;
mod utils;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use config::Config;
use dashboard::HealthServer;
use modules::{commands, Command, CtoMonitor, MonitorSettings};
use utils::{init_logger, DexScreenerClient, MetricsService, SeenStore, TelegramNotifier};

const BANNER: &str = r#"
    ╔═══════════════════════════════════════════════╗
    ║   CTOWatch                                    ║
    ║   🔄 DexScreener Community Takeover Alerts    ║
    ╚═══════════════════════════════════════════════╝
"#;

/// How long shutdown waits for an in-flight run before saving anyway
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// CTOWatch application
pub struct CtoWatch {
    config: Config,
    bot: Bot,
    metrics: Arc<MetricsService>,
    monitor: CtoMonitor,
}

impl CtoWatch {
    /// Create a new CTOWatch instance. Fails on incomplete configuration.
    pub fn new() -> Result<Self> {
        let config = Config::from_env()?;

        let metrics = Arc::new(MetricsService::new()?);
        let source = Arc::new(DexScreenerClient::from_config(&config)?.with_metrics(Arc::clone(&metrics)));
        let bot = Bot::new(config.telegram_bot_token.clone());
        let notifier = Arc::new(TelegramNotifier::new(bot.clone(), config.telegram_channel.clone()));
        let store = Arc::new(SeenStore::new(&config.seen_file));

        let monitor = CtoMonitor::new(
            MonitorSettings::from_config(&config),
            source,
            notifier,
            store,
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            bot,
            metrics,
            monitor,
        })
    }

    /// Run every component until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        println!("{}", BANNER);
        info!(target: "CTOWATCH", "Initializing CTOWatch...");

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!(target: "CTOWATCH", "Could not register bot commands: {}", e);
        }

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        if let Some(poller) = self.monitor.start() {
            tasks.spawn(async move { poller.await.map_err(anyhow::Error::from) });
        }

        let health = HealthServer::new(
            self.config.health_port,
            self.monitor.clone(),
            Arc::clone(&self.metrics),
        );
        tasks.spawn(async move { health.start().await });

        let handler = Update::filter_message()
            .filter_command::<Command>()
            .endpoint(commands::answer);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.monitor.clone(), self.config.clone()])
            .default_handler(|_| async {})
            .build();
        let dispatcher_shutdown = dispatcher.shutdown_token();
        tasks.spawn(async move {
            dispatcher.dispatch().await;
            Ok(())
        });

        crate::log_success!("CTOWATCH", "All components started");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(finished) = tasks.join_next() => {
                    let failure = match finished {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e),
                        Err(e) => Some(anyhow::Error::from(e)),
                    };
                    match failure {
                        Some(e) => {
                            self.flush();
                            error!(target: "CTOWATCH", "Background task failed: {:#}", e);
                        }
                        None => warn!(target: "CTOWATCH", "Background task exited"),
                    }
                }
            }
        }

        if let Ok(stopping) = dispatcher_shutdown.shutdown() {
            stopping.await;
        }
        self.shutdown().await;
        tasks.abort_all();
        Ok(())
    }

    /// Best-effort save of the seen set
    fn flush(&self) {
        if self.monitor.persist().is_ok() {
            info!(target: "CTOWATCH", "Seen set flushed ({} tokens)", self.monitor.seen_len());
        }
    }

    /// Graceful shutdown: the poller settles before the final save
    pub async fn shutdown(&self) {
        info!(target: "CTOWATCH", "Shutting down...");
        if self.monitor.shutdown(SHUTDOWN_GRACE).await.is_ok() {
            info!(target: "CTOWATCH", "Seen set flushed ({} tokens)", self.monitor.seen_len());
        }
        info!(target: "CTOWATCH", "✅ Shutdown complete");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "CTOWATCH", "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(target: "CTOWATCH", "Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let app = match CtoWatch::new() {
        Ok(app) => app,
        Err(e) => {
            error!(target: "CTOWATCH", "Failed to initialize: {}", e);
            return Err(e);
        }
    };

    app.run().await
}
