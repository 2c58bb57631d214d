//! Operator commands served over the Telegram bot

use std::time::Duration;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::{error, info};

use crate::config::Config;
use crate::modules::cto_monitor::{CtoMonitor, MonitorStats, RunReport};

/// Keys shown by `/recent`
pub const RECENT_LIMIT: usize = 10;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "CTOWatch commands:")]
pub enum Command {
    #[command(description = "show this help.")]
    Help,
    #[command(description = "monitor status.")]
    Status,
    #[command(description = "check for new takeovers now.")]
    Check,
    #[command(description = "lifetime counters.")]
    Stats,
    #[command(description = "sample of announced tokens.")]
    Recent,
    #[command(description = "forget every announced token.")]
    Clear,
    #[command(description = "show this chat's id.")]
    ChatId,
}

impl Command {
    /// Commands that change pipeline state
    pub fn is_control(&self) -> bool {
        matches!(self, Command::Check | Command::Clear)
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, hours, mins, s) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60, secs % 60);
    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, s)
    } else {
        format!("{}s", s)
    }
}

pub fn status_text(stats: &MonitorStats) -> String {
    let last_run = stats
        .last_run_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "{}\n\n\
         Running: {}\n\
         State: {}\n\
         Seen tokens: {}\n\
         Uptime: {}\n\
         Check interval: {}\n\
         Last run: {}",
        html::bold("🤖 CTOWatch status"),
        if stats.is_running { "yes" } else { "no" },
        stats.state.as_str(),
        stats.seen_tokens,
        format_duration(Duration::from_secs(stats.uptime_secs)),
        format_duration(Duration::from_secs(stats.check_interval_secs)),
        last_run
    )
}

pub fn stats_text(stats: &MonitorStats) -> String {
    format!(
        "{}\n\n\
         Runs: {}\n\
         Events fetched: {}\n\
         Notifications sent: {}\n\
         Delivery failures: {}\n\
         Fetch failures: {}\n\
         Persist failures: {}\n\
         Seen tokens: {}",
        html::bold("📊 CTOWatch stats"),
        stats.runs,
        stats.events_fetched,
        stats.notifications_sent,
        stats.delivery_failures,
        stats.fetch_failures,
        stats.persist_failures,
        stats.seen_tokens
    )
}

pub fn report_text(report: &RunReport) -> String {
    let mut text = format!(
        "{}\n\n\
         Outcome: {}\n\
         Fetched: {}\n\
         New: {}\n\
         Delivered: {}\n\
         Failed: {}\n\
         Already seen: {}\n\
         Invalid: {}",
        html::bold("🔍 Check complete"),
        report.outcome.as_str(),
        report.fetched,
        report.notified + report.failed_deliveries,
        report.notified,
        report.failed_deliveries,
        report.already_seen,
        report.skipped_invalid
    );
    if report.notified + report.failed_deliveries > 0 && !report.persisted {
        text.push_str("\n⚠️ Seen list could not be saved");
    }
    text
}

pub fn recent_text(keys: &[String], total: usize) -> String {
    if keys.is_empty() {
        return "No tokens announced yet.".to_string();
    }
    let lines: Vec<String> = keys.iter().map(|k| format!("• {}", html::code_inline(k))).collect();
    format!(
        "{}\n\n{}",
        html::bold(&format!("🗂 {} of {} seen tokens", keys.len(), total)),
        lines.join("\n")
    )
}

/// Run one command and produce the reply. Never fails: errors become text.
pub async fn execute(
    cmd: &Command,
    monitor: &CtoMonitor,
    chat_id: ChatId,
    allowed: bool,
) -> String {
    if cmd.is_control() && !allowed {
        return "⛔ You are not allowed to run this command.".to_string();
    }

    match cmd {
        Command::Help => html::escape(&Command::descriptions().to_string()),
        Command::Status => status_text(&monitor.get_stats()),
        Command::Stats => stats_text(&monitor.get_stats()),
        Command::Check => report_text(&monitor.run_once().await),
        Command::Recent => {
            let total = monitor.seen_len();
            recent_text(&monitor.recent_seen(RECENT_LIMIT), total)
        }
        Command::Clear => match monitor.clear().await {
            Ok(removed) => format!("🧹 Cleared {} seen tokens.", removed),
            Err(e) => format!(
                "❌ Seen list cleared in memory but not saved: {}",
                html::escape(&e.to_string())
            ),
        },
        Command::ChatId => format!("Chat id: {}", html::code_inline(&chat_id.to_string())),
    }
}

/// Telegram endpoint for parsed commands
pub async fn answer(
    bot: Bot,
    msg: Message,
    cmd: Command,
    monitor: CtoMonitor,
    config: Config,
) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0);
    info!(target: "COMMANDS", "{:?} from chat {} (user {:?})", cmd, msg.chat.id, user_id);

    // Long-running commands run inside their own task so a panic is reported
    // in chat instead of unwinding into the dispatcher.
    let task = {
        let monitor = monitor.clone();
        let cmd = cmd.clone();
        let chat_id = msg.chat.id;
        let allowed = config.is_admin(user_id);
        tokio::spawn(async move { execute(&cmd, &monitor, chat_id, allowed).await })
    };
    let reply = match task.await {
        Ok(reply) => reply,
        Err(e) => {
            error!(target: "COMMANDS", "{:?} failed: {}", cmd, e);
            "❌ Command failed, check the logs.".to_string()
        }
    };

    if let Err(e) = bot
        .send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .await
    {
        error!(target: "COMMANDS", "Failed to reply to {}: {}", msg.chat.id, e);
    }
    Ok(())
}
