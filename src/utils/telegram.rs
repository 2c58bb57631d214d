//! Telegram delivery for CTO notifications

use async_trait::async_trait;
use reqwest::Url;
use teloxide::payloads::{SendMessageSetters, SendPhotoSetters};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, Recipient};
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::formatter::{ActionLink, Notification};

/// Telegram rejects photo captions longer than this
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Delivers formatted notifications to the configured destination
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Inline keyboard with one URL button per row. Unparsable URLs are dropped.
pub fn keyboard(links: &[ActionLink]) -> Option<InlineKeyboardMarkup> {
    let rows: Vec<Vec<InlineKeyboardButton>> = links
        .iter()
        .filter_map(|link| match Url::parse(&link.url) {
            Ok(url) => Some(vec![InlineKeyboardButton::url(link.label.clone(), url)]),
            Err(e) => {
                debug!(target: "TELEGRAM", "Dropping button {:?}: {}", link.url, e);
                None
            }
        })
        .collect();

    (!rows.is_empty()).then(|| InlineKeyboardMarkup::new(rows))
}

/// [`Notifier`] backed by the Telegram Bot API
pub struct TelegramNotifier {
    bot: Bot,
    destination: Recipient,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, destination: Recipient) -> Self {
        Self { bot, destination }
    }

    async fn send_text(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self
            .bot
            .send_message(self.destination.clone(), notification.text.clone())
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true);
        if let Some(markup) = keyboard(&notification.links) {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }

    async fn send_photo(&self, image: Url, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self
            .bot
            .send_photo(self.destination.clone(), InputFile::url(image))
            .caption(notification.text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard(&notification.links) {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let image = notification
            .image
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .filter(|_| notification.text.chars().count() <= MAX_CAPTION_CHARS);

        if let Some(image) = image {
            match self.send_photo(image, notification).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(target: "TELEGRAM", "Photo send failed, falling back to text: {}", e);
                }
            }
        }

        self.send_text(notification).await
    }
}
