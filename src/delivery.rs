//! Delivery of composed messages with a photo → URL → text fallback chain.
use async_trait::async_trait;
use reqwest::Url;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode, Recipient};
use tracing::{info, instrument, warn};

use crate::compose::Message;
use crate::config::Config;
use crate::error::DeliveryError;
use crate::model::NotificationResult;
use crate::photo::PhotoSource;

/// The three operations the engine needs from a messaging channel.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError>;

    async fn send_photo_bytes(
        &self,
        photo: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<(), DeliveryError>;

    async fn send_photo_url(&self, url: &Url, caption: &str) -> Result<(), DeliveryError>;
}

/// Parse a chat id: numeric ids address chats, anything else a channel
/// username (a leading `@` is added when missing).
pub fn parse_recipient(raw: &str) -> Recipient {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if raw.starts_with('@') => Recipient::ChannelUsername(raw.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{raw}")),
    }
}

#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
    chat: Recipient,
    link_preview: bool,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("chat", &self.chat)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    pub fn new(bot: Bot, chat: Recipient) -> Self {
        Self {
            bot,
            chat,
            link_preview: false,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut channel = Self::new(
            Bot::new(cfg.telegram.bot_token.clone()),
            parse_recipient(&cfg.telegram.chat_id),
        );
        channel.link_preview = cfg.telegram.link_preview;
        channel
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(self.chat.clone(), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(!self.link_preview)
            .await?;
        Ok(())
    }

    async fn send_photo_bytes(
        &self,
        photo: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let file = InputFile::memory(photo).file_name(file_name.to_string());
        self.bot
            .send_photo(self.chat.clone(), file)
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn send_photo_url(&self, url: &Url, caption: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_photo(self.chat.clone(), InputFile::url(url.clone()))
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// Prints messages instead of sending them. Used by `--dry-run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutChannel;

#[async_trait]
impl DeliveryChannel for StdoutChannel {
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        println!("----- text -----\n{text}\n");
        Ok(())
    }

    async fn send_photo_bytes(
        &self,
        photo: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        println!("----- photo {file_name} ({} bytes) -----\n{caption}\n", photo.len());
        Ok(())
    }

    async fn send_photo_url(&self, url: &Url, caption: &str) -> Result<(), DeliveryError> {
        println!("----- photo {url} -----\n{caption}\n");
        Ok(())
    }
}

/// Runs the per-lot delivery state machine. Never fails: every path ends in
/// one of the three [`NotificationResult`] states.
#[derive(Clone, Copy)]
pub struct DeliveryEngine<'a> {
    channel: &'a dyn DeliveryChannel,
    photos: &'a dyn PhotoSource,
}

impl<'a> DeliveryEngine<'a> {
    pub fn new(channel: &'a dyn DeliveryChannel, photos: &'a dyn PhotoSource) -> Self {
        Self { channel, photos }
    }

    #[instrument(skip_all, fields(lot_id = %lot_id))]
    pub async fn deliver(&self, lot_id: &str, msg: &Message) -> NotificationResult {
        let Some(photo) = msg.photo.as_ref().filter(|p| !p.candidates.is_empty()) else {
            return self.send_text_only(msg).await;
        };

        let delivered = match self.try_binary(&photo.candidates, msg).await {
            Ok(()) => true,
            // Prefer the candidate that answered over a known-dead first one.
            Err(reachable) => {
                let url = reachable.unwrap_or(&photo.candidates[0]);
                self.try_by_url(url, msg).await
            }
        };
        if delivered {
            if msg.truncated {
                self.send_follow_up(msg).await;
            }
            return NotificationResult::SentWithPhoto;
        }

        self.send_text_only(msg).await
    }

    /// Attempt A: download from the first candidate that answers, then upload.
    /// On failure returns the candidate that downloaded, if any.
    async fn try_binary<'u>(
        &self,
        candidates: &'u [Url],
        msg: &Message,
    ) -> Result<(), Option<&'u Url>> {
        let mut downloaded = None;
        for url in candidates {
            match self.photos.download(url).await {
                Ok(bytes) => {
                    downloaded = Some((url, bytes));
                    break;
                }
                Err(err) => warn!(%url, %err, "photo download failed"),
            }
        }
        let Some((url, bytes)) = downloaded else {
            warn!(candidates = candidates.len(), "no photo candidate could be downloaded");
            return Err(None);
        };

        let size = bytes.len();
        match self
            .channel
            .send_photo_bytes(bytes, &file_name(url), &msg.photo_caption)
            .await
        {
            Ok(()) => {
                info!(%url, size, stage = "binary", "photo delivered");
                Ok(())
            }
            Err(err) => {
                warn!(%url, %err, stage = "binary", "photo upload rejected");
                Err(Some(url))
            }
        }
    }

    /// Attempt B: let the channel fetch the photo itself.
    async fn try_by_url(&self, url: &Url, msg: &Message) -> bool {
        match self.channel.send_photo_url(url, &msg.photo_caption).await {
            Ok(()) => {
                info!(%url, stage = "url", "photo delivered");
                true
            }
            Err(err) => {
                warn!(%url, %err, stage = "url", "photo by URL rejected");
                false
            }
        }
    }

    /// Attempt C, and the only path for lots without photos.
    async fn send_text_only(&self, msg: &Message) -> NotificationResult {
        match self.channel.send_text(&msg.text).await {
            Ok(()) => {
                info!(stage = "text", "text delivered");
                NotificationResult::SentTextOnly
            }
            Err(err) => {
                warn!(%err, stage = "text", "text delivery failed");
                NotificationResult::Failed
            }
        }
    }

    async fn send_follow_up(&self, msg: &Message) {
        if let Err(err) = self.channel.send_text(&msg.text).await {
            warn!(%err, stage = "follow_up", "full text after photo failed");
        }
    }
}

/// Last path segment of the URL, or a generic name.
fn file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "photo.jpg".to_string())
}
