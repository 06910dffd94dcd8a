//! Outbound chat transport.
//!
//! The pipeline talks to the chat through [`ChatTransport`]; the Telegram
//! implementation wraps every Bot API call in the shared retry policy and maps
//! request failures onto [`DeliveryError`].

use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile};
use teloxide::RequestError;

use crate::core::retry::{retry, RetryConfig};
use crate::core::utils::truncate_caption;
use crate::download::artifact::RequesterId;
use crate::download::error::DeliveryError;
use crate::telegram::Bot;

/// The three outbound operations the pipeline needs.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, to: RequesterId, text: &str) -> Result<(), DeliveryError>;

    /// Sends a playable inline video.
    async fn send_video(&self, to: RequesterId, path: &Path, caption: &str) -> Result<(), DeliveryError>;

    /// Sends a generic file attachment.
    async fn send_document(&self, to: RequesterId, path: &Path, caption: &str) -> Result<(), DeliveryError>;
}

pub struct TelegramTransport {
    bot: Bot,
    retry: RetryConfig,
}

impl TelegramTransport {
    pub fn new(bot: Bot, retry: RetryConfig) -> Self {
        Self { bot, retry }
    }

    async fn announce(&self, chat_id: ChatId, action: ChatAction) {
        if let Err(e) = self.bot.send_chat_action(chat_id, action).await {
            // Not critical, continue with the upload
            log::debug!("Failed to send chat action: {}", e);
        }
    }
}

/// Maps a Bot API failure onto the delivery taxonomy.
pub fn map_request_error(e: RequestError) -> DeliveryError {
    let text = e.to_string();
    match e {
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_) => DeliveryError::Unreachable(text),
        _ if text.to_lowercase().contains("too large") || text.to_lowercase().contains("too big") => {
            DeliveryError::PayloadTooLarge(text)
        }
        _ => DeliveryError::Rejected(text),
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, to: RequesterId, text: &str) -> Result<(), DeliveryError> {
        let chat_id = ChatId(to.0);
        let bot = &self.bot;
        retry(&self.retry, "send_text", || async move {
            bot.send_message(chat_id, text.to_string()).await.map(|_| ())
        })
        .await
        .into_result()
        .map_err(map_request_error)
    }

    async fn send_video(&self, to: RequesterId, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        let chat_id = ChatId(to.0);
        let caption = truncate_caption(caption);
        self.announce(chat_id, ChatAction::UploadVideo).await;

        let (bot, caption) = (&self.bot, caption.as_str());
        let outcome = retry(&self.retry, "send_video", || async move {
            bot.send_video(chat_id, InputFile::file(path.to_path_buf()))
                .caption(caption.to_string())
                .supports_streaming(true)
                .await
                .map(|_| ())
        })
        .await;
        log::info!(
            "send_video to {} finished after {} attempt(s) in {:?}",
            chat_id,
            outcome.attempts,
            outcome.total_duration
        );
        outcome.into_result().map_err(map_request_error)
    }

    async fn send_document(&self, to: RequesterId, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        let chat_id = ChatId(to.0);
        let caption = truncate_caption(caption);
        self.announce(chat_id, ChatAction::UploadDocument).await;

        let (bot, caption) = (&self.bot, caption.as_str());
        let outcome = retry(&self.retry, "send_document", || async move {
            bot.send_document(chat_id, InputFile::file(path.to_path_buf()))
                .caption(caption.to_string())
                .await
                .map(|_| ())
        })
        .await;
        log::info!(
            "send_document to {} finished after {} attempt(s) in {:?}",
            chat_id,
            outcome.attempts,
            outcome.total_duration
        );
        outcome.into_result().map_err(map_request_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_map_request_error() {
        let io = RequestError::Io(Arc::new(std::io::Error::new(std::io::ErrorKind::Other, "broken pipe")));
        assert!(matches!(map_request_error(io), DeliveryError::Unreachable(_)));

        let api = RequestError::Api(teloxide::ApiError::Unknown("Bad Request: file is too big".to_string()));
        assert!(matches!(map_request_error(api), DeliveryError::PayloadTooLarge(_)));

        let api = RequestError::Api(teloxide::ApiError::Unknown("Bad Request: chat not found".to_string()));
        assert!(matches!(map_request_error(api), DeliveryError::Rejected(_)));
    }
}
