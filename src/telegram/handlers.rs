//! Telegram bot handler tree configuration
//!
//! Commands are answered inline; every other text message addressed to the
//! bot is handed to the download queue and never awaited by the dispatcher.

use std::sync::Arc;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{Message, UserId};

use crate::download::artifact::RequesterId;
use crate::download::decider::{SizeThresholds, MB};
use crate::download::queue::DownloadQueue;
use crate::telegram::bot::{is_message_addressed_to_bot, Command};
use crate::telegram::Bot;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub download_queue: Arc<DownloadQueue>,
    pub allowed_domains: Arc<Vec<String>>,
    pub thresholds: SizeThresholds,
    pub bot_username: Option<String>,
    pub bot_id: UserId,
}

/// Builds the dispatcher tree: commands first, then plain text.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(command_handler(deps.clone()))
        .branch(message_handler(deps))
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command {:?} from chat {}", cmd, msg.chat.id);
                let text = match cmd {
                    Command::Start => start_text(),
                    Command::Help => help_text(&deps.allowed_domains, &deps.thresholds),
                };
                bot.send_message(msg.chat.id, text).await?;
                Ok::<(), HandlerError>(())
            }
        },
    ))
}

fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let bot_username = deps.bot_username.clone();
    let bot_id = deps.bot_id;

    Update::filter_message()
        .filter(move |msg: Message| is_message_addressed_to_bot(&msg, bot_username.as_deref(), bot_id))
        .filter_map(|msg: Message| msg.text().map(str::to_owned))
        .endpoint(move |msg: Message, text: String| {
            let deps = deps.clone();
            async move {
                let requester = RequesterId(msg.chat.id.0);
                log::debug!(
                    "Queueing message from {} ({} of {} workers idle)",
                    requester,
                    deps.download_queue.available_slots(),
                    deps.download_queue.capacity()
                );
                // Detached: the worker reports its own outcome to the chat.
                drop(deps.download_queue.submit(text, requester));
                Ok::<(), HandlerError>(())
            }
        })
}

pub fn start_text() -> String {
    "👋 Send me a video link and I'll download it for you.\n\nUse /help to see supported sites.".to_string()
}

pub fn help_text(allowed_domains: &[String], thresholds: &SizeThresholds) -> String {
    format!(
        "📥 Send a link from one of these sites:\n{}\n\n\
         Short links (bit.ly, t.co, ...) are resolved first.\n\n\
         • up to {small} MB: sent as a video\n\
         • {small}–{large} MB: compressed, then sent as a video\n\
         • over {large} MB: sent as a file",
        allowed_domains.join(", "),
        small = thresholds.small() / MB,
        large = thresholds.large() / MB,
    )
}
