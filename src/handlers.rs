//! Message and callback handlers for the Telegram bot.
//!
//! Commands are answered directly, any other text message goes through the
//! download pipeline, and inline keyboard presses end up in
//! [`callback_handler`].

use std::str::FromStr;
use std::sync::Arc;

use teloxide::{
    dispatching::{HandlerExt, UpdateHandler},
    payloads::SendMessageSetters,
    prelude::*,
    types::{MaybeInaccessibleMessage, ParseMode, ReplyParameters},
    utils::command::BotCommands,
    Bot,
};

use crate::classifier;
use crate::format::msg::{MsgAdminOnly, MsgHelp, MsgInfo, MsgStart, MsgStats};
use crate::state::State;
use crate::utils::SendMessageSettersExt;
use crate::{Command, UserData};

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The dispatch tree handed to the dispatcher.
pub fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let message_handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(command_handler))
        .branch(dptree::endpoint(message_handler));

    dptree::entry()
        .branch(message_handler)
        .branch(Update::filter_callback_query().endpoint(callback_handler))
}

/// Handle bot commands.
pub async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<State>,
) -> HandlerResult {
    match cmd {
        Command::Help => {
            let commands = Command::descriptions().to_string();
            bot.send_message(
                msg.chat.id,
                MsgHelp {
                    commands: &commands,
                    max_file_size: state.max_file_size(),
                },
            )
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        }
        Command::Start => {
            bot.send_message(msg.chat.id, MsgStart).await?;
        }
        Command::Id => {
            bot.send_message(msg.chat.id, format!("`{}`", msg.chat.id))
                .parse_mode(ParseMode::MarkdownV2)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
        Command::Stats => {
            if !sender_id(&msg).is_some_and(|id| state.is_admin(id)) {
                tracing::info!(chat = msg.chat.id.0, sender = ?sender_id(&msg), "non-admin asked for stats");
                bot.send_message(msg.chat.id, MsgAdminOnly)
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await?;
                return Ok(());
            }
            let snapshot = state.snapshot();
            bot.send_message(msg.chat.id, MsgStats { stats: &snapshot })
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }
    Ok(())
}

/// The user who sent `msg`, so the admin is recognized in group chats too.
fn sender_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

/// Handle plain text messages, each one a potential download request.
pub async fn message_handler(msg: Message, state: Arc<State>) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let outcome = state
        .pipeline
        .handle(&state.transport, msg.chat.id, msg.id, text)
        .await;
    state
        .stats
        .record(classifier::detect_platform(text), &outcome);
    Ok(())
}

/// Handle callback queries from inline keyboards.
pub async fn callback_handler(bot: Bot, q: CallbackQuery) -> HandlerResult {
    bot.answer_callback_query(q.id.clone()).await?;
    let (Some(user_data), Some(MaybeInaccessibleMessage::Regular(message))) = (q.data, q.message)
    else {
        return Ok(());
    };

    match UserData::from_str(&user_data)? {
        UserData::Info(platform) => {
            let text = MsgInfo { platform };
            // media messages carry a caption, not text
            if message.text().is_some() {
                bot.edit_message_text(message.chat.id, message.id, text)
                    .await?;
            } else {
                bot.send_message(message.chat.id, text)
                    .reply_to_message_id_opt(Some(message.id))
                    .await?;
            }
        }
    }
    Ok(())
}
