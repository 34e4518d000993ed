//! Turning fetched files into Telegram sends.
//!
//! [`plan`] decides how files are batched and captioned, [`deliver`] walks
//! that plan through a [`Transport`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardMarkup, InputFile, InputMedia, InputMediaAudio, InputMediaDocument,
        InputMediaPhoto, InputMediaVideo, MessageId,
    },
};

use crate::{
    constants::{MAX_MEDIA_GROUP_SIZE, TG_MAX_CAPTION_LEN},
    format::msg::MsgQuickActions,
    utils::{truncate_chars, SendMessageSettersExt},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "mp4" | "mov" | "avi" | "webm" | "mkv" | "m4v" => MediaKind::Video,
            "jpg" | "jpeg" | "png" | "webp" | "heic" | "gif" => MediaKind::Photo,
            "mp3" | "m4a" | "aac" | "ogg" | "opus" | "wav" | "flac" => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
}

impl MediaFile {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            kind: MediaKind::from_path(&path),
            path,
            size,
        }
    }
}

/// One Telegram call of a delivery plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Single {
        file: MediaFile,
        caption: Option<String>,
        with_actions: bool,
    },
    Group {
        files: Vec<MediaFile>,
        caption: Option<String>,
    },
    /// Standalone keyboard message following a batched delivery
    Actions,
}

/// Decide the sends for `files`.
///
/// A single file goes out alone with the keyboard attached. Up to
/// [`MAX_MEDIA_GROUP_SIZE`] files are batched per media kind with the caption
/// on the first item only. Anything larger is sent one by one, each numbered.
pub fn plan(files: Vec<MediaFile>, caption: &str) -> Vec<Outgoing> {
    let caption = (!caption.is_empty()).then(|| caption.to_string());
    let total = files.len();

    match total {
        0 => vec![],
        1 => files
            .into_iter()
            .map(|file| Outgoing::Single {
                file,
                caption: caption.clone(),
                with_actions: true,
            })
            .collect(),
        n if n <= MAX_MEDIA_GROUP_SIZE => {
            let mut batches: Vec<(MediaKind, Vec<MediaFile>)> = Vec::new();
            for file in files {
                match batches.iter_mut().find(|(kind, _)| *kind == file.kind) {
                    Some((_, batch)) => batch.push(file),
                    None => batches.push((file.kind, vec![file])),
                }
            }

            let mut caption = caption;
            let mut out: Vec<Outgoing> = batches
                .into_iter()
                .map(|(_, mut batch)| {
                    let caption = caption.take();
                    if batch.len() == 1 {
                        Outgoing::Single {
                            file: batch.remove(0),
                            caption,
                            with_actions: false,
                        }
                    } else {
                        Outgoing::Group {
                            files: batch,
                            caption,
                        }
                    }
                })
                .collect();
            out.push(Outgoing::Actions);
            out
        }
        _ => files
            .into_iter()
            .enumerate()
            .map(|(i, file)| Outgoing::Single {
                file,
                caption: Some(numbered_caption(caption.as_deref(), i + 1, total)),
                with_actions: false,
            })
            .collect(),
    }
}

fn numbered_caption(caption: Option<&str>, index: usize, total: usize) -> String {
    let counter = format!("📁 File {index}/{total}");
    match caption {
        None => counter,
        Some(caption) => {
            let room = TG_MAX_CAPTION_LEN.saturating_sub(counter.chars().count() + 2);
            format!("{}\n\n{counter}", truncate_chars(caption, room))
        }
    }
}

/// Telegram operations the pipeline depends on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<MessageId>;

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: String) -> anyhow::Result<()>;

    async fn delete(&self, chat: ChatId, message: MessageId) -> anyhow::Result<()>;

    async fn send_media(
        &self,
        chat: ChatId,
        file: &MediaFile,
        caption: Option<String>,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<()>;

    async fn send_media_group(
        &self,
        chat: ChatId,
        files: &[MediaFile],
        caption: Option<String>,
    ) -> anyhow::Result<()>;
}

/// Execute `plan` in order, stopping at the first rejected send.
pub async fn deliver<T: Transport + ?Sized>(
    transport: &T,
    chat: ChatId,
    plan: Vec<Outgoing>,
    keyboard: &InlineKeyboardMarkup,
) -> anyhow::Result<()> {
    for outgoing in plan {
        match outgoing {
            Outgoing::Single {
                file,
                caption,
                with_actions,
            } => {
                let keyboard = with_actions.then(|| keyboard.clone());
                transport.send_media(chat, &file, caption, keyboard).await?;
            }
            Outgoing::Group { files, caption } => {
                transport.send_media_group(chat, &files, caption).await?;
            }
            Outgoing::Actions => {
                transport
                    .send_text(chat, None, MsgQuickActions.into(), Some(keyboard.clone()))
                    .await?;
            }
        }
    }
    Ok(())
}

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

macro_rules! send_file {
    ($bot:expr, $method:ident, $chat:expr, $path:expr, $caption:expr, $keyboard:expr) => {{
        let mut req = $bot.$method($chat, InputFile::file($path));
        req.caption = $caption;
        req.reply_markup = $keyboard.map(Into::into);
        req.await?;
    }};
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<MessageId> {
        let mut req = self.bot.send_message(chat, text).reply_to_message_id_opt(reply_to);
        req.reply_markup = keyboard.map(Into::into);
        Ok(req.await?.id)
    }

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: String) -> anyhow::Result<()> {
        self.bot.edit_message_text(chat, message, text).await?;
        Ok(())
    }

    async fn delete(&self, chat: ChatId, message: MessageId) -> anyhow::Result<()> {
        self.bot.delete_message(chat, message).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        chat: ChatId,
        file: &MediaFile,
        caption: Option<String>,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<()> {
        tracing::debug!(path = %file.path.display(), size = file.size, kind = ?file.kind, "uploading");
        let path = file.path.clone();
        match file.kind {
            MediaKind::Photo => send_file!(self.bot, send_photo, chat, path, caption, keyboard),
            MediaKind::Video => send_file!(self.bot, send_video, chat, path, caption, keyboard),
            MediaKind::Audio => send_file!(self.bot, send_audio, chat, path, caption, keyboard),
            MediaKind::Document => {
                send_file!(self.bot, send_document, chat, path, caption, keyboard)
            }
        }
        Ok(())
    }

    async fn send_media_group(
        &self,
        chat: ChatId,
        files: &[MediaFile],
        caption: Option<String>,
    ) -> anyhow::Result<()> {
        let mut caption = caption;
        let media: Vec<InputMedia> = files
            .iter()
            .map(|file| {
                let input = InputFile::file(file.path.clone());
                let caption = caption.take();
                match file.kind {
                    MediaKind::Photo => {
                        let mut m = InputMediaPhoto::new(input);
                        m.caption = caption;
                        InputMedia::Photo(m)
                    }
                    MediaKind::Video => {
                        let mut m = InputMediaVideo::new(input);
                        m.caption = caption;
                        InputMedia::Video(m)
                    }
                    MediaKind::Audio => {
                        let mut m = InputMediaAudio::new(input);
                        m.caption = caption;
                        InputMedia::Audio(m)
                    }
                    MediaKind::Document => {
                        let mut m = InputMediaDocument::new(input);
                        m.caption = caption;
                        InputMedia::Document(m)
                    }
                }
            })
            .collect();
        self.bot.send_media_group(chat, media).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicI32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Text {
            text: String,
            keyboard: bool,
        },
        Edit {
            message: MessageId,
            text: String,
        },
        Delete {
            message: MessageId,
        },
        Media {
            path: PathBuf,
            kind: MediaKind,
            caption: Option<String>,
            keyboard: bool,
        },
        Group {
            paths: Vec<PathBuf>,
            caption: Option<String>,
        },
    }

    /// Records every call; media sends fail when `reject_media` is set.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub calls: Mutex<Vec<Call>>,
        pub reject_media: bool,
        next_id: AtomicI32,
    }

    impl RecordingTransport {
        pub fn rejecting_media() -> Self {
            Self {
                reject_media: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn media_sends(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Media { .. } | Call::Group { .. }))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(
            &self,
            _chat: ChatId,
            _reply_to: Option<MessageId>,
            text: String,
            keyboard: Option<InlineKeyboardMarkup>,
        ) -> anyhow::Result<MessageId> {
            self.calls.lock().push(Call::Text {
                text,
                keyboard: keyboard.is_some(),
            });
            Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
        }

        async fn edit_text(
            &self,
            _chat: ChatId,
            message: MessageId,
            text: String,
        ) -> anyhow::Result<()> {
            self.calls.lock().push(Call::Edit { message, text });
            Ok(())
        }

        async fn delete(&self, _chat: ChatId, message: MessageId) -> anyhow::Result<()> {
            self.calls.lock().push(Call::Delete { message });
            Ok(())
        }

        async fn send_media(
            &self,
            _chat: ChatId,
            file: &MediaFile,
            caption: Option<String>,
            keyboard: Option<InlineKeyboardMarkup>,
        ) -> anyhow::Result<()> {
            if self.reject_media {
                anyhow::bail!("Bad Request: file is too big");
            }
            self.calls.lock().push(Call::Media {
                path: file.path.clone(),
                kind: file.kind,
                caption,
                keyboard: keyboard.is_some(),
            });
            Ok(())
        }

        async fn send_media_group(
            &self,
            _chat: ChatId,
            files: &[MediaFile],
            caption: Option<String>,
        ) -> anyhow::Result<()> {
            if self.reject_media {
                anyhow::bail!("Bad Request: file is too big");
            }
            self.calls.lock().push(Call::Group {
                paths: files.iter().map(|f| f.path.clone()).collect(),
                caption,
            });
            Ok(())
        }
    }
}
