use std::fmt::{Error, Formatter};

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::classifier::Platform;

pub struct SizeFormatter(pub u64);
impl std::fmt::Display for SizeFormatter {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        macro_rules! clamp_size {
            ($size: expr, $unit_var: expr, $unit: literal) => {
                if $size >= 1024.0 {
                    $size /= 1024.0;
                    $unit_var = $unit;
                }
            };
        }

        let mut size = self.0 as f64;
        let mut unit = "B";
        clamp_size!(size, unit, "KiB");
        clamp_size!(size, unit, "MiB");
        clamp_size!(size, unit, "GiB");
        clamp_size!(size, unit, "TiB");
        write!(f, "{:.2} {}", size, unit)
    }
}

/// Keyboard attached to delivered media.
///
/// Links to the uploader's profile when known, and always offers the info
/// callback (`info|<platform>`).
pub fn make_quick_actions_keyboard(platform: Platform, uploader: Option<&str>) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = vec![];
    if let Some(uploader) = uploader.map(str::trim).filter(|u| !u.is_empty()) {
        let profile = match platform {
            Platform::TikTok => format!("https://tiktok.com/@{uploader}"),
            Platform::Instagram => format!("https://instagram.com/{uploader}"),
        };
        if let Ok(url) = profile.parse() {
            keyboard.push(vec![InlineKeyboardButton::url(format!("👤 @{uploader}"), url)]);
        }
    }
    keyboard.push(vec![InlineKeyboardButton::callback(
        "ℹ️ Info",
        format!("info|{}", platform.as_str()),
    )]);
    InlineKeyboardMarkup::new(keyboard)
}

pub mod msg {
    use std::{fmt::Display, time::Duration};

    use super::SizeFormatter;
    use crate::{classifier::Platform, error::Error, state::StatsSnapshot};

    macro_rules! into_string {
        ($($ty:ty),* $(,)?) => {
            $(
                impl From<$ty> for String {
                    fn from(msg: $ty) -> String {
                        msg.to_string()
                    }
                }
            )*
        };
    }

    pub struct MsgStart;
    impl Display for MsgStart {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "🎬 Media Downloader Bot\n\n\
                 Send me TikTok or Instagram URLs and I'll download them for you!\n\n\
                 Supported platforms:\n\
                 🎵 TikTok (videos and slideshows)\n\
                 📸 Instagram (posts, reels, stories)\n\n\
                 Just paste a URL and I'll handle the rest! ✨\n\n\
                 Use /help for more commands."
            )
        }
    }

    pub struct MsgHelp<'a> {
        pub commands: &'a str,
        pub max_file_size: u64,
    }
    impl Display for MsgHelp<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            writeln!(f, "{}", self.commands.trim_end())?;
            write!(
                f,
                "\nHow to use:\n\
                 1. Copy a TikTok or Instagram URL\n\
                 2. Send it to this bot\n\
                 3. Wait for the download to complete\n\n\
                 Supported formats:\n\
                 • TikTok videos and photo slideshows\n\
                 • Instagram posts (single/multiple photos)\n\
                 • Instagram Reels\n\
                 • Instagram Stories (public only)\n\
                 • Instagram TV (IGTV)\n\n\
                 Note: files larger than {} cannot be sent.",
                SizeFormatter(self.max_file_size)
            )
        }
    }

    pub struct MsgUnrecognized;
    impl Display for MsgUnrecognized {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "❌ Please send a valid TikTok or Instagram URL.\n\n\
                 Supported formats:\n\
                 • TikTok: tiktok.com/@username/video/...\n\
                 • Instagram: instagram.com/p/... or /reel/..."
            )
        }
    }

    pub struct MsgProcessing {
        pub platform: Platform,
    }
    impl Display for MsgProcessing {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "🔄 Processing {} URL...\nThis may take a few moments.",
                self.platform
            )
        }
    }

    pub struct MsgUploading {
        pub count: usize,
    }
    impl Display for MsgUploading {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "📤 Uploading {} file(s)...", self.count)
        }
    }

    pub struct MsgNoContent;
    impl Display for MsgNoContent {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "❌ No files were downloaded. The content might be private or deleted."
            )
        }
    }

    pub struct MsgFailure<'a>(pub &'a Error);
    impl Display for MsgFailure<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self.0 {
                Error::UnrecognizedUrl => write!(f, "{MsgUnrecognized}"),
                Error::Extraction { reason, .. } => write!(
                    f,
                    "❌ Error downloading content: {reason}\n\n\
                     This could be due to:\n\
                     • Private/deleted content\n\
                     • Unsupported format\n\
                     • Network issues\n\
                     • Platform restrictions"
                ),
                Error::SizeLimit { size, max } => write!(
                    f,
                    "❌ File is too large: {} exceeds the {} limit.",
                    SizeFormatter(*size),
                    SizeFormatter(*max)
                ),
                Error::Delivery(e) => write!(
                    f,
                    "❌ Error sending files: {e}\nFile might be too large or in unsupported format."
                ),
                Error::Io(_) => write!(f, "❌ Unexpected error occurred while processing your request."),
                Error::Cancelled => write!(
                    f,
                    "⚠️ The bot is restarting, please send the link again later."
                ),
            }
        }
    }

    pub struct MsgQuickActions;
    impl Display for MsgQuickActions {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "⚡ Quick actions:")
        }
    }

    pub struct MsgInfo {
        pub platform: Platform,
    }
    impl Display for MsgInfo {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "ℹ️ {p} Download Info\n\n\
                 ✅ Successfully downloaded from {p}\n\
                 🤖 Processed by Media Downloader Bot\n\n\
                 Send me more URLs to download! 🎬",
                p = self.platform
            )
        }
    }

    pub struct MsgAdminOnly;
    impl Display for MsgAdminOnly {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "❌ This command is only available to administrators.")
        }
    }

    pub struct MsgStats<'a> {
        pub stats: &'a StatsSnapshot,
    }
    impl Display for MsgStats<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = self.stats;
            writeln!(f, "📊 Bot Statistics\n")?;
            writeln!(f, "🤖 Uptime: {}", Uptime(s.uptime))?;
            writeln!(f, "📁 Temp directory: {}", s.temp_dir.display())?;
            writeln!(f, "💾 Output directory: {}", s.output_dir.display())?;
            writeln!(
                f,
                "🔄 Downloads in flight: {}/{} (peak {})",
                s.in_flight, s.concurrency_limit, s.peak
            )?;
            writeln!(f, "📏 Max file size: {}", SizeFormatter(s.max_file_size))?;
            for (platform, counters) in &s.platforms {
                write!(
                    f,
                    "\n{platform}: {} delivered ({} files), {} empty, {} failed",
                    counters.delivered, counters.files, counters.no_content, counters.failed
                )?;
            }
            write!(f, "\nUnrecognized messages: {}", s.unrecognized)
        }
    }

    struct Uptime(Duration);
    impl Display for Uptime {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let secs = self.0.as_secs();
            let (days, hours, mins) = (secs / 86400, secs % 86400 / 3600, secs % 3600 / 60);
            if days > 0 {
                write!(f, "{days}d {hours}h {mins}m")
            } else if hours > 0 {
                write!(f, "{hours}h {mins}m")
            } else {
                write!(f, "{mins}m {}s", secs % 60)
            }
        }
    }

    into_string!(
        MsgStart,
        MsgHelp<'_>,
        MsgUnrecognized,
        MsgProcessing,
        MsgUploading,
        MsgNoContent,
        MsgFailure<'_>,
        MsgQuickActions,
        MsgInfo,
        MsgAdminOnly,
        MsgStats<'_>,
    );
}
