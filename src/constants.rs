//! Centralized constants for the telegrab bot.
//!
//! This module contains the fixed limits and defaults that control
//! various aspects of the bot's behavior.

use std::time::Duration;

// ============================================================================
// URL Classification
// ============================================================================

/// Query keys dropped from every URL before it is fetched
pub const TRACKING_PARAMS: [&str; 4] = ["utm_source", "utm_medium", "utm_campaign", "fbclid"];

// ============================================================================
// Captions
// ============================================================================

/// Titles longer than this are cut and suffixed with [`ELLIPSIS`]
pub const TITLE_MAX_CHARS: usize = 100;

pub const ELLIPSIS: &str = "...";

/// Default maximum caption length
pub const DEFAULT_CAPTION_MAX_LEN: usize = 200;

/// Telegram rejects media captions longer than this
pub const TG_MAX_CAPTION_LEN: usize = 1024;

// ============================================================================
// Delivery
// ============================================================================

/// Maximum number of items Telegram accepts in one media group
pub const MAX_MEDIA_GROUP_SIZE: usize = 10;

// ============================================================================
// Downloads
// ============================================================================

pub const MB: u64 = 1024 * 1024;

/// Default ceiling for a single file, matches the bot API upload limit
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;

/// Default number of fetches allowed to run at the same time
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 3;

/// Default timeout for one extractor invocation
pub const DEFAULT_EXTRACTOR_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for connecting to a media host
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of attempts for a direct media download
pub const DEFAULT_CONNECTION_ATTEMPTS: u32 = 3;

/// Delay between direct media download retries
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

pub const USER_AGENT: &str = concat!("telegrab/", env!("CARGO_PKG_VERSION"));
