use chrono::NaiveDate;

use crate::{
    classifier::Platform,
    config::CaptionConfig,
    constants::{ELLIPSIS, TITLE_MAX_CHARS},
    fetcher::Metadata,
    utils::{truncate_chars, truncate_with_ellipsis},
};

/// Render the caption attached to delivered media.
///
/// Enabled segments are joined with newlines in a fixed order: platform,
/// uploader, upload date, title. The title alone is shortened with an
/// ellipsis, then the whole caption is cut to `max_length` characters.
pub fn build(metadata: &Metadata, platform: Platform, options: &CaptionConfig) -> String {
    let mut parts = Vec::with_capacity(4);

    if options.include_platform {
        parts.push(format!("📱 {platform}"));
    }

    if options.include_username {
        if let Some(uploader) = non_empty(metadata.uploader.as_deref()) {
            parts.push(format!("👤 @{uploader}"));
        }
    }

    if options.include_date {
        if let Some(date) = non_empty(metadata.upload_date.as_deref()).and_then(parse_upload_date) {
            parts.push(format!("📅 {}", date.format("%Y-%m-%d")));
        }
    }

    if options.include_title {
        if let Some(title) = non_empty(metadata.title.as_deref()) {
            let title = truncate_with_ellipsis(title.trim(), TITLE_MAX_CHARS, ELLIPSIS);
            parts.push(format!("📝 {title}"));
        }
    }

    truncate_chars(&parts.join("\n"), options.max_length).to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

// extractors report dates as YYYYMMDD
fn parse_upload_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").ok()
}
