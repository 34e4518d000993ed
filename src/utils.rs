use std::{future::Future, time::Duration};

use teloxide::types::{MessageId, ReplyParameters};

/// Cut `s` to at most `max_chars` characters, never splitting a char.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Cut `s` to `max_chars` characters and append `suffix` when anything was dropped.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize, suffix: &str) -> String {
    let cut = truncate_chars(s, max_chars);
    if cut.len() == s.len() {
        s.to_string()
    } else {
        format!("{cut}{suffix}")
    }
}

/// Run `f` up to `attempts` times, sleeping `delay` between failures.
pub async fn retry<T, E, F, Fut>(op_name: &str, attempts: u32, delay: Duration, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < attempts => {
                tracing::warn!("{} attempt {}/{} failed: {}", op_name, attempt, attempts, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub trait SendMessageSettersExt {
    fn reply_to_message_id_opt(self, message_id: Option<MessageId>) -> Self;
}

impl<T: teloxide::payloads::SendMessageSetters> SendMessageSettersExt for T {
    fn reply_to_message_id_opt(self, message_id: Option<MessageId>) -> Self {
        if let Some(message_id) = message_id {
            self.reply_parameters(ReplyParameters::new(message_id))
        } else {
            self
        }
    }
}
