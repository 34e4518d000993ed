use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncWriteExt;

use super::{
    ytdlp::{Info, Ytdlp},
    Fetch, FetchedMedia, Metadata,
};
use crate::{
    classifier::{FetchRequest, Platform},
    config::InstagramConfig,
    constants::{HTTP_CONNECT_TIMEOUT, RETRY_DELAY, USER_AGENT},
    error::{Error, Result},
    utils::retry,
};

const DEFAULT_TITLE: &str = "Instagram Post";

/// Resolves a post with yt-dlp, then streams every item over HTTP so that
/// carousels keep their order and partial failures stay local to one item.
pub struct InstagramFetcher {
    ytdlp: Ytdlp,
    client: reqwest::Client,
    attempts: u32,
    max_size: u64,
}

impl InstagramFetcher {
    pub fn new(ytdlp: Ytdlp, cfg: InstagramConfig, max_size: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            ytdlp,
            client,
            attempts: cfg.max_connection_attempts,
            max_size,
        })
    }

    async fn download_item(&self, item: &Info, path: &Path) -> Result<u64> {
        let url = item
            .url
            .as_deref()
            .ok_or_else(|| Error::extraction(Platform::Instagram, "item has no media url"))?;
        if let Some(size) = item.estimated_size() {
            self.check_size(size)?;
        }

        let headers = to_header_map(item);
        let mut response = retry("instagram media request", self.attempts, RETRY_DELAY, || {
            let request = self.client.get(url).headers(headers.clone());
            async move { request.send().await.and_then(|r| r.error_for_status()) }
        })
        .await
        .map_err(|e| Error::extraction(Platform::Instagram, e))?;

        if let Some(len) = response.content_length() {
            self.check_size(len)?;
        }

        let mut file = fs_err::tokio::File::create(path).await?;
        let mut written = 0u64;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    remove_partial(path).await;
                    return Err(Error::extraction(Platform::Instagram, e));
                }
            };
            written += chunk.len() as u64;
            if let Err(e) = self.check_size(written) {
                drop(file);
                remove_partial(path).await;
                return Err(e);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_size {
            return Err(Error::SizeLimit {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

fn to_header_map(item: &Info) -> HeaderMap {
    item.http_headers
        .iter()
        .filter_map(|(k, v)| {
            Some((
                HeaderName::from_bytes(k.as_bytes()).ok()?,
                HeaderValue::from_str(v).ok()?,
            ))
        })
        .collect()
}

fn item_path(workdir: &Path, code: &str, index: usize, item: &Info) -> PathBuf {
    let ext = item
        .ext
        .as_deref()
        .or_else(|| {
            let path = item.url.as_deref()?.split(['?', '#']).next()?;
            Path::new(path).extension()?.to_str()
        })
        .unwrap_or("bin");
    workdir.join(format!("instagram_{code}_{index}.{ext}"))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs_err::tokio::remove_file(path).await {
        tracing::debug!("failed to remove partial download: {e}");
    }
}

fn metadata(info: &Info) -> Metadata {
    let uploader = info.channel.as_deref().or(info.uploader.as_deref());
    let title = [info.description.as_deref(), info.title.as_deref()]
        .into_iter()
        .flatten()
        .find(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TITLE);
    Metadata::from_info(info, uploader, Some(title))
}

#[async_trait]
impl Fetch for InstagramFetcher {
    async fn fetch(&self, req: &FetchRequest, workdir: &Path) -> Result<FetchedMedia> {
        let info = self
            .ytdlp
            .probe(&req.url)
            .await
            .map_err(|e| Error::extraction(Platform::Instagram, format!("{e:#}")))?;

        let items = info.items();
        let mut files = Vec::with_capacity(items.len());
        let mut last_err = None;
        for (i, item) in items.iter().enumerate() {
            let path = item_path(workdir, &req.id, i + 1, item);
            match self.download_item(item, &path).await {
                Ok(size) => {
                    tracing::debug!(item = i + 1, size, "instagram item downloaded");
                    files.push(path);
                }
                Err(e) => {
                    tracing::warn!(item = i + 1, "skipping instagram item: {e}");
                    last_err = Some(e);
                }
            }
        }

        if files.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        Ok(FetchedMedia {
            files,
            metadata: metadata(&info),
        })
    }
}
