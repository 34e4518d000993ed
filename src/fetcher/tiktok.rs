use std::path::Path;

use async_trait::async_trait;

use super::{
    ytdlp::{Info, Ytdlp},
    Fetch, FetchedMedia, Metadata,
};
use crate::{
    classifier::{FetchRequest, Platform},
    config::TikTokConfig,
    error::{Error, Result},
};

const DEFAULT_TITLE: &str = "TikTok Video";

pub struct TikTokFetcher {
    ytdlp: Ytdlp,
    cfg: TikTokConfig,
    max_size: u64,
}

impl TikTokFetcher {
    pub fn new(ytdlp: Ytdlp, cfg: TikTokConfig, max_size: u64) -> Self {
        Self {
            ytdlp,
            cfg,
            max_size,
        }
    }

    fn output_template(info: &Info, id: &str) -> String {
        let id = info.id.as_deref().unwrap_or(id);
        if info.is_playlist() {
            format!("tiktok_{id}_%(playlist_index)s.%(ext)s")
        } else {
            format!("tiktok_{id}.%(ext)s")
        }
    }

    /// Playlist positions whose reported size fits the ceiling. Items without
    /// an estimate are kept and checked after download. Fails only when every
    /// item is known to be too large.
    fn fitting_items(&self, info: &Info) -> Result<Vec<usize>> {
        let items: Vec<(usize, &Info)> = if info.is_playlist() {
            info.entries
                .iter()
                .enumerate()
                .filter_map(|(i, entry)| entry.as_ref().map(|entry| (i + 1, entry)))
                .collect()
        } else {
            vec![(1, info)]
        };

        let mut fitting = Vec::with_capacity(items.len());
        let mut largest = None;
        for (index, item) in items {
            match item.estimated_size() {
                Some(size) if size > self.max_size => {
                    tracing::warn!(index, size, max = self.max_size, "skipping oversized tiktok item");
                    largest = largest.max(Some(size));
                }
                _ => fitting.push(index),
            }
        }

        match (fitting.is_empty(), largest) {
            (true, Some(size)) => Err(Error::SizeLimit {
                size,
                max: self.max_size,
            }),
            _ => Ok(fitting),
        }
    }

    fn download_args(&self, info: &Info, fitting: &[usize]) -> Vec<String> {
        let mut args = vec!["-f".to_string(), self.cfg.format_selector()];
        if info.is_playlist() && fitting.len() < info.items().len() {
            let items: Vec<String> = fitting.iter().map(usize::to_string).collect();
            args.push("--playlist-items".to_string());
            args.push(items.join(","));
        }
        if self.cfg.extract_audio {
            args.push("-x".to_string());
        }
        args
    }
}

fn metadata(info: &Info) -> Metadata {
    let uploader = info.uploader.as_deref().or(info.channel.as_deref());
    let title = info
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TITLE);
    Metadata::from_info(info, uploader, Some(title))
}

#[async_trait]
impl Fetch for TikTokFetcher {
    async fn fetch(&self, req: &FetchRequest, workdir: &Path) -> Result<FetchedMedia> {
        let info = self
            .ytdlp
            .probe(&req.url)
            .await
            .map_err(|e| Error::extraction(Platform::TikTok, format!("{e:#}")))?;

        let fitting = self.fitting_items(&info)?;
        let template = Self::output_template(&info, &req.id);
        let args = self.download_args(&info, &fitting);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let files = self
            .ytdlp
            .download(&req.url, workdir, &template, &args)
            .await
            .map_err(|e| Error::extraction(Platform::TikTok, format!("{e:#}")))?;

        tracing::debug!(id = %req.id, files = files.len(), "tiktok download finished");
        Ok(FetchedMedia {
            files,
            metadata: metadata(&info),
        })
    }
}
