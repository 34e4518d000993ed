//! Platform extractors.
//!
//! Provider output is normalized into [`Metadata`] here and never leaves
//! this module in raw form.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    classifier::{FetchRequest, Platform},
    config::{DownloadConfig, ExtractorConfig, InstagramConfig, Param, TikTokConfig},
    error::Result,
};

mod instagram;
mod tiktok;
pub mod ytdlp;

pub use instagram::InstagramFetcher;
pub use tiktok::TikTokFetcher;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub uploader: Option<String>,
    /// `YYYYMMDD`
    pub upload_date: Option<String>,
    pub title: Option<String>,
    pub like_count: Option<u64>,
    pub view_count: Option<u64>,
    pub duration: Option<f64>,
}

impl Metadata {
    fn from_info(info: &ytdlp::Info, uploader: Option<&str>, title: Option<&str>) -> Self {
        let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Self {
            uploader: non_empty(uploader),
            upload_date: non_empty(info.upload_date.as_deref()),
            title: non_empty(title),
            like_count: info.like_count,
            view_count: info.view_count,
            duration: info.duration,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedMedia {
    pub files: Vec<PathBuf>,
    pub metadata: Metadata,
}

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch every item of the post into `workdir`.
    async fn fetch(&self, req: &FetchRequest, workdir: &Path) -> Result<FetchedMedia>;
}

/// Dispatches a request to the extractor of its platform.
pub struct MediaFetcher {
    tiktok: TikTokFetcher,
    instagram: InstagramFetcher,
}

impl MediaFetcher {
    pub fn new<C>(cfg: &C) -> anyhow::Result<Self>
    where
        C: Param<ExtractorConfig> + Param<DownloadConfig> + Param<TikTokConfig> + Param<InstagramConfig>,
    {
        let extractor: ExtractorConfig = cfg.param();
        let downloads: DownloadConfig = cfg.param();
        let ytdlp = ytdlp::Ytdlp::new(&extractor);
        Ok(Self {
            tiktok: TikTokFetcher::new(ytdlp.clone(), cfg.param(), downloads.max_file_size()),
            instagram: InstagramFetcher::new(ytdlp, cfg.param(), downloads.max_file_size())?,
        })
    }
}

#[async_trait]
impl Fetch for MediaFetcher {
    async fn fetch(&self, req: &FetchRequest, workdir: &Path) -> Result<FetchedMedia> {
        match req.platform {
            Platform::TikTok => self.tiktok.fetch(req, workdir).await,
            Platform::Instagram => self.instagram.fetch(req, workdir).await,
        }
    }
}
