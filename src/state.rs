use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::Platform,
    config::{
        BotConfig, CaptionConfig, DownloadConfig, ExtractorConfig, InstagramConfig, Param,
        TikTokConfig,
    },
    delivery::TelegramTransport,
    fetcher::MediaFetcher,
    pipeline::{Outcome, Pipeline},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformCounters {
    pub delivered: u64,
    pub files: u64,
    pub no_content: u64,
    pub failed: u64,
}

/// In-memory request counters, lost on restart.
#[derive(Debug, Default)]
pub struct Stats {
    platforms: Mutex<BTreeMap<Platform, PlatformCounters>>,
    unrecognized: AtomicU64,
}

impl Stats {
    pub fn record(&self, platform: Option<Platform>, outcome: &Outcome) {
        let Some(platform) = platform else {
            self.unrecognized.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let mut platforms = self.platforms.lock();
        let counters = platforms.entry(platform).or_default();
        match outcome {
            Outcome::Unrecognized => {
                self.unrecognized.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::NoContent => counters.no_content += 1,
            Outcome::Delivered { files } => {
                counters.delivered += 1;
                counters.files += *files as u64;
            }
            Outcome::Failed(_) => counters.failed += 1,
        }
    }

    pub fn platforms(&self) -> Vec<(Platform, PlatformCounters)> {
        let platforms = self.platforms.lock();
        Platform::ALL
            .into_iter()
            .map(|p| (p, platforms.get(&p).copied().unwrap_or_default()))
            .collect()
    }

    pub fn unrecognized(&self) -> u64 {
        self.unrecognized.load(Ordering::Relaxed)
    }
}

/// Point-in-time view rendered by `/stats`.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub in_flight: usize,
    pub peak: usize,
    pub concurrency_limit: usize,
    pub max_file_size: u64,
    pub platforms: Vec<(Platform, PlatformCounters)>,
    pub unrecognized: u64,
}

pub struct State {
    pub pipeline: Pipeline,
    pub transport: TelegramTransport,
    pub stats: Stats,

    admin_user_id: Option<i64>,
    downloads: DownloadConfig,
    started_at: Instant,
}

impl State {
    pub fn new<C>(cfg: &C, bot: Bot, cancel: CancellationToken) -> anyhow::Result<Self>
    where
        C: Param<BotConfig>
            + Param<DownloadConfig>
            + Param<CaptionConfig>
            + Param<ExtractorConfig>
            + Param<TikTokConfig>
            + Param<InstagramConfig>,
    {
        let bot_config: BotConfig = cfg.param();
        let fetcher = Arc::new(MediaFetcher::new(cfg)?);
        Ok(Self {
            pipeline: Pipeline::new(cfg, fetcher, cancel),
            transport: TelegramTransport::new(bot),
            stats: Stats::default(),
            admin_user_id: bot_config.admin_user_id,
            downloads: cfg.param(),
            started_at: Instant::now(),
        })
    }

    #[inline]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_id == Some(user_id)
    }

    pub fn max_file_size(&self) -> u64 {
        self.downloads.max_file_size()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let gate = self.pipeline.gate();
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            temp_dir: self.downloads.temp_dir.clone(),
            output_dir: self.downloads.output_dir.clone(),
            in_flight: gate.in_flight(),
            peak: gate.peak(),
            concurrency_limit: gate.limit(),
            max_file_size: self.downloads.max_file_size(),
            platforms: self.stats.platforms(),
            unrecognized: self.stats.unrecognized(),
        }
    }
}
