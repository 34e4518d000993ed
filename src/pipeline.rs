//! Per-request download and delivery flow.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use teloxide::types::{ChatId, MessageId};
use tokio_util::sync::CancellationToken;

use crate::{
    caption,
    classifier::{self, FetchRequest},
    config::{CaptionConfig, DownloadConfig, Param},
    delivery::{self, MediaFile, Transport},
    error::{Error, Result},
    fetcher::Fetch,
    format::{
        make_quick_actions_keyboard,
        msg::{MsgFailure, MsgNoContent, MsgProcessing, MsgUnrecognized, MsgUploading},
    },
    gate::Gate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Classified,
    Fetching,
    Validating,
    Delivering,
    CleanedUp,
    Errored,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Classified, Fetching)
                | (Fetching, Validating)
                | (Validating, Delivering)
                | (Validating, CleanedUp)
                | (Delivering, CleanedUp)
                | (Fetching | Validating | Delivering, Errored)
        )
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug_assert!(
        stage.can_advance_to(next),
        "illegal stage transition {stage:?} -> {next:?}"
    );
    tracing::debug!(from = ?*stage, to = ?next, "stage transition");
    *stage = next;
}

#[derive(Debug)]
pub enum Outcome {
    Unrecognized,
    NoContent,
    Delivered { files: usize },
    Failed(Error),
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetch>,
    gate: Gate,
    temp_dir: PathBuf,
    max_file_size: u64,
    captions: CaptionConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new<C: Param<DownloadConfig> + Param<CaptionConfig>>(
        cfg: &C,
        fetcher: Arc<dyn Fetch>,
        cancel: CancellationToken,
    ) -> Self {
        let downloads: DownloadConfig = cfg.param();
        Self {
            fetcher,
            gate: Gate::new(downloads.concurrent_downloads),
            max_file_size: downloads.max_file_size(),
            temp_dir: downloads.temp_dir,
            captions: cfg.param(),
            cancel,
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Process one incoming text message end to end.
    ///
    /// Every failure past classification is reported to the chat here and
    /// never propagates to the caller.
    #[tracing::instrument(
        skip_all,
        fields(
            request_id = %uuid::Uuid::new_v4().simple(),
            platform = tracing::field::Empty,
            url = tracing::field::Empty,
        )
    )]
    pub async fn handle<T: Transport + ?Sized>(
        &self,
        transport: &T,
        chat: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> Outcome {
        let mut stage = Stage::Received;
        let req = if classifier::is_valid(text) {
            classifier::classify(text)
        } else {
            None
        };
        let Some(req) = req else {
            tracing::debug!("{}", Error::UnrecognizedUrl);
            if let Err(e) = transport
                .send_text(chat, Some(reply_to), MsgUnrecognized.into(), None)
                .await
            {
                tracing::warn!("failed to send usage hint: {e:#}");
            }
            return Outcome::Unrecognized;
        };

        let span = tracing::Span::current();
        span.record("platform", req.platform.as_str());
        span.record("url", req.url.as_str());
        advance(&mut stage, Stage::Classified);

        let status = match transport
            .send_text(
                chat,
                Some(reply_to),
                MsgProcessing {
                    platform: req.platform,
                }
                .into(),
                None,
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("failed to send progress message: {e:#}");
                None
            }
        };

        match self.run(transport, chat, &req, status, &mut stage).await {
            Ok(0) => {
                tracing::info!("no content to deliver");
                self.report(transport, chat, reply_to, status, MsgNoContent.into())
                    .await;
                Outcome::NoContent
            }
            Ok(files) => {
                tracing::info!(files, "delivered");
                Outcome::Delivered { files }
            }
            Err(e) => {
                advance(&mut stage, Stage::Errored);
                match &e {
                    e if e.is_fault() => tracing::error!("request failed: {e}"),
                    Error::Cancelled => tracing::info!("request abandoned: {e}"),
                    Error::SizeLimit { .. } => tracing::warn!("request rejected: {e}"),
                    _ => tracing::debug!("{e}"),
                }
                self.report(transport, chat, reply_to, status, MsgFailure(&e).into())
                    .await;
                Outcome::Failed(e)
            }
        }
    }

    async fn run<T: Transport + ?Sized>(
        &self,
        transport: &T,
        chat: ChatId,
        req: &FetchRequest,
        status: Option<MessageId>,
        stage: &mut Stage,
    ) -> Result<usize> {
        advance(stage, Stage::Fetching);
        // removed on drop, including when the task is dropped mid-flight
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}_{}_", req.platform.as_str(), req.id))
            .tempdir_in(&self.temp_dir)?;

        let fetched = {
            let _permit = self.gate.acquire(&self.cancel).await?;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                fetched = self.fetcher.fetch(req, workdir.path()) => fetched?,
            }
        };

        let meta = &fetched.metadata;
        tracing::debug!(
            files = fetched.files.len(),
            uploader = meta.uploader.as_deref(),
            likes = meta.like_count,
            views = meta.view_count,
            duration = meta.duration,
            "fetched"
        );

        advance(stage, Stage::Validating);
        let files = validate(fetched.files, self.max_file_size).await?;
        if files.is_empty() {
            advance(stage, Stage::CleanedUp);
            cleanup(workdir);
            return Ok(0);
        }

        let caption = caption::build(&fetched.metadata, req.platform, &self.captions);
        let keyboard = make_quick_actions_keyboard(req.platform, fetched.metadata.uploader.as_deref());
        let count = files.len();

        advance(stage, Stage::Delivering);
        if let Some(status) = status {
            if let Err(e) = transport
                .edit_text(chat, status, MsgUploading { count }.into())
                .await
            {
                tracing::warn!("failed to update progress message: {e:#}");
            }
        }

        let plan = delivery::plan(files, &caption);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            delivered = delivery::deliver(transport, chat, plan, &keyboard) => {
                delivered.map_err(Error::Delivery)?
            }
        }

        if let Some(status) = status {
            if let Err(e) = transport.delete(chat, status).await {
                tracing::warn!("failed to delete progress message: {e:#}");
            }
        }
        advance(stage, Stage::CleanedUp);
        cleanup(workdir);
        Ok(count)
    }

    /// Edit the progress message, or reply when there is none.
    async fn report<T: Transport + ?Sized>(
        &self,
        transport: &T,
        chat: ChatId,
        reply_to: MessageId,
        status: Option<MessageId>,
        text: String,
    ) {
        if let Some(status) = status {
            match transport.edit_text(chat, status, text.clone()).await {
                Ok(()) => return,
                Err(e) => tracing::warn!("failed to edit progress message: {e:#}"),
            }
        }
        if let Err(e) = transport.send_text(chat, Some(reply_to), text, None).await {
            tracing::error!("failed to report result: {e:#}");
        }
    }
}

/// Keep files that exist and fit the size ceiling. Oversized files are
/// deleted; when nothing is left because of them the largest size is reported.
async fn validate(files: Vec<PathBuf>, max: u64) -> Result<Vec<MediaFile>> {
    let mut kept = Vec::with_capacity(files.len());
    let mut largest = None;
    for path in files {
        let size = match fs_err::tokio::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                tracing::warn!(path = %path.display(), "fetched file is missing");
                continue;
            }
        };
        if size > max {
            tracing::warn!(path = %path.display(), size, max, "dropping oversized file");
            remove_quietly(&path).await;
            largest = largest.max(Some(size));
            continue;
        }
        kept.push(MediaFile::new(path, size));
    }

    match (kept.is_empty(), largest) {
        (true, Some(size)) => Err(Error::SizeLimit { size, max }),
        _ => Ok(kept),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs_err::tokio::remove_file(path).await {
        tracing::debug!("{e}");
    }
}

fn cleanup(workdir: tempfile::TempDir) {
    if let Err(e) = workdir.close() {
        tracing::debug!("failed to remove work directory: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        config::Config,
        delivery::{testing::*, MediaKind},
        fetcher::{FetchedMedia, Metadata},
    };

    const TIKTOK_URL: &str = "https://www.tiktok.com/@foo/video/123?utm_source=x";

    #[derive(Default)]
    struct FakeFetcher {
        files: Vec<(String, usize)>,
        fail_with: Option<fn() -> Error>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        workdirs: Mutex<Vec<PathBuf>>,
    }

    impl FakeFetcher {
        fn with_files(files: &[(&str, usize)]) -> Self {
            Self {
                files: files.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
                ..Default::default()
            }
        }

        fn workdirs(&self) -> Vec<PathBuf> {
            self.workdirs.lock().clone()
        }
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn fetch(&self, req: &FetchRequest, workdir: &Path) -> Result<FetchedMedia> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.workdirs.lock().push(workdir.to_path_buf());
            assert!(workdir.is_dir());
            assert!(workdir
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("{}_{}_", req.platform.as_str(), req.id)));

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(make) = self.fail_with {
                return Err(make());
            }

            let mut files = vec![];
            for (name, size) in &self.files {
                let path = workdir.join(name);
                std::fs::write(&path, vec![0u8; *size])?;
                files.push(path);
            }
            Ok(FetchedMedia {
                files,
                metadata: Metadata {
                    uploader: Some("foo".to_string()),
                    title: Some("clip".to_string()),
                    ..Default::default()
                },
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        fetcher: Arc<FakeFetcher>,
        pipeline: Pipeline,
        cancel: CancellationToken,
    }

    fn fixture(fetcher: FakeFetcher, concurrent_downloads: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str(&format!(
            "[bot]\ntoken = \"t\"\n\n[downloads]\ntemp_dir = {:?}\nmax_file_size_mb = 1\nconcurrent_downloads = {concurrent_downloads}\n",
            dir.path()
        ))
        .unwrap();
        let fetcher = Arc::new(fetcher);
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::new(&config, fetcher.clone(), cancel.clone());
        Fixture {
            _dir: dir,
            fetcher,
            pipeline,
            cancel,
        }
    }

    async fn run(fx: &Fixture, transport: &RecordingTransport, text: &str) -> Outcome {
        fx.pipeline
            .handle(transport, ChatId(1), MessageId(100), text)
            .await
    }

    fn assert_workdirs_removed(fx: &Fixture) {
        let workdirs = fx.fetcher.workdirs();
        assert!(!workdirs.is_empty());
        for dir in workdirs {
            assert!(!dir.exists(), "{} still exists", dir.display());
        }
    }

    #[test]
    fn test_stage_transitions() {
        use Stage::*;
        assert!(Received.can_advance_to(Classified));
        assert!(Validating.can_advance_to(CleanedUp));
        assert!(Delivering.can_advance_to(Errored));
        assert!(!Received.can_advance_to(Fetching));
        assert!(!Classified.can_advance_to(Errored));
        assert!(!CleanedUp.can_advance_to(Errored));
        assert!(!Errored.can_advance_to(CleanedUp));
    }

    #[tokio::test]
    async fn test_single_file_delivery() {
        let fx = fixture(FakeFetcher::with_files(&[("tiktok_123.mp4", 10)]), 3);
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        assert!(matches!(outcome, Outcome::Delivered { files: 1 }));

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(&calls[0], Call::Text { text, .. } if text.starts_with("🔄 Processing TikTok URL")));
        assert!(matches!(&calls[1], Call::Edit { text, .. } if text == "📤 Uploading 1 file(s)..."));
        match &calls[2] {
            Call::Media {
                kind,
                caption,
                keyboard,
                ..
            } => {
                assert_eq!(*kind, MediaKind::Video);
                assert_eq!(caption.as_deref(), Some("📱 TikTok\n👤 @foo\n📝 clip"));
                assert!(*keyboard);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(calls[3], Call::Delete { .. }));
        assert_workdirs_removed(&fx);
    }

    #[tokio::test]
    async fn test_unrecognized_text() {
        let fx = fixture(FakeFetcher::default(), 3);
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, "hello https://youtube.com/watch?v=1").await;
        assert!(matches!(outcome, Outcome::Unrecognized));
        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::Text { text, .. } if text.contains("valid TikTok or Instagram URL")));
    }

    #[tokio::test]
    async fn test_more_than_ten_files_are_sent_individually() {
        let names: Vec<String> = (1..=12).map(|i| format!("instagram_X_{i}.jpg")).collect();
        let files: Vec<(&str, usize)> = names.iter().map(|n| (n.as_str(), 1)).collect();
        let fx = fixture(FakeFetcher::with_files(&files), 3);
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, "https://instagram.com/p/X/").await;
        assert!(matches!(outcome, Outcome::Delivered { files: 12 }));

        let sends = transport.media_sends();
        assert_eq!(sends.len(), 12);
        for (i, send) in sends.iter().enumerate() {
            match send {
                Call::Media { caption, path, .. } => {
                    assert!(caption
                        .as_deref()
                        .unwrap()
                        .ends_with(&format!("📁 File {}/12", i + 1)));
                    assert!(path.ends_with(&names[i]));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_workdirs_removed(&fx);
    }

    #[tokio::test]
    async fn test_zero_files_is_no_content() {
        let fx = fixture(FakeFetcher::default(), 3);
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        assert!(matches!(outcome, Outcome::NoContent));
        assert!(transport.media_sends().is_empty());

        let notices: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Edit { text, .. } | Call::Text { text, .. } if text.contains("No files were downloaded")))
            .collect();
        assert_eq!(notices.len(), 1);
        assert_workdirs_removed(&fx);
    }

    #[tokio::test]
    async fn test_mixed_post_is_grouped_by_kind() {
        let fx = fixture(
            FakeFetcher::with_files(&[("a_1.jpg", 1), ("a_2.mp4", 1), ("a_3.jpg", 1), ("a_4.mp4", 1)]),
            3,
        );
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, "https://www.instagram.com/p/Cx1/").await;
        assert!(matches!(outcome, Outcome::Delivered { files: 4 }));

        let sends = transport.media_sends();
        assert_eq!(sends.len(), 2);
        match (&sends[0], &sends[1]) {
            (
                Call::Group {
                    paths: photos,
                    caption: Some(caption),
                },
                Call::Group {
                    paths: videos,
                    caption: None,
                },
            ) => {
                assert!(caption.starts_with("📱 Instagram"));
                assert!(photos.iter().all(|p| p.extension().unwrap() == "jpg"));
                assert!(videos.iter().all(|p| p.extension().unwrap() == "mp4"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(transport
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Text { text, keyboard: true } if text == "⚡ Quick actions:")));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported() {
        let fx = fixture(
            FakeFetcher {
                fail_with: Some(|| {
                    Error::extraction(classifier::Platform::TikTok, "Video unavailable")
                }),
                ..Default::default()
            },
            3,
        );
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        assert!(matches!(outcome, Outcome::Failed(Error::Extraction { .. })));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[1], Call::Edit { text, .. } if text.contains("Video unavailable")));
        assert_workdirs_removed(&fx);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tiktok_video_without_estimate_reports_size_limit() {
        use crate::{
            config::TikTokConfig, constants::MB, fetcher::ytdlp::testing::fake_ytdlp,
            fetcher::TikTokFetcher,
        };

        let dir = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str(&format!(
            "[bot]\ntoken = \"t\"\n\n[downloads]\ntemp_dir = {:?}\nmax_file_size_mb = 1\n",
            dir.path()
        ))
        .unwrap();
        let ytdlp = fake_ytdlp(
            bin.path(),
            r#"{"id": "123", "ext": "mp4"}"#,
            r#"head -c 2097152 /dev/zero > "$dir/tiktok_123.mp4"
echo "$dir/tiktok_123.mp4""#,
        );
        let fetcher = Arc::new(TikTokFetcher::new(ytdlp, TikTokConfig::default(), MB));
        let pipeline = Pipeline::new(&config, fetcher, CancellationToken::new());
        let transport = RecordingTransport::default();

        let outcome = pipeline
            .handle(&transport, ChatId(1), MessageId(100), TIKTOK_URL)
            .await;
        assert!(matches!(
            outcome,
            Outcome::Failed(Error::SizeLimit {
                size: 2097152,
                max: 1048576
            })
        ));
        assert!(transport.media_sends().is_empty());
        let calls = transport.calls();
        assert!(
            matches!(calls.last(), Some(Call::Edit { text, .. }) if text.contains("2.00 MiB"))
        );
    }

    #[tokio::test]
    async fn test_oversized_files_are_dropped() {
        let big = 2 * 1024 * 1024;
        let fx = fixture(FakeFetcher::with_files(&[("a_1.jpg", big), ("a_2.jpg", 10)]), 3);
        let transport = RecordingTransport::default();
        let outcome = run(&fx, &transport, "https://instagram.com/p/X/").await;
        assert!(matches!(outcome, Outcome::Delivered { files: 1 }));

        let fx = fixture(FakeFetcher::with_files(&[("a_1.mp4", big)]), 3);
        let transport = RecordingTransport::default();
        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        match outcome {
            Outcome::Failed(Error::SizeLimit { size, max }) => {
                assert_eq!(size, big as u64);
                assert_eq!(max, 1024 * 1024);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(transport.media_sends().is_empty());
        assert_workdirs_removed(&fx);
    }

    #[tokio::test]
    async fn test_delivery_rejection_is_reported() {
        let fx = fixture(FakeFetcher::with_files(&[("tiktok_123.mp4", 10)]), 3);
        let transport = RecordingTransport::rejecting_media();

        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        assert!(matches!(outcome, Outcome::Failed(Error::Delivery(_))));
        assert!(transport
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Edit { text, .. } if text.contains("file is too big"))));
        assert_workdirs_removed(&fx);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let fx = fixture(FakeFetcher::with_files(&[("tiktok_123.mp4", 10)]), 3);
        fx.cancel.cancel();
        let transport = RecordingTransport::default();

        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        assert!(matches!(outcome, Outcome::Failed(Error::Cancelled)));
        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(transport.media_sends().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_during_fetch_removes_workdir() {
        let fx = fixture(
            FakeFetcher {
                delay: Duration::from_secs(30),
                ..FakeFetcher::with_files(&[("tiktok_123.mp4", 10)])
            },
            3,
        );
        let transport = RecordingTransport::default();

        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let outcome = run(&fx, &transport, TIKTOK_URL).await;
        assert!(matches!(outcome, Outcome::Failed(Error::Cancelled)));
        assert_eq!(fx.pipeline.gate().in_flight(), 0);
        assert_workdirs_removed(&fx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fetch_concurrency_is_bounded() {
        let fx = Arc::new(fixture(
            FakeFetcher {
                delay: Duration::from_millis(20),
                ..FakeFetcher::with_files(&[("tiktok_123.mp4", 10)])
            },
            2,
        ));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let fx = fx.clone();
                tokio::spawn(async move {
                    let transport = RecordingTransport::default();
                    run(&fx, &transport, TIKTOK_URL).await
                })
            })
            .collect();
        for task in tasks {
            assert!(matches!(task.await.unwrap(), Outcome::Delivered { files: 1 }));
        }

        assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 10);
        assert!(fx.fetcher.peak.load(Ordering::SeqCst) <= 2);
        assert!(fx.pipeline.gate().peak() <= 2);
        assert_eq!(fx.pipeline.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_validate_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.jpg");
        std::fs::write(&present, b"abc").unwrap();

        let kept = validate(vec![dir.path().join("gone.jpg"), present.clone()], 10)
            .await
            .unwrap();
        assert_eq!(kept, vec![MediaFile::new(present, 3)]);
        assert!(validate(vec![], 10).await.unwrap().is_empty());
    }
}
