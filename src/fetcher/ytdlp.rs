use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;

use crate::config::{ExtractorConfig, Param};

/// Subset of the info dict yt-dlp prints with `--dump-single-json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Info {
    pub id: Option<String>,
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub upload_date: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<f64>,
    pub url: Option<String>,
    pub ext: Option<String>,
    #[serde(default)]
    pub entries: Vec<Option<Info>>,
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
}

impl Info {
    pub fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist") || !self.entries.is_empty()
    }

    /// Downloadable items: the entries of a playlist, or the info itself.
    pub fn items(&self) -> Vec<&Info> {
        if self.is_playlist() {
            self.entries.iter().flatten().collect()
        } else {
            vec![self]
        }
    }

    /// Size reported before downloading, exact if known.
    pub fn estimated_size(&self) -> Option<u64> {
        self.filesize
            .or_else(|| self.filesize_approx.map(|size| size.max(0.0) as u64))
    }
}

#[derive(Debug, Clone)]
pub struct Ytdlp {
    program: PathBuf,
    timeout: Duration,
    cookies: Option<PathBuf>,
}

impl Ytdlp {
    pub fn new<C: Param<ExtractorConfig>>(cfg: &C) -> Self {
        let cfg = cfg.param();
        Self {
            timeout: cfg.timeout(),
            program: cfg.ytdlp_path,
            cookies: cfg.cookies_file,
        }
    }

    /// Resolve metadata and direct media urls without downloading.
    pub async fn probe(&self, url: &str) -> Result<Info> {
        let stdout = self
            .run(["--dump-single-json".into(), "--no-warnings".into(), url.into()])
            .await?;
        serde_json::from_slice(&stdout).context("malformed extractor output")
    }

    /// Download into `dir` using `template` as the output name and return the
    /// written paths that exist on disk.
    pub async fn download(
        &self,
        url: &str,
        dir: &Path,
        template: &str,
        extra: &[&str],
    ) -> Result<Vec<PathBuf>> {
        let mut args: Vec<OsString> = vec![
            "--no-warnings".into(),
            "--ignore-errors".into(),
            "--no-simulate".into(),
            "--print".into(),
            "after_move:filepath".into(),
            "-o".into(),
            dir.join(template).into_os_string(),
        ];
        args.extend(extra.iter().map(OsString::from));
        args.push(url.into());

        // a failed playlist item makes yt-dlp exit non-zero even with
        // --ignore-errors, the items it did write are still usable
        let output = self.exec(args).await?;
        let paths = parse_printed_paths(&String::from_utf8_lossy(&output.stdout));
        if !output.status.success() {
            let reason = failure_reason(&output);
            if paths.is_empty() {
                anyhow::bail!("{reason}");
            }
            tracing::warn!(fetched = paths.len(), "extractor partially failed: {reason}");
        }
        Ok(paths)
    }

    async fn run<I>(&self, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = OsString>,
    {
        let output = self.exec(args).await?;
        if !output.status.success() {
            anyhow::bail!("{}", failure_reason(&output));
        }
        Ok(output.stdout)
    }

    async fn exec<I>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut cmd = Command::new(&self.program);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("extractor timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("failed to run {}", self.program.display()))
    }
}

fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    tracing::debug!(status = %output.status, %stderr, "extractor failed");
    last_error_line(&stderr).unwrap_or_else(|| format!("extractor exited with {}", output.status))
}

/// The last non-empty stderr line without yt-dlp's `ERROR:` prefix.
fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(|line| line.strip_prefix("ERROR:").unwrap_or(line).trim().to_string())
}

fn parse_printed_paths(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.is_file())
        .collect()
}

/// Shell stand-in for the yt-dlp executable.
///
/// Probes print `probe.json` from the script directory. Downloads run
/// `download` with `$dir` set to the directory of the `-o` template. Every
/// invocation records its arguments in `args.txt`.
#[cfg(all(test, unix))]
pub(crate) mod testing {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    pub fn fake_ytdlp(script_dir: &Path, probe_json: &str, download: &str) -> Ytdlp {
        std::fs::write(script_dir.join("probe.json"), probe_json).unwrap();
        let program = script_dir.join("yt-dlp");
        let script = format!(
            r#"#!/bin/sh
here=$(dirname "$0")
printf '%s\n' "$@" > "$here/args.txt"
for a in "$@"; do
  if [ "$a" = "--dump-single-json" ]; then cat "$here/probe.json"; exit 0; fi
done
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
dir=$(dirname "$out")
{download}
"#
        );
        std::fs::write(&program, script).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        Ytdlp {
            program,
            timeout: Duration::from_secs(30),
            cookies: None,
        }
    }

    /// Arguments of the most recent invocation.
    pub fn last_args(script_dir: &Path) -> Vec<String> {
        std::fs::read_to_string(script_dir.join("args.txt"))
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }
}
