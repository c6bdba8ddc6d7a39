use std::{
    path::PathBuf,
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{stream, StreamExt};
use tokio::task;

use crate::{
    errors::DownloadError,
    sink::RecordSink,
    types::{DownloadResult, DownloadedRecord, ResolvedEntry},
    utils::{
        DOWNLOADER_PROGRAM, EXTERNAL_DOWNLOADER, EXTERNAL_DOWNLOADER_ARGS, FORMAT,
        MAX_DURATION_SECS, MAX_RETRIES, VIDEO_OUT_TEMPLATE,
    },
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct DownloaderOptions {
    #[builder(default = "DOWNLOADER_PROGRAM.into()")]
    pub program: String,
    // format code handed to the downloader
    #[builder(default = "FORMAT.into()")]
    pub format: String,
    #[builder(default = "VIDEO_OUT_TEMPLATE.into()")]
    pub output_template: String,
    // longer videos are filtered out before anything is fetched
    #[builder(default = "MAX_DURATION_SECS")]
    pub max_duration_secs: u64,
    #[builder(default = "Some(EXTERNAL_DOWNLOADER.into())")]
    pub external_downloader: Option<String>,
    #[builder(default = "EXTERNAL_DOWNLOADER_ARGS.into()")]
    pub external_downloader_args: String,
    #[builder(default = "MAX_RETRIES")]
    pub max_retries: usize,
    // downloader subprocesses running at once
    #[builder(default = "num_cpus::get()")]
    pub processes: usize,
}

impl DownloaderOptions {
    pub fn default_builder() -> DownloaderOptionsBuilder {
        DownloaderOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    /// The video is longer than the duration cap and was never fetched.
    Filtered,
}

/// Fetches one video to local disk.
pub trait Downloader: Send + Sync + 'static {
    fn download(&self, link: &str) -> Result<DownloadOutcome, DownloadError>;
}

/// Drives `yt-dlp` (or a compatible fork) as a subprocess.
pub struct YtDlp {
    options: DownloaderOptions,
}

impl YtDlp {
    pub fn new(options: DownloaderOptions) -> Self {
        YtDlp { options }
    }

    fn command(&self, link: &str) -> Command {
        let o = &self.options;
        let mut cmd = Command::new(&o.program);
        cmd.arg("--no-playlist")
            .arg("--no-progress")
            .args(["-f", o.format.as_str()])
            .args(["-o", o.output_template.as_str()])
            .arg("--match-filter")
            .arg(format!("duration <= {}", o.max_duration_secs))
            // prints nothing when the match filter rejected the video
            .args(["--print", "after_move:filepath"]);
        if let Some(external) = &o.external_downloader {
            cmd.args(["--external-downloader", external.as_str()])
                .arg("--external-downloader-args")
                .arg(format!("{}:{}", external, o.external_downloader_args));
        }
        cmd.arg(link);
        cmd
    }
}

impl Downloader for YtDlp {
    fn download(&self, link: &str) -> Result<DownloadOutcome, DownloadError> {
        let program = self.options.program.clone();
        let output = self
            .command(link)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| DownloadError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(DownloadError::Failed {
                program,
                status: output.status.to_string(),
                stderr: tail.unwrap_or_default().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            Some(path) => Ok(DownloadOutcome::Saved(PathBuf::from(path))),
            None => Ok(DownloadOutcome::Filtered),
        }
    }
}

/// Calls the downloader until it succeeds, retrying transient failures up to
/// `max_retries` times with no delay.
pub fn download_with_retry<D: Downloader + ?Sized>(
    downloader: &D,
    link: &str,
    max_retries: usize,
) -> Result<DownloadOutcome, DownloadError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match downloader.download(link) {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_transient() && attempt <= max_retries => {
                warn!("attempt {} downloading {} failed: {}, retrying", attempt, link, e);
            }
            Err(e) if e.is_transient() => {
                return Err(DownloadError::Exhausted {
                    link: link.into(),
                    attempts: attempt,
                    last: Box::new(e),
                })
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct DownloadPool<D> {
    downloader: Arc<D>,
    max_retries: usize,
    processes: usize,
}

impl DownloadPool<YtDlp> {
    pub fn new(options: DownloaderOptions) -> Self {
        let (max_retries, processes) = (options.max_retries, options.processes);
        DownloadPool::with_downloader(YtDlp::new(options), max_retries, processes)
    }
}

impl<D: Downloader> DownloadPool<D> {
    pub fn with_downloader(downloader: D, max_retries: usize, processes: usize) -> Self {
        DownloadPool {
            downloader: Arc::new(downloader),
            max_retries,
            processes: processes.max(1),
        }
    }

    /// Downloads every entry with at most `processes` downloads in flight, writing each
    /// record to `sink` as soon as its download finishes.
    pub async fn run(
        &self,
        entries: impl Iterator<Item = ResolvedEntry> + Send,
        sink: &RecordSink,
        should_terminate: Arc<AtomicBool>,
    ) -> DownloadResult {
        let mut result = DownloadResult::default();
        let max_retries = self.max_retries;

        let mut downloads = stream::iter(entries)
            .take_while(|_| {
                let stop = should_terminate.load(Ordering::Relaxed);
                if stop {
                    info!("termination requested, not starting further downloads");
                }
                futures::future::ready(!stop)
            })
            .map(|entry| {
                let downloader = self.downloader.clone();
                task::spawn_blocking(move || {
                    let outcome = download_with_retry(&*downloader, &entry.external_link, max_retries);
                    (entry, outcome)
                })
            })
            .buffer_unordered(self.processes);

        while let Some(joined) = downloads.next().await {
            let (entry, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("download worker panicked: {}", e);
                    result.failed += 1;
                    continue;
                }
            };
            match outcome {
                Ok(DownloadOutcome::Saved(video_path)) => {
                    let record = DownloadedRecord {
                        video_path,
                        characters: entry.characters,
                    };
                    match sink.append(&record) {
                        Ok(_) => {
                            debug!("downloaded {} to {:?}", entry.external_link, record.video_path);
                            result.downloaded += 1;
                        }
                        Err(e) => {
                            error!("could not record {:?}: {}", record.video_path, e);
                            result.failed += 1;
                        }
                    }
                }
                Ok(DownloadOutcome::Filtered) => {
                    debug!("{} is longer than the duration cap, skipped", entry.external_link);
                    result.filtered += 1;
                }
                Err(e) => {
                    error!("hit an error downloading {}: {}", entry.external_link, e);
                    result.failed += 1;
                }
            }
        }

        info!(
            "{} videos downloaded, {} over the duration cap, {} failed",
            result.downloaded, result.filtered, result.failed
        );
        result
    }
}
