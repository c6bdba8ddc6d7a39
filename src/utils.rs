use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use reqwest::Url;
use tokio::sync::Notify;

pub const DEFAULT_HOSTNAME: &str = "https://vods.co";
pub const MAX_RETRIES: usize = 10;
pub const MAX_NUM_PLAYERS: usize = 8;
pub const NUM_WORKERS: usize = 4;
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

pub const DOWNLOADER_PROGRAM: &str = "yt-dlp";
pub const FORMAT: &str = "134";
pub const VIDEO_OUT_TEMPLATE: &str = "data/videos/%(id)s.%(ext)s";
pub const MAX_DURATION_SECS: u64 = 15 * 60;
pub const EXTERNAL_DOWNLOADER: &str = "aria2c";
pub const EXTERNAL_DOWNLOADER_ARGS: &str = "-c -j 3 -x 3 -s 3 -k 1M";

pub const EXTRACTOR_PROGRAM: &str = "ffmpeg";
pub const FRAMES_OUTPUT_PER_SEC: f64 = 0.1;
pub const MAX_FRAMES_PER_VOD: usize = 100;
pub const IMAGE_DIR: &str = "data/images";

lazy_static! {
    pub static ref HOSTNAME: String = match std::env::var("VODS_HOSTNAME") {
        Ok(h) if !h.is_empty() => h,
        _ => DEFAULT_HOSTNAME.into(),
    };
}

/// Resolves `href` against `base`, accepting absolute, root-relative and protocol-relative
/// forms.
pub fn absolute_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(u) => Some(u.to_string()),
        Err(_) => {
            let base = Url::parse(base).ok()?;
            base.join(href).ok().map(|u| u.to_string())
        }
    }
}

/// Reads the `page` query parameter of a pagination href.
pub fn page_index_from_href(base: &str, href: &str) -> Option<u32> {
    let url = Url::parse(&absolute_url(base, href)?).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse::<u32>().ok())
}

/// `data/videos/abc.mp4` -> `abc`
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Output path for a stage's records, `<dir>/<name>`.
pub fn output_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// Vods file name derived from a links file name, as the stages hand files to each other.
pub fn vods_file_name(links_path: &Path) -> String {
    let name = links_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.contains("links") {
        name.replace("links", "vods")
    } else {
        format!("vods-{}", name)
    }
}

/// Counts outstanding units of work; `wait` resolves once every unit called `done`.
pub struct WaitGroup {
    pending: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    pub fn new(count: usize) -> Self {
        WaitGroup {
            pending: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    pub fn done(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent `done` is not missed
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    #[test]
    fn joins_relative_links() {
        assert_eq!(
            absolute_url("https://vods.co", "/melee/vod/1234").unwrap(),
            "https://vods.co/melee/vod/1234"
        );
        assert_eq!(
            absolute_url("https://vods.co", "//www.youtube.com/embed/x").unwrap(),
            "https://www.youtube.com/embed/x"
        );
        assert_eq!(
            absolute_url("https://vods.co", "https://example.com/a").unwrap(),
            "https://example.com/a"
        );
        assert!(absolute_url("https://vods.co", "  ").is_none());
    }

    #[test]
    fn reads_page_index() {
        assert_eq!(
            page_index_from_href("https://vods.co", "/melee?page=349"),
            Some(349)
        );
        assert_eq!(
            page_index_from_href("https://vods.co", "/melee?sort=date&page=12"),
            Some(12)
        );
        assert_eq!(page_index_from_href("https://vods.co", "/melee"), None);
        assert_eq!(page_index_from_href("https://vods.co", "/melee?page=x"), None);
    }

    #[test]
    fn vods_name_follows_links_name() {
        assert_eq!(
            vods_file_name(Path::new("out/melee-links-sample-10.csv")),
            "melee-vods-sample-10.csv"
        );
        assert_eq!(vods_file_name(Path::new("input.csv")), "vods-input.csv");
    }

    #[test]
    fn wait_group_releases_at_zero() {
        let wg = Arc::new(WaitGroup::new(3));
        aw!(async {
            let waiter = {
                let wg = wg.clone();
                tokio::spawn(async move { wg.wait().await })
            };
            for _ in 0..3 {
                tokio::task::yield_now().await;
                wg.done();
            }
            waiter.await.unwrap();
        });
        assert_eq!(wg.pending(), 0);
    }

    #[test]
    fn empty_wait_group_is_already_released() {
        let wg = WaitGroup::new(0);
        aw!(wg.wait());
        wg.done();
        assert_eq!(wg.pending(), 0);
    }
}
