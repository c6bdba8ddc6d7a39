use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::{
    crawler::{Crawler, CrawlerOptions},
    downloader::{DownloadPool, DownloaderOptions},
    sink::{read_links, read_vods, sample_rows, RecordSink},
    splitter::{FrameSplitter, SplitterOptions},
    types::{frames_header, links_header, vods_header, CrawlResult, Game},
    utils::{output_path, vods_file_name},
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    game: Game,
    // directory receiving the links, vods and frames record files
    #[builder(default = "self.default_out_dir()")]
    out_dir: PathBuf,
    // also sets the label columns of every record file
    crawler: CrawlerOptions,
    downloader: DownloaderOptions,
    splitter: SplitterOptions,
    // rows drawn from the links file before downloading
    #[builder(default = "None")]
    samples: Option<usize>,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

impl RunnerOptionsBuilder {
    fn default_out_dir(&self) -> PathBuf {
        PathBuf::from(".")
    }
}

pub struct Runner {
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> anyhow::Result<Self> {
        let should_terminate = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

        Ok(Runner {
            options,
            should_terminate,
        })
    }

    pub fn links_path(&self) -> PathBuf {
        output_path(
            &self.options.out_dir,
            &format!("{}-links.csv", self.options.game),
        )
    }

    pub fn frames_path(&self) -> PathBuf {
        output_path(
            &self.options.out_dir,
            &format!("{}-vod-frames.csv", self.options.game),
        )
    }

    /// Label columns of the record files. The crawler pads labels to the same width.
    fn max_num_players(&self) -> usize {
        self.options.crawler.max_num_players
    }

    pub async fn run_all(&self) -> anyhow::Result<PathBuf> {
        let (links, _) = self.run_crawl().await?;
        let vods = self.run_download(&links).await?;
        self.run_split(&vods).await
    }

    pub async fn run_crawl(&self) -> anyhow::Result<(PathBuf, CrawlResult)> {
        let path = self.links_path();
        let sink = RecordSink::create(&path, &links_header(self.max_num_players()))
            .context(format!("could not create links file {:?}", path))?;

        let crawler = Crawler::new(self.options.crawler.clone())
            .context("could not build the http client")?;
        let result = crawler
            .crawl(&sink, self.should_terminate.clone())
            .await
            .context(format!("could not crawl {}", self.options.game))?;
        info!("links written to {:?}", path);
        Ok((path, result))
    }

    pub async fn run_download(&self, links: &Path) -> anyhow::Result<PathBuf> {
        let links = match self.options.samples {
            Some(samples) => self.sample_links(links, samples)?,
            None => links.to_path_buf(),
        };

        let path = output_path(&self.options.out_dir, &vods_file_name(&links));
        let sink = RecordSink::create(&path, &vods_header(self.max_num_players()))
            .context(format!("could not create vods file {:?}", path))?;
        let entries =
            read_links(&links).context(format!("could not read links file {:?}", links))?;

        let pool = DownloadPool::new(self.options.downloader.clone());
        pool.run(entries, &sink, self.should_terminate.clone()).await;
        info!("downloaded videos recorded in {:?}", path);
        Ok(path)
    }

    pub async fn run_split(&self, vods: &Path) -> anyhow::Result<PathBuf> {
        let path = self.frames_path();
        let sink = RecordSink::create(&path, &frames_header(self.max_num_players()))
            .context(format!("could not create frames file {:?}", path))?;
        let records = read_vods(vods).context(format!("could not read vods file {:?}", vods))?;

        let splitter = FrameSplitter::new(self.options.splitter.clone());
        splitter
            .run(records, &sink, self.should_terminate.clone())
            .await;
        info!("frames recorded in {:?}", path);
        Ok(path)
    }

    fn sample_links(&self, links: &Path, samples: usize) -> anyhow::Result<PathBuf> {
        info!("taking a sample (size {}) from {:?}", samples, links);
        let out = output_path(
            &self.options.out_dir,
            &format!("{}-links-sample-{}.csv", self.options.game, samples),
        );
        let sampled = sample_rows(links, samples, &out)
            .context(format!("could not sample {:?}", links))?;
        Ok(sampled.unwrap_or_else(|| links.to_path_buf()))
    }
}
