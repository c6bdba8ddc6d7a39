use std::{path::PathBuf, time::Duration};

use clap::{Args as ClapArgs, Parser, Subcommand};
use log::debug;
use vodframes::{
    crawler::CrawlerOptions,
    downloader::DownloaderOptions,
    runner::{Runner, RunnerOptions, RunnerOptionsBuilder},
    splitter::SplitterOptions,
    types::Game,
    utils::{FRAMES_OUTPUT_PER_SEC, MAX_FRAMES_PER_VOD, NUM_WORKERS, REQUEST_TIMEOUT_SECS},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Builds a labelled frame dataset from https://vods.co", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Directory the record files are written to
    #[arg(short = 'o', long, global = true, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Crawl the listing pages of a game into <game>-links.csv
    Crawl {
        game: Game,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Download the videos of a links file
    Download {
        game: Game,
        /// Links file, as written by `crawl`
        csv_filename: PathBuf,
        #[command(flatten)]
        download: DownloadArgs,
    },
    /// Split downloaded videos into frames
    Split {
        game: Game,
        /// Vods file, as written by `download`
        csv_filename: PathBuf,
        #[command(flatten)]
        split: SplitArgs,
    },
    /// Crawl, download and split in one go
    Run {
        game: Game,
        #[command(flatten)]
        crawl: CrawlArgs,
        #[command(flatten)]
        download: DownloadArgs,
        #[command(flatten)]
        split: SplitArgs,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct CrawlArgs {
    /// Number of concurrent crawl workers. Too many will cause the server to reject requests
    #[arg(long, default_value_t = NUM_WORKERS)]
    num_workers: usize,
    /// Crawl pages 0 through PAGES instead of discovering the last page
    #[arg(long)]
    pages: Option<u32>,
    /// Seconds to wait for a page before retrying it
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,
}

#[derive(ClapArgs, Debug, Clone)]
struct DownloadArgs {
    /// Number of downloads running at once
    #[arg(long, default_value_t = num_cpus::get())]
    num_processes: usize,
    /// Download only a random sample of this many links
    #[arg(long)]
    samples: Option<usize>,
}

#[derive(ClapArgs, Debug, Clone)]
struct SplitArgs {
    /// Number of frame extractions running at once
    #[arg(long, default_value_t = num_cpus::get())]
    split_processes: usize,
    /// Frames captured per second of video
    #[arg(long, default_value_t = FRAMES_OUTPUT_PER_SEC)]
    fps: f64,
    /// Frames kept per video
    #[arg(long, default_value_t = MAX_FRAMES_PER_VOD)]
    max_frames: usize,
}

fn crawler_options(game: Game, args: &CrawlArgs) -> anyhow::Result<CrawlerOptions> {
    let mut builder = CrawlerOptions::default_builder();
    builder
        .game(game)
        .workers(args.num_workers)
        .request_timeout(Duration::from_secs(args.request_timeout));
    if let Some(pages) = args.pages {
        builder.page_limit(pages);
    }
    Ok(builder.build()?)
}

fn downloader_options(args: &DownloadArgs) -> anyhow::Result<DownloaderOptions> {
    Ok(DownloaderOptions::default_builder()
        .processes(args.num_processes)
        .build()?)
}

fn splitter_options(args: &SplitArgs) -> anyhow::Result<SplitterOptions> {
    Ok(SplitterOptions::default_builder()
        .processes(args.split_processes)
        .fps(args.fps)
        .max_frames_per_vod(args.max_frames)
        .build()?)
}

fn runner_options(game: Game, out_dir: PathBuf) -> anyhow::Result<RunnerOptionsBuilder> {
    let mut builder = RunnerOptions::default_builder();
    builder
        .game(game)
        .out_dir(out_dir)
        .crawler(crawler_options(game, &CrawlArgs {
            num_workers: NUM_WORKERS,
            pages: None,
            request_timeout: REQUEST_TIMEOUT_SECS,
        })?)
        .downloader(DownloaderOptions::default_builder().build()?)
        .splitter(SplitterOptions::default_builder().build()?);
    Ok(builder)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    if let Ok(env) = std::env::var("RUST_LOG") {
        if env == "debug" {
            println!("{number:/>width$}", number = "", width = 20);
            println!("Debug mode enabled");
            println!("{number:/>width$}", number = "", width = 20);
            println!();
        }
    }

    debug!("Starting with {:#?}", args);

    match args.command {
        Command::Crawl { game, crawl } => {
            let options = runner_options(game, args.out_dir)?
                .crawler(crawler_options(game, &crawl)?)
                .build()?;
            Runner::new(options)?.run_crawl().await?;
        }
        Command::Download {
            game,
            csv_filename,
            download,
        } => {
            let options = runner_options(game, args.out_dir)?
                .downloader(downloader_options(&download)?)
                .samples(download.samples)
                .build()?;
            Runner::new(options)?.run_download(&csv_filename).await?;
        }
        Command::Split {
            game,
            csv_filename,
            split,
        } => {
            let options = runner_options(game, args.out_dir)?
                .splitter(splitter_options(&split)?)
                .build()?;
            Runner::new(options)?.run_split(&csv_filename).await?;
        }
        Command::Run {
            game,
            crawl,
            download,
            split,
        } => {
            let options = runner_options(game, args.out_dir)?
                .crawler(crawler_options(game, &crawl)?)
                .downloader(downloader_options(&download)?)
                .splitter(splitter_options(&split)?)
                .samples(download.samples)
                .build()?;
            let frames = Runner::new(options)?.run_all().await?;
            println!("frames recorded in {}", frames.display());
        }
    }

    Ok(())
}
