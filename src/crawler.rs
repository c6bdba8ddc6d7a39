use futures::{stream, StreamExt};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{
    discovery::{discover_page_limit, page_urls},
    errors::{DiscoveryError, ParseError, TransportError},
    fetcher::{PageFetcher, Transport},
    resolver::LinkResolver,
    sink::RecordSink,
    sprite::character_from_sprite,
    types::{CrawlResult, Game, Labels, ListingRow, PageUrl, ResolvedEntry},
    utils::{
        absolute_url, WaitGroup, HOSTNAME, MAX_NUM_PLAYERS, MAX_RETRIES, NUM_WORKERS,
        REQUEST_TIMEOUT_SECS,
    },
};

lazy_static! {
    static ref LISTING_ROW: Selector =
        Selector::parse("tr > td:nth-child(2) > a").expect("valid selector");
    static ref ROW_SPRITE: Selector =
        Selector::parse("span:nth-child(1) > img").expect("valid selector");
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct CrawlerOptions {
    pub game: Game,
    // site root, listing pages live at <hostname>/<game>?page=<n>
    #[builder(default = "self.default_hostname()")]
    pub hostname: String,
    // logical workers sharing the page queue
    #[builder(default = "NUM_WORKERS")]
    pub workers: usize,
    #[builder(default = "MAX_RETRIES")]
    pub max_retries: usize,
    // a request still unanswered after this long fails as a timeout and is retried
    #[builder(default = "Duration::from_secs(REQUEST_TIMEOUT_SECS)")]
    pub request_timeout: Duration,
    #[builder(default = "MAX_NUM_PLAYERS")]
    pub max_num_players: usize,
    // skip discovery and crawl pages 0..=page_limit
    #[builder(default = "None")]
    pub page_limit: Option<u32>,
}

impl CrawlerOptions {
    pub fn default_builder() -> CrawlerOptionsBuilder {
        CrawlerOptionsBuilder::default()
    }
}

impl CrawlerOptionsBuilder {
    fn default_hostname(&self) -> String {
        HOSTNAME.clone()
    }
}

#[derive(Default)]
struct Counters {
    pages_crawled: AtomicUsize,
    pages_failed: AtomicUsize,
    rows_resolved: AtomicUsize,
    rows_unresolved: AtomicUsize,
    rows_skipped: AtomicUsize,
}

impl Counters {
    fn result(&self) -> CrawlResult {
        CrawlResult {
            pages_crawled: self.pages_crawled.load(Ordering::SeqCst),
            pages_failed: self.pages_failed.load(Ordering::SeqCst),
            rows_resolved: self.rows_resolved.load(Ordering::SeqCst),
            rows_unresolved: self.rows_unresolved.load(Ordering::SeqCst),
            rows_skipped: self.rows_skipped.load(Ordering::SeqCst),
        }
    }
}

/// Parses the match rows of a listing page. Rows whose sprites cannot be read are skipped
/// rather than mislabelled; the second value counts them.
pub fn parse_listing(html: &str, hostname: &str, max_num_players: usize) -> (Vec<ListingRow>, usize) {
    let document = Html::parse_document(html);
    let mut rows = vec![];
    let mut skipped = 0;
    for anchor in document.select(&LISTING_ROW) {
        match parse_row(anchor, hostname, max_num_players) {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("skipping listing row: {}", e);
                skipped += 1;
            }
        }
    }
    (rows, skipped)
}

fn parse_row(
    anchor: ElementRef,
    hostname: &str,
    max_num_players: usize,
) -> Result<ListingRow, ParseError> {
    let characters = anchor
        .select(&ROW_SPRITE)
        .map(|img| character_from_sprite(img.value().attr("src").unwrap_or_default()))
        .collect::<Result<Vec<String>, ParseError>>()?;
    if characters.len() > max_num_players {
        return Err(ParseError::TooManyPlayers {
            found: characters.len(),
            max: max_num_players,
        });
    }
    let href = anchor
        .value()
        .attr("href")
        .ok_or(ParseError::MissingDetailLink)?;
    let detail_link =
        absolute_url(hostname, href).ok_or_else(|| ParseError::InvalidUrl(href.to_string()))?;
    Ok(ListingRow {
        detail_link,
        characters: Labels::padded(characters, max_num_players),
    })
}

pub struct Crawler<T = Client> {
    options: CrawlerOptions,
    fetcher: PageFetcher<T>,
    resolver: LinkResolver,
}

impl Crawler<Client> {
    pub fn new(options: CrawlerOptions) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(options.request_timeout).build()?;
        Ok(Crawler::with_transport(options, client))
    }
}

impl<T: Transport> Crawler<T> {
    pub fn with_transport(options: CrawlerOptions, transport: T) -> Self {
        let fetcher = PageFetcher::new(transport, options.max_retries);
        Crawler {
            options,
            fetcher,
            resolver: LinkResolver::default(),
        }
    }

    /// Crawls every listing page of the configured game, streaming each resolved row to
    /// `sink` as soon as it resolves. Only discovery failures abort the crawl.
    pub async fn crawl(
        &self,
        sink: &RecordSink,
        should_terminate: Arc<AtomicBool>,
    ) -> Result<CrawlResult, DiscoveryError> {
        let game = self.options.game;
        let limit = match self.options.page_limit {
            Some(limit) => limit,
            None => discover_page_limit(&self.fetcher, &self.options.hostname, game).await?,
        };
        let pages = page_urls(&self.options.hostname, game, limit);

        // the queue holds every page up front, so loading it never waits
        let (page_tx, page_rx) = mpsc::channel::<PageUrl>(pages.len().max(1));
        let mut queued = 0;
        for page in pages {
            match page_tx.send(page).await {
                Ok(_) => queued += 1,
                Err(e) => error!("could not queue page {}", e.0),
            }
        }
        drop(page_tx);

        info!(
            "scraping {} pages of {} using {} workers",
            queued, game, self.options.workers
        );

        let pending = WaitGroup::new(queued);
        let counters = Counters::default();
        let (pending_ref, counters_ref, terminate_ref) = (&pending, &counters, &should_terminate);

        let workers = tokio_stream::wrappers::ReceiverStream::new(page_rx).for_each_concurrent(
            self.options.workers.max(1),
            move |page| async move {
                if terminate_ref.load(Ordering::Relaxed) {
                    debug!("termination requested, dropping {}", page);
                } else {
                    debug!("{} removed from the queue", page);
                    self.crawl_page(&page, sink, counters_ref).await;
                }
                pending_ref.done();
            },
        );

        tokio::select! {
            _ = pending.wait() => {
                info!("finished scraping, cleaning up workers");
            }
            _ = workers => {
                if pending.pending() > 0 {
                    warn!("workers stopped with {} pages left", pending.pending());
                }
            }
        }

        let result = counters.result();
        info!(
            "{}: {} pages crawled, {} failed; {} rows resolved, {} unresolved, {} skipped",
            game,
            result.pages_crawled,
            result.pages_failed,
            result.rows_resolved,
            result.rows_unresolved,
            result.rows_skipped
        );
        Ok(result)
    }

    async fn crawl_page(&self, page: &PageUrl, sink: &RecordSink, counters: &Counters) {
        let html = match self.fetcher.fetch(page.as_str()).await {
            Ok(html) => html,
            Err(e) => {
                error!("dropping page {}: {}", page, e);
                counters.pages_failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let (rows, skipped) =
            parse_listing(&html, &self.options.hostname, self.options.max_num_players);
        counters.rows_skipped.fetch_add(skipped, Ordering::SeqCst);
        debug!("{} rows found on {}", rows.len(), page);

        stream::iter(rows)
            .for_each_concurrent(None, |row| self.resolve_row(row, sink, counters))
            .await;

        counters.pages_crawled.fetch_add(1, Ordering::SeqCst);
        info!("finished scraping {}", page);
    }

    async fn resolve_row(&self, row: ListingRow, sink: &RecordSink, counters: &Counters) {
        let html = match self.fetcher.fetch(&row.detail_link).await {
            Ok(html) => html,
            Err(e) => {
                warn!("dropping row {}: {}", row.detail_link, e);
                counters.rows_unresolved.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let external_link = match self.resolver.resolve(&html) {
            Some(link) => link,
            None => {
                warn!("no matching parser found for vod {}", row.detail_link);
                counters.rows_unresolved.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let entry = ResolvedEntry {
            external_link,
            characters: row.characters,
        };
        match sink.append(&entry) {
            Ok(_) => {
                counters.rows_resolved.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                error!("could not write {} to {:?}: {}", entry.external_link, sink.path(), e);
                counters.rows_unresolved.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const LISTING: &str = r#"<html><body><table><tbody>
      <tr>
        <td>2020-01-01</td>
        <td><a href="/melee/vod/1">
          <span class="p1"><span><img src="/images/thumb/16px-Fox.png"></span> Mango</span> vs
          <span class="p2"><span><img src="/images/thumb/16px-Falco.png"></span> Armada</span>
        </a></td>
      </tr>
      <tr>
        <td>2020-01-02</td>
        <td><a href="https://vods.co/melee/vod/2">
          <span class="p1"><span><img src="/images/16px-Ice_Climbers.png"></span> Wobbles</span>
        </a></td>
      </tr>
      <tr>
        <td>2020-01-03</td>
        <td><a href="/melee/vod/3">
          <span class="p1"><span><img src="/images/random-banner.png"></span> ???</span>
        </a></td>
      </tr>
    </tbody></table></body></html>"#;

    #[test]
    fn parses_rows_padded_to_player_count() {
        let (rows, skipped) = parse_listing(LISTING, "https://vods.co", 8);
        assert_eq!(skipped, 1);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.characters.len() == 8));
        assert_eq!(rows[0].detail_link, "https://vods.co/melee/vod/1");
        assert_eq!(
            rows[0].characters.slots()[..3],
            [Some("Fox".to_string()), Some("Falco".to_string()), None]
        );
        assert_eq!(rows[1].detail_link, "https://vods.co/melee/vod/2");
        assert_eq!(rows[1].characters.slots()[0], Some("Ice_Climbers".to_string()));
    }

    #[test]
    fn skips_rows_with_more_players_than_slots() {
        let (rows, skipped) = parse_listing(LISTING, "https://vods.co", 1);
        assert_eq!(skipped, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].detail_link, "https://vods.co/melee/vod/2");
    }

    #[test]
    fn empty_listing_is_not_an_error() {
        let (rows, skipped) = parse_listing("<html><body></body></html>", "https://vods.co", 8);
        assert!(rows.is_empty());
        assert_eq!(skipped, 0);
    }

    #[test]
    fn builder_defaults() {
        let options = CrawlerOptions::default_builder()
            .game(Game::Ultimate)
            .build()
            .unwrap();
        assert_eq!(options.workers, NUM_WORKERS);
        assert_eq!(options.max_retries, MAX_RETRIES);
        assert_eq!(options.request_timeout, Duration::from_secs(REQUEST_TIMEOUT_SECS));
        assert_eq!(options.max_num_players, MAX_NUM_PLAYERS);
        assert_eq!(options.page_limit, None);
    }
}
