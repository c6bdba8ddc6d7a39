use scraper::{Html, Selector};

use crate::{
    errors::DiscoveryError,
    fetcher::{PageFetcher, Transport},
    types::{Game, PageUrl},
    utils::page_index_from_href,
};

lazy_static! {
    static ref LAST_PAGE_LINK: Selector =
        Selector::parse(".pager-last > a:nth-child(1)").expect("valid selector");
}

/// Reads the upper page index out of the "last page" pagination control of a listing page.
pub fn parse_page_limit(html: &str, hostname: &str, game: Game) -> Result<u32, DiscoveryError> {
    let document = Html::parse_document(html);
    let href = document
        .select(&LAST_PAGE_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| DiscoveryError::PaginationMissing(game.to_string()))?;
    page_index_from_href(hostname, href)
        .ok_or_else(|| DiscoveryError::InvalidPageIndex(href.to_string()))
}

/// Fetches listing page 0 of `game` and returns the index of its last page.
pub async fn discover_page_limit<T: Transport>(
    fetcher: &PageFetcher<T>,
    hostname: &str,
    game: Game,
) -> Result<u32, DiscoveryError> {
    info!("getting page limit for {}", game);
    let first_page = PageUrl::new(hostname, game, 0);
    let html = fetcher
        .fetch(first_page.as_str())
        .await
        .map_err(|source| DiscoveryError::Fetch {
            game: game.to_string(),
            source,
        })?;
    let limit = parse_page_limit(&html, hostname, game)?;
    info!("{} has listing pages 0 through {}", game, limit);
    Ok(limit)
}

/// One page url per index in `0..=limit`.
pub fn page_urls(hostname: &str, game: Game, limit: u32) -> Vec<PageUrl> {
    (0..=limit).map(|i| PageUrl::new(hostname, game, i)).collect()
}
