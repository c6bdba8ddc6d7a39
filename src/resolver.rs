use reqwest::Url;
use scraper::{Html, Selector};

use crate::utils::absolute_url;

lazy_static! {
    static ref YOUTUBE_IFRAME: Selector = Selector::parse("#g1-video").expect("valid selector");
    static ref NOSCRIPT_YOUTUBE_ANCHOR: Selector =
        Selector::parse(".submessage > a:nth-child(1)").expect("valid selector");
    static ref TWITCH_IFRAME: Selector =
        Selector::parse(".js-video > iframe:nth-child(1)").expect("valid selector");
    static ref NOSCRIPT: Selector = Selector::parse("noscript").expect("valid selector");
}

/// Looks for an external video link in one specific place of a detail page.
pub trait LinkExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the markup this extractor knows about is absent.
    fn extract(&self, document: &Html) -> Option<String>;
}

fn first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The embedded YouTube player. The link is forced to https and its query dropped.
pub struct YoutubeIframe;

impl LinkExtractor for YoutubeIframe {
    fn name(&self) -> &'static str {
        "youtube_iframe"
    }

    fn extract(&self, document: &Html) -> Option<String> {
        let src = first_attr(document, &YOUTUBE_IFRAME, "src")?;
        let mut url = Url::parse(&absolute_url("https://www.youtube.com", &src)?).ok()?;
        if url.scheme() == "http" {
            url.set_scheme("https").ok()?;
        }
        url.set_query(None);
        Some(url.to_string())
    }
}

/// The anchor pointing at YouTube shown when the player sits inside a `<noscript>`.
pub struct NoscriptYoutube;

impl LinkExtractor for NoscriptYoutube {
    fn name(&self) -> &'static str {
        "noscript_youtube"
    }

    fn extract(&self, document: &Html) -> Option<String> {
        first_attr(document, &NOSCRIPT_YOUTUBE_ANCHOR, "href").or_else(|| {
            // with scripting enabled the parser keeps <noscript> bodies as raw text
            document.select(&NOSCRIPT).find_map(|noscript| {
                let fragment = Html::parse_fragment(&noscript.text().collect::<String>());
                first_attr(&fragment, &NOSCRIPT_YOUTUBE_ANCHOR, "href")
            })
        })
    }
}

pub struct TwitchIframe;

impl LinkExtractor for TwitchIframe {
    fn name(&self) -> &'static str {
        "twitch_iframe"
    }

    fn extract(&self, document: &Html) -> Option<String> {
        first_attr(document, &TWITCH_IFRAME, "src")
    }
}

/// Ordered chain of extractors. The first one yielding a link wins and the rest are never
/// consulted.
pub struct LinkResolver {
    extractors: Vec<Box<dyn LinkExtractor>>,
}

impl Default for LinkResolver {
    fn default() -> Self {
        LinkResolver::new(vec![
            Box::new(YoutubeIframe),
            Box::new(NoscriptYoutube),
            Box::new(TwitchIframe),
        ])
    }
}

impl LinkResolver {
    pub fn new(extractors: Vec<Box<dyn LinkExtractor>>) -> Self {
        LinkResolver { extractors }
    }

    pub fn resolve(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        for extractor in &self.extractors {
            match extractor.extract(&document) {
                Some(link) => {
                    debug!("{} found {}", extractor.name(), link);
                    return Some(link);
                }
                None => debug!("{} found nothing", extractor.name()),
            }
        }
        None
    }
}
