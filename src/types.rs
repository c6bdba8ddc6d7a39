use std::{fmt, path::PathBuf};

use clap::ValueEnum;

/// Games listed on the match-listing site, by their url slug.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    #[value(name = "smash64")]
    Smash64,
    #[value(name = "melee")]
    Melee,
    #[value(name = "meleedoubles")]
    MeleeDoubles,
    #[value(name = "brawl")]
    Brawl,
    #[value(name = "projectm")]
    ProjectM,
    #[value(name = "smash4")]
    Smash4,
    #[value(name = "ultimate")]
    Ultimate,
}

impl Game {
    pub fn slug(&self) -> &'static str {
        match self {
            Game::Smash64 => "smash64",
            Game::Melee => "melee",
            Game::MeleeDoubles => "meleedoubles",
            Game::Brawl => "brawl",
            Game::ProjectM => "projectm",
            Game::Smash4 => "smash4",
            Game::Ultimate => "ultimate",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Address of one listing page, `<hostname>/<game>?page=<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageUrl {
    index: u32,
    url: String,
}

impl PageUrl {
    pub fn new(hostname: &str, game: Game, index: u32) -> Self {
        PageUrl {
            index,
            url: format!("{}/{}?page={}", hostname.trim_end_matches('/'), game, index),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Character identifiers in player-slot order. `None` marks an empty slot and is written as
/// an empty field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Labels(Vec<Option<String>>);

impl Labels {
    /// Pads `characters` with empty slots up to `max_num_players`. Callers reject longer
    /// sequences before getting here.
    pub fn padded(characters: Vec<String>, max_num_players: usize) -> Self {
        let mut slots: Vec<Option<String>> = characters.into_iter().map(Some).collect();
        slots.resize(max_num_players.max(slots.len()), None);
        Labels(slots)
    }

    pub fn from_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        Labels(
            fields
                .into_iter()
                .map(|f| if f.is_empty() { None } else { Some(f.to_string()) })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn slots(&self) -> &[Option<String>] {
        &self.0
    }

    fn fields(&self) -> impl Iterator<Item = String> + '_ {
        self.0.iter().map(|s| s.clone().unwrap_or_default())
    }
}

/// A record that can be appended to a sink as one csv row.
pub trait Record {
    fn to_fields(&self) -> Vec<String>;
}

/// One match entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub detail_link: String,
    pub characters: Labels,
}

/// A listing row whose detail page resolved to an external video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub external_link: String,
    pub characters: Labels,
}

impl Record for ResolvedEntry {
    fn to_fields(&self) -> Vec<String> {
        std::iter::once(self.external_link.clone())
            .chain(self.characters.fields())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedRecord {
    pub video_path: PathBuf,
    pub characters: Labels,
}

impl Record for DownloadedRecord {
    fn to_fields(&self) -> Vec<String> {
        std::iter::once(self.video_path.to_string_lossy().into_owned())
            .chain(self.characters.fields())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub frame_path: PathBuf,
    pub characters: Labels,
}

impl Record for FrameRecord {
    fn to_fields(&self) -> Vec<String> {
        std::iter::once(self.frame_path.to_string_lossy().into_owned())
            .chain(self.characters.fields())
            .collect()
    }
}

pub fn links_header(max_num_players: usize) -> Vec<String> {
    std::iter::once("external_link".to_string())
        .chain((1..=max_num_players).map(|i| format!("character_{}", i)))
        .collect()
}

pub fn vods_header(max_num_players: usize) -> Vec<String> {
    std::iter::once("video_link".to_string())
        .chain((1..=max_num_players).map(|i| format!("p{}_character", i)))
        .collect()
}

pub fn frames_header(max_num_players: usize) -> Vec<String> {
    std::iter::once("frame_path".to_string())
        .chain((1..=max_num_players).map(|i| format!("p{}_character", i)))
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlResult {
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub rows_resolved: usize,
    pub rows_unresolved: usize,
    pub rows_skipped: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub downloaded: usize,
    pub filtered: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitResult {
    pub videos_split: usize,
    pub videos_failed: usize,
    pub frames_kept: usize,
    pub frames_discarded: usize,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pads_labels_to_player_count() {
        let labels = Labels::padded(vec!["Fox".into(), "Falco".into()], 8);
        assert_eq!(labels.len(), 8);
        assert_eq!(labels.slots()[1], Some("Falco".to_string()));
        assert!(labels.slots()[2..].iter().all(Option::is_none));
    }

    #[test]
    fn empty_slots_become_empty_fields() {
        let entry = ResolvedEntry {
            external_link: "https://www.youtube.com/embed/abc".into(),
            characters: Labels::padded(vec!["Marth".into()], 3),
        };
        assert_eq!(
            entry.to_fields(),
            vec!["https://www.youtube.com/embed/abc", "Marth", "", ""]
        );
        assert_eq!(
            Labels::from_fields(["Marth", "", ""]),
            Labels::padded(vec!["Marth".into()], 3)
        );
    }

    #[test]
    fn page_urls() {
        let page = PageUrl::new("https://vods.co/", Game::Melee, 349);
        assert_eq!(page.as_str(), "https://vods.co/melee?page=349");
        assert_eq!(page.index(), 349);
    }

    #[test]
    fn headers() {
        assert_eq!(vods_header(2), vec!["video_link", "p1_character", "p2_character"]);
        assert_eq!(links_header(8).len(), 9);
        assert_eq!(frames_header(2)[0], "frame_path");
    }
}
