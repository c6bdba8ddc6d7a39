use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("sprite path {0:?} does not match the 16px-<character>.png pattern")]
    SpriteFilename(String),
    #[error("listing row has {found} characters, more than the {max} player slots")]
    TooManyPlayers { found: usize, max: usize },
    #[error("listing row has no detail link")]
    MissingDetailLink,
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
}

/// Failure of a single transport attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("server disconnected: {0}")]
    Disconnected(String),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts, dropped connections, throttling and server-side errors are worth another
    /// attempt. Everything else fails the unit of work straight away.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Disconnected(_) => true,
            TransportError::Status(code) => *code == 429 || *code >= 500,
            TransportError::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            TransportError::Disconnected(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("gave up on {url} after {attempts} attempts: {source}")]
    Exhausted {
        url: String,
        attempts: usize,
        source: TransportError,
    },
    #[error("could not fetch {url}: {source}")]
    Rejected { url: String, source: TransportError },
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("could not fetch the first listing page of {game}: {source}")]
    Fetch { game: String, source: FetchError },
    #[error("couldn't get the index of the last page for {0}, the site structure changed or the site is down")]
    PaginationMissing(String),
    #[error("last page link {0:?} carries no usable page index")]
    InvalidPageIndex(String),
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("could not launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("gave up on {link} after {attempts} attempts: {last}")]
    Exhausted {
        link: String,
        attempts: usize,
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// A downloader that ran and failed may succeed on the next attempt, one that could not
    /// be launched will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Failed { .. })
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status} on {video:?}")]
    Failed {
        program: String,
        status: String,
        video: PathBuf,
    },
    #[error("invalid frame pattern: {0}")]
    Pattern(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("could not open record file {path:?}: {source}")]
    Open { path: PathBuf, source: csv::Error },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("record writer poisoned by a panicking worker")]
    Poisoned,
    #[error("record has {found} fields, expected {expected}")]
    Width { found: usize, expected: usize },
}
