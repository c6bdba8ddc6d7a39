use std::{future::Future, iter, time::Duration};

use reqwest::Client;
use tokio_retry::RetryIf;

use crate::errors::{FetchError, TransportError};

/// A single GET returning the response body as text.
pub trait Transport: Send + Sync {
    fn get_text(&self, url: &str) -> impl Future<Output = Result<String, TransportError>> + Send;
}

impl Transport for Client {
    fn get_text(&self, url: &str) -> impl Future<Output = Result<String, TransportError>> + Send {
        let request = Client::get(self, url);
        async move {
            let res = request.send().await?;
            let status = res.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            Ok(res.text().await?)
        }
    }
}

/// GET with unconditional, delay-free retries on transient failures. A permanently
/// failing url is attempted `max_retries + 1` times.
pub struct PageFetcher<T = Client> {
    transport: T,
    max_retries: usize,
}

impl<T: Transport> PageFetcher<T> {
    pub fn new(transport: T, max_retries: usize) -> Self {
        PageFetcher {
            transport,
            max_retries,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let strategy = iter::repeat(Duration::ZERO).take(self.max_retries);
        let transport = &self.transport;
        let res = RetryIf::spawn(
            strategy,
            move || {
                debug!("requesting {}", url);
                transport.get_text(url)
            },
            |e: &TransportError| {
                let transient = e.is_transient();
                if transient {
                    warn!("transient failure requesting {}: {}, retrying", url, e);
                }
                transient
            },
        )
        .await;

        res.map_err(|source| {
            if source.is_transient() {
                FetchError::Exhausted {
                    url: url.into(),
                    attempts: self.max_retries + 1,
                    source,
                }
            } else {
                FetchError::Rejected {
                    url: url.into(),
                    source,
                }
            }
        })
    }
}
