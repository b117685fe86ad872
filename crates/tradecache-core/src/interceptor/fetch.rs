use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::error::FetchError;
use super::request::{Request, Response, ResponseKind};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// The real network, as seen from inside the interceptor.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Resolve `request` over the network. Any HTTP status is a response;
    /// only a request that produced none is an error.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: Url) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, origin })
    }

    fn kind_for(&self, url: &Url) -> ResponseKind {
        if url.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?.to_vec();
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Fetched");

        Ok(Response {
            status,
            headers,
            body,
            kind: self.kind_for(&url),
            url: Some(url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_for_origin() {
        let fetcher = HttpFetcher::new(Url::parse("https://app.test").unwrap()).unwrap();
        assert_eq!(
            fetcher.kind_for(&Url::parse("https://app.test/api/x").unwrap()),
            ResponseKind::Basic
        );
        assert_eq!(
            fetcher.kind_for(&Url::parse("https://cdn.test/app.js").unwrap()),
            ResponseKind::Cors
        );
    }
}
