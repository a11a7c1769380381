use crate::config::{FeedAuth, FeedSource};
use crate::feed::{Feed, FeedError, parse_feed};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, RequestBuilder, header};
use std::time::Instant;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {location} timed out")]
    Timeout { location: String },
    #[error("request to {location} failed: {message}")]
    Request { location: String, message: String },
    #[error("{location} answered HTTP {status}")]
    Status { location: String, status: u16 },
    #[error("cannot read {location}: {message}")]
    Read { location: String, message: String },
    #[error("{location} is not a valid feed: {source}")]
    Parse {
        location: String,
        #[source]
        source: FeedError,
    },
}

#[derive(Clone)]
pub struct Fetcher {
    http: Client,
}

impl Fetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn fetch_feed(&self, source: &FeedSource) -> Result<Feed, FetchError> {
        let started = Instant::now();
        let bytes = self.fetch_bytes(source).await?;
        let feed = parse_feed(&bytes).map_err(|source_err| FetchError::Parse {
            location: display_location(&source.location),
            source: source_err,
        })?;
        info!(
            target = "feeds.fetch",
            location = %display_location(&source.location),
            bytes = bytes.len(),
            offers = feed.shop.offers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "feed loaded"
        );
        Ok(feed)
    }

    pub async fn fetch_bytes(&self, source: &FeedSource) -> Result<Vec<u8>, FetchError> {
        let location = display_location(&source.location);
        if !source.is_remote() {
            return tokio::fs::read(source.location.trim())
                .await
                .map_err(|err| FetchError::Read {
                    location,
                    message: err.to_string(),
                });
        }

        let request = apply_auth(self.http.get(source.location.trim()), &source.auth);
        let response = request
            .send()
            .await
            .map_err(|err| transport_error(&location, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(&location, err))?;
        Ok(body.to_vec())
    }
}

fn apply_auth(request: RequestBuilder, auth: &FeedAuth) -> RequestBuilder {
    match auth {
        FeedAuth::None => request,
        FeedAuth::Basic { username, password } => {
            let encoded = BASE64.encode(format!("{username}:{password}"));
            request.header(header::AUTHORIZATION, format!("Basic {encoded}"))
        }
        FeedAuth::Bearer { token } => request.bearer_auth(token),
        FeedAuth::Header { name, value } => request.header(name.as_str(), value.as_str()),
        FeedAuth::Cookie { value } => request.header(header::COOKIE, value.as_str()),
    }
}

fn transport_error(location: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            location: location.to_string(),
        }
    } else {
        FetchError::Request {
            location: location.to_string(),
            message: err.without_url().to_string(),
        }
    }
}

/// Scheme, host and path only: feed URLs often carry access keys in the query.
pub fn display_location(location: &str) -> String {
    match reqwest::Url::parse(location.trim()) {
        Ok(url) if url.has_host() => {
            format!(
                "{}://{}{}",
                url.scheme(),
                url.host_str().unwrap_or_default(),
                url.path()
            )
        }
        _ => location.trim().to_string(),
    }
}
