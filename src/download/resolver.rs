//! Resolution of shortened links.
//!
//! Redirects are followed by hand, one request per hop, so the hop count,
//! the per-hop timeout and loop detection are all under our control.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::core::validation::{host_matches, normalized_host};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("too many redirects ({hops} hops, max {max})")]
    TooManyHops { hops: usize, max: usize },

    #[error("redirect loop detected: {from} -> {to}")]
    Loop { from: String, to: String },

    #[error("hop to {0} timed out")]
    Timeout(String),

    #[error("redirect without a usable Location header at {0}")]
    BadLocation(String),

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// Turns a possibly-shortened link into the link it ultimately points to.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &Url) -> Result<Url, ResolveError>;
}

/// Follows HTTP redirects while the current host is a known shortener.
///
/// Hosts that are not shorteners are never contacted.
pub struct HttpRedirectResolver {
    client: reqwest::Client,
    shortener_domains: Vec<String>,
    max_hops: usize,
}

impl HttpRedirectResolver {
    pub fn new(shortener_domains: Vec<String>, max_hops: usize, hop_timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(hop_timeout)
            .connect_timeout(hop_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("fetchgram/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            shortener_domains,
            max_hops,
        })
    }

    fn is_shortener(&self, url: &Url) -> bool {
        normalized_host(url).is_some_and(|host| host_matches(&host, &self.shortener_domains))
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve(&self, url: &Url) -> Result<Url, ResolveError> {
        let mut current = url.clone();
        let mut visited: Vec<Url> = Vec::new();
        let mut hops = 0usize;

        while self.is_shortener(&current) {
            visited.push(current.clone());

            let resp = self.client.get(current.as_str()).send().await.map_err(|e| {
                if e.is_timeout() {
                    ResolveError::Timeout(current.to_string())
                } else {
                    ResolveError::Request {
                        url: current.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

            if !resp.status().is_redirection() {
                log::debug!("Shortener {} answered {} without redirect", current, resp.status());
                break;
            }

            if hops >= self.max_hops {
                return Err(ResolveError::TooManyHops {
                    hops: hops + 1,
                    max: self.max_hops,
                });
            }

            let next = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| current.join(location).ok())
                .ok_or_else(|| ResolveError::BadLocation(current.to_string()))?;

            if visited.contains(&next) {
                return Err(ResolveError::Loop {
                    from: current.to_string(),
                    to: next.to_string(),
                });
            }

            log::debug!("Redirect hop {}: {} -> {}", hops + 1, current, next);
            current = next;
            hops += 1;
        }

        Ok(current)
    }
}
