//! URL classification: is this text a link we are willing to download?

use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::core::metrics;
use crate::core::validation::{host_matches, normalized_host, parse_link};
use crate::download::error::{ClassificationError, RejectReason};
use crate::download::resolver::{HttpRedirectResolver, RedirectResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSettings {
    /// Hosts (and their subdomains) the extractor may fetch from.
    pub allowed_domains: Vec<String>,
    /// Hosts whose redirects are resolved before the allow-list check.
    pub shortener_domains: Vec<String>,
    pub max_redirect_hops: usize,
    pub hop_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Valid(Url),
    Rejected(ClassificationError),
}

impl Classification {
    pub fn into_result(self) -> Result<Url, ClassificationError> {
        match self {
            Classification::Valid(url) => Ok(url),
            Classification::Rejected(e) => Err(e),
        }
    }
}

pub struct UrlClassifier {
    settings: ClassifierSettings,
    resolver: Arc<dyn RedirectResolver>,
}

impl UrlClassifier {
    pub fn new(settings: ClassifierSettings, resolver: Arc<dyn RedirectResolver>) -> Self {
        Self { settings, resolver }
    }

    /// Classifier backed by the HTTP redirect resolver.
    pub fn with_http_resolver(settings: ClassifierSettings) -> reqwest::Result<Self> {
        let resolver = HttpRedirectResolver::new(
            settings.shortener_domains.clone(),
            settings.max_redirect_hops,
            settings.hop_timeout,
        )?;
        Ok(Self::new(settings, Arc::new(resolver)))
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Syntax first, then shortener resolution, then the allow-list.
    ///
    /// Malformed input is rejected before anything touches the network.
    pub async fn classify(&self, input: &str) -> Classification {
        let started = Instant::now();
        let result = self.classify_inner(input).await;
        metrics::STAGE_DURATION_SECONDS
            .with_label_values(&["classify"])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(url) => Classification::Valid(url),
            Err(e) => {
                metrics::REJECTIONS_TOTAL.with_label_values(&[e.reason.as_str()]).inc();
                log::info!("Rejected link {:?}: {}", truncate(input, 200), e);
                Classification::Rejected(e)
            }
        }
    }

    async fn classify_inner(&self, input: &str) -> Result<Url, ClassificationError> {
        let url = parse_link(input).map_err(|e| ClassificationError::new(RejectReason::Malformed, e.to_string()))?;

        let is_shortener = normalized_host(&url).is_some_and(|h| host_matches(&h, &self.settings.shortener_domains));
        let url = if is_shortener {
            let resolved = self
                .resolver
                .resolve(&url)
                .await
                .map_err(|e| ClassificationError::new(RejectReason::RedirectTimeout, e.to_string()))?;
            log::info!("Resolved short link {} -> {}", url, resolved);
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                return Err(ClassificationError::new(
                    RejectReason::Malformed,
                    format!("redirect to unsupported scheme {}", resolved.scheme()),
                ));
            }
            resolved
        } else {
            url
        };

        let host = normalized_host(&url)
            .ok_or_else(|| ClassificationError::new(RejectReason::Malformed, "URL has no host"))?;
        if !host_matches(&host, &self.settings.allowed_domains) {
            return Err(ClassificationError::new(
                RejectReason::UnsupportedDomain,
                format!("{} is not on the allow-list", host),
            ));
        }

        Ok(url)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::resolver::ResolveError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver that counts calls and answers from a fixed result.
    struct CountingResolver {
        calls: AtomicUsize,
        answer: Result<&'static str, ResolveError>,
    }

    #[async_trait]
    impl RedirectResolver for CountingResolver {
        async fn resolve(&self, _url: &Url) -> Result<Url, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Ok(u) => Ok(Url::parse(u).unwrap()),
                Err(e) => Err(ResolveError::Timeout(e.to_string())),
            }
        }
    }

    fn settings() -> ClassifierSettings {
        ClassifierSettings {
            allowed_domains: vec!["youtube.com".into(), "video.example".into()],
            shortener_domains: vec!["bit.ly".into()],
            max_redirect_hops: 5,
            hop_timeout: Duration::from_secs(5),
        }
    }

    fn classifier(answer: Result<&'static str, ResolveError>) -> (UrlClassifier, Arc<CountingResolver>) {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            answer,
        });
        (UrlClassifier::new(settings(), resolver.clone()), resolver)
    }

    fn reason(c: &Classification) -> Option<RejectReason> {
        match c {
            Classification::Rejected(e) => Some(e.reason),
            Classification::Valid(_) => None,
        }
    }

    #[tokio::test]
    async fn test_malformed_inputs_never_reach_the_resolver() {
        let (c, resolver) = classifier(Ok("https://youtube.com/x"));
        for input in ["", "hello", "bit.ly/abc", "ftp://bit.ly/abc", "https://", "mailto:a@b.c"] {
            assert_eq!(reason(&c.classify(input).await), Some(RejectReason::Malformed), "{input}");
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_allowed_hosts_are_valid() {
        let (c, resolver) = classifier(Ok("https://youtube.com/x"));
        let result = c.classify("https://m.youtube.com/watch?v=1").await;
        assert_eq!(
            result,
            Classification::Valid(Url::parse("https://m.youtube.com/watch?v=1").unwrap())
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_off_list_hosts_are_unsupported() {
        let (c, _) = classifier(Ok("https://youtube.com/x"));
        assert_eq!(
            reason(&c.classify("https://example.org/video.mp4").await),
            Some(RejectReason::UnsupportedDomain)
        );
        assert_eq!(
            reason(&c.classify("https://notyoutube.com/watch").await),
            Some(RejectReason::UnsupportedDomain)
        );
    }

    #[tokio::test]
    async fn test_short_links_are_resolved_then_checked() {
        let (c, resolver) = classifier(Ok("https://www.youtube.com/watch?v=abc"));
        let result = c.classify("https://bit.ly/xyz").await;
        assert_eq!(
            result.into_result().unwrap().as_str(),
            "https://www.youtube.com/watch?v=abc"
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let (c, _) = classifier(Ok("https://evil.example.net/payload"));
        assert_eq!(
            reason(&c.classify("https://bit.ly/xyz").await),
            Some(RejectReason::UnsupportedDomain)
        );
    }

    #[tokio::test]
    async fn test_resolution_failure_is_redirect_timeout() {
        let (c, _) = classifier(Err(ResolveError::Timeout("bit.ly".into())));
        assert_eq!(
            reason(&c.classify("https://bit.ly/slow").await),
            Some(RejectReason::RedirectTimeout)
        );
    }
}
