pub mod dom;
pub mod json;
pub mod lines;
pub mod sites;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::fetch::{Fetcher, Payload};
use crate::model::{DetailRecord, SearchOutcome, Source};

pub use sites::{site, Channel, DetailStrategy, ListingStrategy, Site};

/// One pharmacy, as seen by the pipeline.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn supports_detail(&self) -> bool;

    /// Never fails: a transport problem is logged and yields an empty outcome.
    async fn search(&self, term: &str, max_results: usize) -> SearchOutcome;

    /// `Ok(None)` when the page came back but held nothing usable.
    async fn detail(&self, url: &str) -> Result<Option<DetailRecord>, TransportError>;
}

/// The single adapter implementation; behaviour comes from the [`Site`].
pub struct SiteAdapter {
    site: Site,
    fetcher: Arc<dyn Fetcher>,
}

impl SiteAdapter {
    pub fn new(site: Site, fetcher: Arc<dyn Fetcher>) -> Self {
        SiteAdapter { site, fetcher }
    }

    fn extract(&self, term: &str, payload: Payload, max_results: usize) -> SearchOutcome {
        let source = self.site.source;
        match (self.site.listing, payload) {
            (ListingStrategy::Dom(profile), Payload::Html(html)) => {
                let mut outcome = SearchOutcome::default();
                for record in dom::parse_listing(&html, profile, source, max_results) {
                    outcome.push_listing(record);
                }
                outcome
            }
            (ListingStrategy::Lines(profile), Payload::Lines(lines)) => {
                let products = lines::scan(&lines, profile, max_results);
                lines::into_outcome(products, &self.site.page_url(term), source, profile)
            }
            (ListingStrategy::Json(profile), Payload::Json(value)) => {
                json::parse_items(&value, profile, source, max_results)
            }
            (_, other) => {
                warn!(source = %source, got = other.kind(), "unexpected payload for listing strategy");
                SearchOutcome::default()
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for SiteAdapter {
    fn source(&self) -> Source {
        self.site.source
    }

    fn supports_detail(&self) -> bool {
        self.site.detail.is_some()
    }

    async fn search(&self, term: &str, max_results: usize) -> SearchOutcome {
        let source = self.site.source;
        let request = self.site.listing_request(term);
        debug!(source = %source, url = %request.url, "fetching listing");

        let payload = match self.fetcher.fetch(&request).await {
            Ok(p) => p,
            Err(e) => {
                warn!(source = %source, term, error = %e, "listing fetch failed");
                return SearchOutcome::default();
            }
        };

        let outcome = self.extract(term, payload, max_results);
        for record in outcome.listings.iter().filter(|r| r.price_inverted()) {
            warn!(
                url = %record.url,
                mrp = ?record.mrp,
                selling_price = ?record.selling_price,
                "selling price above MRP"
            );
        }
        info!(
            source = %source,
            term,
            listings = outcome.listings.len(),
            details = outcome.details.len(),
            "search done"
        );
        outcome
    }

    async fn detail(&self, url: &str) -> Result<Option<DetailRecord>, TransportError> {
        let source = self.site.source;
        let (Some(strategy), Some(request)) = (self.site.detail, self.site.detail_request(url)) else {
            return Err(TransportError::Unsupported(format!("{} has no detail pass", source)));
        };

        let payload = self.fetcher.fetch(&request).await?;
        match (strategy, payload) {
            (DetailStrategy::Dom(profile), Payload::Html(html)) => Ok(dom::parse_detail(&html, url, profile, source)),
            (_, other) => Err(TransportError::Decode {
                url: url.to_string(),
                reason: format!("expected html, got {}", other.kind()),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::TransportError;
    use crate::fetch::{Fetcher, PageRequest, Payload};

    /// Serves canned payloads by URL; anything else is a 404.
    #[derive(Default)]
    pub struct StubFetcher {
        pages: HashMap<String, Payload>,
        pub seen: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        pub fn with(mut self, url: &str, payload: Payload) -> Self {
            self.pages.insert(url.to_string(), payload);
            self
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &PageRequest) -> Result<Payload, TransportError> {
            self.seen.lock().unwrap().push(request.url.clone());
            self.pages.get(&request.url).cloned().ok_or_else(|| TransportError::Status {
                url: request.url.clone(),
                status: 404,
            })
        }
    }
}
