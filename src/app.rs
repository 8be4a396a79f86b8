//! The `MorningPost` service: feed registry, discovery and the reading list
//! behind one handle.
//!
//! This is the surface an HTTP front end or the CLI drives. It owns the
//! feed store and the aggregator; persistence happens only on
//! [`MorningPost::shutdown`].

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::feed::{
    build_client, discover_feeds, AggregationError, Aggregator, Article, DiscoveryError,
    FetchError,
};
use crate::storage::{Feed, FeedStore, FeedType, PersistenceError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] FetchError),
}

/// One page of the reading list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsPage {
    pub items: Vec<Article>,
    /// The following page number, or `None` on the last page.
    pub next_page: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Serving,
    Stopped,
}

#[derive(Debug)]
pub struct MorningPost {
    config: Config,
    store: FeedStore,
    client: reqwest::Client,
    aggregator: Aggregator,
    lifecycle: Lifecycle,
}

impl MorningPost {
    /// Opens the store named by `config` and seeds page shuffling from the OS.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let store = FeedStore::open(config.resolved_store_path())?;
        Self::with_parts(config, store, StdRng::from_entropy())
    }

    /// Assembles the service from an already-open store and an explicit
    /// random source.
    pub fn with_parts(config: Config, store: FeedStore, rng: StdRng) -> Result<Self, AppError> {
        let client = build_client()?;
        let aggregator = Aggregator::new(client.clone(), config.fetch_options(), rng);
        Ok(Self {
            config,
            store,
            client,
            aggregator,
            lifecycle: Lifecycle::Idle,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    /// Discovers the feeds behind `url` and registers all of them.
    ///
    /// Returns the registered feeds with their ids. A page without feed
    /// links registers nothing and returns an empty list.
    pub async fn add_from_url(&mut self, url: &str) -> Result<Vec<Feed>, AppError> {
        let found = discover_feeds(&self.client, url, self.config.fetch_options()).await?;

        let feeds: Vec<Feed> = found
            .into_iter()
            .map(|feed| {
                let id = self.store.add(feed.clone());
                Feed { id, ..feed }
            })
            .collect();

        tracing::info!(url = %url, added = feeds.len(), "Registered discovered feeds");
        Ok(feeds)
    }

    /// Registers `endpoint` directly, skipping discovery.
    pub fn add_feed(&mut self, endpoint: &str, kind: FeedType) -> Feed {
        let feed = Feed::new(endpoint.trim(), kind);
        self.store.add(feed.clone());
        feed
    }

    /// Unregisters a feed. Unknown ids are not an error.
    pub fn delete_feed(&mut self, id: u64) -> Option<Feed> {
        let removed = self.store.delete(id);
        if let Some(feed) = &removed {
            tracing::info!(id = id, endpoint = %feed.endpoint, "Removed feed");
        }
        removed
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.store.all()
    }

    /// Runs one aggregation cycle over every registered feed.
    ///
    /// On partial failure the reading list still holds the articles of the
    /// feeds that succeeded.
    pub async fn refresh(&mut self) -> Result<(), AggregationError> {
        let feeds = self.store.all();
        self.aggregator.run_cycle(&feeds).await
    }

    pub fn article_count(&self) -> usize {
        self.aggregator.article_count()
    }

    /// Returns page `page` (1-based) of the reading list.
    ///
    /// Page 0 and pages past the end are empty.
    pub fn news_page(&self, page: usize) -> NewsPage {
        let all = self.aggregator.page();
        let size = self.config.page_size.max(1);

        let Some(start) = page.checked_sub(1).map(|p| p.saturating_mul(size)) else {
            return NewsPage {
                items: Vec::new(),
                next_page: None,
            };
        };
        if start >= all.len() {
            return NewsPage {
                items: Vec::new(),
                next_page: None,
            };
        }

        let end = start.saturating_add(size).min(all.len());
        NewsPage {
            items: all[start..end].to_vec(),
            next_page: (end < all.len()).then_some(page + 1),
        }
    }

    /// Marks the service as serving. Returns immediately; the caller owns
    /// whatever listener it runs.
    pub fn start(&mut self) {
        if self.lifecycle == Lifecycle::Idle {
            tracing::info!(listen = %self.config.listen_address, "MorningPost serving");
            self.lifecycle = Lifecycle::Serving;
        }
    }

    pub fn is_serving(&self) -> bool {
        self.lifecycle == Lifecycle::Serving
    }

    /// Persists the feed store and stops serving.
    ///
    /// Only the first call writes; later calls return `Ok(())`. If the save
    /// fails the service stays running so the call can be retried.
    pub fn shutdown(&mut self) -> Result<(), AppError> {
        if self.lifecycle == Lifecycle::Stopped {
            return Ok(());
        }
        self.store.save()?;
        self.lifecycle = Lifecycle::Stopped;
        tracing::info!(feeds = self.store.len(), "MorningPost stopped");
        Ok(())
    }
}
