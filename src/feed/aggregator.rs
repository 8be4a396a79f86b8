//! Concurrent aggregation of every registered feed into one shuffled page.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::task::JoinSet;

use super::article::Article;
use super::fetcher::{fetch_articles, FetchError, FetchOptions};
use crate::storage::Feed;

/// One feed that contributed nothing to a cycle, and why.
#[derive(Debug, Error)]
#[error("{endpoint}: {source}")]
pub struct FeedFailure {
    pub endpoint: String,
    #[source]
    pub source: FetchError,
}

/// At least one feed failed during a cycle.
///
/// Articles from the feeds that succeeded are still in the page list.
#[derive(Debug, Error)]
#[error("failed to fetch {} feed(s): {}", .failures.len(), summarize(.failures))]
pub struct AggregationError {
    pub failures: Vec<FeedFailure>,
}

fn summarize(failures: &[FeedFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Lock-guarded article list shared by every worker in a cycle.
#[derive(Debug, Default)]
pub struct ArticlePool {
    articles: Mutex<Vec<Article>>,
}

impl ArticlePool {
    pub fn new() -> Self {
        Self::default()
    }

    // A worker that panicked mid-append cannot leave the Vec itself
    // inconsistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Article>> {
        self.articles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Appends one feed's articles in a single critical section.
    pub fn append(&self, articles: Vec<Article>) {
        self.lock().extend(articles);
    }

    pub fn snapshot(&self) -> Vec<Article> {
        self.lock().clone()
    }

    /// Permutes the pool uniformly at random and returns a copy of it.
    pub fn shuffle<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Article> {
        let mut articles = self.lock();
        articles.shuffle(rng);
        articles.clone()
    }
}

/// Runs aggregation cycles over a set of feeds.
///
/// Each cycle clears the pool, fetches every feed on its own task, and
/// finishes by shuffling the pool into the page list. Cycles take
/// `&mut self`, so one instance never runs two at once.
#[derive(Debug)]
pub struct Aggregator {
    client: reqwest::Client,
    options: FetchOptions,
    pool: Arc<ArticlePool>,
    page: Vec<Article>,
    rng: StdRng,
}

impl Aggregator {
    pub fn new(client: reqwest::Client, options: FetchOptions, rng: StdRng) -> Self {
        Self {
            client,
            options,
            pool: Arc::new(ArticlePool::new()),
            page: Vec::new(),
            rng,
        }
    }

    /// Aggregator whose page order is reproducible for a given `seed`.
    pub fn with_seed(client: reqwest::Client, options: FetchOptions, seed: u64) -> Self {
        Self::new(client, options, StdRng::seed_from_u64(seed))
    }

    /// Fetches every feed concurrently and rebuilds the page list.
    ///
    /// The page list is rebuilt even when some feeds fail; it then holds the
    /// articles of the feeds that succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] listing every feed that failed, including
    /// workers that panicked.
    pub async fn run_cycle(&mut self, feeds: &[Feed]) -> Result<(), AggregationError> {
        self.pool.clear();

        let mut tasks = JoinSet::new();
        let mut endpoints = HashMap::with_capacity(feeds.len());

        for feed in feeds {
            let client = self.client.clone();
            let pool = Arc::clone(&self.pool);
            let options = self.options;
            let feed = feed.clone();
            let endpoint = feed.endpoint.clone();

            let handle = tasks.spawn(async move {
                let articles = fetch_articles(&client, &feed, options).await?;
                let count = articles.len();
                pool.append(articles);
                Ok::<usize, FetchError>(count)
            });
            endpoints.insert(handle.id(), endpoint);
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, source) = match joined {
                Ok((_, Ok(_))) => continue,
                Ok((id, Err(e))) => (id, e),
                Err(join_err) => (join_err.id(), FetchError::Worker(join_err.to_string())),
            };
            let endpoint = endpoints.remove(&id).unwrap_or_default();
            tracing::warn!(feed = %endpoint, error = %source, "Failed to fetch feed");
            failures.push(FeedFailure { endpoint, source });
        }

        self.page = self.pool.shuffle(&mut self.rng);
        tracing::info!(
            feeds = feeds.len(),
            failed = failures.len(),
            articles = self.page.len(),
            "Aggregation cycle complete"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregationError { failures })
        }
    }

    /// The randomly ordered articles from the last cycle.
    pub fn page(&self) -> &[Article] {
        &self.page
    }

    pub fn article_count(&self) -> usize {
        self.page.len()
    }
}
