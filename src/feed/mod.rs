//! Feed retrieval and normalisation.
//!
//! - [`article`] - the normalised `Article` record
//! - [`parser`] - RSS, RDF and Atom decoders, selected per [`FeedType`](crate::storage::FeedType)
//! - [`detect`] - format sniffing from the root element or `Content-Type`
//! - [`fetcher`] - HTTP GET with fixed headers, timeout and size limit
//! - [`discovery`] - turning an arbitrary URL into feed registrations
//! - [`aggregator`] - concurrent fetch of every feed into one shuffled page list

pub mod aggregator;
pub mod article;
pub mod detect;
pub mod discovery;
pub mod fetcher;
pub mod parser;

pub use aggregator::{AggregationError, Aggregator, ArticlePool, FeedFailure};
pub use article::{Article, ValidationError, TITLE_COLUMN_WIDTH};
pub use detect::{detect_type, ContentKind, DetectError};
pub use discovery::{discover_feeds, find_feed_links, normalize_url, DiscoveryError};
pub use fetcher::{build_client, fetch_articles, fetch_body, FetchError, FetchOptions, FetchedBody};
pub use parser::{parse, parse_atom, parse_rdf, parse_rss, parser_for, ParseError, ParseFn};
