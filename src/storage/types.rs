//! Feed records and their content-derived ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Feed Identity
// ============================================================================

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derives a feed's identifier from its endpoint (64-bit FNV-1a).
///
/// The same endpoint always yields the same id, which is what makes
/// re-registering a feed overwrite the existing entry.
pub fn feed_id(endpoint: &str) -> u64 {
    endpoint.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

// ============================================================================
// Feed Type
// ============================================================================

/// Syndication format of a feed.
///
/// The discriminants index the parser table in `feed::parser`, so variants
/// must stay dense and start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FeedType {
    #[serde(rename = "RSS")]
    Rss = 0,
    #[serde(rename = "RDF")]
    Rdf = 1,
    #[serde(rename = "Atom")]
    Atom = 2,
}

impl FeedType {
    /// Every variant, in discriminant order.
    pub const ALL: [FeedType; 3] = [FeedType::Rss, FeedType::Rdf, FeedType::Atom];

    pub fn as_str(self) -> &'static str {
        match self {
            FeedType::Rss => "RSS",
            FeedType::Rdf => "RDF",
            FeedType::Atom => "Atom",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown feed type {0:?} (expected rss, rdf or atom)")]
pub struct UnknownFeedType(pub String);

impl FromStr for FeedType {
    type Err = UnknownFeedType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFeedType(s.to_owned()))
    }
}

// ============================================================================
// Feed
// ============================================================================

/// A registered syndication source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: u64,
    pub endpoint: String,
    #[serde(rename = "type")]
    pub kind: FeedType,
}

impl Feed {
    /// Builds a feed whose id is derived from `endpoint`.
    pub fn new(endpoint: impl Into<String>, kind: FeedType) -> Self {
        let endpoint = endpoint.into();
        Self {
            id: feed_id(&endpoint),
            endpoint,
            kind,
        }
    }
}
