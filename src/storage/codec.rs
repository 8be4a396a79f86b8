//! Binary snapshot of the feed registry.
//!
//! The `id → Feed` map is serialized with bincode behind a short header
//! (`"MPFS"` magic and a version byte). Integers are fixed-width
//! little-endian and trailing bytes are rejected.

use std::collections::BTreeMap;

use bincode::Options;
use serde::{Deserialize, Serialize};

use super::types::Feed;

const MAGIC: [u8; 4] = *b"MPFS";
const VERSION: u8 = 2;
/// Refuse to allocate more than this while decoding a snapshot.
const MAX_SNAPSHOT_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    magic: [u8; 4],
    version: u8,
    feeds: &'a BTreeMap<u64, Feed>,
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(rename = "magic")]
    _magic: [u8; 4],
    version: u8,
    feeds: BTreeMap<u64, Feed>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_SNAPSHOT_SIZE)
        .reject_trailing_bytes()
}

/// Serializes the registry into a self-contained byte buffer.
pub(crate) fn encode(feeds: &BTreeMap<u64, Feed>) -> Result<Vec<u8>, bincode::Error> {
    options().serialize(&SnapshotRef {
        magic: MAGIC,
        version: VERSION,
        feeds,
    })
}

/// Parses a buffer produced by [`encode`].
///
/// Errors are human-readable descriptions of why the buffer was rejected.
pub(crate) fn decode(data: &[u8]) -> Result<BTreeMap<u64, Feed>, String> {
    if data.get(..MAGIC.len()) != Some(&MAGIC[..]) {
        return Err("not a feed store snapshot (bad magic)".to_owned());
    }

    let snapshot: Snapshot = options()
        .deserialize(data)
        .map_err(|e| format!("malformed snapshot: {e}"))?;
    if snapshot.version != VERSION {
        return Err(format!("unsupported snapshot version {}", snapshot.version));
    }

    if let Some((key, feed)) = snapshot.feeds.iter().find(|(key, feed)| **key != feed.id) {
        return Err(format!("entry {key} holds feed with id {}", feed.id));
    }

    Ok(snapshot.feeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FeedType;

    fn sample() -> BTreeMap<u64, Feed> {
        [
            Feed::new("https://example.com/rss", FeedType::Rss),
            Feed::new("https://slashdot.org/index.rdf", FeedType::Rdf),
            Feed::new("https://example.com/atom", FeedType::Atom),
        ]
        .into_iter()
        .map(|f| (f.id, f))
        .collect()
    }

    fn single(feed: Feed) -> BTreeMap<u64, Feed> {
        [(feed.id, feed)].into_iter().collect()
    }

    #[test]
    fn test_decode_reproduces_encoded_map() {
        let feeds = sample();
        assert_eq!(decode(&encode(&feeds).unwrap()).unwrap(), feeds);
    }

    #[test]
    fn test_empty_map_encodes_header_and_count() {
        let bytes = encode(&BTreeMap::new()).unwrap();
        assert_eq!(bytes, b"MPFS\x02\x00\x00\x00\x00\x00\x00\x00\x00");
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = decode(b"JSON\x02\x00\x00\x00\x00\x00\x00\x00\x00").unwrap_err();
        assert!(err.contains("bad magic"));
        assert!(decode(b"MP").unwrap_err().contains("bad magic"));
    }

    #[test]
    fn test_old_version_rejected() {
        let err = decode(b"MPFS\x01\x00\x00\x00\x00\x00\x00\x00\x00").unwrap_err();
        assert!(err.contains("unsupported snapshot version 1"));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(decode(&bytes).unwrap_err().contains("malformed"));
    }

    #[test]
    fn test_unknown_feed_type_rejected() {
        let mut bytes = encode(&single(Feed::new("https://example.com/rss", FeedType::Rss))).unwrap();
        // The feed type is the last field: a u32 variant index.
        let tag = bytes.len() - 4;
        bytes[tag] = 9;
        assert!(decode(&bytes).unwrap_err().contains("malformed"));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let feed = Feed::new("https://example.com/rss", FeedType::Rss);
        let feeds: BTreeMap<u64, Feed> = [(7, feed)].into_iter().collect();
        let err = decode(&encode(&feeds).unwrap()).unwrap_err();
        assert!(err.contains("entry 7"));
    }
}
