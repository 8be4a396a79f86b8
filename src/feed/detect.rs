//! Feed-format sniffing from a document's root element or an HTTP
//! `Content-Type`.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use super::parser::decode_document;
use crate::storage::FeedType;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),

    #[error("no root element found")]
    NoRoot,

    #[error("cannot decode root element: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Identifies the feed format from the document's root element.
///
/// Only the prolog and the root start tag are read, so the rest of the
/// document may be truncated or malformed. The local name is compared
/// case-insensitively: `rss` is RSS, `feed` is Atom, `RDF` is RDF.
pub fn detect_type(bytes: &[u8]) -> Result<FeedType, DetectError> {
    let text = decode_document(bytes);
    let mut reader = Reader::from_str(&text);

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let local = e.local_name();
                let name = String::from_utf8_lossy(local.as_ref());
                return match name.to_ascii_uppercase().as_str() {
                    "RSS" => Ok(FeedType::Rss),
                    "FEED" => Ok(FeedType::Atom),
                    "RDF" => Ok(FeedType::Rdf),
                    _ => Err(DetectError::UnexpectedRoot(name.into_owned())),
                };
            }
            Event::Eof => return Err(DetectError::NoRoot),
            _ => {}
        }
    }
}

/// How a response body should be handled, judged by its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A syndication document; run [`detect_type`] on the body.
    Feed,
    /// A web page; scan it for feed links.
    Html,
}

impl ContentKind {
    /// Classifies a `Content-Type` header value.
    ///
    /// Parameters after `;` are ignored and the media type is compared
    /// case-insensitively. Returns `None` for anything unsupported.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let media_type = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match media_type.as_str() {
            "application/rss+xml" | "application/atom+xml" | "text/xml" | "application/xml" => {
                Some(Self::Feed)
            }
            "text/html" => Some(Self::Html),
            _ => None,
        }
    }
}
