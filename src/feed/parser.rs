//! Decoders for the three supported syndication formats.
//!
//! Each parser is a pure function from raw document bytes to articles.
//! Documents are first transcoded to UTF-8 according to their BOM or XML
//! declaration, then walked as an event stream with the element path from
//! the root tracked, so RSS, RDF and Atom differ only in which paths they
//! read.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::Event;
use quick_xml::name::{LocalName, ResolveResult};
use quick_xml::{NsReader, Reader};
use thiserror::Error;

use super::article::Article;
use crate::storage::FeedType;
use crate::util::strip_control_chars;

/// A feed document that could not be decoded at all.
///
/// Entries that decode but fail article validation are not errors; they are
/// dropped from the result.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot decode data: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("cannot decode data: no root element")]
    MissingRoot,

    #[error("cannot decode data: expected root element <{expected}>, found <{found}>")]
    UnexpectedRoot {
        expected: &'static str,
        found: String,
    },

    #[error("cannot decode data: document ended before </{0}>")]
    Truncated(&'static str),
}

/// Signature shared by every format parser.
pub type ParseFn = fn(&[u8]) -> Result<Vec<Article>, ParseError>;

/// Parser per [`FeedType`], indexed by discriminant.
const PARSERS: [ParseFn; FeedType::ALL.len()] = [parse_rss, parse_rdf, parse_atom];

/// Looks up the parser for a feed format.
pub fn parser_for(kind: FeedType) -> ParseFn {
    PARSERS[kind as usize]
}

/// Parses `bytes` with the parser registered for `kind`.
pub fn parse(kind: FeedType, bytes: &[u8]) -> Result<Vec<Article>, ParseError> {
    parser_for(kind)(bytes)
}

// ============================================================================
// Character Encoding
// ============================================================================

/// Transcodes a feed document to UTF-8.
///
/// A byte-order mark wins; otherwise the `encoding` label of the XML
/// declaration is honoured. UTF-16 labels map to UTF-8 because a declaration
/// readable as ASCII cannot actually be UTF-16. Unknown labels and
/// undecodable bytes degrade to UTF-8 with replacement characters.
pub(crate) fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| declared_encoding(bytes))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let mut reader = Reader::from_reader(bytes);
    match reader.read_event() {
        Ok(Event::Decl(decl)) => {
            let label = decl.encoding()?.ok()?;
            Encoding::for_label(&label).map(Encoding::output_encoding)
        }
        _ => None,
    }
}

// ============================================================================
// Document Walker
// ============================================================================

enum Node<'a> {
    /// An element opened; carries its attributes as (qualified name, value).
    Open(&'a [(String, String)]),
    Text(&'a str),
    Close,
}

/// True when `path` is exactly `expected`.
fn at(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

/// Path segment for a descendant element.
///
/// Elements with no namespace or one of `namespaces` appear under their local
/// name. Anything else keeps its namespace in Clark notation (`{uri}local`),
/// so extensions like `atom:link` inside RSS or `dc:title` never match a
/// plain path.
fn segment(ns: ResolveResult<'_>, local: LocalName<'_>, namespaces: &[&[u8]]) -> String {
    let local = String::from_utf8_lossy(local.as_ref());
    match ns {
        ResolveResult::Unbound => local.into_owned(),
        ResolveResult::Bound(ns) if namespaces.iter().any(|known| *known == ns.0) => {
            local.into_owned()
        }
        ResolveResult::Bound(ns) => format!("{{{}}}{local}", String::from_utf8_lossy(ns.0)),
        ResolveResult::Unknown(prefix) => format!("{}:{local}", String::from_utf8_lossy(&prefix)),
    }
}

/// Streams the document rooted at `root`, calling `visit` with the element
/// path for every open, text run and close inside it.
///
/// The root is matched by local name (so `rdf:RDF` is `RDF`). Descendants are
/// named by [`segment`], so a prefixed `<atom:entry>` bound to the Atom
/// namespace is the same path as a bare `<entry>`. Anything after the root
/// closes is ignored.
fn walk<F>(
    text: &str,
    root: &'static str,
    namespaces: &[&[u8]],
    mut visit: F,
) -> Result<(), ParseError>
where
    F: FnMut(&[String], Node<'_>),
{
    let mut reader = NsReader::from_str(text);
    let mut path: Vec<String> = Vec::new();
    let mut attrs: Vec<(String, String)> = Vec::new();

    loop {
        let (start, self_closing) = match reader.read_event()? {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::End(_) => {
                visit(&path, Node::Close);
                path.pop();
                if path.is_empty() {
                    return Ok(());
                }
                continue;
            }
            Event::Text(e) if !path.is_empty() => {
                let text = e
                    .unescape()
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned().into());
                visit(&path, Node::Text(&text));
                continue;
            }
            Event::CData(e) if !path.is_empty() => {
                visit(&path, Node::Text(&String::from_utf8_lossy(&e)));
                continue;
            }
            Event::Eof if path.is_empty() => return Err(ParseError::MissingRoot),
            Event::Eof => return Err(ParseError::Truncated(root)),
            _ => continue,
        };

        if path.is_empty() {
            let local = start.local_name();
            if local.as_ref() != root.as_bytes() {
                return Err(ParseError::UnexpectedRoot {
                    expected: root,
                    found: String::from_utf8_lossy(local.as_ref()).into_owned(),
                });
            }
            path.push(root.to_owned());
        } else {
            let (ns, local) = reader.resolve_element(start.name());
            path.push(segment(ns, local, namespaces));
        }

        attrs.clear();
        for attr in start.attributes().flatten() {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            attrs.push((String::from_utf8_lossy(attr.key.as_ref()).into_owned(), value));
        }
        visit(&path, Node::Open(&attrs));

        if self_closing {
            visit(&path, Node::Close);
            path.pop();
            if path.is_empty() {
                return Ok(());
            }
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Raw title/link pair collected for one item before validation.
#[derive(Debug, Default)]
struct Entry {
    title: String,
    link: String,
    /// Set once an Atom `rel="alternate"` (or rel-less) link has been taken.
    has_alternate: bool,
}

fn clean(value: &str) -> Cow<'_, str> {
    strip_control_chars(value.trim())
}

/// Validates collected entries into articles, dropping invalid ones.
fn into_articles(kind: FeedType, feed_title: &str, entries: Vec<Entry>) -> Vec<Article> {
    let feed_title = clean(feed_title);
    let total = entries.len();

    let articles: Vec<Article> = entries
        .into_iter()
        .filter_map(|entry| {
            Article::new(&*feed_title, clean(&entry.title), clean(&entry.link)).ok()
        })
        .collect();

    let skipped = total - articles.len();
    if skipped > 0 {
        tracing::debug!(format = %kind, skipped = skipped, kept = articles.len(), "Skipped invalid feed entries");
    }
    articles
}

// ============================================================================
// RSS 2.0
// ============================================================================

// RSS 2.0 has no namespace of its own.
const RSS_NAMESPACES: &[&[u8]] = &[];
const RSS_CHANNEL_TITLE: &[&str] = &["rss", "channel", "title"];
const RSS_ITEM: &[&str] = &["rss", "channel", "item"];
const RSS_ITEM_TITLE: &[&str] = &["rss", "channel", "item", "title"];
const RSS_ITEM_LINK: &[&str] = &["rss", "channel", "item", "link"];

/// Parses an RSS document (`<rss><channel><item>...`).
///
/// The feed title is `channel/title`; every `channel/item` contributes its
/// `title` and `link`.
pub fn parse_rss(bytes: &[u8]) -> Result<Vec<Article>, ParseError> {
    let text = decode_document(bytes);
    let mut feed_title = String::new();
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;

    walk(&text, "rss", RSS_NAMESPACES, |path, node| match node {
        Node::Open(_) if at(path, RSS_ITEM) => current = Some(Entry::default()),
        Node::Close if at(path, RSS_ITEM) => entries.extend(current.take()),
        Node::Text(t) if at(path, RSS_CHANNEL_TITLE) => feed_title.push_str(t),
        Node::Text(t) => {
            if let Some(entry) = current.as_mut() {
                if at(path, RSS_ITEM_TITLE) {
                    entry.title.push_str(t);
                } else if at(path, RSS_ITEM_LINK) {
                    entry.link.push_str(t);
                }
            }
        }
        _ => {}
    })?;

    Ok(into_articles(FeedType::Rss, &feed_title, entries))
}

// ============================================================================
// RDF / RSS 1.0
// ============================================================================

const RDF_NAMESPACES: &[&[u8]] = &[
    b"http://purl.org/rss/1.0/",
    b"http://my.netscape.com/rdf/simple/0.9/",
];
const RDF_CHANNEL_TITLE: &[&str] = &["RDF", "channel", "title"];
// RSS 1.0 places items beside the channel, not inside it.
const RDF_ITEM: &[&str] = &["RDF", "item"];
const RDF_ITEM_TITLE: &[&str] = &["RDF", "item", "title"];
const RDF_ITEM_LINK: &[&str] = &["RDF", "item", "link"];

/// Parses an RDF / RSS 1.0 document (`<rdf:RDF><channel/><item/>...`).
///
/// The feed title is `channel/title`; items are siblings of the channel.
pub fn parse_rdf(bytes: &[u8]) -> Result<Vec<Article>, ParseError> {
    let text = decode_document(bytes);
    let mut feed_title = String::new();
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;

    walk(&text, "RDF", RDF_NAMESPACES, |path, node| match node {
        Node::Open(_) if at(path, RDF_ITEM) => current = Some(Entry::default()),
        Node::Close if at(path, RDF_ITEM) => entries.extend(current.take()),
        Node::Text(t) if at(path, RDF_CHANNEL_TITLE) => feed_title.push_str(t),
        Node::Text(t) => {
            if let Some(entry) = current.as_mut() {
                if at(path, RDF_ITEM_TITLE) {
                    entry.title.push_str(t);
                } else if at(path, RDF_ITEM_LINK) {
                    entry.link.push_str(t);
                }
            }
        }
        _ => {}
    })?;

    Ok(into_articles(FeedType::Rdf, &feed_title, entries))
}

// ============================================================================
// Atom
// ============================================================================

const ATOM_NAMESPACES: &[&[u8]] = &[b"http://www.w3.org/2005/Atom", b"http://purl.org/atom/ns#"];
const ATOM_TITLE: &[&str] = &["feed", "title"];
const ATOM_ENTRY: &[&str] = &["feed", "entry"];
const ATOM_ENTRY_TITLE: &[&str] = &["feed", "entry", "title"];
const ATOM_ENTRY_LINK: &[&str] = &["feed", "entry", "link"];

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Parses an Atom document (`<feed><entry>...`).
///
/// The feed title is the top-level `title`. Each `entry` contributes the text
/// of its `title` and the `href` of its alternate `link` (the first link with
/// no `rel` or `rel="alternate"`, else the first link).
pub fn parse_atom(bytes: &[u8]) -> Result<Vec<Article>, ParseError> {
    let text = decode_document(bytes);
    let mut feed_title = String::new();
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;

    walk(&text, "feed", ATOM_NAMESPACES, |path, node| match node {
        Node::Open(_) if at(path, ATOM_ENTRY) => current = Some(Entry::default()),
        Node::Close if at(path, ATOM_ENTRY) => entries.extend(current.take()),
        Node::Open(attrs) if at(path, ATOM_ENTRY_LINK) => {
            let (Some(entry), Some(href)) = (current.as_mut(), attr(attrs, "href")) else {
                return;
            };
            let alternate = attr(attrs, "rel").map_or(true, |rel| rel.trim() == "alternate");
            if alternate && !entry.has_alternate {
                entry.link = href.to_owned();
                entry.has_alternate = true;
            } else if entry.link.is_empty() {
                entry.link = href.to_owned();
            }
        }
        Node::Text(t) if at(path, ATOM_TITLE) => feed_title.push_str(t),
        Node::Text(t) if at(path, ATOM_ENTRY_TITLE) => {
            if let Some(entry) = current.as_mut() {
                entry.title.push_str(t);
            }
        }
        _ => {}
    })?;

    Ok(into_articles(FeedType::Atom, &feed_title, entries))
}
