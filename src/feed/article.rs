use std::fmt;

use thiserror::Error;

use crate::util::fit_column;

/// Width of the title column in [`Article::render`].
pub const TITLE_COLUMN_WIDTH: usize = 80;

/// An article field that was empty at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("article {field} must not be empty")]
pub struct ValidationError {
    pub field: &'static str,
}

/// One news item extracted from a feed.
///
/// All three fields are guaranteed non-empty and never change after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Article {
    feed_title: String,
    title: String,
    url: String,
}

impl Article {
    /// Builds an article, rejecting any empty field.
    ///
    /// Values are taken as-is: callers that want whitespace trimmed must do
    /// it before calling.
    pub fn new(
        feed_title: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let (feed_title, title, url) = (feed_title.into(), title.into(), url.into());

        for (field, value) in [("feed title", &feed_title), ("title", &title), ("url", &url)] {
            if value.is_empty() {
                return Err(ValidationError { field });
            }
        }

        Ok(Self {
            feed_title,
            title,
            url,
        })
    }

    pub fn feed_title(&self) -> &str {
        &self.feed_title
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Plain-text listing line: the title right-aligned in an 80-column
    /// field (truncated with `...` when longer), a space, then the URL.
    pub fn render(&self) -> String {
        format!("{} {}", fit_column(&self.title, TITLE_COLUMN_WIDTH), self.url)
    }
}

impl fmt::Display for Article {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
