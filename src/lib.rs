//! MorningPost: discovers RSS, RDF and Atom feeds from arbitrary URLs and
//! aggregates them into one randomly ordered reading list.

pub mod app;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;

pub use app::{AppError, MorningPost, NewsPage};
pub use config::{Config, ConfigError};
