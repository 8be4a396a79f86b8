use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use morningpost::feed::Article;
use morningpost::storage::{Feed, FeedType};
use morningpost::{Config, MorningPost};

#[derive(Parser, Debug)]
#[command(name = "morningpost", version, about = "Random reading list from your RSS, RDF and Atom feeds")]
struct Args {
    /// Config file (default: <config dir>/MorningPost/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed store file, overriding the config file
    #[arg(long, global = true, value_name = "FILE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the feeds behind a page or feed URL and register them
    Add { url: String },

    /// Register a feed endpoint directly, skipping discovery
    AddFeed {
        endpoint: String,
        /// rss, rdf or atom
        #[arg(long = "type", value_name = "TYPE")]
        kind: FeedType,
    },

    /// Unregister a feed by id
    Remove { id: u64 },

    /// List registered feeds
    Feeds {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch every feed and print one page of the shuffled reading list
    News {
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

fn print_feeds(feeds: &[Feed]) {
    for feed in feeds {
        println!("{:>20}  {:<4}  {}", feed.id, feed.kind, feed.endpoint);
    }
}

fn print_articles(articles: &[Article]) {
    for article in articles {
        println!("{article}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(store) = args.store {
        config.store_path = Some(store);
    }
    let store_path = config.resolved_store_path();

    let mut app = MorningPost::new(config)
        .with_context(|| format!("Failed to open feed store at {}", store_path.display()))?;
    app.start();

    match args.command {
        Command::Add { url } => {
            let added = app
                .add_from_url(&url)
                .await
                .with_context(|| format!("Failed to discover feeds at {url}"))?;
            if added.is_empty() {
                eprintln!("No feeds found at {url}");
            }
            print_feeds(&added);
        }
        Command::AddFeed { endpoint, kind } => {
            let feed = app.add_feed(&endpoint, kind);
            print_feeds(std::slice::from_ref(&feed));
        }
        Command::Remove { id } => {
            if app.delete_feed(id).is_none() {
                eprintln!("No feed with id {id}");
            }
        }
        Command::Feeds { json } => {
            let feeds = app.feeds();
            if json {
                println!("{}", serde_json::to_string_pretty(&feeds)?);
            } else {
                print_feeds(&feeds);
            }
        }
        Command::News { page } => {
            if let Err(e) = app.refresh().await {
                tracing::warn!(failed = e.failures.len(), "Some feeds could not be fetched");
                eprintln!("Warning: {e}");
            }
            let news = app.news_page(page);
            print_articles(&news.items);
            match news.next_page {
                Some(next) => eprintln!("({} articles, next: --page {next})", app.article_count()),
                None => eprintln!("({} articles)", app.article_count()),
            }
        }
    }

    app.shutdown().context("Failed to save feed store")?;
    Ok(())
}
