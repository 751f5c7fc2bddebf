use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use feedsync::account::ServiceAccount;
use feedsync::config::Config;
use feedsync::feed::StandardAccount;
use feedsync::storage::{Database, DatabaseError};
use feedsync::sync::{FeedDownloader, FeedJob, FilterRegistry, SyncEvent, UpdateLock};

/// Account that owns every feed added from the command line.
const LOCAL_ACCOUNT_ID: i64 = 1;

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Feed synchronization and message store")]
struct Args {
    /// Configuration file (default: ~/.config/feedsync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Message store, overrides `database_path` from the config file
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe a feed in the local account
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Update every feed of the local account
    Sync,
    /// Show per-feed unread and total counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            }
            config_dir.join("feedsync.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another feedsync process is using {}. Please try again later.", db_path.display());
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Add { url, title } => add_feed(&db, &url, title).await,
        Command::Sync => sync_feeds(&db, &config).await,
        Command::Stats => print_stats(&db).await,
    }
}

async fn add_feed(db: &Database, url: &str, title: Option<String>) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("Invalid feed URL: {}", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("Only http and https feeds are supported");
    }

    let title = title.unwrap_or_else(|| parsed.host_str().unwrap_or(url).to_string());
    let id = db
        .insert_feed(LOCAL_ACCOUNT_ID, parsed.as_str(), &title, None)
        .await
        .context("Failed to add feed")?;

    println!("Added feed {} ({})", title, id);
    Ok(())
}

async fn sync_feeds(db: &Database, config: &Config) -> Result<()> {
    let labels = db
        .labels_for_account(LOCAL_ACCOUNT_ID)
        .await
        .context("Failed to load labels")?;
    let account: Arc<dyn ServiceAccount> = Arc::new(
        StandardAccount::new(LOCAL_ACCOUNT_ID, config.feed_fetch_timeout())
            .context("Failed to build HTTP client")?
            .with_labels(labels),
    );

    let mut feeds = db
        .feeds_for_account(LOCAL_ACCOUNT_ID)
        .await
        .context("Failed to load feeds")?;
    let filters = FilterRegistry::load(db).await.context("Failed to load message filters")?;
    let assignments = db
        .message_filters_in_feeds(LOCAL_ACCOUNT_ID)
        .await
        .context("Failed to load filter assignments")?;
    filters.attach(&mut feeds, &assignments);

    let jobs: Vec<FeedJob> = feeds
        .into_iter()
        .map(|feed| FeedJob::new(account.clone(), feed))
        .collect();

    let (event_tx, mut event_rx) = mpsc::channel::<SyncEvent>(32);
    let downloader = FeedDownloader::new(
        db.clone(),
        config.downloader_settings(),
        UpdateLock::new(),
        event_tx,
    );

    let run = tokio::spawn(async move { downloader.update_feeds(jobs).await });
    let overview_count = config.results_overview_count;

    while let Some(event) = event_rx.recv().await {
        match event {
            SyncEvent::Started => println!("Updating feeds..."),
            SyncEvent::Progress {
                feed,
                processed,
                total,
            } => {
                match &feed.status_message {
                    Some(message) => println!("[{}/{}] {}: {} ({})", processed, total, feed.title, feed.status, message),
                    None => println!("[{}/{}] {}: {}", processed, total, feed.title, feed.status),
                }
            }
            SyncEvent::Finished(results) => {
                if results.is_empty() {
                    println!("No new messages.");
                } else {
                    println!("{}", results.overview(overview_count));
                }
                break;
            }
        }
    }

    run.await.context("Feed update task failed")?;
    Ok(())
}

async fn print_stats(db: &Database) -> Result<()> {
    let feeds = db
        .feeds_for_account(LOCAL_ACCOUNT_ID)
        .await
        .context("Failed to load feeds")?;
    let counts = db
        .message_counts_per_feed(LOCAL_ACCOUNT_ID)
        .await
        .context("Failed to count messages")?;

    if feeds.is_empty() {
        println!("No feeds. Add one with: feedsync add <URL>");
        return Ok(());
    }

    for feed in &feeds {
        let feed_counts = counts.get(&feed.custom_id).copied().unwrap_or_default();
        println!(
            "{:>5} / {:<5} {} [{}]",
            feed_counts.unread, feed_counts.total, feed.title, feed.status
        );
    }
    Ok(())
}
