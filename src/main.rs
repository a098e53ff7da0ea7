use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use feedpipe::config::Config;
use feedpipe::feed::{read_opml, FeedDownloader, HttpFetcher, Scheduler};
use feedpipe::shutdown::{self, Shutdown};
use feedpipe::storage::{Database, NewFeed};

/// Get the config directory path (~/.config/feedpipe/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpipe"))
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedpipe", about = "Fetch, normalize and store RSS/Atom feeds")]
struct Args {
    /// Config file (default: ~/.config/feedpipe/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh feeds on a timer until Ctrl-C
    Run,

    /// Run a single refresh cycle and print a summary
    Refresh,

    /// Download one feed and print the normalized result as JSON
    Preview { url: String },

    /// Subscribe to a feed; title and kind are detected when omitted
    Subscribe {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        kind: Option<String>,
    },

    /// Import subscriptions from an OPML file
    Import {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// List subscribed feeds
    Feeds,

    /// Print stored articles of a feed as JSON
    Articles {
        feed_id: i64,
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show the refresh history of a feed
    Log {
        feed_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Exclude a feed from refresh cycles
    Disable { feed_id: i64 },

    /// Include a feed in refresh cycles again
    Enable { feed_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| config_dir.join("feeds.db"));

    let db = open_database(&db_path).await?;
    run_command(args.command, &config, db).await
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    Database::open(path_str)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

fn downloader(config: &Config, shutdown: Shutdown) -> Result<FeedDownloader> {
    let fetcher = HttpFetcher::new(config, shutdown).context("Failed to build HTTP client")?;
    Ok(FeedDownloader::new(fetcher, config))
}

async fn run_command(command: Command, config: &Config, db: Database) -> Result<()> {
    match command {
        Command::Run => {
            let (trigger, listener) = shutdown::channel();
            let downloader = downloader(config, listener)?;
            let scheduler = Scheduler::new(downloader, Arc::new(db), config, trigger);
            scheduler.start()?;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Ctrl-C received, shutting down");
            scheduler.stop().await?;
        }
        Command::Preview { url } => {
            let feed = downloader(config, Shutdown::never())?
                .download_feed(&url)
                .await
                .with_context(|| format!("Failed to download {url}"))?;
            println!("{}", serde_json::to_string_pretty(&feed)?);
        }
        Command::Refresh => {
            let downloader = downloader(config, Shutdown::never())?;
            let summary = downloader
                .refresh_feeds(Arc::new(db), config.min_refresh_delay())
                .await;
            println!(
                "Refreshed {} feeds: {} succeeded, {} failed, {} skipped, {} articles",
                summary.attempted(),
                summary.succeeded(),
                summary.failed(),
                summary.skipped,
                summary.articles()
            );
            for outcome in &summary.outcomes {
                if let Err(e) = &outcome.result {
                    println!("  feed {}: {}", outcome.feed_id, e);
                }
            }
        }
        Command::Subscribe { url, title, kind } => {
            let (title, kind, html_url) = match (title, kind) {
                (Some(title), Some(kind)) => (title, kind, None),
                (title, kind) => {
                    let feed = downloader(config, Shutdown::never())?
                        .download_feed(&url)
                        .await
                        .with_context(|| {
                            format!("Failed to download {url}; pass --title and --kind to subscribe anyway")
                        })?;
                    (
                        title.unwrap_or(feed.title),
                        kind.unwrap_or_else(|| feed.format.kind().to_string()),
                        Some(feed.link),
                    )
                }
            };
            let id = db
                .insert_feed(&NewFeed {
                    url,
                    title: title.clone(),
                    kind,
                    html_url,
                })
                .await
                .context("Failed to save feed")?;
            println!("Subscribed to {title} (id {id})");
        }
        Command::Import { path } => {
            let feeds = read_opml(&path)
                .await
                .with_context(|| format!("Failed to read OPML file {}", path.display()))?;
            if feeds.is_empty() {
                eprintln!("Warning: No valid feeds found in OPML file");
                eprintln!("The file may be empty or contain only invalid URLs");
                return Ok(());
            }
            let written = db
                .import_feeds(&feeds)
                .await
                .context("Failed to import feeds")?;
            println!("Imported {} feeds from {}", written, path.display());
        }
        Command::Feeds => {
            for feed in db.get_feeds().await.context("Failed to load feeds")? {
                let count = db.count_articles_for_feed(feed.id).await?;
                println!(
                    "{:>5}  {:<4} {:>6} articles  {}{}  <{}>",
                    feed.id,
                    feed.kind,
                    count,
                    feed.title,
                    if feed.disabled { " (disabled)" } else { "" },
                    feed.url
                );
            }
        }
        Command::Articles { feed_id, limit } => {
            let articles = db
                .get_articles_for_feed(feed_id, limit)
                .await
                .context("Failed to load articles")?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }
        Command::Log { feed_id, limit } => {
            let feed = db
                .get_feed(feed_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No feed with id {feed_id}"))?;
            println!("{} <{}>", feed.title, feed.url);
            for entry in db.get_feed_logs(feed_id, limit).await? {
                let status = if entry.success { "ok" } else { "FAILED" };
                match entry.message {
                    Some(message) => println!("  {}  {:<6} {}", entry.time.to_rfc3339(), status, message),
                    None => println!("  {}  {}", entry.time.to_rfc3339(), status),
                }
            }
        }
        Command::Disable { feed_id } => set_disabled(&db, feed_id, true).await?,
        Command::Enable { feed_id } => set_disabled(&db, feed_id, false).await?,
    }
    Ok(())
}

async fn set_disabled(db: &Database, feed_id: i64, disabled: bool) -> Result<()> {
    if !db.set_feed_disabled(feed_id, disabled).await? {
        anyhow::bail!("No feed with id {feed_id}");
    }
    println!(
        "Feed {feed_id} {}",
        if disabled { "disabled" } else { "enabled" }
    );
    Ok(())
}
