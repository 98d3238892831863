use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use herald_client::{FetcherConfig, MarkdownParser, ResilientFetcher};
use herald_core::models::{FetchRequest, ScrapeOutcome, SourceRecord, Tier};
use herald_core::traits::{Fetcher, SourceStore};
use herald_core::{EngineConfig, ResilientScraper, ScrapeRequest, SourceFilter};
use herald_db::{AnySourceStore, Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "herald", version, about = "Resilient local-news acquisition engine")]
struct Cli {
    /// JSON source list; when absent sources are read from DATABASE_URL
    #[arg(long, global = true, env = "HERALD_SOURCES_FILE")]
    sources_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire content for a region/topic from the best healthy source
    Scrape {
        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long)]
        topic: Option<String>,

        /// Preferred tier (primary, secondary, emergency)
        #[arg(long)]
        tier: Option<Tier>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Fetch one URL through the retry engine and print the body
    Fetch {
        #[arg(short, long)]
        url: String,
    },

    /// Check whether a URL is reachable without downloading it
    Probe {
        #[arg(short, long)]
        url: String,
    },

    /// Build source pools and print the health snapshot
    Health {
        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long)]
        topic: Option<String>,
    },

    /// Import a JSON source list into PostgreSQL (requires DATABASE_URL)
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },
}

type Scraper = ResilientScraper<ResilientFetcher, MarkdownParser, AnySourceStore>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Scrape {
            region,
            topic,
            tier,
            format,
        } => {
            let scraper = build_scraper(cli.sources_file.as_deref(), &config).await?;
            let mut request = ScrapeRequest::new(region, topic);
            if let Some(tier) = tier {
                request = request.with_preferred_tier(tier);
            }
            cmd_scrape(&scraper, &request, format).await?;
        }
        Commands::Fetch { url } => {
            let fetcher = build_fetcher(&config)?;
            cmd_fetch(&fetcher, &url).await?;
        }
        Commands::Probe { url } => {
            let fetcher = build_fetcher(&config)?;
            cmd_probe(&fetcher, &url).await?;
        }
        Commands::Health { region, topic } => {
            let scraper = build_scraper(cli.sources_file.as_deref(), &config).await?;
            cmd_health(&scraper, &SourceFilter::new(region, topic)).await?;
        }
        Commands::Import { file } => {
            cmd_import(&file).await?;
        }
    }

    Ok(())
}

fn build_fetcher(config: &EngineConfig) -> Result<ResilientFetcher> {
    ResilientFetcher::new(FetcherConfig::default().with_retry(config.retry.clone()))
        .context("Failed to create HTTP client")
}

async fn build_scraper(sources_file: Option<&Path>, config: &EngineConfig) -> Result<Scraper> {
    let store = AnySourceStore::open(sources_file)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to open source store")?;
    tracing::info!(backend = store.backend(), "Source store ready");

    Ok(ResilientScraper::new(
        build_fetcher(config)?,
        MarkdownParser::new(),
        store,
        config,
    ))
}

async fn cmd_scrape(scraper: &Scraper, request: &ScrapeRequest, format: OutputFormat) -> Result<()> {
    let outcome = scraper.scrape(request).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Csv => write_csv(&outcome)?,
    }

    if !outcome.success {
        anyhow::bail!(
            "No content acquired ({} errors, see log)",
            outcome.errors.len()
        );
    }

    tracing::info!(
        request_id = %outcome.request_id,
        source_id = outcome.source_id.as_deref().unwrap_or("-"),
        items = outcome.items.len(),
        elapsed_ms = outcome.elapsed_ms,
        "Scrape complete"
    );
    Ok(())
}

fn write_csv(outcome: &ScrapeOutcome) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    for item in &outcome.items {
        writer
            .serialize(item)
            .context("Failed to write CSV row")?;
    }
    writer.flush()?;
    Ok(())
}

async fn cmd_fetch(fetcher: &ResilientFetcher, url: &str) -> Result<()> {
    tracing::info!("Fetching {}", url);
    let page = fetcher
        .fetch(&FetchRequest::for_target(url))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        method = %page.method,
        attempts = page.attempts,
        status = page.status,
        bytes = page.body.len(),
        "Fetched"
    );
    println!("{}", page.body);
    Ok(())
}

async fn cmd_probe(fetcher: &ResilientFetcher, url: &str) -> Result<()> {
    let result = fetcher.probe(&FetchRequest::for_target(url)).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.reachable {
        anyhow::bail!("{url} is not reachable");
    }
    Ok(())
}

async fn cmd_health(scraper: &Scraper, filter: &SourceFilter) -> Result<()> {
    scraper
        .pools()
        .refresh_pools(filter, true)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to build source pools")?;

    println!("{}", serde_json::to_string_pretty(&scraper.system_health())?);
    Ok(())
}

async fn cmd_import(file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read source list: {}", file.display()))?;
    let sources: Vec<SourceRecord> =
        serde_json::from_str(&raw).context("Invalid JSON in source list")?;

    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;

    let repo = db.source_repo();
    for source in &sources {
        repo.upsert(source)
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Failed to import source '{}'", source.id))?;
    }

    let active = repo
        .list_active_sources(&SourceFilter::any())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!(
        "Imported {} sources ({} active in store)",
        sources.len(),
        active.len()
    );
    Ok(())
}
