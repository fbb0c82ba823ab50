//! Index sites into an in-memory engine and print what a run produced.
//!
//! Useful for checking crawl rules and validators against a live site
//! without touching a real search engine.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitesearch::config::load_sites;
use sitesearch::{
    AppConfig, HttpFetcher, Indexer, MemoryEngine, SearchRequest, SearchService,
    SiteConfiguration,
};

#[derive(Parser)]
#[command(name = "sitesearch-dry-run")]
#[command(about = "Crawl and index sites in memory, then optionally run queries")]
struct Cli {
    /// Site URL to index (ignored when --sites-file is given)
    site: Option<String>,

    /// JSON file with site definitions; defaults to SITESEARCH_SITES_FILE
    #[arg(long)]
    sites_file: Option<std::path::PathBuf>,

    /// Content region selector for an ad-hoc site
    #[arg(long)]
    selector: Vec<String>,

    /// Query to run after indexing (repeatable)
    #[arg(long, short)]
    query: Vec<String>,

    /// Stop after this many pages per site
    #[arg(long)]
    max_pages: Option<usize>,

    /// Concurrent requests per site
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sitesearch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    if let Some(max_pages) = cli.max_pages {
        config.indexer.crawl.max_pages = Some(max_pages);
    }
    if let Some(concurrency) = cli.concurrency {
        config.indexer.crawl.concurrency = concurrency;
    }

    let sites = match (&cli.sites_file, &cli.site) {
        (Some(path), _) => load_sites(path)?,
        (None, Some(url)) => {
            let site = cli
                .selector
                .iter()
                .fold(SiteConfiguration::new(url.clone()), |site, selector| {
                    site.with_content_selector(selector.clone())
                });
            vec![Arc::new(site)]
        }
        (None, None) => config.load_sites()?,
    };
    if sites.is_empty() {
        bail!("No sites to index: pass a site URL or --sites-file");
    }

    let engine = Arc::new(MemoryEngine::new());
    let fetcher = Arc::new(HttpFetcher::new().context("Failed to build HTTP client")?);
    let indexer = Indexer::new(
        engine.clone(),
        engine.clone(),
        fetcher,
        config.keys(),
        config.indexer.clone(),
    );

    for site in &sites {
        let outcome = indexer.run(site.clone(), true).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    if cli.query.is_empty() {
        return Ok(());
    }

    let default_site = config
        .default_site
        .clone()
        .unwrap_or_else(|| sites[0].url.clone());
    let service = SearchService::new(engine, config.keys(), sites, &default_site)?;

    for q in &cli.query {
        let response = service.search(&SearchRequest::new(q.clone())).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "query": q, "response": response }))?
        );
    }

    Ok(())
}
