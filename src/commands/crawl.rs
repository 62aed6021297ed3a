use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use opds_aggregator::config::Config;
use opds_aggregator::crawler::{Crawler, FeedFetcher};

/// Crawl one source (or all) once and print the discovered tree
pub async fn crawl(config: Config, slug: Option<String>) -> Result<()> {
    let sources: Vec<_> = match slug.as_deref() {
        Some(slug) => vec![config
            .source(slug)
            .cloned()
            .ok_or_else(|| anyhow!("unknown source: {slug}"))?],
        None => config.feeds.clone(),
    };

    let fetcher =
        Arc::new(FeedFetcher::new(&config.crawler).context("Failed to build HTTP client")?);
    let crawler = Crawler::new(fetcher, config.crawler.crawl_fanout);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    println!("Crawling {} source(s)", sources.len());
    println!("====================");

    let mut failures = 0usize;
    for source in &sources {
        println!();
        println!("{} ({})", source.name, source.slug());
        println!("  URL: {}", source.url);
        println!("  Poll depth: {}", source.poll_depth);

        match crawler.crawl(source, &cancel).await {
            Ok(tree) => {
                println!("  Title: {}", tree.feed.title);
                println!("  Entries at root: {}", tree.feed.entries.len());
                println!("  Documents: {}", tree.node_count().await);
                if let Some(search) = &tree.search_url {
                    println!("  Search: {search}");
                }
                for (level, key, node) in tree.descendants().await {
                    println!(
                        "  {}{} ({} entries)",
                        "  ".repeat(level),
                        key,
                        node.feed.entries.len()
                    );
                }
            }
            Err(e) => {
                failures += 1;
                println!("  Failed: {e}");
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    if failures > 0 {
        return Err(anyhow!("{failures} of {} source(s) failed", sources.len()));
    }
    Ok(())
}
