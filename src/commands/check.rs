use anyhow::{Context, Result};

use opds_aggregator::config::Config;

/// Validate the configuration and print the effective sources
pub fn check_config(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    println!("Configuration OK");
    println!("================");
    println!("  Bind address: {}", config.server.addr);
    println!("  Base path: {}", config.server.base_path);
    println!("  Polling interval: {}s", config.polling.interval_secs);
    if config.server.download_cache.enabled {
        println!(
            "  Download cache: {}",
            config.server.download_cache.dir.display()
        );
    }
    println!();
    println!("Sources:");
    for source in &config.feeds {
        println!(
            "  {:<24} {} (depth {}, max pages {}, auth: {})",
            source.slug(),
            source.url,
            source.poll_depth,
            source.max_paginate,
            if source.auth.is_some() { "yes" } else { "no" }
        );
    }
    Ok(())
}
