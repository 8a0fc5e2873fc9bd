use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use kitsune::cache::{CacheKey, KvStore, RedisKvStore, VersionRegistry, DEFAULT_VERSION};
use kitsune::config::Config;
use kitsune::origin::OriginRegistry;
use kitsune::retry::WriteCoordinator;
use kitsune::transform::TransformOptions;

/// Kitsune - media edge origin resolution and cache tooling
#[derive(Parser, Debug)]
#[command(name = "kitsune")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then list origins
    Check,
    /// Show candidate sources and the cache key for a path (no network)
    Resolve {
        path: String,
        /// Transform option as key=value; repeatable
        #[arg(short, long = "option")]
        options: Vec<String>,
    },
    /// Bump the cache version of a pattern in the configured Redis store
    BumpVersion { pattern: String },
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let config = Config::from_file(path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;
    Ok(config)
}

fn check(config: &Config, registry: &OriginRegistry) {
    println!(
        "Configuration OK: {} origins, {} sources",
        registry.origin_count(),
        registry.source_count()
    );
    for origin in &config.origins {
        let Some(origin) = registry.origin(&origin.name) else {
            continue;
        };
        println!(
            "  {} (cacheable: {}, ttl ok: {}s)",
            origin.name, origin.cacheable, origin.ttl.ok
        );
        for source in &origin.sources {
            println!(
                "    {}:{} {}",
                source.kind(),
                source.priority(),
                source.base_url.as_deref().unwrap_or("-")
            );
        }
    }
}

fn resolve(config: &Config, registry: &OriginRegistry, path: &str, options: &[String]) -> anyhow::Result<()> {
    let options = TransformOptions::parse_assignments(options.iter().map(String::as_str))
        .map_err(anyhow::Error::msg)?;

    let matches = registry.matches(path);
    if matches.is_empty() {
        bail!("No origin matches {}", path);
    }

    println!("Candidate sources for {}:", path);
    let mut position = 1;
    for matched in &matches {
        for source in &matched.origin.sources {
            match source.resolve_path(&matched.captures) {
                Some(resolved) => {
                    let location = source
                        .url_for(&resolved)
                        .or_else(|| source.bucket.as_ref().map(|b| format!("{}:{}", b, resolved)))
                        .unwrap_or(resolved);
                    println!("  {}. {} -> {}", position, source.id, location);
                }
                None => println!("  {}. {} -> (skipped, unresolved placeholder)", position, source.id),
            }
            position += 1;
        }
    }

    let key = CacheKey::derive(&config.cache.key_prefix, path, &options, DEFAULT_VERSION);
    println!("Cache key (version {}): {}", DEFAULT_VERSION, key);
    Ok(())
}

async fn bump_version(config: &Config, pattern: &str) -> anyhow::Result<()> {
    let registry = OriginRegistry::from_config(config)?;
    if registry.matcher().get(pattern).is_none() {
        bail!("Unknown pattern '{}'", pattern);
    }
    let Some(redis) = &config.cache.redis else {
        bail!("cache.redis is not configured");
    };

    let kv: std::sync::Arc<dyn KvStore> = std::sync::Arc::new(RedisKvStore::new(redis).await?);
    let versions = VersionRegistry::new(
        kv,
        WriteCoordinator::new(config.cache.write_retry.to_retry_policy()),
        &config.cache.key_prefix,
        Duration::from_secs(config.cache.version_cache_ttl_seconds),
    );

    let before = versions
        .current(pattern)
        .await
        .context("Failed to read current version")?;
    let after = versions.bump(pattern).await.context("Failed to bump version")?;
    if after <= before {
        bail!("Version bump for '{}' was not written (still {})", pattern, before);
    }
    println!("{}: v{} -> v{}", pattern, before, after);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    kitsune::logging::init_subscriber(&config.logging).map_err(anyhow::Error::msg)?;
    tracing::debug!(
        config_file = %args.config.display(),
        origins = config.origins.len(),
        "Configuration loaded successfully"
    );

    match args.command {
        Command::Check => {
            let registry = OriginRegistry::from_config(&config)?;
            check(&config, &registry);
        }
        Command::Resolve { path, options } => {
            let registry = OriginRegistry::from_config(&config)?;
            resolve(&config, &registry, &path, &options)?;
        }
        Command::BumpVersion { pattern } => bump_version(&config, &pattern).await?,
    }
    Ok(())
}
