use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixcache::domain::entities::LoadedImage;
use pixcache::infrastructure::{AppConfig, CliArgs, Command, ImageCache, StorageManager};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn print_loaded(image: &LoadedImage) {
    println!("{}\t{}\t{}", image.source, image.key, image.handle.src());
}

async fn run(cache: &ImageCache, command: Command) -> Result<()> {
    match command {
        Command::Resolve { urls } => {
            for url in &urls {
                print_loaded(&cache.resolve(url).await);
            }
        }
        Command::Warm { urls } => {
            let warmed = cache.warm(&urls).await;
            println!("warmed {warmed}/{}", urls.len());
        }
        Command::Status { json } => {
            let status = cache.status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{status}");
            }
        }
        Command::Invalidate { url } => {
            cache.invalidate(&url).await;
            println!("invalidated {}", cache.rewrite(&url));
        }
        Command::Refresh { url } => {
            print_loaded(&cache.force_refresh(&url).await);
        }
        Command::Clear => {
            cache.clear_all().await;
            println!("cleared");
        }
        Command::Sweep => {
            let removed = cache.sweep_now().await.wrap_err("sweep failed")?;
            println!("removed {removed} expired entries");
        }
        Command::Rewrite { url } => {
            println!("{}", cache.rewrite(&url));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = pixcache::VERSION, "Starting {}", pixcache::NAME);

    let cache = ImageCache::open(config.image_cache_config()?).await?;

    let result = run(&cache, args.command).await;

    cache.shutdown().await;

    result
}
