use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedwatch::app::AppContext;
use feedwatch::cli::{commands, Cli, Commands};
use feedwatch::config::Config;
use feedwatch::daemon::{Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; command output goes to stdout
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Add { url } => {
            commands::add_feed(&ctx, &url).await?;
        }
        Commands::Remove { url } => {
            commands::remove_feed(&ctx, &url)?;
        }
        Commands::Import { path } => {
            commands::import_opml(&ctx, &path).await?;
        }
        Commands::List => {
            commands::list_feeds(&ctx)?;
        }
        Commands::Articles { url, unread } => {
            commands::list_articles(&ctx, &url, unread)?;
        }
        Commands::Read { url, ids } => {
            commands::mark_read(&ctx, &url, &ids)?;
        }
        Commands::Reset { url } => {
            commands::reset_feed(&ctx, &url).await?;
        }
        Commands::Update { urls } => {
            commands::update_feeds(&ctx, &urls).await?;
        }
        Commands::Frequency { url, frequency } => {
            commands::set_frequency(&ctx, &url, frequency.into())?;
        }
        Commands::Run {
            high,
            low,
            no_initial_update,
        } => {
            let config = DaemonConfig {
                high_interval_secs: high,
                low_interval_secs: low,
                update_on_start: !no_initial_update,
            };
            Daemon::new(&ctx, config).run().await?;
        }
    }

    Ok(())
}
