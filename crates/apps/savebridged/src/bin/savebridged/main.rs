use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use savebridged::{Bridge, BridgeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "savebridged",
    about = "Stream files through the page, helper and worker save pipeline"
)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    #[arg(short = 'v', long)]
    verbose: bool,
    #[arg(short = 'q', long)]
    quiet: bool,
    #[arg(long)]
    exampleconfig: bool,
    #[arg(long)]
    downloads_dir: Option<String>,
    #[arg(long)]
    helper_url: Option<String>,
    #[arg(long)]
    stream_ttl_ms: Option<u64>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Establish the helper and report whether it is ready.
    Probe,
    /// Save a file, or stdin when no path is given, as a download.
    Save {
        path: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.exampleconfig {
        println!("{}", BridgeConfig::example_toml()?);
        return Ok(());
    }
    init_logging(args.verbose, args.quiet);

    let mut config = match args.config.as_ref() {
        Some(path) => BridgeConfig::load_from_path(std::path::Path::new(path))
            .with_context(|| format!("failed to load config {path}"))?,
        None => BridgeConfig::default(),
    };
    if let Some(downloads_dir) = args.downloads_dir {
        config.downloads_dir = downloads_dir;
    }
    if let Some(helper_url) = args.helper_url {
        config.helper_url = helper_url;
    }
    if let Some(stream_ttl_ms) = args.stream_ttl_ms {
        config.stream_ttl_ms = stream_ttl_ms;
    }

    let bridge = Bridge::start(config).context("failed to start the save pipeline")?;
    match args.command.unwrap_or(Command::Probe) {
        Command::Probe => {
            let helper = bridge.probe().await?;
            if !args.quiet {
                println!("helper ready at {}", helper.location());
            }
        }
        Command::Save { path, name } => {
            let report = match path {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    let name = name.or_else(|| {
                        let file_name = path.file_name()?;
                        Some(file_name.to_string_lossy().into_owned())
                    });
                    bridge.save(name.as_deref(), file).await?
                }
                None => bridge.save(name.as_deref(), tokio::io::stdin()).await?,
            };
            if !args.quiet {
                println!("saved {} bytes to {}", report.bytes, report.path.display());
            }
        }
    }
    Ok(())
}
