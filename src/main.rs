use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use covlens::cli::{self, Style};
use covlens::config::Config;
use covlens::runner::BatchRunner;

/// covlens — Per-file line, branch and function coverage from LCOV reports.
#[derive(Parser)]
#[command(name = "covlens", version, about)]
struct Cli {
    /// Config file (default: ./covlens.toml if it exists)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root used to resolve recorded paths. May be repeated;
    /// earlier roots win.
    #[arg(long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-file coverage totals.
    Summary {
        /// LCOV report files.
        reports: Vec<PathBuf>,
    },

    /// Show line, branch and function detail for one source file.
    Details {
        /// LCOV report files.
        reports: Vec<PathBuf>,

        /// The source file, as a full path or relative to its root.
        #[arg(long)]
        file: PathBuf,

        /// Output style.
        #[arg(long, value_enum, default_value = "text")]
        style: Style,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "covlens=debug" } else { "covlens=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    let output = match cli.command {
        Commands::Summary { reports } => {
            config.extend(cli.roots, reports);
            let runner = BatchRunner::new(config.roots);
            cli::cmd_summary(&runner, &config.reports).await?
        }
        Commands::Details {
            reports,
            file,
            style,
        } => {
            config.extend(cli.roots, reports);
            let runner = BatchRunner::new(config.roots);
            cli::cmd_details(&runner, &config.reports, &file, style).await?
        }
    };
    print!("{output}");
    Ok(())
}
