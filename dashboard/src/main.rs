mod app;
mod cache;
mod chart;
mod fetcher;
mod ingest;
mod model;
mod refresh;
mod series;
mod server;

use clap::{Parser, Subcommand};
use model::{Dataset, Metric};
use std::process;
use trends_core::config::DatasetFormat;
use trends_core::{telemetry, Config};
use tracing::{error, info, warn};

#[derive(Parser)]
#[clap(name = "covid-trends")]
#[clap(about = "COVID-19 trends dashboard for the UK coronavirus data API", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the auto-refreshing dashboard
    Serve {
        /// Override the listen address
        #[clap(long, env = "TRENDS_BIND")]
        bind: Option<String>,
    },

    /// Fetch every page of one dataset and print it to stdout
    Fetch {
        /// Dataset to fetch (cases or deaths)
        metric: Metric,

        /// Response encoding (json or csv)
        #[clap(long)]
        format: Option<DatasetFormat>,

        /// Override the area type filter
        #[clap(long)]
        area_type: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            info!(bind = ?bind, "Starting dashboard");

            let app = app::App::new(config)?;
            app.run_dashboard(bind).await?;
        }

        Commands::Fetch {
            metric,
            format,
            area_type,
        } => {
            let format = format.unwrap_or(config.query.format);
            let area_type = area_type.unwrap_or_else(|| config.query.area_type.clone());

            info!(%metric, %format, area_type = %area_type, "Fetching dataset");

            let app = app::App::new(config)?;
            let dataset = app.fetch_dataset(metric, &area_type, format).await?;
            if dataset.is_empty() {
                warn!(%metric, "Upstream returned no rows");
            }

            match dataset {
                Dataset::Text(text) => println!("{}", text),
                Dataset::Records(records) => {
                    println!("{}", serde_json::to_string_pretty(&records)?)
                }
            }
        }
    }

    Ok(())
}
