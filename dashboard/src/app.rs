use crate::cache::TtlCache;
use crate::fetcher::{FetchLimits, PaginatedFetcher};
use crate::ingest::HttpSource;
use crate::model::{Dataset, Metric, OutputFormat, SchemaProfile};
use crate::refresh::{Refresher, TableCache};
use crate::server::{self, DashboardState};
use std::sync::Arc;
use tokio::sync::watch;
use trends_core::{Config, Error, Result};
use tracing::{error, info, instrument, warn};

pub struct App {
    config: Config,
    fetcher: Arc<PaginatedFetcher>,
    cache: Arc<TableCache>,
    refresher: Arc<Refresher>,
}

impl App {
    #[instrument(skip(config))]
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing application");

        let source = HttpSource::new(&config.api)?;
        let fetcher = Arc::new(PaginatedFetcher::new(
            Arc::new(source),
            FetchLimits::from(&config.api),
        ));

        let cache: Arc<TableCache> = Arc::new(TtlCache::from_config(&config.cache));
        let refresher = Arc::new(Refresher::new(
            Arc::clone(&fetcher),
            Arc::clone(&cache),
            &config,
        )?);

        Ok(Self {
            config,
            fetcher,
            cache,
            refresher,
        })
    }

    pub async fn fetch_dataset(
        &self,
        metric: Metric,
        area_type: &str,
        format: OutputFormat,
    ) -> Result<Dataset> {
        let query = SchemaProfile::new(self.config.query.profile).query(metric, area_type, format)?;
        self.fetcher.fetch(&query).await
    }

    pub async fn run_dashboard(&self, bind: Option<String>) -> Result<()> {
        match self.refresher.refresh_once().await {
            Ok(options) => info!(
                cases = options.cases.len(),
                deaths = options.deaths.len(),
                "Initial datasets loaded"
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "Initial refresh failed, serving without data until the next tick"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        });

        let refresher = Arc::clone(&self.refresher);
        let refresh_shutdown = shutdown_rx.clone();
        let refresh_task = tokio::spawn(async move { refresher.run(refresh_shutdown).await });

        let state = Arc::new(DashboardState {
            cache: Arc::clone(&self.cache),
            areas: self.refresher.subscribe(),
            default_area: self.config.server.default_area.clone(),
        });

        let bind = bind.unwrap_or_else(|| self.config.server.bind.clone());
        server::serve(&bind, state, shutdown_rx).await?;

        refresh_task
            .await
            .map_err(|e| Error::Internal(format!("Refresh task panicked: {}", e)))?;

        Ok(())
    }
}
