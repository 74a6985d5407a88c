use crate::cache::TtlCache;
use crate::fetcher::PaginatedFetcher;
use crate::model::{Metric, OutputFormat, Query, SchemaProfile};
use crate::series::Table;
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use trends_core::{Config, Result};
use tracing::{debug, info, instrument, warn};

pub type TableCache = TtlCache<Arc<Table>>;

/// Area names offered by the dashboard's selectors after a refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AreaOptions {
    /// Count of successful refreshes so far.
    pub tick: u64,
    pub cases: Vec<String>,
    pub deaths: Vec<String>,
}

pub struct Refresher {
    fetcher: Arc<PaginatedFetcher>,
    cache: Arc<TableCache>,
    cases_query: Query,
    deaths_query: Query,
    interval: Duration,
    areas_tx: watch::Sender<AreaOptions>,
    ticks: AtomicU64,
}

impl Refresher {
    pub fn new(fetcher: Arc<PaginatedFetcher>, cache: Arc<TableCache>, config: &Config) -> Result<Self> {
        let profile = SchemaProfile::new(config.query.profile);
        let area_type = &config.query.area_type;
        let format: OutputFormat = config.query.format;

        let (areas_tx, _) = watch::channel(AreaOptions::default());

        Ok(Self {
            fetcher,
            cache,
            cases_query: profile.query(Metric::Cases, area_type, format)?,
            deaths_query: profile.query(Metric::Deaths, area_type, format)?,
            interval: Duration::from_secs(config.refresh.interval_secs),
            areas_tx,
            ticks: AtomicU64::new(0),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<AreaOptions> {
        self.areas_tx.subscribe()
    }

    /// Fetches cases and deaths together and publishes both, or neither.
    #[instrument(skip(self))]
    pub async fn refresh_once(&self) -> Result<AreaOptions> {
        let (cases, deaths) = futures::future::try_join(
            self.fetcher.fetch(&self.cases_query),
            self.fetcher.fetch(&self.deaths_query),
        )
        .await?;

        let cases = Arc::new(Table::from_dataset(&cases)?);
        let deaths = Arc::new(Table::from_dataset(&deaths)?);

        if cases.is_empty() || deaths.is_empty() {
            warn!(
                case_rows = cases.len(),
                death_rows = deaths.len(),
                "Upstream returned an empty dataset"
            );
        }

        let options = AreaOptions {
            tick: self.ticks.fetch_add(1, Ordering::Relaxed) + 1,
            cases: cases.areas(),
            deaths: deaths.areas(),
        };

        info!(
            tick = options.tick,
            case_rows = cases.len(),
            death_rows = deaths.len(),
            areas = options.cases.len(),
            "Refreshed datasets"
        );

        self.cache
            .set_many([
                (Metric::Cases.as_str(), cases),
                (Metric::Deaths.as_str(), deaths),
            ])
            .await;
        self.areas_tx.send_replace(options.clone());

        let cached = self.cache.len().await;
        debug!(cached, "Published datasets");

        Ok(options)
    }

    /// Refreshes on every interval tick until `shutdown` flips. The first
    /// tick is skipped; callers do the initial refresh themselves.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Starting refresh loop");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Stopping refresh loop");
                    break;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        counter!("trends_refresh_failures").increment(1);
                        warn!(error = %e, "Refresh failed, keeping previous datasets");
                    }
                }
            }
        }
    }
}
