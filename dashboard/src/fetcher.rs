use crate::ingest::PageSource;
use crate::model::{Dataset, JsonPage, OutputFormat, PageBody, Query, Record};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use trends_core::config::ApiConfig;
use trends_core::{Bound, Error, Result};
use tracing::{debug, info, instrument};

/// Ceilings applied to a single paginated fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_pages: u32,
    pub max_bytes: u64,
}

impl From<&ApiConfig> for FetchLimits {
    fn from(config: &ApiConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_bytes: config.max_bytes,
        }
    }
}

/// Assembles a complete [`Dataset`] by walking pages 1, 2, ... of a query
/// until the upstream says there are no more.
///
/// Pages are requested strictly in order. A failing page aborts the whole
/// fetch and nothing accumulated so far is returned.
pub struct PaginatedFetcher {
    source: Arc<dyn PageSource>,
    limits: FetchLimits,
}

impl PaginatedFetcher {
    pub fn new(source: Arc<dyn PageSource>, limits: FetchLimits) -> Self {
        Self { source, limits }
    }

    #[instrument(skip(self, query), fields(source = self.source.source_id(), format = %query.format()))]
    pub async fn fetch(&self, query: &Query) -> Result<Dataset> {
        let start = Instant::now();
        let (dataset, summary) = self.collect(query).await?;

        let elapsed = start.elapsed();
        histogram!("trends_fetch_duration_ms").record(elapsed.as_millis() as f64);

        info!(
            pages = summary.pages,
            bytes = summary.bytes,
            duration_ms = elapsed.as_millis() as u64,
            "Fetched paginated dataset"
        );

        Ok(dataset)
    }

    async fn collect(&self, query: &Query) -> Result<(Dataset, FetchSummary)> {
        let mut merge = Merge::new(query.format());
        let mut summary = FetchSummary::default();
        let mut page = 1u32;

        loop {
            if page > self.limits.max_pages {
                return Err(Error::BoundExceeded {
                    bound: Bound::Pages,
                    limit: u64::from(self.limits.max_pages),
                });
            }

            let body = match self.source.fetch_page(query, page).await? {
                PageBody::NoContent => break,
                PageBody::Content(body) => body,
            };

            summary.bytes += body.len() as u64;
            if summary.bytes > self.limits.max_bytes {
                return Err(Error::BoundExceeded {
                    bound: Bound::Bytes,
                    limit: self.limits.max_bytes,
                });
            }

            counter!("trends_pages_fetched", "format" => query.format().as_str()).increment(1);

            let more = merge.accept(page, &body)?;
            summary.pages += 1;
            debug!(page, bytes = body.len(), more, "Accepted page");

            if !more {
                break;
            }
            page += 1;
        }

        Ok((merge.finish(), summary))
    }
}

/// Pages and body bytes accepted by one fetch. A terminating 204 is not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FetchSummary {
    pages: u32,
    bytes: u64,
}

/// Running accumulation of accepted pages.
enum Merge {
    Records(Vec<Record>),
    Text(Vec<String>),
}

impl Merge {
    fn new(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => Merge::Records(Vec::new()),
            OutputFormat::Csv => Merge::Text(Vec::new()),
        }
    }

    /// Appends one page and reports whether another page should be requested.
    fn accept(&mut self, page: u32, body: &str) -> Result<bool> {
        match self {
            Merge::Text(chunks) => {
                // Every page repeats the header row
                let data = if page > 1 {
                    body.split_once('\n').map_or("", |(_, rest)| rest)
                } else {
                    body
                };

                let data = data.trim();
                if !data.is_empty() {
                    chunks.push(data.to_string());
                }

                Ok(true)
            }
            Merge::Records(records) => {
                let page: JsonPage = serde_json::from_str(body)?;
                records.extend(page.data);

                Ok(page.pagination.next.is_some())
            }
        }
    }

    fn finish(self) -> Dataset {
        match self {
            Merge::Records(records) => Dataset::Records(records),
            Merge::Text(chunks) => Dataset::Text(chunks.join("\n")),
        }
    }
}
