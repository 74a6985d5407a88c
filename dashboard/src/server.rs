//! HTTP surface of the dashboard.
//!
//! - `GET /` serves the single-page frontend
//! - `GET /api/areas` lists selectable areas per metric
//! - `GET /api/figure/:metric/:area` returns a plotly figure
//! - `GET /health`

use crate::chart::Figure;
use crate::model::Metric;
use crate::refresh::{AreaOptions, TableCache};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use trends_core::Result;
use tracing::{info, warn};

const DASHBOARD_HTML: &str = include_str!("../static/index.html");

pub struct DashboardState {
    pub cache: Arc<TableCache>,
    pub areas: watch::Receiver<AreaOptions>,
    pub default_area: String,
}

#[derive(Debug, Serialize)]
struct AreasResponse {
    #[serde(flatten)]
    options: AreaOptions,
    default_area: String,
}

async fn index_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn areas_handler(State(state): State<Arc<DashboardState>>) -> Json<AreasResponse> {
    Json(AreasResponse {
        options: state.areas.borrow().clone(),
        default_area: state.default_area.clone(),
    })
}

async fn figure_handler(
    State(state): State<Arc<DashboardState>>,
    Path((metric, area)): Path<(String, String)>,
) -> Response {
    let metric: Metric = match metric.parse() {
        Ok(metric) => metric,
        Err(e) => return (StatusCode::NOT_FOUND, e).into_response(),
    };

    let Some(table) = state.cache.get(metric.as_str()).await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no data cached yet").into_response();
    };

    if !table.contains_area(&area) {
        return (StatusCode::NOT_FOUND, format!("unknown area '{}'", area)).into_response();
    }

    match Figure::trend(metric, &area, &table) {
        Ok(figure) => Json(figure).into_response(),
        Err(e) => {
            warn!(error = %e, %metric, area = %area, "Failed to build figure");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn build_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/areas", get(areas_handler))
        .route("/api/figure/:metric/:area", get(figure_handler))
        .with_state(state)
}

/// Serves the dashboard until `shutdown` flips.
pub async fn serve(
    bind: &str,
    state: Arc<DashboardState>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Dashboard listening");

    serve_on(listener, state, shutdown).await
}

async fn serve_on(
    listener: TcpListener,
    state: Arc<DashboardState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    info!("Dashboard stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dataset;
    use crate::series::Table;
    use std::time::Duration;

    struct Harness {
        base: String,
        cache: Arc<TableCache>,
        _shutdown: watch::Sender<bool>,
    }

    async fn start() -> Harness {
        let cache = Arc::new(TableCache::new(Duration::from_secs(300), 5));
        let (_areas_tx, areas) = watch::channel(AreaOptions {
            tick: 3,
            cases: vec!["London".into()],
            deaths: vec!["London".into()],
        });
        let state = Arc::new(DashboardState {
            cache: Arc::clone(&cache),
            areas,
            default_area: "London".into(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve_on(listener, state, shutdown_rx));

        Harness {
            base,
            cache,
            _shutdown: shutdown_tx,
        }
    }

    async fn seed(cache: &TableCache) {
        let text = "date,name,code,daily,cumulative\n2020-04-01,London,E1,4,4".to_string();
        let table = Arc::new(Table::from_dataset(&Dataset::Text(text)).unwrap());
        cache.set_many([("cases", Arc::clone(&table)), ("deaths", table)]).await;
    }

    #[tokio::test]
    async fn figure_is_unavailable_until_data_is_cached() {
        let harness = start().await;
        let url = format!("{}/api/figure/cases/London", harness.base);

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        seed(&harness.cache).await;

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let figure: serde_json::Value = response.json().await.unwrap();
        assert_eq!(figure["data"][0]["name"], "daily cases");
        assert_eq!(figure["layout"]["template"], "plotly_white");
    }

    #[tokio::test]
    async fn unknown_metric_or_area_is_not_found() {
        let harness = start().await;
        seed(&harness.cache).await;

        for path in ["/api/figure/recoveries/London", "/api/figure/deaths/Atlantis"] {
            let response = reqwest::get(format!("{}{}", harness.base, path)).await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND, "{path}");
        }
    }

    #[tokio::test]
    async fn area_names_include_default_selection() {
        let harness = start().await;

        let areas: serde_json::Value = reqwest::get(format!("{}/api/areas", harness.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(
            areas,
            serde_json::json!({
                "tick": 3,
                "cases": ["London"],
                "deaths": ["London"],
                "default_area": "London"
            })
        );
    }

    #[tokio::test]
    async fn serves_page_and_health() {
        let harness = start().await;

        let page = reqwest::get(&harness.base).await.unwrap().text().await.unwrap();
        assert!(page.contains("Covid Trends"));

        let health = reqwest::get(format!("{}/health", harness.base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(health, "ok");
    }
}
