//! Plotly-compatible figures for the dashboard's trend plots.

use crate::model::Metric;
use crate::series::{peak, Table, ROLLING_WINDOW};
use chrono::NaiveDate;
use serde::Serialize;
use trends_core::Result;

const TITLE_DATE_FORMAT: &str = "%d %B %Y";
const TEMPLATE: &str = "plotly_white";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub data: Vec<Trace>,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trace {
    Bar {
        x: Vec<NaiveDate>,
        y: Vec<f64>,
        name: String,
        marker: Marker,
    },
    Scatter {
        x: Vec<NaiveDate>,
        /// `null` where the rolling window is not yet full.
        y: Vec<Option<f64>>,
        mode: &'static str,
        name: String,
        line: Line,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub dash: &'static str,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub title: Title,
    pub template: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Title {
    pub text: String,
}

impl Figure {
    /// Daily bars plus the 7 day average for one area, titled with the
    /// number of days between the average's peak and the latest data.
    pub fn trend(metric: Metric, area: &str, table: &Table) -> Result<Self> {
        let series = table.daily_series(area);
        let dates = series.dates();
        let rolling = series.rolling_mean(ROLLING_WINDOW)?;

        let title = match (peak(&dates, &rolling), table.last_date()) {
            (Some(peak), Some(last)) => format!(
                "Number of days since peak (on {} from {}): {} [{}]",
                peak.format(TITLE_DATE_FORMAT),
                last.format(TITLE_DATE_FORMAT),
                (last - peak).num_days(),
                area
            ),
            _ => format!("Not enough data for a {} day average [{}]", ROLLING_WINDOW, area),
        };

        let (label, color) = match metric {
            Metric::Cases => ("daily cases", "blue"),
            Metric::Deaths => ("daily deaths", "red"),
        };

        Ok(Self {
            data: vec![
                Trace::Bar {
                    x: dates.clone(),
                    y: series.values().to_vec(),
                    name: label.to_string(),
                    marker: Marker { color },
                },
                Trace::Scatter {
                    x: dates,
                    y: rolling,
                    mode: "lines",
                    name: format!("{} day average", ROLLING_WINDOW),
                    line: Line {
                        dash: "dash",
                        color: "black",
                    },
                },
            ],
            layout: Layout {
                title: Title { text: title },
                template: TEMPLATE,
            },
        })
    }
}
