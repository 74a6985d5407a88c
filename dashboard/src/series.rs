use crate::model::{Dataset, Record};
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use trends_core::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Trailing window used for the dashboard's smoothed line.
pub const ROLLING_WINDOW: usize = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub name: String,
    pub daily: f64,
}

/// Parsed dataset rows using the shared output columns
/// (`date`, `name`, `daily`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: Vec<Observation>,
}

impl Table {
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        match dataset {
            Dataset::Text(text) => Self::from_csv(text),
            Dataset::Records(records) => Self::from_records(records),
        }
    }

    fn from_csv(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let require = |name: &str| {
            column(name).ok_or_else(|| Error::Data(format!("dataset has no '{}' column", name)))
        };

        let date_at = require("date")?;
        let name_at = require("name")?;
        let daily_at = require("daily")?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |at: usize| record.get(at).unwrap_or("");

            rows.push(Observation {
                date: parse_date(field(date_at))?,
                name: field(name_at).to_string(),
                daily: parse_daily(field(daily_at))?,
            });
        }

        Ok(Self { rows })
    }

    fn from_records(records: &[Record]) -> Result<Self> {
        let rows = records
            .iter()
            .map(|record| {
                let text = |key: &str| match record.get(key) {
                    Some(Value::String(s)) => Ok(s.as_str()),
                    other => Err(Error::Data(format!(
                        "record field '{}' must be a string, got {:?}",
                        key, other
                    ))),
                };

                let daily = match record.get("daily") {
                    None | Some(Value::Null) => 0.0,
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                    Some(Value::String(s)) => parse_daily(s)?,
                    Some(other) => {
                        return Err(Error::Data(format!(
                            "record field 'daily' is not numeric: {}",
                            other
                        )))
                    }
                };

                Ok(Observation {
                    date: parse_date(text("date")?)?,
                    name: text("name")?.to_string(),
                    daily,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct area names in first-seen order.
    pub fn areas(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.name.as_str()))
            .map(|row| row.name.clone())
            .collect()
    }

    pub fn contains_area(&self, area: &str) -> bool {
        self.rows.iter().any(|row| row.name == area)
    }

    /// Latest date across every area.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|row| row.date).max()
    }

    /// Per-day totals for one area, with missing calendar days filled as 0.
    pub fn daily_series(&self, area: &str) -> DailySeries {
        let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for row in self.rows.iter().filter(|row| row.name == area) {
            *totals.entry(row.date).or_insert(0.0) += row.daily;
        }

        let (Some(&first), Some(&last)) = (totals.keys().next(), totals.keys().next_back()) else {
            return DailySeries::default();
        };

        let days = (last - first).num_days() + 1;
        let values = (0..days)
            .map(|offset| {
                let date = first + Duration::days(offset);
                totals.get(&date).copied().unwrap_or(0.0)
            })
            .collect();

        DailySeries::starting(first, values)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| Error::Data(format!("invalid date '{}': {}", raw, e)))
}

fn parse_daily(raw: &str) -> Result<f64> {
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .map_err(|_| Error::Data(format!("invalid daily value '{}'", raw)))
}

/// Contiguous run of daily values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailySeries {
    start: Option<NaiveDate>,
    values: Vec<f64>,
}

impl DailySeries {
    pub fn starting(start: NaiveDate, values: Vec<f64>) -> Self {
        Self {
            start: Some(start),
            values,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        match self.start {
            Some(start) => (0..self.values.len())
                .map(|offset| start + Duration::days(offset as i64))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Trailing mean over `window` days. The first `window - 1` days have no value.
    pub fn rolling_mean(&self, window: usize) -> Result<Vec<Option<f64>>> {
        if window == 0 {
            return Err(Error::Validation("rolling window must be at least 1".into()));
        }

        Ok((0..self.values.len())
            .map(|i| {
                (i + 1 >= window).then(|| {
                    self.values[i + 1 - window..=i].iter().sum::<f64>() / window as f64
                })
            })
            .collect())
    }
}

/// Date of the highest rolling value; the earliest wins on ties.
pub fn peak(dates: &[NaiveDate], rolling: &[Option<f64>]) -> Option<NaiveDate> {
    let mut best: Option<(NaiveDate, f64)> = None;

    for (date, value) in dates.iter().zip(rolling) {
        if let Some(value) = *value {
            if best.map_or(true, |(_, top)| value > top) {
                best = Some((*date, value));
            }
        }
    }

    best.map(|(date, _)| date)
}
