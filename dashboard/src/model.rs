use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trends_core::config::{DatasetFormat, SchemaVersion};
use trends_core::{Error, Result};

pub type OutputFormat = DatasetFormat;

/// One upstream record in structured mode.
pub type Record = Map<String, Value>;

/// Output-field-name to upstream-field-name mapping. Nested objects select
/// nested upstream fields; key order is kept on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Structure(Map<String, Value>);

impl Structure {
    pub fn new(fields: Map<String, Value>) -> Result<Self> {
        Self::check(&fields, "structure")?;
        Ok(Self(fields))
    }

    fn check(fields: &Map<String, Value>, at: &str) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::Validation(format!("{} must not be empty", at)));
        }

        for (key, value) in fields {
            match value {
                Value::String(name) if !name.is_empty() => {}
                Value::Object(nested) => Self::check(nested, &format!("{}.{}", at, key))?,
                other => {
                    return Err(Error::Validation(format!(
                        "{}.{} must map to an upstream field name, got {}",
                        at, key, other
                    )))
                }
            }
        }

        Ok(())
    }

    /// Compact JSON, as sent in the `structure` parameter.
    pub fn to_param(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Structure {
    /// Builds a flat mapping. Callers needing validation go through [`Structure::new`].
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    filters: Vec<String>,
    structure: Structure,
    format: OutputFormat,
}

impl Query {
    pub fn new<I, S>(filters: I, structure: Structure) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filters: Vec<String> = filters.into_iter().map(Into::into).collect();

        if filters.is_empty() {
            return Err(Error::Validation("at least one filter is required".into()));
        }

        if let Some(bad) = filters.iter().find(|f| f.trim().is_empty()) {
            return Err(Error::Validation(format!("empty filter predicate '{}'", bad)));
        }

        Structure::check(&structure.0, "structure")?;

        Ok(Self {
            filters,
            structure,
            format: OutputFormat::default(),
        })
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Wire parameters for one page request.
    pub fn params(&self, page: u32) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![
            ("filters", self.filters.join(";")),
            ("structure", self.structure.to_param()?),
            ("format", self.format.as_str().to_string()),
            ("page", page.to_string()),
        ])
    }
}

/// Body of one page response.
#[derive(Debug, Clone, PartialEq)]
pub enum PageBody {
    /// 204: no page at this number or beyond.
    NoContent,
    Content(String),
}

/// Structured-mode page envelope.
#[derive(Debug, Deserialize)]
pub struct JsonPage {
    pub data: Vec<Record>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    /// Absent and `null` both deserialize to `None`.
    #[serde(default)]
    pub next: Option<Value>,
}

/// Merged result of every page for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Records(Vec<Record>),
    Text(String),
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        match self {
            Dataset::Records(records) => records.is_empty(),
            Dataset::Text(text) => text.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cases,
    Deaths,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cases => "cases",
            Metric::Deaths => "deaths",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cases" => Ok(Metric::Cases),
            "deaths" => Ok(Metric::Deaths),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

/// Upstream field names for one API generation. Every profile maps onto the
/// same output columns: `date`, `name`, `code`, `daily`, `cumulative`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaProfile {
    version: SchemaVersion,
}

impl SchemaProfile {
    pub fn new(version: SchemaVersion) -> Self {
        Self { version }
    }

    pub fn structure(&self, metric: Metric) -> Result<Structure> {
        let (date, name, code, daily, cumulative) = match (self.version, metric) {
            (SchemaVersion::V1, Metric::Cases) => (
                "date",
                "areaName",
                "areaCode",
                "newCasesBySpecimenDate",
                "cumCasesBySpecimenDate",
            ),
            (SchemaVersion::V1, Metric::Deaths) => (
                "date",
                "areaName",
                "areaCode",
                "newDeaths28DaysByDeathDate",
                "cumDeaths28DaysByDeathDate",
            ),
            (SchemaVersion::Legacy, Metric::Cases) => (
                "Specimen date",
                "Area name",
                "Area code",
                "Daily lab-confirmed cases",
                "Cumulative lab-confirmed cases",
            ),
            (SchemaVersion::Legacy, Metric::Deaths) => (
                "Reporting date",
                "Area name",
                "Area code",
                "Daily change in deaths",
                "Cumulative deaths",
            ),
        };

        let fields = [
            ("date", date),
            ("name", name),
            ("code", code),
            ("daily", daily),
            ("cumulative", cumulative),
        ]
        .into_iter()
        .map(|(output, upstream)| (output.to_string(), Value::String(upstream.to_string())))
        .collect();

        Structure::new(fields)
    }

    pub fn query(&self, metric: Metric, area_type: &str, format: OutputFormat) -> Result<Query> {
        Ok(Query::new([format!("areaType={}", area_type)], self.structure(metric)?)?
            .with_format(format))
    }
}
