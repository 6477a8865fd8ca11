//! Discovery source configuration
//!
//! One `SourceConfig` per configured source; `adapter_params` is stored as
//! opaque JSON (the on-disk schema) and parsed into a kind-specific struct
//! on validation.

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;
use crate::paper::SourceKind;
use crate::workflow::BrowserWorkflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn matches(self, weekday: Weekday) -> bool {
        matches!(
            (self, weekday),
            (Self::Mon, Weekday::Mon)
                | (Self::Tue, Weekday::Tue)
                | (Self::Wed, Weekday::Wed)
                | (Self::Thu, Weekday::Thu)
                | (Self::Fri, Weekday::Fri)
                | (Self::Sat, Weekday::Sat)
                | (Self::Sun, Weekday::Sun)
        )
    }
}

/// When a source runs. At least one of `interval_minutes` or
/// `time_of_day` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub interval_minutes: Option<u32>,
    /// Wall-clock "HH:MM" (UTC).
    pub time_of_day: Option<String>,
    pub days_of_week: Option<Vec<DayOfWeek>>,
    pub enabled: bool,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval_minutes: None,
            time_of_day: None,
            days_of_week: None,
            enabled: true,
        }
    }
}

impl Schedule {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.interval_minutes.is_none() && self.time_of_day.is_none() {
            return Err(DiscoveryError::Config(
                "schedule needs interval_minutes or time_of_day".to_string(),
            ));
        }
        if let Some(minutes) = self.interval_minutes {
            if minutes < 1 {
                return Err(DiscoveryError::Config(
                    "interval_minutes must be >= 1".to_string(),
                ));
            }
        }
        if let Some(tod) = &self.time_of_day {
            self.parse_time_of_day_str(tod)?;
        }
        if let Some(days) = &self.days_of_week {
            if days.is_empty() {
                return Err(DiscoveryError::Config(
                    "days_of_week must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn parse_time_of_day_str(&self, tod: &str) -> Result<NaiveTime, DiscoveryError> {
        NaiveTime::parse_from_str(tod, "%H:%M")
            .map_err(|_| DiscoveryError::Config(format!("bad time_of_day {tod:?}, want HH:MM")))
    }

    /// Parsed `time_of_day`, assuming [`validate`](Schedule::validate) passed.
    pub fn time_of_day_parsed(&self) -> Option<NaiveTime> {
        self.time_of_day
            .as_deref()
            .and_then(|tod| NaiveTime::parse_from_str(tod, "%H:%M").ok())
    }

    /// Whether runs are allowed on `weekday`. No restriction means yes.
    pub fn day_enabled(&self, weekday: Weekday) -> bool {
        match &self.days_of_week {
            Some(days) => days.iter().any(|d| d.matches(weekday)),
            None => true,
        }
    }
}

/// Explicit per-source result filters, applied after relevance scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFilters {
    pub keywords: Vec<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub min_citation_count: Option<i64>,
    /// In [0, 1]; falls back to `discovery.default_relevance_threshold`.
    pub relevance_threshold: Option<f64>,
}

impl SourceFilters {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if let Some(t) = self.relevance_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(DiscoveryError::Config(format!(
                    "relevance_threshold {t} outside [0, 1]"
                )));
            }
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(DiscoveryError::Config(format!(
                    "date_from {from} is after date_to {to}"
                )));
            }
        }
        Ok(())
    }
}

fn default_active() -> bool {
    true
}

/// One discovery source: which adapter, what to ask it, when to run.
///
/// Matches the on-disk JSON document
/// `{name, kind, is_active, adapter_params, schedule, filters,
/// max_papers_per_run}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub adapter_params: serde_json::Value,
    pub schedule: Schedule,
    #[serde(default)]
    pub filters: SourceFilters,
    /// Falls back to `discovery.default_max_articles` when absent.
    #[serde(default)]
    pub max_papers_per_run: Option<usize>,
    /// Aggregate across all API adapters in one run, merging the outputs.
    #[serde(default)]
    pub fan_out: bool,
}

impl SourceConfig {
    /// Validate the whole document, including the kind-specific params.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.name.trim().is_empty() {
            return Err(DiscoveryError::Config("source name is empty".to_string()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DiscoveryError::Config(format!(
                "source name {:?} may only contain [A-Za-z0-9_-]",
                self.name
            )));
        }
        if self.max_papers_per_run == Some(0) {
            return Err(DiscoveryError::Config(
                "max_papers_per_run must be >= 1".to_string(),
            ));
        }
        self.schedule.validate()?;
        self.filters.validate()?;
        self.typed_params()?;
        Ok(())
    }

    /// Parse `adapter_params` into the struct for this config's kind.
    pub fn typed_params(&self) -> Result<AdapterParams, DiscoveryError> {
        AdapterParams::from_value(self.kind, &self.adapter_params)
    }

    /// Per-run paper cap, defaulting to the core-wide setting.
    pub fn max_papers(&self, default_max: usize) -> usize {
        self.max_papers_per_run.unwrap_or(default_max).max(1)
    }
}

/// Kind-specific, validated adapter parameters.
#[derive(Debug, Clone)]
pub enum AdapterParams {
    Arxiv(ArxivParams),
    Pubmed(PubmedParams),
    Crossref(CrossrefParams),
    Openalex(OpenalexParams),
    SemanticScholar(SemanticScholarParams),
    Browser(BrowserParams),
}

impl AdapterParams {
    pub fn from_value(
        kind: SourceKind,
        value: &serde_json::Value,
    ) -> Result<Self, DiscoveryError> {
        // Missing params mean "all defaults" for API kinds.
        let value = if value.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            value.clone()
        };
        let bad = |e: serde_json::Error| {
            DiscoveryError::Config(format!("bad adapter_params for {kind}: {e}"))
        };
        let params = match kind {
            SourceKind::Arxiv => Self::Arxiv(serde_json::from_value(value).map_err(bad)?),
            SourceKind::Pubmed => Self::Pubmed(serde_json::from_value(value).map_err(bad)?),
            SourceKind::Crossref => Self::Crossref(serde_json::from_value(value).map_err(bad)?),
            SourceKind::Openalex => Self::Openalex(serde_json::from_value(value).map_err(bad)?),
            SourceKind::SemanticScholar => {
                Self::SemanticScholar(serde_json::from_value(value).map_err(bad)?)
            }
            SourceKind::Browser => Self::Browser(serde_json::from_value(value).map_err(bad)?),
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<(), DiscoveryError> {
        match self {
            Self::Arxiv(p) => p.validate(),
            Self::Browser(p) => p.workflow.validate(),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivParams {
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ArxivParams {
    fn validate(&self) -> Result<(), DiscoveryError> {
        if let Some(sort_by) = &self.sort_by {
            if !["relevance", "lastUpdatedDate", "submittedDate"].contains(&sort_by.as_str()) {
                return Err(DiscoveryError::Config(format!(
                    "unknown arxiv sort_by {sort_by:?}"
                )));
            }
        }
        if let Some(order) = &self.sort_order {
            if !["ascending", "descending"].contains(&order.as_str()) {
                return Err(DiscoveryError::Config(format!(
                    "unknown arxiv sort_order {order:?}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PubmedParams {
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossrefParams {
    pub keywords: Vec<String>,
    /// Restrict to `type=journal-article`.
    pub journal_articles_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenalexParams {
    pub keywords: Vec<String>,
    pub concepts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticScholarParams {
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserParams {
    pub workflow: BrowserWorkflow,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Values for the workflow's credentials slot, when it has one.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hourly() -> Schedule {
        Schedule {
            interval_minutes: Some(60),
            ..Schedule::default()
        }
    }

    fn arxiv_config() -> SourceConfig {
        SourceConfig {
            name: "arxiv_ml".to_string(),
            kind: SourceKind::Arxiv,
            is_active: true,
            adapter_params: json!({
                "categories": ["cs.LG"],
                "keywords": ["transformer"],
            }),
            schedule: hourly(),
            filters: SourceFilters::default(),
            max_papers_per_run: Some(3),
            fan_out: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(arxiv_config().validate().is_ok());
    }

    #[test]
    fn schedule_needs_interval_or_time() {
        let s = Schedule {
            interval_minutes: None,
            time_of_day: None,
            ..Schedule::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn schedule_rejects_zero_interval() {
        let s = Schedule {
            interval_minutes: Some(0),
            ..Schedule::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn schedule_parses_time_of_day() {
        let s = Schedule {
            time_of_day: Some("09:30".to_string()),
            ..Schedule::default()
        };
        assert!(s.validate().is_ok());
        assert_eq!(
            s.time_of_day_parsed(),
            Some(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );
    }

    #[test]
    fn schedule_rejects_bad_time_of_day() {
        let s = Schedule {
            time_of_day: Some("25:99".to_string()),
            ..Schedule::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn day_enabled_without_restriction() {
        assert!(hourly().day_enabled(Weekday::Wed));
    }

    #[test]
    fn day_enabled_with_mask() {
        let s = Schedule {
            interval_minutes: Some(60),
            days_of_week: Some(vec![DayOfWeek::Mon, DayOfWeek::Fri]),
            ..Schedule::default()
        };
        assert!(s.day_enabled(Weekday::Mon));
        assert!(!s.day_enabled(Weekday::Tue));
    }

    #[test]
    fn config_rejects_bad_name() {
        let mut c = arxiv_config();
        c.name = "has space".to_string();
        assert!(c.validate().is_err());
        c.name = String::new();
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_rejects_zero_max_papers() {
        let mut c = arxiv_config();
        c.max_papers_per_run = Some(0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn max_papers_falls_back_to_default() {
        let mut c = arxiv_config();
        assert_eq!(c.max_papers(50), 3);
        c.max_papers_per_run = None;
        assert_eq!(c.max_papers(50), 50);
    }

    #[test]
    fn filters_reject_out_of_range_threshold() {
        let f = SourceFilters {
            relevance_threshold: Some(1.5),
            ..SourceFilters::default()
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn filters_reject_inverted_date_range() {
        let f = SourceFilters {
            date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            date_to: NaiveDate::from_ymd_opt(2020, 1, 1),
            ..SourceFilters::default()
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn typed_params_parse_per_kind() {
        let c = arxiv_config();
        match c.typed_params().unwrap() {
            AdapterParams::Arxiv(p) => {
                assert_eq!(p.categories, vec!["cs.LG"]);
                assert_eq!(p.keywords, vec!["transformer"]);
            }
            other => panic!("wrong params kind: {other:?}"),
        }
    }

    #[test]
    fn typed_params_reject_bad_sort() {
        let mut c = arxiv_config();
        c.adapter_params = json!({"sort_by": "citations"});
        assert!(c.validate().is_err());
    }

    #[test]
    fn null_params_default_for_api_kinds() {
        let mut c = arxiv_config();
        c.adapter_params = serde_json::Value::Null;
        assert!(c.typed_params().is_ok());
    }

    #[test]
    fn browser_kind_requires_workflow() {
        let mut c = arxiv_config();
        c.kind = SourceKind::Browser;
        c.adapter_params = serde_json::Value::Null;
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_json_round_trip() {
        let c = arxiv_config();
        let json = serde_json::to_string(&c).unwrap();
        let back: SourceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, c.name);
        assert_eq!(back.kind, c.kind);
        assert_eq!(back.max_papers_per_run, Some(3));
        assert!(back.validate().is_ok());
    }
}
