use crate::config::ConfigurationError;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Longest annotation label the vendor accepts.
pub const ANNOTATION_NAME_MAX_LEN: usize = 255;

static CHART_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,}$").expect("invalid chart id regex"));

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid chart id: {0:?}")]
pub struct InvalidChartId(pub String);

/// A normalized chart identifier, e.g. `ez25o7zy`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChartId(String);

impl ChartId {
    pub fn parse(raw: &str) -> Result<Self, InvalidChartId> {
        let trimmed = raw.trim();
        if Self::is_well_formed(trimmed) {
            Ok(ChartId(trimmed.to_string()))
        } else {
            Err(InvalidChartId(raw.to_string()))
        }
    }

    pub fn is_well_formed(candidate: &str) -> bool {
        CHART_ID_PATTERN.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChartId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The vendor data-center cluster hosting a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    #[default]
    Us,
    Eu,
}

impl Region {
    pub const fn base_url(&self) -> &'static str {
        match self {
            Region::Us => "https://amplitude.com",
            Region::Eu => "https://analytics.eu.amplitude.com",
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Eu => "EU",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "EU" => Ok(Region::Eu),
            _ => Err(ConfigurationError::InvalidRegion(s.to_string())),
        }
    }
}

/// The annotation applied to every chart of a run.
///
/// Built once from operator input and shared read-only by all submissions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationRequest {
    date: NaiveDate,
    name: String,
    description: Option<String>,
}

impl AnnotationRequest {
    pub fn new(
        date: NaiveDate,
        name: &str,
        description: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::InvalidAnnotation(
                "annotation name is required".into(),
            ));
        }
        if name.chars().count() > ANNOTATION_NAME_MAX_LEN {
            return Err(ConfigurationError::InvalidAnnotation(format!(
                "annotation name must be {ANNOTATION_NAME_MAX_LEN} characters or less"
            )));
        }
        if name.contains(['<', '>', '&', '"', '\'']) {
            tracing::warn!(label = name, "annotation name contains markup characters");
        }

        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from);

        Ok(AnnotationRequest {
            date,
            name: name.to_string(),
            description,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}
