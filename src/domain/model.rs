use crate::utils::error::ReviewError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External review site a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "yandex")]
    Yandex,
    #[serde(rename = "2gis")]
    TwoGis,
    #[serde(rename = "doctors")]
    Doctors,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Yandex, SourceKind::TwoGis, SourceKind::Doctors];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Yandex => "yandex",
            SourceKind::TwoGis => "2gis",
            SourceKind::Doctors => "doctors",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ReviewError::ValidationError {
                message: format!(
                    "Unknown source kind '{}', expected one of: yandex, 2gis, doctors",
                    s
                ),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "name")]
    pub author_name: String,
    pub text: String,
    #[serde(rename = "rating")]
    pub rating_stars: Option<u8>,
    #[serde(rename = "avatar")]
    pub avatar_url: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Structured data scraped from one business listing. Reviews stay in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub name: Option<String>,
    pub rating: Option<String>,
    #[serde(rename = "count_reviews")]
    pub review_count: Option<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

/// One execution slot (a browser profile) leased from the resource pool.
///
/// Not `Clone`: each lease exists exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Lease {
    id: usize,
}

impl Lease {
    pub(crate) fn new(id: usize) -> Self {
        Self { id }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile-{}", self.id)
    }
}

/// Last known good result for a request key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: String,
    pub kind: SourceKind,
    pub url: String,
    pub data: ParseResult,
    pub updated_at: DateTime<Utc>,
}
