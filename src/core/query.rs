use crate::utils::error::{Result, ReviewError};
use crate::utils::validation::validate_iso_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MAX_COUNT: usize = 150;
pub const MIN_STARS: u8 = 1;
pub const MAX_STARS: u8 = 5;

/// Per-caller view over a result: rating range, date range and a review cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub min_rating: Option<u8>,
    pub max_rating: Option<u8>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub count: Option<usize>,
}

impl QueryOptions {
    /// Builds options from raw query parameters
    /// (`count`, `minRating`, `maxRating`, `dateStart`, `dateEnd`).
    ///
    /// Out-of-range numbers are clamped, reversed ranges are swapped,
    /// unknown names are ignored. Non-numeric values and malformed dates are errors.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = QueryOptions::default();

        for (name, value) in pairs {
            let value = value.as_ref();
            match name.as_ref() {
                "count" => {
                    options.count = Some(parse_clamped(value, 0, MAX_COUNT as i64, "count")? as usize)
                }
                "minRating" => {
                    options.min_rating = Some(parse_clamped(
                        value,
                        MIN_STARS as i64,
                        MAX_STARS as i64,
                        "minRating",
                    )? as u8)
                }
                "maxRating" => {
                    options.max_rating = Some(parse_clamped(
                        value,
                        MIN_STARS as i64,
                        MAX_STARS as i64,
                        "maxRating",
                    )? as u8)
                }
                "dateStart" => options.date_start = Some(validate_iso_date("dateStart", value)?),
                "dateEnd" => options.date_end = Some(validate_iso_date("dateEnd", value)?),
                other => tracing::debug!("Ignoring unknown query parameter: {}", other),
            }
        }

        if let (Some(min), Some(max)) = (options.min_rating, options.max_rating) {
            if min > max {
                tracing::warn!("minRating was greater than maxRating, swapping them");
                options.min_rating = Some(max);
                options.max_rating = Some(min);
            }
        }

        if let (Some(start), Some(end)) = (options.date_start, options.date_end) {
            if start > end {
                tracing::warn!("dateStart was after dateEnd, swapping them");
                options.date_start = Some(end);
                options.date_end = Some(start);
            }
        }

        Ok(options)
    }

    pub fn has_rating_bounds(&self) -> bool {
        self.min_rating.is_some() || self.max_rating.is_some()
    }

    pub fn has_date_bounds(&self) -> bool {
        self.date_start.is_some() || self.date_end.is_some()
    }
}

fn parse_clamped(raw: &str, min: i64, max: i64, name: &str) -> Result<i64> {
    let value: i64 = raw.trim().parse().map_err(|_| ReviewError::ValidationError {
        message: format!("{} must be an integer", name),
    })?;
    Ok(value.clamp(min, max))
}
