//! `GET /rentals/days`: billable day count for a rental window.

use crate::{
    errors::AppError,
    models::rental::RentalPeriod,
    services::rental_days::calculate_rental_days_naive,
};
use axum::{Json, extract::Query};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Deserialize)]
pub struct RentalDaysQuery {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct RentalDaysResponse {
    pub days: u32,
}

#[derive(Clone, Copy, Debug)]
enum Timestamp {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

impl Timestamp {
    fn parse(field: &'static str, raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Timestamp::Zoned(zoned));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(Timestamp::Local)
            .ok_or_else(|| {
                AppError::validation(
                    field,
                    format!("`{}` is neither RFC 3339 nor YYYY-MM-DDTHH:MM[:SS]", raw),
                )
            })
    }

    fn naive(self) -> NaiveDateTime {
        match self {
            Timestamp::Zoned(zoned) => zoned.naive_local(),
            Timestamp::Local(naive) => naive,
        }
    }
}

/// Zoned pairs are compared in the start's offset. If either side lacks an
/// offset, both are read as wall-clock times.
pub async fn rental_days(
    Query(q): Query<RentalDaysQuery>,
) -> Result<Json<RentalDaysResponse>, AppError> {
    let start = Timestamp::parse("start", &q.start)?;
    let end = Timestamp::parse("end", &q.end)?;

    let days = match (start, end) {
        (Timestamp::Zoned(start), Timestamp::Zoned(end)) => {
            RentalPeriod::new(start, end).billable_days()?
        }
        (start, end) => calculate_rental_days_naive(start.naive(), end.naive())?,
    };

    tracing::debug!(start = %q.start, end = %q.end, days, "computed rental days");
    Ok(Json(RentalDaysResponse { days }))
}
