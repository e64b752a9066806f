//! Represents the billable window of a rental.

use crate::services::rental_days::{RentalDaysError, calculate_rental_days};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Start and end instants of a rental.
///
/// `end >= start` is expected; `billable_days` rejects reversed periods.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RentalPeriod {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl RentalPeriod {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    pub fn billable_days(&self) -> Result<u32, RentalDaysError> {
        calculate_rental_days(&self.start, &self.end)
    }
}
