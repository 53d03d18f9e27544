use crate::domain::models::Quarter;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};

/// A half-open `[started_at, finished_at)` range, so back-to-back quarters
/// don't overlap. Only [`Period::new`] and stored quarters produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl Period {
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> AppResult<Self> {
        if started_at >= finished_at {
            return Err(AppError::invalid("quarter must start before it finishes"));
        }
        Ok(Self {
            started_at,
            finished_at,
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        self.started_at < other.finished_at && other.started_at < self.finished_at
    }
}

impl From<&Quarter> for Period {
    fn from(quarter: &Quarter) -> Self {
        Self {
            started_at: quarter.started_at,
            finished_at: quarter.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, month, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_or_inverted_periods_are_rejected() {
        assert!(Period::new(at(4), at(4)).is_err());
        assert!(Period::new(at(7), at(4)).is_err());
    }

    #[test]
    fn adjacent_quarters_do_not_overlap() {
        let q1 = Period::new(at(1), at(4)).unwrap();
        let q2 = Period::new(at(4), at(7)).unwrap();
        assert!(!q1.overlaps(&q2));
        assert!(!q2.overlaps(&q1));
    }

    #[test]
    fn partial_and_nested_ranges_overlap() {
        let q1 = Period::new(at(1), at(4)).unwrap();
        assert!(q1.overlaps(&Period::new(at(3), at(6)).unwrap()));
        assert!(q1.overlaps(&Period::new(at(2), at(3)).unwrap()));
    }
}
