use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// One day of a displayed month and which device is booked by whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub day: u32,
    pub date: Day,
    pub occupancy: BTreeMap<Ulid, Reservation>,
}

/// Two reservations for the same device claim the same day. Admission never
/// produces this; seeing it means something wrote around the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    pub date: Day,
    pub device_id: Ulid,
    pub kept: Ulid,
    pub displaced: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthCalendar {
    pub year: i32,
    pub month: u32,
    /// Ascending by day, one cell per day of the month.
    pub days: Vec<DayCell>,
    pub warnings: Vec<ConsistencyWarning>,
}

impl MonthCalendar {
    pub fn cell(&self, day: u32) -> Option<&DayCell> {
        day.checked_sub(1).and_then(|i| self.days.get(i as usize))
    }
}

/// The `[first day, first day of next month)` window for a month.
pub fn month_span(year: i32, month: u32) -> Option<DateSpan> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(DateSpan::new(first, next))
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    month_span(year, month).map(|s| s.days() as u32)
}

/// Project reservations onto the days of one month.
///
/// Each reservation is clamped to the month and recorded on every day it covers.
/// When two reservations for one device cover the same day the later one in
/// input order wins and the collision is reported in `warnings`.
pub fn project_calendar(
    year: i32,
    month: u32,
    reservations: &[Reservation],
) -> Result<MonthCalendar, EngineError> {
    let window = month_span(year, month).ok_or(EngineError::InvalidMonth { year, month })?;

    let mut days: Vec<DayCell> = window
        .start
        .iter_days()
        .take_while(|d| *d < window.end)
        .map(|date| DayCell {
            day: date.day(),
            date,
            occupancy: BTreeMap::new(),
        })
        .collect();
    let mut warnings = Vec::new();

    for r in reservations {
        let Some(covered) = r.span.clamp_to(&window) else {
            continue;
        };
        for date in covered.start.iter_days().take_while(|d| *d < covered.end) {
            let cell = &mut days[date.day0() as usize];
            if let Some(prev) = cell.occupancy.insert(r.device_id, r.clone())
                && prev.id != r.id
            {
                tracing::warn!(
                    "calendar {date}: device {} double-booked by {} and {}",
                    r.device_id,
                    prev.id,
                    r.id
                );
                warnings.push(ConsistencyWarning {
                    date,
                    device_id: r.device_id,
                    kept: r.id,
                    displaced: prev.id,
                });
            }
        }
    }

    metrics::counter!(crate::observability::CALENDAR_PROJECTIONS_TOTAL).increment(1);
    if !warnings.is_empty() {
        metrics::counter!(crate::observability::CONSISTENCY_WARNINGS_TOTAL)
            .increment(warnings.len() as u64);
    }

    Ok(MonthCalendar {
        year,
        month,
        days,
        warnings,
    })
}
