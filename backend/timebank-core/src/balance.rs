// src/balance.rs
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::approval::ApprovalStatus;
use crate::day_span::{local_day, month_start};
use crate::models::{Absence, WorkEntry, WorkEntryType};

/// Number of upcoming absences shown on the dashboard.
pub const UPCOMING_ABSENCE_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub total_balance: Decimal,
    pub period_earned: Decimal,
    pub period_used: Decimal,
}

pub fn compute_balance<Tz: TimeZone>(
    entries: &[WorkEntry],
    user_id: &str,
    now: DateTime<Utc>,
    tz: &Tz,
) -> BalanceSummary {
    compute_balance_for_keys(entries, &[user_id], now, tz)
}

/// Balance over entries filed under any of `user_keys`.
///
/// The running total sums every approved entry; the period sums cover the
/// current local month up to `now`. A negative total is reported as zero.
pub fn compute_balance_for_keys<Tz: TimeZone>(
    entries: &[WorkEntry],
    user_keys: &[&str],
    now: DateTime<Utc>,
    tz: &Tz,
) -> BalanceSummary {
    let period_start = month_start(&now, tz);

    let mut running = Decimal::ZERO;
    let mut period_earned = Decimal::ZERO;
    let mut period_used = Decimal::ZERO;

    for entry in entries
        .iter()
        .filter(|e| e.status == ApprovalStatus::Approved)
        .filter(|e| user_keys.contains(&e.user_id.as_str()))
    {
        let in_period = entry.date >= period_start && entry.date <= now;
        match entry.entry_type {
            WorkEntryType::Earned => {
                running += entry.hours;
                if in_period {
                    period_earned += entry.hours;
                }
            }
            WorkEntryType::Used => {
                running -= entry.hours;
                if in_period {
                    period_used += entry.hours;
                }
            }
        }
    }

    BalanceSummary {
        total_balance: running.max(Decimal::ZERO),
        period_earned,
        period_used,
    }
}

/// Approved absences of the user that have not ended before `today`,
/// soonest first.
pub fn upcoming_absences<Tz: TimeZone>(
    absences: &[Absence],
    user_keys: &[&str],
    today: NaiveDate,
    limit: usize,
    tz: &Tz,
) -> Vec<Absence> {
    let mut upcoming: Vec<Absence> = absences
        .iter()
        .filter(|a| a.status == ApprovalStatus::Approved)
        .filter(|a| user_keys.contains(&a.user_id.as_str()))
        .filter(|a| local_day(&a.end_date, tz) >= today)
        .cloned()
        .collect();
    upcoming.sort_by_key(|a| a.start_date);
    upcoming.truncate(limit);
    upcoming
}
