// src/report.rs
use chrono::TimeZone;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::approval::ApprovalStatus;
use crate::day_span::days_inclusive;
use crate::models::{Absence, AbsenceType, User, WorkEntry, WorkEntryType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub user_id: String,
    pub user_name: String,
    pub email: String,
    pub total_earned: Decimal,
    pub total_used: Decimal,
    /// Earned minus used. Unlike the dashboard total this may go negative.
    pub balance: Decimal,
    pub vacation_days: i64,
    pub medical_days: i64,
    pub personal_days: i64,
}

/// One row per user, in `users` order, including users with no records.
pub fn build_report<Tz: TimeZone>(
    users: &[User],
    entries: &[WorkEntry],
    absences: &[Absence],
    tz: &Tz,
) -> Vec<ReportRow> {
    users
        .iter()
        .map(|user| report_row(user, entries, absences, tz))
        .collect()
}

fn report_row<Tz: TimeZone>(
    user: &User,
    entries: &[WorkEntry],
    absences: &[Absence],
    tz: &Tz,
) -> ReportRow {
    let keys = user.record_keys();

    let mut total_earned = Decimal::ZERO;
    let mut total_used = Decimal::ZERO;
    for entry in entries
        .iter()
        .filter(|e| e.status == ApprovalStatus::Approved && keys.contains(&e.user_id.as_str()))
    {
        match entry.entry_type {
            WorkEntryType::Earned => total_earned += entry.hours,
            WorkEntryType::Used => total_used += entry.hours,
        }
    }

    let (mut vacation_days, mut medical_days, mut personal_days) = (0, 0, 0);
    for absence in absences
        .iter()
        .filter(|a| a.status == ApprovalStatus::Approved && keys.contains(&a.user_id.as_str()))
    {
        let days = days_inclusive(&absence.start_date, &absence.end_date, tz);
        match absence.absence_type {
            AbsenceType::Vacation => vacation_days += days,
            AbsenceType::Medical => medical_days += days,
            AbsenceType::Personal => personal_days += days,
            AbsenceType::Other => {}
        }
    }

    ReportRow {
        user_id: user.id.clone(),
        user_name: user.display_name.clone(),
        email: user.email.clone(),
        total_earned,
        total_used,
        balance: total_earned - total_used,
        vacation_days,
        medical_days,
        personal_days,
    }
}
