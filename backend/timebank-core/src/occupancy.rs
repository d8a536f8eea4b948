// src/occupancy.rs
use std::collections::HashMap;

use chrono::{NaiveDate, TimeZone};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::approval::ApprovalStatus;
use crate::day_span::{is_within_day, local_day};
use crate::models::{non_empty, Absence, AbsenceType, User, WorkEntry, WorkEntryType};

/// Label used when a record's owner is not in the directory.
pub const UNKNOWN_USER_LABEL: &str = "Usuario";

/// Display names keyed by every id a user's records may carry.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    names: HashMap<String, String>,
}

impl UserDirectory {
    pub fn from_users(users: &[User]) -> Self {
        let mut names = HashMap::new();
        for user in users {
            let name = if user.display_name.trim().is_empty() {
                UNKNOWN_USER_LABEL.to_string()
            } else {
                user.display_name.clone()
            };
            for key in user.record_keys() {
                names.insert(key.to_string(), name.clone());
            }
        }
        Self { names }
    }

    pub fn display_name(&self, user_id: &str) -> &str {
        self.names
            .get(user_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_USER_LABEL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyType {
    Earned,
    Used,
    Vacation,
    Medical,
    Personal,
    Other,
}

impl From<WorkEntryType> for OccupancyType {
    fn from(t: WorkEntryType) -> Self {
        match t {
            WorkEntryType::Earned => OccupancyType::Earned,
            WorkEntryType::Used => OccupancyType::Used,
        }
    }
}

impl From<AbsenceType> for OccupancyType {
    fn from(t: AbsenceType) -> Self {
        match t {
            AbsenceType::Vacation => OccupancyType::Vacation,
            AbsenceType::Medical => OccupancyType::Medical,
            AbsenceType::Personal => OccupancyType::Personal,
            AbsenceType::Other => OccupancyType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayOccupant {
    pub user_id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: OccupancyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Who is registered on `day`: approved entries dated that day, followed by
/// approved absences spanning it, each in input order.
pub fn occupancy_for_day<Tz: TimeZone>(
    day: NaiveDate,
    entries: &[WorkEntry],
    absences: &[Absence],
    directory: &UserDirectory,
    tz: &Tz,
) -> Vec<DayOccupant> {
    let from_entries = entries
        .iter()
        .filter(|e| e.status == ApprovalStatus::Approved)
        .filter(|e| is_within_day(&e.date, day, tz))
        .map(|e| DayOccupant {
            user_id: e.user_id.clone(),
            display_name: directory.display_name(&e.user_id).to_string(),
            kind: e.entry_type.into(),
            hours: Some(e.hours),
            description: non_empty(&e.description),
        });

    let from_absences = absences
        .iter()
        .filter(|a| a.status == ApprovalStatus::Approved)
        .filter(|a| local_day(&a.start_date, tz) <= day && day <= local_day(&a.end_date, tz))
        .map(|a| DayOccupant {
            user_id: a.user_id.clone(),
            display_name: directory.display_name(&a.user_id).to_string(),
            kind: a.absence_type.into(),
            hours: None,
            description: non_empty(&a.description),
        });

    from_entries.chain(from_absences).collect()
}
