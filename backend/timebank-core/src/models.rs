// src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalStatus;

pub const USERS: &str = "users";
pub const WORK_ENTRIES: &str = "workEntries";
pub const ABSENCES: &str = "absences";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkEntryType {
    #[default]
    Earned,
    Used,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsenceType {
    Vacation,
    Medical,
    Personal,
    Other,
}

fn default_true() -> bool {
    true
}

/// Application user. Documents are keyed either by the provider subject id or
/// by the normalized email; in the latter case `uid` holds the subject id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    // Documents written before the flag existed count as active.
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Every `userId` value under which this user's records may be filed.
    pub fn record_keys(&self) -> Vec<&str> {
        record_keys(&self.id, self.uid.as_deref())
    }
}

/// The document id, plus the provider uid when it is set and differs.
pub fn record_keys<'a>(id: &'a str, uid: Option<&'a str>) -> Vec<&'a str> {
    let mut keys = vec![id];
    if let Some(uid) = uid.filter(|uid| !uid.is_empty() && *uid != id) {
        keys.push(uid);
    }
    keys
}

/// Trimmed copy of `s`, or `None` when it is blank.
pub fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkEntry {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "userid")]
    pub user_id: String,
    #[serde(rename = "type")]
    pub entry_type: WorkEntryType,
    pub hours: Decimal,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Absence {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "userid")]
    pub user_id: String,
    #[serde(rename = "type")]
    pub absence_type: AbsenceType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_full_day: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

// --- Write-side inputs ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkEntry {
    #[serde(default, rename = "type")]
    pub entry_type: WorkEntryType,
    pub hours: Decimal,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAbsence {
    #[serde(rename = "type")]
    pub absence_type: AbsenceType,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub is_full_day: bool,
    #[serde(default)]
    pub description: String,
}

/// Absence requested from the calendar; the viewed day is the start date.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAbsenceRequest {
    #[serde(rename = "type")]
    pub absence_type: AbsenceType,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub is_full_day: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(alias = "name", default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
}
