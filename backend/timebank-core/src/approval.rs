// src/approval.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::{Absence, WorkEntry, ABSENCES, WORK_ENTRIES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(ApprovalStatus),
    /// The record had already left `pending`; nothing changes.
    Unchanged(ApprovalStatus),
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    pub fn decide(self, decision: Decision) -> Transition {
        if self.is_terminal() {
            return Transition::Unchanged(self);
        }
        match decision {
            Decision::Approve => Transition::Applied(ApprovalStatus::Approved),
            Decision::Reject => Transition::Applied(ApprovalStatus::Rejected),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which collection an approval targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    WorkEntry,
    Absence,
}

impl EntityKind {
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::WorkEntry => WORK_ENTRIES,
            EntityKind::Absence => ABSENCES,
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work-entries" | "workEntries" | "work-entry" | "workEntry" => {
                Ok(EntityKind::WorkEntry)
            }
            "absences" | "absence" => Ok(EntityKind::Absence),
            other => Err(format!("unknown record kind '{}'", other)),
        }
    }
}

/// Records that move through the approval lifecycle.
pub trait Approvable {
    const KIND: EntityKind;

    fn status(&self) -> ApprovalStatus;
    fn owner_id(&self) -> &str;
    fn owner_name(&self) -> Option<&str>;
    fn owner_email(&self) -> Option<&str>;
}

macro_rules! impl_approvable {
    ($ty:ty, $kind:expr) => {
        impl Approvable for $ty {
            const KIND: EntityKind = $kind;

            fn status(&self) -> ApprovalStatus {
                self.status
            }
            fn owner_id(&self) -> &str {
                &self.user_id
            }
            fn owner_name(&self) -> Option<&str> {
                self.user_name.as_deref()
            }
            fn owner_email(&self) -> Option<&str> {
                self.user_email.as_deref()
            }
        }
    };
}

impl_approvable!(WorkEntry, EntityKind::WorkEntry);
impl_approvable!(Absence, EntityKind::Absence);

/// The single-document field update written when a decision applies.
pub fn decision_patch(
    status: ApprovalStatus,
    approver_id: &str,
    at: DateTime<Utc>,
) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("status".into(), json!(status));
    patch.insert("approvedBy".into(), json!(approver_id));
    patch.insert("updatedAt".into(), json!(at));
    patch
}

/// First non-empty of denormalized name, denormalized email, user id.
pub fn display_name_for<T: Approvable>(record: &T) -> String {
    [record.owner_name(), record.owner_email()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| record.owner_id())
        .to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem<T> {
    #[serde(flatten)]
    pub record: T,
    pub display_name: String,
}

impl<T: Approvable> PendingItem<T> {
    pub fn new(record: T) -> Self {
        let display_name = display_name_for(&record);
        Self {
            record,
            display_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub kind: EntityKind,
    pub id: String,
    pub status: ApprovalStatus,
    pub changed: bool,
}
