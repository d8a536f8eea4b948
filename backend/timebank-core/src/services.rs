// src/services.rs
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::approval::{
    decision_patch, Approvable, ApprovalOutcome, ApprovalStatus, Decision, EntityKind, PendingItem,
    Transition,
};
use crate::balance::{
    compute_balance_for_keys, upcoming_absences, BalanceSummary, UPCOMING_ABSENCE_LIMIT,
};
use crate::csv_export::{render_report_csv, report_filename};
use crate::day_span::{day_bounds, local_day, start_of_day};
use crate::error::AppError;
use crate::identity::ResolvedUser;
use crate::models::{
    non_empty, Absence, DayAbsenceRequest, NewAbsence, NewWorkEntry, WorkEntry, ABSENCES,
    WORK_ENTRIES,
};
use crate::occupancy::{occupancy_for_day, DayOccupant, UserDirectory};
use crate::report::{build_report, ReportRow};
use crate::repository::Repository;
use crate::store::{Direction, FilterOp, Query};
use crate::validation::{validate_absence, validate_work_entry};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(flatten)]
    pub balance: BalanceSummary,
    pub upcoming_absences: Vec<Absence>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAbsenceOutcome {
    pub absence: Absence,
    pub occupants: Vec<DayOccupant>,
}

/// Use cases over the record store. Calendar days are interpreted in the
/// server's local time zone.
#[derive(Clone)]
pub struct TimeBank {
    pub(crate) repo: Repository,
    pub(crate) clock: Arc<dyn Clock>,
}

impl TimeBank {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        local_day(&self.now(), &Local)
    }

    // --- Submissions ---

    pub async fn submit_work_entry(
        &self,
        user: &ResolvedUser,
        input: NewWorkEntry,
    ) -> Result<WorkEntry, AppError> {
        let day = validate_work_entry(&input)?;

        let mut entry = WorkEntry {
            id: String::new(),
            user_id: user.id.clone(),
            entry_type: input.entry_type,
            hours: input.hours,
            date: start_of_day(day, &Local),
            description: input.description.trim().to_string(),
            status: ApprovalStatus::Pending,
            created_at: self.now(),
            approved_by: None,
            updated_at: None,
            user_name: non_empty(&user.display_name),
            user_email: non_empty(&user.email),
        };
        entry.id = self.repo.create(WORK_ENTRIES, &entry).await?;

        info!(
            "User {} submitted {:?} entry {} ({} h on {})",
            user.id, entry.entry_type, entry.id, entry.hours, day
        );
        Ok(entry)
    }

    pub async fn submit_absence(
        &self,
        user: &ResolvedUser,
        input: NewAbsence,
    ) -> Result<Absence, AppError> {
        let (start, end) = validate_absence(&input)?;

        let mut absence = Absence {
            id: String::new(),
            user_id: user.id.clone(),
            absence_type: input.absence_type,
            start_date: start_of_day(start, &Local),
            end_date: start_of_day(end, &Local),
            is_full_day: input.is_full_day,
            description: input.description.trim().to_string(),
            status: ApprovalStatus::Pending,
            created_at: self.now(),
            created_by: Some(user.id.clone()),
            approved_by: None,
            updated_at: None,
            user_name: non_empty(&user.display_name),
            user_email: non_empty(&user.email),
        };
        absence.id = self.repo.create(ABSENCES, &absence).await?;

        info!(
            "User {} requested {:?} absence {} ({} to {})",
            user.id, absence.absence_type, absence.id, start, end
        );
        Ok(absence)
    }

    // --- Own history ---

    async fn owned<T: DeserializeOwned>(
        &self,
        user: &ResolvedUser,
        collection: &str,
        query: Query,
    ) -> Result<Vec<T>, AppError> {
        let mut records = Vec::new();
        for key in user.record_keys() {
            let mut found: Vec<T> = self
                .repo
                .find(collection, &query.clone().eq("userId", key))
                .await?;
            records.append(&mut found);
        }
        Ok(records)
    }

    pub async fn own_work_entries(&self, user: &ResolvedUser) -> Result<Vec<WorkEntry>, AppError> {
        let mut entries: Vec<WorkEntry> = self.owned(user, WORK_ENTRIES, Query::new()).await?;
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }

    pub async fn own_absences(&self, user: &ResolvedUser) -> Result<Vec<Absence>, AppError> {
        let mut absences: Vec<Absence> = self.owned(user, ABSENCES, Query::new()).await?;
        absences.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(absences)
    }

    // --- Dashboard ---

    pub async fn dashboard(&self, user: &ResolvedUser) -> Result<Dashboard, AppError> {
        let now = self.now();
        let today = local_day(&now, &Local);
        let approved = Query::new().eq("status", ApprovalStatus::Approved.as_str());
        let entries: Vec<WorkEntry> = self.owned(user, WORK_ENTRIES, approved.clone()).await?;
        let upcoming_query = approved
            .filter("endDate", FilterOp::Gte, serde_json::json!(start_of_day(today, &Local)))
            .order_by("startDate", Direction::Asc)
            .limit(UPCOMING_ABSENCE_LIMIT);
        let absences: Vec<Absence> = self.owned(user, ABSENCES, upcoming_query).await?;

        let keys = user.record_keys();
        Ok(Dashboard {
            balance: compute_balance_for_keys(&entries, &keys, now, &Local),
            upcoming_absences: upcoming_absences(
                &absences,
                &keys,
                today,
                UPCOMING_ABSENCE_LIMIT,
                &Local,
            ),
        })
    }

    // --- Calendar ---

    pub async fn day_occupancy(&self, day: NaiveDate) -> Result<Vec<DayOccupant>, AppError> {
        let (from, to) = day_bounds(day, &Local);
        let approved = Query::new().eq("status", ApprovalStatus::Approved.as_str());

        let entries: Vec<WorkEntry> = self
            .repo
            .find(
                WORK_ENTRIES,
                &approved
                    .clone()
                    .filter("date", FilterOp::Gte, serde_json::json!(from))
                    .filter("date", FilterOp::Lt, serde_json::json!(to)),
            )
            .await?;
        let absences: Vec<Absence> = self
            .repo
            .find(
                ABSENCES,
                &approved.filter("startDate", FilterOp::Lt, serde_json::json!(to)),
            )
            .await?;
        let directory = UserDirectory::from_users(&self.repo.users().await?);

        Ok(occupancy_for_day(day, &entries, &absences, &directory, &Local))
    }

    /// Files a pending absence starting on `day` and re-reads the day.
    pub async fn request_absence_for_day(
        &self,
        user: &ResolvedUser,
        day: NaiveDate,
        request: DayAbsenceRequest,
    ) -> Result<DayAbsenceOutcome, AppError> {
        let absence = self
            .submit_absence(
                user,
                NewAbsence {
                    absence_type: request.absence_type,
                    start_date: Some(day),
                    end_date: Some(request.end_date.unwrap_or(day)),
                    is_full_day: request.is_full_day,
                    description: request.description,
                },
            )
            .await?;
        let occupants = self.day_occupancy(day).await?;
        Ok(DayAbsenceOutcome { absence, occupants })
    }

    // --- Approvals ---

    async fn pending<T: Approvable + DeserializeOwned>(
        &self,
        admin: &ResolvedUser,
    ) -> Result<Vec<PendingItem<T>>, AppError> {
        admin.require_admin()?;
        let records: Vec<T> = self
            .repo
            .find(
                T::KIND.collection(),
                &Query::new()
                    .eq("status", ApprovalStatus::Pending.as_str())
                    .order_by("createdAt", Direction::Desc),
            )
            .await?;
        Ok(records.into_iter().map(PendingItem::new).collect())
    }

    pub async fn pending_work_entries(
        &self,
        admin: &ResolvedUser,
    ) -> Result<Vec<PendingItem<WorkEntry>>, AppError> {
        self.pending(admin).await
    }

    pub async fn pending_absences(
        &self,
        admin: &ResolvedUser,
    ) -> Result<Vec<PendingItem<Absence>>, AppError> {
        self.pending(admin).await
    }

    async fn decide<T: Approvable + DeserializeOwned>(
        &self,
        admin: &ResolvedUser,
        id: &str,
        decision: Decision,
    ) -> Result<ApprovalOutcome, AppError> {
        admin.require_admin()?;
        let collection = T::KIND.collection();
        let record: T = self
            .repo
            .fetch(collection, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", collection, id)))?;

        match record.status().decide(decision) {
            Transition::Applied(status) => {
                self.repo
                    .patch(collection, id, decision_patch(status, &admin.id, self.now()))
                    .await?;
                info!("{} {}/{} by {}", status, collection, id, admin.id);
                Ok(ApprovalOutcome {
                    kind: T::KIND,
                    id: id.to_string(),
                    status,
                    changed: true,
                })
            }
            Transition::Unchanged(status) => {
                info!("{}/{} already {}; {:?} ignored", collection, id, status, decision);
                Ok(ApprovalOutcome {
                    kind: T::KIND,
                    id: id.to_string(),
                    status,
                    changed: false,
                })
            }
        }
    }

    pub async fn approve(
        &self,
        admin: &ResolvedUser,
        kind: EntityKind,
        id: &str,
    ) -> Result<ApprovalOutcome, AppError> {
        match kind {
            EntityKind::WorkEntry => self.decide::<WorkEntry>(admin, id, Decision::Approve).await,
            EntityKind::Absence => self.decide::<Absence>(admin, id, Decision::Approve).await,
        }
    }

    pub async fn reject(
        &self,
        admin: &ResolvedUser,
        kind: EntityKind,
        id: &str,
    ) -> Result<ApprovalOutcome, AppError> {
        match kind {
            EntityKind::WorkEntry => self.decide::<WorkEntry>(admin, id, Decision::Reject).await,
            EntityKind::Absence => self.decide::<Absence>(admin, id, Decision::Reject).await,
        }
    }

    // --- Reports ---

    /// Report over every user. Callers outside the HTTP surface (the CLI)
    /// are trusted operators.
    pub async fn report_rows(&self) -> Result<Vec<ReportRow>, AppError> {
        let approved = Query::new().eq("status", ApprovalStatus::Approved.as_str());
        let users = self.repo.users().await?;
        let entries: Vec<WorkEntry> = self.repo.find(WORK_ENTRIES, &approved).await?;
        let absences: Vec<Absence> = self.repo.find(ABSENCES, &approved).await?;
        Ok(build_report(&users, &entries, &absences, &Local))
    }

    pub async fn report(&self, admin: &ResolvedUser) -> Result<Vec<ReportRow>, AppError> {
        admin.require_admin()?;
        self.report_rows().await
    }

    /// Returns `(file name, CSV body)`.
    pub async fn report_csv(&self, admin: &ResolvedUser) -> Result<(String, String), AppError> {
        let rows = self.report(admin).await?;
        Ok((report_filename(self.today()), render_report_csv(&rows)?))
    }
}
