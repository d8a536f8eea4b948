// src/services_tests.rs

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Local, NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;

    use crate::approval::{ApprovalStatus, EntityKind};
    use crate::day_span::start_of_day;
    use crate::error::AppError;
    use crate::identity::ResolvedUser;
    use crate::models::{
        AbsenceType, DayAbsenceRequest, NewAbsence, NewUser, NewWorkEntry, Role, WorkEntry,
        WorkEntryType, USERS, WORK_ENTRIES,
    };
    use crate::occupancy::OccupancyType;
    use crate::repository::{Repository, DEFAULT_STORE_TIMEOUT};
    use crate::services::{FixedClock, TimeBank};
    use crate::store::{Document, DocumentStore, MemoryStore, Query, StoreError};
    use crate::validation::ValidationErrorReason;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    /// Noon local time on the given day.
    fn noon(date_str: &str) -> DateTime<Utc> {
        start_of_day(d(date_str), &Local) + chrono::Duration::hours(12)
    }

    fn resolved(id: &str, name: &str, role: Role) -> ResolvedUser {
        ResolvedUser {
            id: id.into(),
            uid: id.into(),
            email: format!("{}@empresa.com", id),
            display_name: name.into(),
            role,
            is_active: true,
        }
    }

    fn obj(value: serde_json::Value) -> Document {
        value.as_object().cloned().expect("JSON object")
    }

    struct TestEnv {
        store: Arc<MemoryStore>,
        timebank: TimeBank,
        ana: ResolvedUser,
        admin: ResolvedUser,
    }

    async fn setup_test_environment(today: &str) -> TestEnv {
        let store = Arc::new(MemoryStore::new());
        for (id, email, name, role) in [
            ("ana", "ana@empresa.com", "Ana", "user"),
            ("jefa", "jefa@empresa.com", "Jefa", "admin"),
        ] {
            let user = obj(json!({"email": email, "displayName": name, "role": role}));
            store.set(USERS, id, user, false).await.unwrap();
        }

        let repo = Repository::new(store.clone(), DEFAULT_STORE_TIMEOUT);
        let timebank = TimeBank::new(repo, Arc::new(FixedClock(noon(today))));
        TestEnv {
            store,
            timebank,
            ana: resolved("ana", "Ana", Role::User),
            admin: resolved("jefa", "Jefa", Role::Admin),
        }
    }

    fn earned(hours: rust_decimal::Decimal, date: &str) -> NewWorkEntry {
        NewWorkEntry {
            entry_type: WorkEntryType::Earned,
            hours,
            date: Some(d(date)),
            description: "Inventario".into(),
        }
    }

    fn vacation(start: &str, end: &str) -> NewAbsence {
        NewAbsence {
            absence_type: AbsenceType::Vacation,
            start_date: Some(d(start)),
            end_date: Some(d(end)),
            is_full_day: true,
            description: String::new(),
        }
    }

    /// Delegates to a memory store but can refuse every call or only writes.
    struct FlakyStore {
        inner: MemoryStore,
        fail_all: bool,
        fail_updates: bool,
    }

    impl FlakyStore {
        fn check(&self, is_update: bool) -> Result<(), StoreError> {
            if self.fail_all || (is_update && self.fail_updates) {
                Err(StoreError::Unavailable("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get(&self, c: &str, id: &str) -> Result<Option<Document>, StoreError> {
            self.check(false)?;
            self.inner.get(c, id).await
        }
        async fn query(&self, c: &str, q: &Query) -> Result<Vec<(String, Document)>, StoreError> {
            self.check(false)?;
            self.inner.query(c, q).await
        }
        async fn insert(&self, c: &str, doc: Document) -> Result<String, StoreError> {
            self.check(false)?;
            self.inner.insert(c, doc).await
        }
        async fn set(
            &self,
            c: &str,
            id: &str,
            doc: Document,
            merge: bool,
        ) -> Result<(), StoreError> {
            self.check(false)?;
            self.inner.set(c, id, doc, merge).await
        }
        async fn update(&self, c: &str, id: &str, fields: Document) -> Result<(), StoreError> {
            self.check(true)?;
            self.inner.update(c, id, fields).await
        }
    }

    #[tokio::test]
    async fn approved_entry_shows_in_dashboard_balance() {
        let env = setup_test_environment("2024-03-15").await;

        let entry = env
            .timebank
            .submit_work_entry(&env.ana, earned(dec!(8), "2024-03-01"))
            .await
            .unwrap();
        assert_eq!(entry.status, ApprovalStatus::Pending);

        let before = env.timebank.dashboard(&env.ana).await.unwrap();
        assert_eq!(before.balance.total_balance, dec!(0));

        let outcome = env
            .timebank
            .approve(&env.admin, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap();
        assert!(outcome.changed);

        let after = env.timebank.dashboard(&env.ana).await.unwrap();
        assert_eq!(after.balance.total_balance, dec!(8));
        assert_eq!(after.balance.period_earned, dec!(8));
        assert_eq!(after.balance.period_used, dec!(0));
    }

    #[tokio::test]
    async fn dashboard_lists_next_three_approved_absences() {
        let env = setup_test_environment("2024-06-01").await;
        for (start, end) in [
            ("2024-07-01", "2024-07-02"),
            ("2024-05-20", "2024-05-22"),
            ("2024-06-20", "2024-06-21"),
            ("2024-05-30", "2024-06-02"),
            ("2024-06-10", "2024-06-12"),
        ] {
            let absence = env
                .timebank
                .submit_absence(&env.ana, vacation(start, end))
                .await
                .unwrap();
            env.timebank
                .approve(&env.admin, EntityKind::Absence, &absence.id)
                .await
                .unwrap();
        }
        env.timebank
            .submit_absence(&env.ana, vacation("2024-06-05", "2024-06-05"))
            .await
            .unwrap();

        let dashboard = env.timebank.dashboard(&env.ana).await.unwrap();
        let starts: Vec<DateTime<Utc>> = dashboard
            .upcoming_absences
            .iter()
            .map(|a| a.start_date)
            .collect();
        assert_eq!(
            starts,
            vec![
                start_of_day(d("2024-05-30"), &Local),
                start_of_day(d("2024-06-10"), &Local),
                start_of_day(d("2024-06-20"), &Local),
            ]
        );
    }

    #[tokio::test]
    async fn absence_appears_in_occupancy_only_after_approval() {
        let env = setup_test_environment("2024-06-01").await;
        let absence = env
            .timebank
            .submit_absence(&env.ana, vacation("2024-06-10", "2024-06-14"))
            .await
            .unwrap();

        let pending_view = env.timebank.day_occupancy(d("2024-06-12")).await.unwrap();
        assert!(pending_view.is_empty());

        env.timebank
            .approve(&env.admin, EntityKind::Absence, &absence.id)
            .await
            .unwrap();

        let approved_view = env.timebank.day_occupancy(d("2024-06-12")).await.unwrap();
        assert_eq!(approved_view.len(), 1);
        assert_eq!(approved_view[0].display_name, "Ana");
        assert_eq!(approved_view[0].kind, OccupancyType::Vacation);

        assert!(env.timebank.day_occupancy(d("2024-06-15")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn occupancy_lists_entries_of_that_day_only() {
        let env = setup_test_environment("2024-06-01").await;
        for date in ["2024-06-11", "2024-06-12", "2024-06-13"] {
            let entry = env
                .timebank
                .submit_work_entry(&env.ana, earned(dec!(2), date))
                .await
                .unwrap();
            env.timebank
                .approve(&env.admin, EntityKind::WorkEntry, &entry.id)
                .await
                .unwrap();
        }

        let occupants = env.timebank.day_occupancy(d("2024-06-12")).await.unwrap();
        assert_eq!(occupants.len(), 1);
        assert_eq!(occupants[0].hours, Some(dec!(2)));
    }

    #[tokio::test]
    async fn day_request_files_pending_absence_and_rereads_the_day() {
        let env = setup_test_environment("2024-06-01").await;
        let outcome = env
            .timebank
            .request_absence_for_day(
                &env.ana,
                d("2024-06-12"),
                DayAbsenceRequest {
                    absence_type: AbsenceType::Personal,
                    end_date: None,
                    is_full_day: true,
                    description: "Trámite".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.absence.status, ApprovalStatus::Pending);
        assert_eq!(outcome.absence.start_date, outcome.absence.end_date);
        assert_eq!(outcome.absence.created_by.as_deref(), Some("ana"));
        assert!(outcome.occupants.is_empty());
    }

    #[tokio::test]
    async fn invalid_submissions_never_reach_the_store() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_all: true,
            fail_updates: true,
        });
        let timebank = TimeBank::new(
            Repository::new(store, DEFAULT_STORE_TIMEOUT),
            Arc::new(FixedClock(noon("2024-03-15"))),
        );
        let ana = resolved("ana", "Ana", Role::User);

        let err = timebank
            .submit_work_entry(&ana, earned(dec!(0), "2024-03-01"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationErrorReason::NonPositiveHours { .. })
        ));

        let err = timebank
            .submit_absence(&ana, vacation("2024-06-14", "2024-06-10"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationErrorReason::StartAfterEnd { .. })
        ));

        // A valid submission does hit the failing store.
        let err = timebank
            .submit_work_entry(&ana, earned(dec!(1), "2024-03-01"))
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn second_decision_is_a_no_op() {
        let env = setup_test_environment("2024-03-15").await;
        let entry = env
            .timebank
            .submit_work_entry(&env.ana, earned(dec!(3), "2024-03-04"))
            .await
            .unwrap();

        let first = env
            .timebank
            .approve(&env.admin, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap();
        assert!(first.changed);
        assert_eq!(first.status, ApprovalStatus::Approved);

        let again = env
            .timebank
            .approve(&env.admin, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap();
        assert!(!again.changed);

        let reject_after = env
            .timebank
            .reject(&env.admin, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap();
        assert!(!reject_after.changed);
        assert_eq!(reject_after.status, ApprovalStatus::Approved);

        let stored = env.store.get(WORK_ENTRIES, &entry.id).await.unwrap().unwrap();
        assert_eq!(stored["status"], "approved");
        assert_eq!(stored["approvedBy"], "jefa");
    }

    #[tokio::test]
    async fn rejected_entry_never_counts() {
        let env = setup_test_environment("2024-03-15").await;
        let entry = env
            .timebank
            .submit_work_entry(&env.ana, earned(dec!(5), "2024-03-04"))
            .await
            .unwrap();
        let outcome = env
            .timebank
            .reject(&env.admin, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap();
        assert_eq!(outcome.status, ApprovalStatus::Rejected);

        let dashboard = env.timebank.dashboard(&env.ana).await.unwrap();
        assert_eq!(dashboard.balance.total_balance, dec!(0));
    }

    #[tokio::test]
    async fn only_admins_decide() {
        let env = setup_test_environment("2024-03-15").await;
        let entry = env
            .timebank
            .submit_work_entry(&env.ana, earned(dec!(3), "2024-03-04"))
            .await
            .unwrap();

        let err = env
            .timebank
            .approve(&env.ana, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
        assert!(matches!(
            env.timebank.pending_work_entries(&env.ana).await.unwrap_err(),
            AppError::PermissionDenied
        ));
    }

    #[tokio::test]
    async fn deciding_a_missing_record_is_not_found() {
        let env = setup_test_environment("2024-03-15").await;
        let err = env
            .timebank
            .reject(&env.admin, EntityKind::Absence, "does-not-exist")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_decision_write_is_reported() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_all: false,
            fail_updates: true,
        });
        let timebank = TimeBank::new(
            Repository::new(store.clone(), DEFAULT_STORE_TIMEOUT),
            Arc::new(FixedClock(noon("2024-03-15"))),
        );
        let ana = resolved("ana", "Ana", Role::User);
        let admin = resolved("jefa", "Jefa", Role::Admin);

        let entry = timebank
            .submit_work_entry(&ana, earned(dec!(3), "2024-03-04"))
            .await
            .unwrap();
        let err = timebank
            .approve(&admin, EntityKind::WorkEntry, &entry.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        let stored: WorkEntry = Repository::new(store, DEFAULT_STORE_TIMEOUT)
            .fetch(WORK_ENTRIES, &entry.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn pending_list_uses_denormalized_names() {
        let env = setup_test_environment("2024-03-15").await;
        env.timebank
            .submit_work_entry(&env.ana, earned(dec!(3), "2024-03-04"))
            .await
            .unwrap();
        env.store
            .insert(
                WORK_ENTRIES,
                obj(json!({
                    "userId": "legacy-uid",
                    "type": "used",
                    "hours": 2,
                    "date": "2024-03-05T00:00:00Z",
                    "status": "pending",
                    "createdAt": "2024-03-05T00:00:00Z"
                })),
            )
            .await
            .unwrap();

        let pending = env.timebank.pending_work_entries(&env.admin).await.unwrap();
        let mut names: Vec<&str> = pending.iter().map(|p| p.display_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Ana", "legacy-uid"]);
    }

    #[tokio::test]
    async fn report_keeps_negative_balance() {
        let env = setup_test_environment("2024-03-15").await;
        let earned_entry = env
            .timebank
            .submit_work_entry(&env.ana, earned(dec!(5), "2024-03-04"))
            .await
            .unwrap();
        let used_entry = env
            .timebank
            .submit_work_entry(
                &env.ana,
                NewWorkEntry {
                    entry_type: WorkEntryType::Used,
                    ..earned(dec!(8), "2024-03-05")
                },
            )
            .await
            .unwrap();
        for id in [&earned_entry.id, &used_entry.id] {
            env.timebank
                .approve(&env.admin, EntityKind::WorkEntry, id)
                .await
                .unwrap();
        }

        let rows = env.timebank.report(&env.admin).await.unwrap();
        let ana_row = rows.iter().find(|r| r.user_id == "ana").unwrap();
        assert_eq!(ana_row.balance, dec!(-3));
        let jefa_row = rows.iter().find(|r| r.user_id == "jefa").unwrap();
        assert_eq!(jefa_row.balance, dec!(0));

        let dashboard = env.timebank.dashboard(&env.ana).await.unwrap();
        assert_eq!(dashboard.balance.total_balance, dec!(0));

        let (filename, body) = env.timebank.report_csv(&env.admin).await.unwrap();
        assert_eq!(filename, "reporte-horas-2024-03-15.csv");
        assert!(body.contains("\"Ana\",\"ana@empresa.com\",\"5.0\",\"8.0\",\"-3.0\""));
    }

    #[tokio::test]
    async fn own_history_is_newest_first() {
        let env = setup_test_environment("2024-03-15").await;
        for date in ["2024-03-02", "2024-03-09", "2024-03-05"] {
            env.timebank
                .submit_work_entry(&env.ana, earned(dec!(1), date))
                .await
                .unwrap();
        }
        env.timebank
            .submit_work_entry(&env.admin, earned(dec!(1), "2024-03-10"))
            .await
            .unwrap();

        let history = env.timebank.own_work_entries(&env.ana).await.unwrap();
        let dates: Vec<NaiveDate> = history
            .iter()
            .map(|e| e.date.with_timezone(&Local).date_naive())
            .collect();
        assert_eq!(dates, vec![d("2024-03-09"), d("2024-03-05"), d("2024-03-02")]);
    }

    #[tokio::test]
    async fn slow_store_surfaces_as_timeout() {
        struct SlowStore;

        #[async_trait]
        impl DocumentStore for SlowStore {
            async fn get(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(None)
            }
            async fn query(
                &self,
                _: &str,
                _: &Query,
            ) -> Result<Vec<(String, Document)>, StoreError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
            async fn insert(&self, _: &str, _: Document) -> Result<String, StoreError> {
                Ok(String::new())
            }
            async fn set(&self, _: &str, _: &str, _: Document, _: bool) -> Result<(), StoreError> {
                Ok(())
            }
            async fn update(&self, _: &str, _: &str, _: Document) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let timebank = TimeBank::new(
            Repository::new(Arc::new(SlowStore), Duration::from_millis(20)),
            Arc::new(FixedClock(noon("2024-03-15"))),
        );
        let err = timebank
            .dashboard(&resolved("ana", "Ana", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreTimeout));
    }

    // --- User administration ---

    #[tokio::test]
    async fn registering_keys_user_by_normalized_email_and_merges() {
        let env = setup_test_environment("2024-03-15").await;
        let existing = obj(json!({
            "email": "janedoe@gmail.com",
            "uid": "google-7",
            "role": "admin"
        }));
        env.store
            .set(USERS, "janedoe@gmail.com", existing, false)
            .await
            .unwrap();

        let user = env
            .timebank
            .register_user(
                &env.admin,
                NewUser {
                    display_name: "Jane Doe".into(),
                    email: "Jane.Doe+hr@gmail.com".into(),
                    role: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(user.id, "janedoe@gmail.com");
        assert_eq!(user.display_name, "Jane Doe");
        assert_eq!(user.uid.as_deref(), Some("google-7"));
        assert_eq!(user.role, Role::Admin);
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn registration_requires_name_and_admin() {
        let env = setup_test_environment("2024-03-15").await;
        let err = env
            .timebank
            .register_user(
                &env.admin,
                NewUser {
                    display_name: "".into(),
                    email: "x@empresa.com".into(),
                    role: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Nombre y email son requeridos");

        let err = env
            .timebank
            .register_user(
                &env.ana,
                NewUser {
                    display_name: "X".into(),
                    email: "x@empresa.com".into(),
                    role: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }

    #[tokio::test]
    async fn promotion_rules() {
        let env = setup_test_environment("2024-03-15").await;

        let err = env
            .timebank
            .promote_admin(&env.admin, "nadie@empresa.com")
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "Usuario no encontrado. El usuario debe existir primero."
        );

        let promoted = env
            .timebank
            .promote_admin(&env.admin, "ANA@empresa.com")
            .await
            .unwrap();
        assert_eq!(promoted.id, "ana");
        assert_eq!(promoted.role, Role::Admin);

        let err = env
            .timebank
            .promote_admin(&env.admin, "ana@empresa.com")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Este usuario ya es administrador");
    }

    #[tokio::test]
    async fn admins_cannot_demote_themselves() {
        let env = setup_test_environment("2024-03-15").await;
        let err = env
            .timebank
            .demote_admin(&env.admin, "jefa")
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "No puedes quitarte a ti mismo como administrador"
        );

        env.timebank.promote_admin(&env.admin, "ana@empresa.com").await.unwrap();
        let demoted = env.timebank.demote_admin(&env.admin, "ana").await.unwrap();
        assert_eq!(demoted.role, Role::User);
    }

    #[tokio::test]
    async fn toggling_flips_active_flag() {
        let env = setup_test_environment("2024-03-15").await;
        let off = env.timebank.toggle_active(&env.admin, "ana").await.unwrap();
        assert!(!off.is_active);
        let on = env.timebank.toggle_active(&env.admin, "ana").await.unwrap();
        assert!(on.is_active);

        let err = env.timebank.toggle_active(&env.admin, "ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
