// src/admin.rs
//
// User administration. Users are never deleted, only deactivated.

use serde_json::{json, Map};
use tracing::info;

use crate::error::AppError;
use crate::identity::ResolvedUser;
use crate::models::{NewUser, Role, User, USERS};
use crate::services::TimeBank;
use crate::validation::{validate_email, validate_new_user, ValidationErrorReason};

impl TimeBank {
    async fn existing_user(&self, user_id: &str) -> Result<User, AppError> {
        self.repo
            .user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", USERS, user_id)))
    }

    /// Registers (or refreshes) the user keyed by their normalized email.
    /// Fields not supplied here are left as stored.
    pub async fn register_user(
        &self,
        admin: &ResolvedUser,
        input: NewUser,
    ) -> Result<User, AppError> {
        admin.require_admin()?;
        let (display_name, email) = validate_new_user(&input)?;

        let existing = self.repo.user(&email).await?;

        let mut fields = Map::new();
        fields.insert("email".into(), json!(email));
        fields.insert("displayName".into(), json!(display_name));
        fields.insert("isActive".into(), json!(true));
        match (input.role, &existing) {
            (Some(role), _) => {
                fields.insert("role".into(), json!(role));
            }
            (None, None) => {
                fields.insert("role".into(), json!(Role::User));
            }
            (None, Some(_)) => {}
        }
        if existing.as_ref().and_then(|u| u.created_at).is_none() {
            fields.insert("createdAt".into(), json!(self.now()));
        }

        self.repo.merge(USERS, &email, fields).await?;
        info!("Admin {} registered user {}", admin.id, email);
        self.existing_user(&email).await
    }

    pub async fn list_users(&self, admin: &ResolvedUser) -> Result<Vec<User>, AppError> {
        admin.require_admin()?;
        Ok(self.repo.users().await?)
    }

    pub async fn set_role(
        &self,
        admin: &ResolvedUser,
        user_id: &str,
        role: Role,
    ) -> Result<User, AppError> {
        admin.require_admin()?;
        if role != Role::Admin && admin.record_keys().contains(&user_id) {
            return Err(ValidationErrorReason::SelfDemotion.into());
        }
        self.existing_user(user_id).await?;

        let mut fields = Map::new();
        fields.insert("role".into(), json!(role));
        self.repo.patch(USERS, user_id, fields).await?;

        info!("Admin {} set role of {} to {:?}", admin.id, user_id, role);
        self.existing_user(user_id).await
    }

    pub async fn toggle_active(
        &self,
        admin: &ResolvedUser,
        user_id: &str,
    ) -> Result<User, AppError> {
        admin.require_admin()?;
        let user = self.existing_user(user_id).await?;

        let mut fields = Map::new();
        fields.insert("isActive".into(), json!(!user.is_active));
        self.repo.patch(USERS, user_id, fields).await?;

        info!(
            "Admin {} {} user {}",
            admin.id,
            if user.is_active { "deactivated" } else { "reactivated" },
            user_id
        );
        self.existing_user(user_id).await
    }

    /// Grants the admin role to an already registered user.
    pub async fn promote_admin(&self, admin: &ResolvedUser, email: &str) -> Result<User, AppError> {
        admin.require_admin()?;
        let email = validate_email(email)?;

        let user = match self.repo.user(&email).await? {
            Some(user) => Some(user),
            None => self.repo.first_user_with_email(&email).await?,
        }
        .ok_or_else(|| ValidationErrorReason::UnknownUser {
            email: email.clone(),
        })?;

        if user.role == Role::Admin {
            return Err(ValidationErrorReason::AlreadyAdmin { email }.into());
        }

        let mut fields = Map::new();
        fields.insert("role".into(), json!(Role::Admin));
        self.repo.patch(USERS, &user.id, fields).await?;

        info!("Admin {} promoted {}", admin.id, user.id);
        self.existing_user(&user.id).await
    }

    pub async fn demote_admin(
        &self,
        admin: &ResolvedUser,
        user_id: &str,
    ) -> Result<User, AppError> {
        self.set_role(admin, user_id, Role::User).await
    }
}
