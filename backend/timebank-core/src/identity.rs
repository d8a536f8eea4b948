// src/identity.rs
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::email::normalize_email;
use crate::error::AppError;
use crate::models::{self, Role, User};
use crate::repository::Repository;

/// What the identity provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The stored user record merged onto the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedUser {
    /// Document id of the user record.
    pub id: String,
    /// Provider subject id.
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
}

impl ResolvedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Ids under which this user's records may be filed.
    pub fn record_keys(&self) -> Vec<&str> {
        models::record_keys(&self.id, Some(&self.uid))
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            warn!("User {} attempted an admin operation", self.id);
            Err(AppError::PermissionDenied)
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    repo: Repository,
    admin_emails: HashSet<String>,
}

impl IdentityResolver {
    /// `admin_emails` are granted the admin role whatever their record says.
    pub fn new(repo: Repository, admin_emails: &[String]) -> Self {
        let admin_emails = admin_emails
            .iter()
            .map(|e| normalize_email(e))
            .filter(|e| !e.is_empty())
            .collect();
        Self { repo, admin_emails }
    }

    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.admin_emails.contains(&normalize_email(email))
    }

    /// Looks the principal up by subject id, then by normalized email as
    /// document id, then by the stored `email` field.
    pub async fn resolve(&self, principal: &Principal) -> Result<ResolvedUser, AppError> {
        let user = self.lookup(principal).await?.ok_or_else(|| {
            info!("No user record for principal {} ({})", principal.uid, principal.email);
            AppError::UserNotFound
        })?;

        if !user.is_active {
            info!("Rejected deactivated user {}", user.id);
            return Err(AppError::AccountDeactivated);
        }

        let display_name = if user.display_name.trim().is_empty() {
            principal.name.clone().unwrap_or_default()
        } else {
            user.display_name.clone()
        };

        let email = if user.email.is_empty() {
            normalize_email(&principal.email)
        } else {
            user.email.clone()
        };

        let role = if self.is_bootstrap_admin(&email) || self.is_bootstrap_admin(&principal.email) {
            Role::Admin
        } else {
            user.role
        };

        Ok(ResolvedUser {
            id: user.id,
            uid: principal.uid.clone(),
            email,
            display_name,
            role,
            is_active: user.is_active,
        })
    }

    async fn lookup(&self, principal: &Principal) -> Result<Option<User>, AppError> {
        if let Some(user) = self.repo.user(&principal.uid).await? {
            debug!("Resolved {} by subject id", principal.uid);
            return Ok(Some(user));
        }

        let email = normalize_email(&principal.email);
        if email.is_empty() {
            return Ok(None);
        }

        if let Some(user) = self.repo.user(&email).await? {
            debug!("Resolved {} by email document id", principal.uid);
            return Ok(Some(user));
        }

        let by_field = self.repo.first_user_with_email(&email).await?;
        if by_field.is_some() {
            debug!("Resolved {} by email field", principal.uid);
        }
        Ok(by_field)
    }
}
