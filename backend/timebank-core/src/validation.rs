// src/validation.rs
//
// Checks applied to every write before the store is contacted.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::email::normalize_email;
use crate::models::{NewAbsence, NewUser, NewWorkEntry};

static EMAIL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorReason {
    #[error("Mandatory field missing: {field_name}")]
    MandatoryFieldMissing { field_name: String },
    #[error("Hours must be greater than zero (got {hours})")]
    NonPositiveHours { hours: Decimal },
    #[error("Start date {start} is after end date {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
    #[error("Email address '{email}' is malformed")]
    InvalidEmail { email: String },
    #[error("No user is registered under '{email}'")]
    UnknownUser { email: String },
    #[error("User '{email}' is already an admin")]
    AlreadyAdmin { email: String },
    #[error("Admins cannot remove their own admin role")]
    SelfDemotion,
}

impl ValidationErrorReason {
    pub fn user_message(&self) -> String {
        match self {
            ValidationErrorReason::MandatoryFieldMissing { field_name }
                if field_name == "displayName" || field_name == "email" =>
            {
                "Nombre y email son requeridos".into()
            }
            ValidationErrorReason::MandatoryFieldMissing { field_name } => {
                format!("El campo '{}' es obligatorio", field_name)
            }
            ValidationErrorReason::NonPositiveHours { .. } => {
                "Las horas deben ser mayor a 0".into()
            }
            ValidationErrorReason::StartAfterEnd { .. } => {
                "La fecha de inicio debe ser menor a la fecha de fin".into()
            }
            ValidationErrorReason::InvalidEmail { .. } => "Email inválido".into(),
            ValidationErrorReason::UnknownUser { .. } => {
                "Usuario no encontrado. El usuario debe existir primero.".into()
            }
            ValidationErrorReason::AlreadyAdmin { .. } => "Este usuario ya es administrador".into(),
            ValidationErrorReason::SelfDemotion => {
                "No puedes quitarte a ti mismo como administrador".into()
            }
        }
    }
}

fn missing(field_name: &str) -> ValidationErrorReason {
    ValidationErrorReason::MandatoryFieldMissing {
        field_name: field_name.to_string(),
    }
}

/// Returns the entry's calendar date once the submission is acceptable.
pub fn validate_work_entry(input: &NewWorkEntry) -> Result<NaiveDate, ValidationErrorReason> {
    if input.hours <= Decimal::ZERO {
        return Err(ValidationErrorReason::NonPositiveHours { hours: input.hours });
    }
    input.date.ok_or_else(|| missing("date"))
}

/// Returns `(start, end)` once both are present and ordered.
pub fn validate_absence(
    input: &NewAbsence,
) -> Result<(NaiveDate, NaiveDate), ValidationErrorReason> {
    let start = input.start_date.ok_or_else(|| missing("startDate"))?;
    let end = input.end_date.ok_or_else(|| missing("endDate"))?;
    validate_absence_range(start, end)?;
    Ok((start, end))
}

pub fn validate_absence_range(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), ValidationErrorReason> {
    if start > end {
        return Err(ValidationErrorReason::StartAfterEnd { start, end });
    }
    Ok(())
}

/// Returns the trimmed display name and the normalized email.
pub fn validate_new_user(input: &NewUser) -> Result<(String, String), ValidationErrorReason> {
    let display_name = input.display_name.trim();
    if display_name.is_empty() {
        return Err(missing("displayName"));
    }
    let email = validate_email(&input.email)?;
    Ok((display_name.to_string(), email))
}

pub fn validate_email(raw: &str) -> Result<String, ValidationErrorReason> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(missing("email"));
    }
    if !EMAIL_SHAPE.is_match(trimmed) {
        return Err(ValidationErrorReason::InvalidEmail {
            email: trimmed.to_string(),
        });
    }
    Ok(normalize_email(trimmed))
}
