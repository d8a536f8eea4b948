// src/error.rs
use axum::http::StatusCode as AxumStatusCode;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::google::ProviderError;
use crate::store::StoreError;
use crate::validation::ValidationErrorReason;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No user record matches the authenticated principal")]
    UserNotFound,

    #[error("The user account is deactivated")]
    AccountDeactivated,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrorReason),

    #[error("Record store did not answer in time")]
    StoreTimeout,

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation requires the admin role")]
    PermissionDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing or invalid session")]
    Unauthorized,

    #[error("Identity provider error")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report export failed: {0}")]
    Export(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(_) => AppError::StoreTimeout,
            StoreError::NotFound { collection, id } => {
                AppError::NotFound(format!("{}/{}", collection, id))
            }
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

impl AppError {
    /// Errors that end the session at the identity provider as well.
    pub fn terminates_session(&self) -> bool {
        matches!(self, AppError::UserNotFound | AppError::AccountDeactivated)
    }

    pub fn is_store_failure(&self) -> bool {
        matches!(self, AppError::StoreTimeout | AppError::StoreUnavailable(_))
    }

    pub fn status_code(&self) -> AxumStatusCode {
        match self {
            AppError::UserNotFound | AppError::AccountDeactivated => AxumStatusCode::FORBIDDEN,
            AppError::Validation(_) => AxumStatusCode::UNPROCESSABLE_ENTITY,
            AppError::StoreTimeout => AxumStatusCode::GATEWAY_TIMEOUT,
            AppError::StoreUnavailable(_) => AxumStatusCode::SERVICE_UNAVAILABLE,
            AppError::PermissionDenied => AxumStatusCode::FORBIDDEN,
            AppError::NotFound(_) => AxumStatusCode::NOT_FOUND,
            AppError::Unauthorized => AxumStatusCode::UNAUTHORIZED,
            AppError::Provider(ProviderError::StateMismatch)
            | AppError::Provider(ProviderError::MissingAuthCode)
            | AppError::Provider(ProviderError::Denied(_)) => AxumStatusCode::BAD_REQUEST,
            AppError::Provider(_) => AxumStatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Export(_) | AppError::Io(_) => {
                AxumStatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the person using the application.
    pub fn user_message(&self) -> String {
        match self {
            AppError::UserNotFound => {
                "Tu correo no está registrado en el sistema. Contacta a un administrador.".into()
            }
            AppError::AccountDeactivated => {
                "Tu cuenta ha sido desactivada. Contacta a un administrador.".into()
            }
            AppError::Validation(reason) => reason.user_message(),
            AppError::StoreTimeout => {
                "El servidor de datos no respondió a tiempo. Inténtalo de nuevo.".into()
            }
            AppError::StoreUnavailable(_) => {
                "No se pudo acceder a los datos. Inténtalo de nuevo.".into()
            }
            AppError::PermissionDenied => "No tienes permisos para acceder a esta página".into(),
            AppError::NotFound(_) => "El registro solicitado no existe.".into(),
            AppError::Unauthorized => "Debes iniciar sesión.".into(),
            AppError::Provider(_) => "Error al iniciar sesión con Google.".into(),
            AppError::Config(_) | AppError::Export(_) | AppError::Io(_) => {
                "Error interno del servidor. Inténtalo de nuevo.".into()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            error!("Error occurred: {:?}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        let body = Json(serde_json::json!({
            "error": self.user_message(),
            "status": status_code.as_u16(),
        }));
        (status_code, body).into_response()
    }
}
