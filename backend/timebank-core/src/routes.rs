// src/routes.rs
use std::sync::Arc;

use axum::http::{header, StatusCode as AxumStatusCode};
use axum::{
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::approval::{EntityKind, PendingItem};
use crate::error::AppError;
use crate::google::{AuthCallbackParams, GoogleProvider};
use crate::identity::ResolvedUser;
use crate::models::{Absence, DayAbsenceRequest, NewAbsence, NewUser, NewWorkEntry, Role, WorkEntry};
use crate::services::TimeBank;
use crate::session::{Session, SessionManager};

#[derive(Clone)]
pub struct AppState {
    pub timebank: TimeBank,
    pub sessions: Arc<SessionManager>,
    pub provider: GoogleProvider,
}

/// List payload. A failed read still answers with an empty list and the
/// reason, so clients can render an empty state.
#[derive(Serialize)]
struct Listing<T> {
    items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn listing<T: Serialize>(result: Result<Vec<T>, AppError>) -> Response {
    match result {
        Ok(items) => Json(Listing { items, error: None }).into_response(),
        Err(err) if err.is_store_failure() => {
            warn!("List read failed: {}", err);
            let body = Listing::<T> {
                items: Vec::new(),
                error: Some(err.user_message()),
            };
            (AxumStatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum PendingRecord {
    WorkEntry(PendingItem<WorkEntry>),
    Absence(PendingItem<Absence>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    token: String,
    token_type: &'static str,
    expires_at: DateTime<Utc>,
    user: ResolvedUser,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    user: ResolvedUser,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RoleChange {
    role: Role,
}

#[derive(Deserialize)]
struct PromoteRequest {
    email: String,
}

pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/google", get(handle_google_redirect))
        .route("/google/callback", get(handle_google_callback));

    let admin_routes = Router::new()
        .route("/approvals", get(handle_list_pending))
        .route("/approvals/{kind}/{id}/approve", post(handle_approve))
        .route("/approvals/{kind}/{id}/reject", post(handle_reject))
        .route("/users", get(handle_list_users).post(handle_register_user))
        .route("/users/{id}/role", put(handle_set_role))
        .route("/users/{id}/toggle-active", post(handle_toggle_active))
        .route("/admins", post(handle_promote_admin))
        .route("/admins/{id}", delete(handle_demote_admin))
        .route("/reports", get(handle_report))
        .route("/reports/csv", get(handle_report_csv));

    let api_routes = Router::new()
        .route("/logout", post(handle_logout))
        .route("/me", get(handle_me))
        .route("/dashboard", get(handle_dashboard))
        .route(
            "/work-entries",
            get(handle_own_work_entries).post(handle_submit_work_entry),
        )
        .route("/absences", get(handle_own_absences).post(handle_submit_absence))
        .route("/calendar/{date}", get(handle_day_occupancy))
        .route("/calendar/{date}/absences", post(handle_request_day_absence))
        .nest("/admin", admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Restores the session from the Bearer token and hands it to the handler.
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let session = state.sessions.restore(token).await?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

// --- Public ---

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

async fn handle_google_redirect(State(state): State<AppState>) -> Result<Redirect, AppError> {
    info!("Handling /auth/google request...");
    let auth_url = state.provider.authorization_url().await?;
    Ok(Redirect::temporary(&auth_url))
}

async fn handle_google_callback(
    State(state): State<AppState>,
    Query(params): Query<AuthCallbackParams>,
) -> Result<Json<SessionResponse>, AppError> {
    info!("Handling /auth/google/callback request...");
    let principal = state.provider.complete(params).await?;
    let session = state.sessions.establish(principal).await?;
    Ok(Json(SessionResponse {
        token: session.token,
        token_type: "Bearer",
        expires_at: session.expires_at,
        user: session.user,
    }))
}

// --- Session ---

async fn handle_logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> AxumStatusCode {
    state.sessions.teardown(&session).await;
    AxumStatusCode::NO_CONTENT
}

async fn handle_me(Extension(session): Extension<Session>) -> Json<MeResponse> {
    Json(MeResponse {
        user: session.user,
        expires_at: session.expires_at,
    })
}

// --- User ---

async fn handle_dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, AppError> {
    let dashboard = state.timebank.dashboard(&session.user).await?;
    Ok(Json(dashboard))
}

async fn handle_own_work_entries(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    listing(state.timebank.own_work_entries(&session.user).await)
}

async fn handle_submit_work_entry(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<NewWorkEntry>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state.timebank.submit_work_entry(&session.user, input).await?;
    Ok((AxumStatusCode::CREATED, Json(entry)))
}

async fn handle_own_absences(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    listing(state.timebank.own_absences(&session.user).await)
}

async fn handle_submit_absence(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<NewAbsence>,
) -> Result<impl IntoResponse, AppError> {
    let absence = state.timebank.submit_absence(&session.user, input).await?;
    Ok((AxumStatusCode::CREATED, Json(absence)))
}

async fn handle_day_occupancy(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Response {
    listing(state.timebank.day_occupancy(date).await)
}

async fn handle_request_day_absence(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(date): Path<NaiveDate>,
    Json(request): Json<DayAbsenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .timebank
        .request_absence_for_day(&session.user, date, request)
        .await?;
    Ok((AxumStatusCode::CREATED, Json(outcome)))
}

// --- Admin ---

async fn handle_list_pending(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    let admin = &session.user;
    let result = async {
        let entries = state.timebank.pending_work_entries(admin).await?;
        let absences = state.timebank.pending_absences(admin).await?;
        Ok::<_, AppError>(
            entries
                .into_iter()
                .map(PendingRecord::WorkEntry)
                .chain(absences.into_iter().map(PendingRecord::Absence))
                .collect::<Vec<_>>(),
        )
    }
    .await;
    listing(result)
}

fn parse_kind(kind: &str) -> Result<EntityKind, AppError> {
    kind.parse::<EntityKind>().map_err(AppError::NotFound)
}

async fn handle_approve(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .timebank
        .approve(&session.user, parse_kind(&kind)?, &id)
        .await?;
    Ok(Json(outcome))
}

async fn handle_reject(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .timebank
        .reject(&session.user, parse_kind(&kind)?, &id)
        .await?;
    Ok(Json(outcome))
}

async fn handle_list_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    listing(state.timebank.list_users(&session.user).await)
}

async fn handle_register_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(input): Json<NewUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.timebank.register_user(&session.user, input).await?;
    Ok((AxumStatusCode::CREATED, Json(user)))
}

async fn handle_set_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(change): Json<RoleChange>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.timebank.set_role(&session.user, &id, change.role).await?;
    Ok(Json(user))
}

async fn handle_toggle_active(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.timebank.toggle_active(&session.user, &id).await?;
    Ok(Json(user))
}

async fn handle_promote_admin(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<PromoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .timebank
        .promote_admin(&session.user, &request.email)
        .await?;
    Ok(Json(user))
}

async fn handle_demote_admin(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.timebank.demote_admin(&session.user, &id).await?;
    Ok(Json(user))
}

async fn handle_report(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Response {
    listing(state.timebank.report(&session.user).await)
}

async fn handle_report_csv(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    info!("Handling /api/admin/reports/csv request...");
    let (filename, body) = state.timebank.report_csv(&session.user).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}
