use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{check_credentials, hash_password};
use crate::db::Db;
use crate::error::{ErrorResponse, TabulaError};
use crate::types::{
    ActivityLog, AuthSession, Board, Issue, IssueDetail, IssueFeed, IssueState, IssueUpdate,
    ListFilters, NewIssue, NewUser, User,
};
use crate::validate;

type AppState = Arc<Mutex<Db>>;

const DEFAULT_WATCH_SECS: u64 = 30;
const MAX_WATCH_SECS: u64 = 300;

#[derive(Debug)]
struct AppError(TabulaError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TabulaError::NotFound(_) | TabulaError::UserNotFound(_) => StatusCode::NOT_FOUND,
            TabulaError::Unauthenticated(_)
            | TabulaError::InvalidCredentials
            | TabulaError::InvalidSession => StatusCode::UNAUTHORIZED,
            TabulaError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            TabulaError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TabulaError::UserExists(_) => StatusCode::CONFLICT,
            TabulaError::Config(_) | TabulaError::Internal(_) => {
                tracing::error!(error = %self.0, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse::from(&self.0);
        (status, Json(body)).into_response()
    }
}

impl From<TabulaError> for AppError {
    fn from(err: TabulaError) -> Self {
        AppError(err)
    }
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Db>, AppError> {
    state
        .lock()
        .map_err(|_| AppError(TabulaError::Internal("store lock poisoned".to_string())))
}

/// Runs `f` on the blocking pool.
async fn run_blocking<F, R>(f: F) -> Result<R, AppError>
where
    F: FnOnce() -> Result<R, AppError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(TabulaError::Internal(format!("blocking task failed: {e}"))))?
}

/// Runs `f` against the locked store on the blocking pool.
async fn with_db<F, R>(state: &AppState, f: F) -> Result<R, AppError>
where
    F: FnOnce(&Db) -> Result<R, TabulaError> + Send + 'static,
    R: Send + 'static,
{
    let state = Arc::clone(state);
    run_blocking(move || {
        let db = lock(&state)?;
        Ok(f(&db)?)
    })
    .await
}

/// `Json<T>` whose rejections answer with the usual `{error, code}` body.
struct JsonBody<T>(T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                tracing::debug!(status = %rejection.status(), "rejected request body");
                Err(AppError(TabulaError::Validation(rejection.body_text())))
            }
        }
    }
}

/// The user behind the request's `Authorization: Bearer <token>` header.
struct SessionUser {
    user: User,
    token: String,
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("Authorization")
            .ok_or_else(|| {
                tracing::debug!("missing Authorization header");
                TabulaError::Unauthenticated("You must be logged in".to_string())
            })?
            .to_str()
            .map_err(|_| {
                tracing::warn!("invalid Authorization header encoding");
                TabulaError::InvalidSession
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            tracing::warn!("Authorization header is not a bearer token");
            TabulaError::InvalidSession
        })?;

        let db = lock(state)?;
        let user = db.authenticate(token).inspect_err(|_| {
            tracing::warn!("rejected session token");
        })?;
        Ok(SessionUser {
            user,
            token: token.to_string(),
        })
    }
}

/// Binds the daemon. `port` falls back to the configured one.
pub async fn start(port: Option<u16>, data_dir: PathBuf) -> Result<(), TabulaError> {
    let db = Db::open(&data_dir)?;
    let port = port.unwrap_or(db.config.port);
    let state: AppState = Arc::new(Mutex::new(db));

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| TabulaError::Internal(format!("failed to bind port {port}: {e}")))?;

    tracing::info!(port, data_dir = %data_dir.display(), "tabula daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TabulaError::Internal(format!("server error: {e}")))?;

    tracing::info!("tabula daemon stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user))
        .route("/issues", get(list_issues).post(create_issue))
        .route("/issues/board", get(board))
        .route("/issues/search", get(search_issues))
        .route("/issues/watch", get(watch_issues))
        .route(
            "/issues/{id}",
            get(get_issue).patch(update_issue).delete(delete_issue),
        )
        .route("/issues/{id}/assign", post(assign_issue))
        .route("/issues/{id}/complete", post(complete_issue))
        .route("/issues/{id}/activity", get(issue_activity))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

async fn status(State(db): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let db = lock(&db)?;
    let (issues, users) = db.counts()?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "issues": issues,
        "users": users,
        "data_dir": db.data_dir.display().to_string(),
    })))
}

// --- Auth endpoints ---

// bcrypt runs on the blocking pool without the store lock.

async fn signup(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<NewUser>,
) -> Result<impl IntoResponse, AppError> {
    validate::new_user(&body)?;
    let cost = lock(&state)?.config.bcrypt_cost;
    let password = body.password.clone();
    let password_hash = run_blocking(move || Ok(hash_password(&password, cost)?)).await?;
    let session = with_db(&state, move |db| {
        let user = db.insert_user(&body, password_hash)?;
        db.open_session(user)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginBody>,
) -> Result<Json<AuthSession>, AppError> {
    let LoginBody { email, password } = body;
    let lookup = email.clone();
    let found = with_db(&state, move |db| db.find_user_by_email(&lookup)).await?;
    let user = run_blocking(move || Ok(check_credentials(&email, found, &password)?)).await?;
    let session = with_db(&state, move |db| db.open_session(user)).await?;
    Ok(Json(session))
}

async fn logout(
    State(db): State<AppState>,
    session: SessionUser,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    db.logout(&session.token)?;
    tracing::info!(id = %session.user.id, "logged out");
    Ok(StatusCode::NO_CONTENT)
}

async fn me(session: SessionUser) -> Json<User> {
    Json(session.user)
}

// --- User endpoints ---

async fn list_users(
    State(db): State<AppState>,
    _session: SessionUser,
) -> Result<Json<Vec<User>>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.list_users()?))
}

async fn get_user(
    State(db): State<AppState>,
    _session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.get_user(&id)?))
}

// --- Issue endpoints ---

#[derive(Deserialize, Default)]
struct FilterQuery {
    q: Option<String>,
    state: Option<String>,
    assignee: Option<String>,
    #[serde(default)]
    mine: bool,
    #[serde(default)]
    restricted: bool,
}

fn comma_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl FilterQuery {
    fn into_filters(self) -> Result<ListFilters, TabulaError> {
        let states = comma_list(self.state.as_deref())
            .map(|s| s.parse::<IssueState>().map_err(TabulaError::Validation))
            .collect::<Result<Vec<_>, _>>()?;
        let assignees = comma_list(self.assignee.as_deref())
            .map(String::from)
            .collect();
        Ok(ListFilters {
            search: self.q,
            states,
            assignees,
            mine_only: self.mine,
            restricted: self.restricted,
        })
    }
}

async fn list_issues(
    State(db): State<AppState>,
    session: SessionUser,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<Issue>>, AppError> {
    let filters = query.into_filters()?;
    let db = lock(&db)?;
    Ok(Json(db.filtered_issues(&session.user, &filters)?))
}

async fn create_issue(
    State(db): State<AppState>,
    session: SessionUser,
    JsonBody(body): JsonBody<NewIssue>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let issue = db.create_issue(&session.user, &body)?;
    Ok((StatusCode::CREATED, Json(issue)))
}

async fn board(
    State(db): State<AppState>,
    session: SessionUser,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Board>, AppError> {
    let filters = query.into_filters()?;
    let db = lock(&db)?;
    Ok(Json(db.board(&session.user, &filters)?))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_issues(
    State(db): State<AppState>,
    _session: SessionUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Issue>>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.search_issues(&query.q)?))
}

#[derive(Deserialize)]
struct WatchQuery {
    #[serde(default)]
    since: u64,
    timeout_secs: Option<u64>,
}

/// Long-poll: answers once the revision passes `since`, or when the timeout lapses.
async fn watch_issues(
    State(state): State<AppState>,
    _session: SessionUser,
    Query(query): Query<WatchQuery>,
) -> Result<Json<IssueFeed>, AppError> {
    let mut rx = lock(&state)?.subscribe();
    let secs = query
        .timeout_secs
        .unwrap_or(DEFAULT_WATCH_SECS)
        .min(MAX_WATCH_SECS);

    let wait = async {
        loop {
            let current = *rx.borrow_and_update();
            if current > query.since {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(secs), wait)
        .await
        .is_err()
    {
        tracing::debug!(since = query.since, "watch timed out");
    }

    let db = lock(&state)?;
    Ok(Json(db.feed()?))
}

async fn get_issue(
    State(db): State<AppState>,
    _session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<IssueDetail>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.issue_detail(&id)?))
}

async fn update_issue(
    State(db): State<AppState>,
    session: SessionUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<IssueUpdate>,
) -> Result<Json<Issue>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.update_issue(&session.user, &id, &body)?))
}

async fn delete_issue(
    State(db): State<AppState>,
    session: SessionUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    db.delete_issue(&session.user, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AssignBody {
    user_id: String,
}

async fn assign_issue(
    State(db): State<AppState>,
    session: SessionUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<AssignBody>,
) -> Result<Json<Issue>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.assign_issue(&session.user, &id, &body.user_id)?))
}

async fn complete_issue(
    State(db): State<AppState>,
    session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<Issue>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.complete_issue(&session.user, &id)?))
}

async fn issue_activity(
    State(db): State<AppState>,
    _session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<ActivityLog>>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.activity_for(&id)?))
}
