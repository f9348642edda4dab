//! Axum-based HTTP gateway for the family feed.
//!
//! Every handler resolves the caller in two stages: bearer token to
//! identity, then identity to family scope (membership re-checked against
//! the store). Scoped reads answer 404 for resources outside the caller's
//! active family; ownership violations inside the family answer 403.
//!
//! Transport hardening mirrors the rest of the stack: request body limits,
//! request timeouts, permissive CORS for browser clients.

use crate::auth::session::{Identity, SessionResolver};
use crate::auth::{password, CredentialCodec};
use crate::config::Config;
use crate::error::ApiError;
use crate::store::users::NewUser;
use crate::store::{FeedStore, Post, ReactionKind};
use crate::summary::{GroqClient, PostExcerpt};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default page size for feed listings.
const DEFAULT_PAGE_LIMIT: i64 = 20;
/// Hard cap on page size.
const MAX_PAGE_LIMIT: i64 = 100;

type JsonBody<T> = Result<Json<T>, axum::extract::rejection::JsonRejection>;
type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FeedStore>,
    pub sessions: Arc<SessionResolver>,
    /// Shared HTTP client for outbound summary requests.
    pub http: reqwest::Client,
}

fn status_for(err: &ApiError) -> StatusCode {
    match err {
        ApiError::InvalidCredentials | ApiError::InvalidCredential => StatusCode::UNAUTHORIZED,
        ApiError::NoFamilySelected => StatusCode::BAD_REQUEST,
        ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::DuplicateFamily(_) | ApiError::DuplicateUser => StatusCode::CONFLICT,
        ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &ApiError) -> ApiResponse {
    if matches!(err, ApiError::Store(_)) {
        tracing::error!("Storage error serving request: {err}");
    }
    (
        status_for(err),
        Json(serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
        })),
    )
}

fn bad_request(message: &str) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message, "code": "bad_request"})),
    )
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Stage one: bearer token to a live identity.
fn require_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiResponse> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| error_response(&ApiError::InvalidCredential))?;
    state
        .sessions
        .resolve_identity(token)
        .map_err(|e| error_response(&e))
}

/// Stage two: identity plus the family scope the request runs under.
fn require_family_scope(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Identity, String), ApiResponse> {
    let identity = require_identity(state, headers)?;
    let family_id = state
        .sessions
        .resolve_family_scope(&identity)
        .map_err(|e| error_response(&e))?;
    Ok((identity, family_id))
}

fn unwrap_body<T>(body: JsonBody<T>) -> Result<T, ApiResponse> {
    match body {
        Ok(Json(b)) => Ok(b),
        Err(e) => Err(bad_request(&format!("Invalid request: {e}"))),
    }
}

fn page_bounds(skip: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let skip = skip.unwrap_or(0).max(0);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    (skip, limit)
}

/// Post JSON with an embedded author stub, the shape feed clients render.
fn post_json(state: &AppState, post: &Post) -> serde_json::Value {
    let author = state.store.get_user(&post.user_id).ok().flatten();
    let mut value = serde_json::json!(post);
    if let Some(obj) = value.as_object_mut() {
        let user = match author {
            Some(u) => serde_json::json!({"id": u.id, "username": u.username}),
            None => serde_json::Value::Null,
        };
        obj.insert("user".into(), user);
    }
    value
}

fn posts_json(state: &AppState, posts: &[Post]) -> Vec<serde_json::Value> {
    posts.iter().map(|p| post_json(state, p)).collect()
}

/// UTC day window `[start, end]` in unix seconds, plus the ISO date label.
/// `None` input means today.
fn day_window(date: Option<&str>) -> Option<(i64, i64, String)> {
    let day = match date {
        Some(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?,
        None => chrono::Utc::now().date_naive(),
    };
    let start = day.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    Some((start, start + 86_399, day.to_string()))
}

/// Run the HTTP gateway.
pub async fn run_gateway(config: Config, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let display_addr = format!("{host}:{}", listener.local_addr()?.port());

    let db_path = config.database.resolved_path();
    let store = Arc::new(FeedStore::open(&db_path)?);
    let codec = CredentialCodec::new(&config.token_secret(), config.token_ttl_secs());
    let sessions = Arc::new(SessionResolver::new(Arc::clone(&store), codec));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let state = AppState {
        store,
        sessions,
        http,
    };

    // ── CORS — browser clients connect from any origin ──
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/signup", post(handle_signup))
        .route("/api/auth/login", post(handle_login))
        .route("/api/auth/me", get(handle_me))
        .route("/api/auth/select-family", post(handle_select_family))
        .route("/api/families", get(handle_families_list))
        .route("/api/families", post(handle_family_create))
        .route("/api/families/join", post(handle_family_join))
        .route("/api/families/check", get(handle_family_check))
        .route("/api/families/members", get(handle_family_members))
        .route("/api/users", get(handle_users_list))
        .route("/api/users/me", get(handle_profile_get))
        .route("/api/users/me", put(handle_profile_update))
        .route("/api/users/{user_id}", get(handle_user_get))
        .route("/api/users/{user_id}/posts", get(handle_user_posts))
        .route("/api/posts", get(handle_posts_list))
        .route("/api/posts", post(handle_post_create))
        .route("/api/posts/{post_id}", get(handle_post_get))
        .route("/api/posts/{post_id}", put(handle_post_update))
        .route("/api/posts/{post_id}", delete(handle_post_delete))
        .route("/api/posts/{post_id}/like", post(handle_post_like))
        .route("/api/posts/{post_id}/dislike", post(handle_post_dislike))
        .route("/api/posts/{post_id}/reaction", delete(handle_reaction_remove))
        .route("/api/posts/{post_id}/comments", get(handle_comments_list))
        .route("/api/posts/{post_id}/comments", post(handle_comment_create))
        .route("/api/comments/{comment_id}", put(handle_comment_update))
        .route("/api/comments/{comment_id}", delete(handle_comment_delete))
        .route("/api/messages", post(handle_message_send))
        .route("/api/messages/conversations", get(handle_conversations))
        .route(
            "/api/messages/conversations/{user_id}",
            get(handle_conversation_with),
        )
        .route("/api/messages/{message_id}/read", put(handle_message_read))
        .route("/api/messages/unread-count", get(handle_unread_count))
        .route("/api/search", get(handle_search))
        .route("/api/family/summary", post(handle_family_summary))
        .route(
            "/api/family/users/{user_id}/summary",
            post(handle_user_summary),
        )
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    tracing::info!("Gateway listening on {display_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health — always public
async fn handle_health() -> ApiResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

// ── Auth ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SignupBody {
    username: String,
    email: String,
    password: String,
    full_name: Option<String>,
    bio: Option<String>,
    #[serde(default)]
    family_names: Vec<String>,
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
    /// Requested active family, by id.
    family_id: Option<String>,
    /// Requested active family, by name.
    family_name: Option<String>,
}

#[derive(Deserialize)]
struct SelectFamilyBody {
    family_id: String,
}

/// POST /api/auth/signup — register, optionally joining families by name.
async fn handle_signup(State(state): State<AppState>, body: JsonBody<SignupBody>) -> ApiResponse {
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if body.username.trim().is_empty() || body.password.is_empty() {
        return bad_request("username and password are required");
    }

    let new_user = NewUser {
        username: body.username,
        email: body.email,
        password_hash: password::hash_secret(&body.password),
        full_name: body.full_name,
        bio: body.bio,
    };
    match state
        .store
        .create_user_with_families(&new_user, &body.family_names)
    {
        Ok(user) => {
            let families = state
                .store
                .list_families_for(&user.id)
                .unwrap_or_default();
            (
                StatusCode::CREATED,
                Json(serde_json::json!({"user": user, "families": families})),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/auth/login — authenticate and mint a family-scoped token.
async fn handle_login(State(state): State<AppState>, body: JsonBody<LoginBody>) -> ApiResponse {
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let family = body.family_id.as_deref().or(body.family_name.as_deref());
    match state.sessions.login(&body.username, &body.password, family) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "access_token": outcome.token,
                "token_type": "bearer",
                "user": outcome.user,
                "families": outcome.families,
                "active_family": outcome.selected,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/auth/me — the caller's identity, memberships, and active family.
async fn handle_me(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let families = state
        .store
        .list_families_for(&identity.user.id)
        .unwrap_or_default();
    let active = identity
        .claims
        .fam
        .as_deref()
        .and_then(|id| state.store.get_family(id).ok().flatten());
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "user": identity.user,
            "families": families,
            "active_family": active,
        })),
    )
}

/// POST /api/auth/select-family — re-scope the session, returning a fresh
/// token. The previous token stays valid until it expires.
async fn handle_select_family(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<SelectFamilyBody>,
) -> ApiResponse {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match state.sessions.select_family(&identity, &body.family_id) {
        Ok(token) => {
            let family = state.store.get_family(&body.family_id).ok().flatten();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "access_token": token,
                    "token_type": "bearer",
                    "active_family": family,
                })),
            )
        }
        Err(e) => error_response(&e),
    }
}

// ── Families ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FamilyNameBody {
    name: String,
}

#[derive(Deserialize)]
struct FamilyJoinBody {
    /// Join an existing family by id.
    family_id: Option<String>,
    /// Join by name; the family is created on first use.
    name: Option<String>,
}

#[derive(Deserialize)]
struct FamilyCheckQuery {
    name: String,
}

/// GET /api/families — the caller's memberships, in join order.
async fn handle_families_list(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    match state.store.list_families_for(&identity.user.id) {
        Ok(families) => (StatusCode::OK, Json(serde_json::json!({"families": families}))),
        Err(e) => error_response(&e),
    }
}

/// POST /api/families — create a family and join the creator to it.
async fn handle_family_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<FamilyNameBody>,
) -> ApiResponse {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let name = body.name.trim();
    if name.is_empty() {
        return bad_request("family name is required");
    }
    let (family, _) = match state.store.create_family_with_member(name, &identity.user.id) {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };
    (StatusCode::CREATED, Json(serde_json::json!({"family": family})))
}

/// POST /api/families/join — join by id (404 when the id is unknown; family
/// existence is intentionally informative) or by name (created on first use).
async fn handle_family_join(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<FamilyJoinBody>,
) -> ApiResponse {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let family = match (body.family_id.as_deref(), body.name.as_deref()) {
        (Some(id), _) => match state.store.get_family(id) {
            Ok(Some(f)) => f,
            Ok(None) => return error_response(&ApiError::NotFound("family")),
            Err(e) => return error_response(&e),
        },
        (None, Some(name)) if !name.trim().is_empty() => {
            match state.store.ensure_family(name) {
                Ok(f) => f,
                Err(e) => return error_response(&e),
            }
        }
        _ => return bad_request("family_id or name is required"),
    };

    match state.store.join(&identity.user.id, &family.id) {
        Ok(membership) => (
            StatusCode::OK,
            Json(serde_json::json!({"family": family, "membership": membership})),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/families/check?name= — existence lookup for the signup form.
/// Deliberately informative: family names are not secrets.
async fn handle_family_check(
    State(state): State<AppState>,
    Query(query): Query<FamilyCheckQuery>,
) -> ApiResponse {
    match state.store.find_family_by_name(query.name.trim()) {
        Ok(found) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "exists": found.is_some(),
                "name": found.map_or(query.name, |f| f.name),
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/families/members — members of the active family.
async fn handle_family_members(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state.store.list_members_of(&family_id) {
        Ok(members) => (StatusCode::OK, Json(serde_json::json!({"members": members}))),
        Err(e) => error_response(&e),
    }
}

// ── Users ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProfileUpdateBody {
    full_name: Option<String>,
    bio: Option<String>,
}

#[derive(Deserialize)]
struct PageQuery {
    skip: Option<i64>,
    limit: Option<i64>,
}

/// GET /api/users — alias for the active family's member directory.
async fn handle_users_list(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    handle_family_members(State(state), headers).await
}

/// GET /api/users/me
async fn handle_profile_get(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    match require_identity(&state, &headers) {
        Ok(identity) => (StatusCode::OK, Json(serde_json::json!({"user": identity.user}))),
        Err(resp) => resp,
    }
}

/// PUT /api/users/me — update the caller's own profile fields.
async fn handle_profile_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<ProfileUpdateBody>,
) -> ApiResponse {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match state.store.update_profile(
        &identity.user.id,
        body.full_name.as_deref(),
        body.bio.as_deref(),
    ) {
        Ok(user) => (StatusCode::OK, Json(serde_json::json!({"user": user}))),
        Err(e) => error_response(&e),
    }
}

/// Look up another user, visible only when they share the caller's active
/// family. Strangers read as missing.
fn fellow_member(
    state: &AppState,
    family_id: &str,
    user_id: &str,
) -> Result<crate::store::User, ApiError> {
    if !state.store.is_member(user_id, family_id)? {
        return Err(ApiError::NotFound("user"));
    }
    state
        .store
        .get_user(user_id)?
        .ok_or(ApiError::NotFound("user"))
}

/// GET /api/users/{user_id}
async fn handle_user_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match fellow_member(&state, &family_id, &user_id) {
        Ok(user) => (StatusCode::OK, Json(serde_json::json!({"user": user}))),
        Err(e) => error_response(&e),
    }
}

/// GET /api/users/{user_id}/posts — a member's posts within the shared family.
async fn handle_user_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    if let Err(e) = fellow_member(&state, &family_id, &user_id) {
        return error_response(&e);
    }
    let (skip, limit) = page_bounds(page.skip, page.limit);
    match state.store.list_user_posts(&family_id, &user_id, skip, limit) {
        Ok(posts) => (
            StatusCode::OK,
            Json(serde_json::json!({"posts": posts_json(&state, &posts)})),
        ),
        Err(e) => error_response(&e),
    }
}

// ── Posts ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PostContentBody {
    content: String,
}

/// GET /api/posts — the active family's feed, newest first.
async fn handle_posts_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let (skip, limit) = page_bounds(page.skip, page.limit);
    match state.store.list_posts(&family_id, skip, limit) {
        Ok(posts) => (
            StatusCode::OK,
            Json(serde_json::json!({"posts": posts_json(&state, &posts)})),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/posts
async fn handle_post_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<PostContentBody>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if body.content.trim().is_empty() {
        return bad_request("post content is required");
    }
    match state
        .store
        .create_post(&identity.user.id, &family_id, &body.content)
    {
        Ok(post) => (StatusCode::CREATED, Json(post_json(&state, &post))),
        Err(e) => error_response(&e),
    }
}

/// GET /api/posts/{post_id}
async fn handle_post_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state.store.get_post(&post_id, &family_id) {
        Ok(post) => (StatusCode::OK, Json(post_json(&state, &post))),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/posts/{post_id} — owner only.
async fn handle_post_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    body: JsonBody<PostContentBody>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match state
        .store
        .update_post(&post_id, &family_id, &identity.user.id, &body.content)
    {
        Ok(post) => (StatusCode::OK, Json(post_json(&state, &post))),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/posts/{post_id} — owner only.
async fn handle_post_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state
        .store
        .delete_post(&post_id, &family_id, &identity.user.id)
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "deleted"}))),
        Err(e) => error_response(&e),
    }
}

// ── Reactions ───────────────────────────────────────────────────────

async fn react(
    state: AppState,
    headers: HeaderMap,
    post_id: String,
    kind: ReactionKind,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state
        .store
        .react(&post_id, &family_id, &identity.user.id, kind)
    {
        Ok(reaction) => (
            StatusCode::OK,
            Json(serde_json::json!({"reaction": reaction})),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/posts/{post_id}/like
async fn handle_post_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResponse {
    react(state, headers, post_id, ReactionKind::Like).await
}

/// POST /api/posts/{post_id}/dislike
async fn handle_post_dislike(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResponse {
    react(state, headers, post_id, ReactionKind::Dislike).await
}

/// DELETE /api/posts/{post_id}/reaction
async fn handle_reaction_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state
        .store
        .remove_reaction(&post_id, &family_id, &identity.user.id)
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "removed"}))),
        Err(e) => error_response(&e),
    }
}

// ── Comments ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CommentBody {
    content: String,
}

/// GET /api/posts/{post_id}/comments
async fn handle_comments_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state.store.list_comments(&post_id, &family_id) {
        Ok(comments) => (StatusCode::OK, Json(serde_json::json!({"comments": comments}))),
        Err(e) => error_response(&e),
    }
}

/// POST /api/posts/{post_id}/comments
async fn handle_comment_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    body: JsonBody<CommentBody>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if body.content.trim().is_empty() {
        return bad_request("comment content is required");
    }
    match state
        .store
        .create_comment(&post_id, &family_id, &identity.user.id, &body.content)
    {
        Ok(comment) => (StatusCode::CREATED, Json(serde_json::json!({"comment": comment}))),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/comments/{comment_id} — owner only.
async fn handle_comment_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
    body: JsonBody<CommentBody>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match state
        .store
        .update_comment(&comment_id, &family_id, &identity.user.id, &body.content)
    {
        Ok(comment) => (StatusCode::OK, Json(serde_json::json!({"comment": comment}))),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/comments/{comment_id} — owner only.
async fn handle_comment_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state
        .store
        .delete_comment(&comment_id, &family_id, &identity.user.id)
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "deleted"}))),
        Err(e) => error_response(&e),
    }
}

// ── Messages ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageSendBody {
    recipient_id: String,
    content: String,
}

/// POST /api/messages — send a direct message inside the active family.
/// The recipient must share the family; strangers read as missing.
async fn handle_message_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<MessageSendBody>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if body.content.trim().is_empty() {
        return bad_request("message content is required");
    }
    if let Err(e) = fellow_member(&state, &family_id, &body.recipient_id) {
        return error_response(&e);
    }
    match state.store.send_message(
        &identity.user.id,
        &body.recipient_id,
        &family_id,
        &body.content,
    ) {
        Ok(message) => (StatusCode::CREATED, Json(serde_json::json!({"message": message}))),
        Err(e) => error_response(&e),
    }
}

/// GET /api/messages/conversations — latest message per peer.
async fn handle_conversations(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state.store.list_conversations(&identity.user.id, &family_id) {
        Ok(conversations) => (
            StatusCode::OK,
            Json(serde_json::json!({"conversations": conversations})),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/messages/conversations/{user_id} — full thread with one peer.
async fn handle_conversation_with(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    if let Err(e) = fellow_member(&state, &family_id, &user_id) {
        return error_response(&e);
    }
    match state
        .store
        .conversation_with(&identity.user.id, &user_id, &family_id)
    {
        Ok(messages) => (StatusCode::OK, Json(serde_json::json!({"messages": messages}))),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/messages/{message_id}/read — recipient only.
async fn handle_message_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state
        .store
        .mark_message_read(&message_id, &family_id, &identity.user.id)
    {
        Ok(message) => (StatusCode::OK, Json(serde_json::json!({"message": message}))),
        Err(e) => error_response(&e),
    }
}

/// GET /api/messages/unread-count
async fn handle_unread_count(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    match state.store.unread_count(&identity.user.id, &family_id) {
        Ok(count) => (StatusCode::OK, Json(serde_json::json!({"unread_count": count}))),
        Err(e) => error_response(&e),
    }
}

// ── Search ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    skip: Option<i64>,
    limit: Option<i64>,
}

/// GET /api/search?q= — substring search over the active family's posts.
async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let q = query.q.trim();
    if q.is_empty() {
        return bad_request("search query is required");
    }
    let (skip, limit) = page_bounds(query.skip, query.limit);
    match state.store.search_posts(&family_id, q, skip, limit) {
        Ok((posts, total)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "posts": posts_json(&state, &posts),
                "total": total,
                "query": q,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

// ── Summaries ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SummaryRequestBody {
    groq_api_key: String,
    /// YYYY-MM-DD; today when absent.
    date: Option<String>,
}

/// POST /api/family/summary — LLM recap of the active family's day.
async fn handle_family_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<SummaryRequestBody>,
) -> ApiResponse {
    let (_, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let Some((start, end, date)) = day_window(body.date.as_deref()) else {
        return bad_request("date must be YYYY-MM-DD");
    };

    let posts = match state.store.posts_between(&family_id, start, end) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let members = match state.store.list_members_of(&family_id) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };

    let excerpts: Vec<PostExcerpt> = posts
        .iter()
        .map(|p| PostExcerpt {
            author: state
                .store
                .get_user(&p.user_id)
                .ok()
                .flatten()
                .map_or_else(|| "Unknown".to_string(), |u| u.username),
            content: p.content.clone(),
        })
        .collect();
    let member_names: Vec<String> = members.iter().map(|u| u.username.clone()).collect();

    let active: std::collections::HashSet<&str> =
        posts.iter().map(|p| p.user_id.as_str()).collect();

    let client = GroqClient::new(state.http.clone(), &body.groq_api_key);
    let summary = client.family_summary(&excerpts, &member_names).await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "summary": summary,
            "total_posts": posts.len(),
            "date": date,
            "users_active": active.len(),
        })),
    )
}

/// POST /api/family/users/{user_id}/summary — one member's day: post recap
/// plus free-text sentiment, informed by their messages with the caller.
async fn handle_user_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    body: JsonBody<SummaryRequestBody>,
) -> ApiResponse {
    let (identity, family_id) = match require_family_scope(&state, &headers) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let body = match unwrap_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let target = match fellow_member(&state, &family_id, &user_id) {
        Ok(u) => u,
        Err(e) => return error_response(&e),
    };
    let Some((start, end, date)) = day_window(body.date.as_deref()) else {
        return bad_request("date must be YYYY-MM-DD");
    };

    let posts = match state
        .store
        .user_posts_between(&family_id, &user_id, start, end)
    {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let messages = match state.store.messages_between_users(
        &family_id,
        &identity.user.id,
        &user_id,
        start,
        end,
    ) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };

    let post_texts: Vec<String> = posts.iter().map(|p| p.content.clone()).collect();
    let message_texts: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();

    let client = GroqClient::new(state.http.clone(), &body.groq_api_key);
    let result = client.user_summary(&post_texts, &message_texts).await;

    let messages_with_you = (!messages.is_empty()).then(|| {
        serde_json::json!({
            "count": messages.len(),
            "summary": format!("You exchanged {} messages today.", messages.len()),
        })
    });

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "user_id": target.id,
            "username": target.username,
            "date": date,
            "post_summary": result.post_summary,
            "sentiment": result.sentiment,
            "posts_count": posts.len(),
            "messages_with_you": messages_with_you,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn test_state() -> AppState {
        let store = Arc::new(FeedStore::open_in_memory().unwrap());
        let codec = CredentialCodec::new("gateway-test-secret", 1800);
        let sessions = Arc::new(SessionResolver::new(Arc::clone(&store), codec));
        AppState {
            store,
            sessions,
            http: reqwest::Client::new(),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    async fn signup_and_login(state: &AppState, username: &str, family: &str) -> String {
        let body = SignupBody {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: "hunter2!".into(),
            full_name: None,
            bio: None,
            family_names: vec![family.into()],
        };
        let (status, _) = handle_signup(State(state.clone()), Ok(Json(body))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, Json(resp)) = handle_login(
            State(state.clone()),
            Ok(Json(LoginBody {
                username: username.into(),
                password: "hunter2!".into(),
                family_id: None,
                family_name: None,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        resp["access_token"].as_str().unwrap().to_string()
    }

    #[test]
    fn security_body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn codec_wiring_uses_configured_ttl() {
        // Built the same way run_gateway wires its codec from the config.
        let config: Config =
            toml::from_str("[auth]\ntoken_ttl_minutes = 2\ntoken_secret = \"wiring\"\n").unwrap();
        let codec = CredentialCodec::new(&config.token_secret(), config.token_ttl_secs());

        let token = codec.issue("user-1", None);
        let claims = codec.decode(&token).unwrap();
        let now = crate::store::epoch_secs();
        assert!((claims.exp - now - 120).abs() <= 2);
    }

    #[test]
    fn extract_bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("tok-123"));
        assert!(extract_bearer_token(&headers).is_none());

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer tok-123"),
        );
        assert_eq!(extract_bearer_token(&headers), Some("tok-123"));
    }

    #[test]
    fn error_statuses_map_by_kind() {
        assert_eq!(
            status_for(&ApiError::InvalidCredentials),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&ApiError::NoFamilySelected),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&ApiError::Forbidden("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&ApiError::NotFound("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&ApiError::DuplicateUser), StatusCode::CONFLICT);
    }

    #[test]
    fn page_bounds_clamp() {
        assert_eq!(page_bounds(None, None), (0, DEFAULT_PAGE_LIMIT));
        assert_eq!(page_bounds(Some(-5), Some(0)), (0, 1));
        assert_eq!(page_bounds(Some(10), Some(10_000)), (10, MAX_PAGE_LIMIT));
    }

    #[test]
    fn day_window_parses_dates() {
        let (start, end, label) = day_window(Some("2025-06-01")).unwrap();
        assert_eq!(label, "2025-06-01");
        assert_eq!(end - start, 86_399);
        assert!(day_window(Some("not-a-date")).is_none());
        assert!(day_window(None).is_some());
    }

    #[test]
    fn signup_body_family_names_default_empty() {
        let parsed: SignupBody = serde_json::from_str(
            r#"{"username": "alice", "email": "a@example.com", "password": "pw"}"#,
        )
        .unwrap();
        assert!(parsed.family_names.is_empty());
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthorized() {
        let state = test_state();
        let (status, _) = handle_me(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            handle_posts_list(State(state), HeaderMap::new(), Query(PageQuery {
                skip: None,
                limit: None,
            }))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_login_post_roundtrip() {
        let state = test_state();
        let token = signup_and_login(&state, "alice", "Smiths").await;
        let headers = bearer(&token);

        let (status, Json(post)) = handle_post_create(
            State(state.clone()),
            headers.clone(),
            Ok(Json(PostContentBody {
                content: "hello family".into(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(post["content"], "hello family");
        assert_eq!(post["user"]["username"], "alice");

        let (status, Json(feed)) = handle_posts_list(
            State(state),
            headers,
            Query(PageQuery {
                skip: None,
                limit: None,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(feed["posts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cross_family_post_reads_as_missing() {
        let state = test_state();
        let alice = signup_and_login(&state, "alice", "Smiths").await;
        let carol = signup_and_login(&state, "carol", "Jones").await;

        let (_, Json(post)) = handle_post_create(
            State(state.clone()),
            bearer(&alice),
            Ok(Json(PostContentBody {
                content: "smiths only".into(),
            })),
        )
        .await;
        let post_id = post["id"].as_str().unwrap().to_string();

        let (status, Json(resp)) =
            handle_post_get(State(state), bearer(&carol), Path(post_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp["code"], "not_found");
    }

    #[tokio::test]
    async fn duplicate_family_create_conflicts() {
        let state = test_state();
        let token = signup_and_login(&state, "alice", "Smiths").await;

        let (status, Json(resp)) = handle_family_create(
            State(state),
            bearer(&token),
            Ok(Json(FamilyNameBody {
                name: "SMITHS".into(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(resp["code"], "duplicate_family");
    }

    #[tokio::test]
    async fn join_by_name_creates_join_by_id_is_informative() {
        let state = test_state();
        let token = signup_and_login(&state, "alice", "Smiths").await;

        // Joining by a new name creates the family on first use.
        let (status, Json(resp)) = handle_family_join(
            State(state.clone()),
            bearer(&token),
            Ok(Json(FamilyJoinBody {
                family_id: None,
                name: Some("Jones".into()),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["family"]["name"], "Jones");

        // Unknown ids answer 404 — family existence is not a secret.
        let (status, _) = handle_family_join(
            State(state),
            bearer(&token),
            Ok(Json(FamilyJoinBody {
                family_id: Some("no-such-id".into()),
                name: None,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn family_check_is_informative_without_auth() {
        let state = test_state();
        signup_and_login(&state, "alice", "Smiths").await;

        let (status, Json(resp)) = handle_family_check(
            State(state.clone()),
            Query(FamilyCheckQuery {
                name: "smiths".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["exists"], true);
        // First-seen casing is reported back.
        assert_eq!(resp["name"], "Smiths");

        let (_, Json(resp)) = handle_family_check(
            State(state),
            Query(FamilyCheckQuery {
                name: "Ghosts".into(),
            }),
        )
        .await;
        assert_eq!(resp["exists"], false);
    }

    #[tokio::test]
    async fn select_family_rescopes_session() {
        let state = test_state();
        let token = signup_and_login(&state, "alice", "Smiths").await;

        // Create a second family, then switch into it.
        let (_, Json(created)) = handle_family_create(
            State(state.clone()),
            bearer(&token),
            Ok(Json(FamilyNameBody {
                name: "Jones".into(),
            })),
        )
        .await;
        let jones_id = created["family"]["id"].as_str().unwrap().to_string();

        let (status, Json(resp)) = handle_select_family(
            State(state.clone()),
            bearer(&token),
            Ok(Json(SelectFamilyBody {
                family_id: jones_id.clone(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fresh = resp["access_token"].as_str().unwrap().to_string();

        let (_, Json(me)) = handle_me(State(state), bearer(&fresh)).await;
        assert_eq!(me["active_family"]["id"], jones_id.as_str());
    }

    #[tokio::test]
    async fn message_to_stranger_is_not_found() {
        let state = test_state();
        let alice = signup_and_login(&state, "alice", "Smiths").await;
        signup_and_login(&state, "carol", "Jones").await;

        let carol_id = {
            let (user, _) = state.store.find_user_auth("carol").unwrap().unwrap();
            user.id
        };
        let (status, Json(resp)) = handle_message_send(
            State(state),
            bearer(&alice),
            Ok(Json(MessageSendBody {
                recipient_id: carol_id,
                content: "psst".into(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp["code"], "not_found");
    }

    #[tokio::test]
    async fn search_requires_query() {
        let state = test_state();
        let token = signup_and_login(&state, "alice", "Smiths").await;
        let (status, _) = handle_search(
            State(state),
            bearer(&token),
            Query(SearchQuery {
                q: "  ".into(),
                skip: None,
                limit: None,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
