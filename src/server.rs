//!
//! castellan HTTP server
//! ---------------------
//! Axum front end for the identity provider. Every resource except `/` takes an
//! `Authorization` header which is handed unmodified to the dispatcher.
//!
//! Responsibilities:
//! - Entity navigation and token issuance for the authenticated principal.
//! - User and entity administration backed by the store.
//! - Resource-server redirect: a token bound to the chosen server, optionally
//!   carrying a fresh session key.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::password::{fill_random, hash_password_with};
use crate::identity::{
    AuthDispatcher, Entity, Principal, StoreAuthorizer, StorePasswordAuthenticator, TokenAuthenticator, TokenOptions,
    parse_authorization_header,
};
use crate::store::{EntityUpdate, MemoryStore, SharedStore, UserRecord, UserUpdate};
use crate::token::codec::TokenCodec;

pub const SESSION_KEY_LEN: usize = 16;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<AuthDispatcher>,
    pub store: SharedStore,
    pub grants: Arc<StoreAuthorizer>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the store-backed authenticator and authorizer into a dispatcher.
    pub fn new(config: ServerConfig, store: SharedStore) -> AuthResult<Self> {
        config.validate()?;
        ensure_default_admin(&config, &store)?;
        let settings = config.token_settings()?;
        let mut grants = StoreAuthorizer::with_eviction(store.clone(), config.cache_capacity, config.cache_eviction)?;
        match settings.secret.clone() {
            Some(secret) => grants = grants.with_codec(TokenCodec::new(secret)),
            None => warn!(target: "startup", "no shared secret configured; tokens will not be issued"),
        }
        let grants = Arc::new(grants);
        let mut builder = AuthDispatcher::builder()
            .authenticator(Arc::new(StorePasswordAuthenticator::new(store.clone())))
            .authorizer(grants.clone());
        // Fresh tokens double as credentials.
        if let Some(validator) = settings.validator() {
            info!(target: "startup", grace_secs = settings.grace_secs, origins = ?settings.origins, "token logins enabled");
            builder = builder.authenticator(Arc::new(TokenAuthenticator::new(validator)));
        }
        let dispatcher = builder.build();
        Ok(Self { dispatcher: Arc::new(dispatcher), store, grants, config: Arc::new(config) })
    }
}

fn ensure_default_admin(config: &ServerConfig, store: &SharedStore) -> AuthResult<()> {
    let Some(admin) = config.default_admin.as_ref() else { return Ok(()) };
    if !store.is_empty()? {
        return Ok(());
    }
    let mut record = UserRecord::new(&admin.name, hash_password_with(&admin.password, config.password_scheme)?);
    record.admin = true;
    store.create_user(record)?;
    warn!(target: "startup", user = %admin.name, "empty store: created default admin account; change its password");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "castellan ok" }))
        .route("/entities", get(list_root_entities))
        .route("/entities/{*path}", get(list_entities))
        .route("/authorization/{*path}", get(authorization))
        .route("/users", get(list_users))
        .route("/users/{name}", get(get_user).put(create_user).post(update_user).delete(delete_user))
        .route(
            "/users/{name}/{entity}",
            get(entity_login).put(grant_entity).post(update_entity).delete(revoke_entity),
        )
        .route("/users/{name}/{entity}/stats", get(entity_stats))
        .with_state(state)
}

/// Open the store, build state and serve until the listener fails.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store: SharedStore = match config.store_path.as_ref() {
        Some(path) => Arc::new(
            MemoryStore::open(path).with_context(|| format!("While opening store at {}", path.display()))?,
        ),
        None => {
            warn!(target: "startup", "no store path configured; users and grants live in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let addr = config.socket_addr()?;
    let state = AppState::new(config, store).context("While building server state")?;
    info!(target: "startup", %addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("While binding {addr}"))?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Handler failure; renders the JSON error body with the error's status.
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self { ApiError(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::UNAUTHORIZED {
            return (status, Json(json!({"status":"unauthorized"}))).into_response();
        }
        if status.is_server_error() {
            error!(target: "http", code = self.0.code_str(), error = %self.0, "request failed");
        }
        (status, Json(json!({"status":"error","code": self.0.code_str(),"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::AuthenticationFailed)?;
    let (kind, raw) = parse_authorization_header(value).map_err(|_| AuthError::AuthenticationFailed)?;
    match state.dispatcher.authenticate(kind, raw) {
        Ok(p) => Ok(p),
        Err(AuthError::MalformedCredential(_)) => Err(AuthError::AuthenticationFailed.into()),
        Err(e) => Err(e.into()),
    }
}

fn is_admin(state: &AppState, principal: &Principal) -> AuthResult<bool> {
    Ok(state.store.get_user(principal.name())?.is_some_and(|u| u.admin))
}

fn assert_admin(state: &AppState, principal: &Principal) -> AuthResult<()> {
    if is_admin(state, principal)? { Ok(()) } else { Err(AuthError::Forbidden) }
}

/// Callers may act on themselves; admins on anyone.
fn assert_allowed(state: &AppState, principal: &Principal, name: &str) -> AuthResult<()> {
    if principal.name() == name { Ok(()) } else { assert_admin(state, principal) }
}

#[derive(Debug, Serialize)]
struct EntityView {
    label: String,
    identifier: String,
    leaf: bool,
}

impl From<&Entity> for EntityView {
    fn from(e: &Entity) -> Self {
        Self { label: e.label().to_string(), identifier: e.identifier_path().to_string(), leaf: e.is_leaf() }
    }
}

fn entity_views(list: &[Entity]) -> Vec<EntityView> { list.iter().map(EntityView::from).collect() }

async fn list_root_entities(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<EntityView>>> {
    let principal = authenticate(&state, &headers)?;
    let list = state.dispatcher.entities_for(&principal, None)?;
    Ok(Json(entity_views(&list)))
}

async fn list_entities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> ApiResult<Json<Vec<EntityView>>> {
    let principal = authenticate(&state, &headers)?;
    let parent = state.dispatcher.resolve_identifier(&path)?;
    let list = state.dispatcher.entities_for(&principal, Some(&parent))?;
    Ok(Json(entity_views(&list)))
}

async fn authorization(State(state): State<AppState>, headers: HeaderMap, Path(path): Path<String>) -> ApiResult<String> {
    let principal = authenticate(&state, &headers)?;
    let entity = state.dispatcher.resolve_identifier(&path)?;
    if !state.grants.is_granted(&principal, &entity)? {
        return Err(AuthError::Forbidden.into());
    }
    Ok(state.dispatcher.issue_token(&principal, &entity)?)
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    #[serde(rename = "match")]
    pattern: Option<String>,
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let principal = authenticate(&state, &headers)?;
    assert_admin(&state, &principal)?;
    Ok(Json(state.store.list_users(q.pattern.as_deref().filter(|p| !p.is_empty()))?))
}

#[derive(Debug, Serialize)]
struct UserView {
    name: String,
    entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<i32>,
    #[serde(rename = "passwordHash", skip_serializing_if = "Option::is_none")]
    password_hash: Option<String>,
    #[serde(rename = "lastLogin", skip_serializing_if = "Option::is_none")]
    last_login: Option<chrono::DateTime<chrono::Utc>>,
}

async fn get_user(State(state): State<AppState>, headers: HeaderMap, Path(name): Path<String>) -> ApiResult<Json<UserView>> {
    let principal = authenticate(&state, &headers)?;
    assert_allowed(&state, &principal, &name)?;
    let user = state.store.get_user(&name)?.ok_or_else(|| AuthError::NotFound(format!("user '{name}'")))?;
    let entities = state.store.list_entities(&name)?.into_iter().map(|e| e.label).collect();
    let detailed = is_admin(&state, &principal)?;
    Ok(Json(UserView {
        name: user.name,
        entities,
        admin: detailed.then_some(user.admin),
        flags: detailed.then_some(user.flags),
        password_hash: detailed.then_some(user.password_hash),
        last_login: user.last_login,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct UserBody {
    password: Option<String>,
    admin: Option<bool>,
    flags: Option<i32>,
}

fn parse_body<T: Default + for<'de> Deserialize<'de>>(body: &Bytes) -> AuthResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AuthError::MalformedCredential(format!("request body: {e}")))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers)?;
    assert_admin(&state, &principal)?;
    let body: UserBody = parse_body(&body)?;
    let password = body
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AuthError::MalformedCredential("password is required".into()))?;
    let mut record = UserRecord::new(&name, hash_password_with(&password, state.config.password_scheme)?);
    record.admin = body.admin.unwrap_or(false);
    record.flags = body.flags.unwrap_or(0);
    state.store.create_user(record)?;
    info!(target: "http", by = %principal, user = %name, "user created");
    Ok((StatusCode::CREATED, Json(json!({"status":"ok"}))))
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    assert_allowed(&state, &principal, &name)?;
    let body: UserBody = parse_body(&body)?;
    let admin = is_admin(&state, &principal)?;
    let update = UserUpdate {
        password_hash: match body.password.filter(|p| !p.is_empty()) {
            Some(p) => Some(hash_password_with(&p, state.config.password_scheme)?),
            None => None,
        },
        admin: body.admin.filter(|_| admin),
        flags: body.flags.filter(|_| admin),
    };
    state.store.update_user(&name, update)?;
    info!(target: "http", by = %principal, user = %name, "user updated");
    Ok(Json(json!({"status":"ok"})))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    assert_admin(&state, &principal)?;
    state.store.delete_user(&name)?;
    state.grants.invalidate(&Principal::new(&name));
    info!(target: "http", by = %principal, user = %name, "user deleted");
    Ok(Json(json!({"status":"ok"})))
}

#[derive(Debug, Serialize)]
struct EntityLogin {
    name: String,
    #[serde(rename = "authToken")]
    auth_token: String,
    #[serde(rename = "resourceServer")]
    resource_server: String,
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<i32>,
    #[serde(rename = "lastLogin", skip_serializing_if = "Option::is_none")]
    last_login: Option<chrono::DateTime<chrono::Utc>>,
}

/// Log in as `entity`: pick the resource server and hand back a token bound to it.
async fn entity_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, entity)): Path<(String, String)>,
) -> ApiResult<Json<EntityLogin>> {
    let principal = authenticate(&state, &headers)?;
    assert_allowed(&state, &principal, &name)?;
    let record = state
        .store
        .get_entity(&name, &entity)?
        .ok_or_else(|| AuthError::NotFound(format!("entity '{entity}'")))?;
    let server = state
        .config
        .resource_server()?
        .ok_or_else(|| AuthError::TokenIssuanceFailed("no resource server configured".into()))?;

    let session_key = if state.config.session_encryption {
        let mut key = vec![0u8; SESSION_KEY_LEN];
        fill_random(&mut key)?;
        Some(key)
    } else {
        None
    };
    let options = TokenOptions { origin: Some(server.host.clone()), session_key: session_key.clone() };
    let target = state.dispatcher.resolve_identifier(&entity)?;
    let token = state.dispatcher.issue_token_with(&Principal::new(&name), &target, &options)?;
    if let Err(e) = state.store.record_entity_login(&name, &entity, chrono::Utc::now()) {
        warn!(target: "http", user = %name, entity = %entity, error = %e, "could not record entity login");
    }
    info!(target: "http", user = %name, entity = %entity, server = %server, "entity login");
    // Admins see the entity's bookkeeping as it was before this login.
    let detailed = is_admin(&state, &principal)?;
    Ok(Json(EntityLogin {
        name,
        auth_token: token,
        resource_server: server.to_string(),
        session_key: session_key.map(|k| STANDARD.encode(k)),
        flags: detailed.then_some(record.flags),
        last_login: if detailed { record.last_login } else { None },
    }))
}

#[derive(Debug, Default, Deserialize)]
struct GrantBody {
    flags: Option<i32>,
}

async fn grant_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, entity)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers)?;
    assert_allowed(&state, &principal, &name)?;
    let body: GrantBody = parse_body(&body)?;
    let granted = state.grants.grant(&Principal::new(&name), &entity, body.flags.unwrap_or(0))?;
    info!(target: "http", by = %principal, user = %name, entity = %granted, "entity granted");
    Ok((StatusCode::CREATED, Json(EntityView::from(&granted))))
}

#[derive(Debug, Default, Deserialize)]
struct EntityBody {
    name: Option<String>,
    flags: Option<i32>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// Admin-only: rename an entity, change its flags or merge in stats.
async fn update_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, entity)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    assert_admin(&state, &principal)?;
    let body: EntityBody = parse_body(&body)?;
    let update = EntityUpdate { label: body.name, flags: body.flags, attributes: body.attributes };
    state.grants.update(&Principal::new(&name), &entity, update)?;
    info!(target: "http", by = %principal, user = %name, entity = %entity, "entity updated");
    Ok(Json(json!({"status":"ok"})))
}

async fn entity_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, entity)): Path<(String, String)>,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    let principal = authenticate(&state, &headers)?;
    assert_allowed(&state, &principal, &name)?;
    Ok(Json(state.store.get_attributes(&name, &entity)?))
}

async fn revoke_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, entity)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    assert_allowed(&state, &principal, &name)?;
    state.grants.revoke(&Principal::new(&name), &entity)?;
    info!(target: "http", by = %principal, user = %name, entity = %entity, "entity revoked");
    Ok(Json(json!({"status":"ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admin_only_on_empty_store() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let state = AppState::new(ServerConfig::default(), store.clone()).unwrap();
        let admin = state.store.get_user("admin").unwrap().unwrap();
        assert!(admin.admin);
        assert!(crate::identity::verify_password("password", &admin.password_hash).unwrap());

        store.delete_user("admin").unwrap();
        store.create_user(UserRecord::new("fii", "h")).unwrap();
        AppState::new(ServerConfig::default(), store.clone()).unwrap();
        assert!(store.get_user("admin").unwrap().is_none());
    }

    #[test]
    fn error_bodies() {
        let resp = ApiError(AuthError::NotFound("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = ApiError(AuthError::AuthenticationFailed).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = ApiError(AuthError::TokenIssuanceFailed("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
