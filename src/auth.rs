use std::fmt;
use std::str::FromStr;

use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::{
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header,
    middleware::Next,
    web, Error, HttpMessage, HttpRequest, HttpResponse,
};
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::{db, models::UserRow, state::AppState};

const SESSION_COOKIE: &str = "ms_session";

/// The single role a session acts under, decided once at login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Mechanic,
    Administrator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Mechanic => "mechanic",
            Role::Administrator => "administrator",
        }
    }

    pub fn dashboard_path(self) -> &'static str {
        match self {
            Role::Client => "/client/dashboard",
            Role::Mechanic => "/mechanic/dashboard",
            Role::Administrator => "/admin/dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "client" => Ok(Role::Client),
            "mechanic" => Ok(Role::Mechanic),
            "administrator" => Ok(Role::Administrator),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The authenticated identity attached to requests inside a guarded scope.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub session: String,
}

/// Everything the role resolver looks at for one identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoleEvidence {
    pub is_staff: bool,
    pub is_superuser: bool,
    pub has_admin_profile: bool,
    pub has_client_profile: bool,
    pub has_mechanic_profile: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleResolution {
    pub role: Role,
    /// Set when the identity had no profile at all and fell back to Client.
    pub defaulted: bool,
}

/// Platform flags first, then the administrator, client and mechanic profiles.
pub fn resolve_role(evidence: RoleEvidence) -> RoleResolution {
    let role = if evidence.is_staff || evidence.is_superuser || evidence.has_admin_profile {
        Some(Role::Administrator)
    } else if evidence.has_client_profile {
        Some(Role::Client)
    } else if evidence.has_mechanic_profile {
        Some(Role::Mechanic)
    } else {
        None
    };

    match role {
        Some(role) => RoleResolution {
            role,
            defaulted: false,
        },
        None => RoleResolution {
            role: Role::Client,
            defaulted: true,
        },
    }
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Please fill in every field.")]
    MissingFields,
    #[error("Invalid username or password.")]
    InvalidCredentials,
    #[error("login failed: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub user: AuthUser,
    pub defaulted: bool,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = PasswordHash::new(password_hash);
    match parsed_hash {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Active user matching the credentials. Unknown users and wrong passwords are
/// indistinguishable to the caller.
pub async fn authenticate_credentials(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    let user = sqlx::query_as::<_, UserRow>(
        r#"SELECT id, username, display_name, password_hash, is_staff, is_superuser, active, created_at
           FROM users
           WHERE username = ? AND active = 1
           LIMIT 1"#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(user.filter(|user| verify_password(password, &user.password_hash)))
}

pub async fn role_evidence(pool: &SqlitePool, user: &UserRow) -> Result<RoleEvidence, sqlx::Error> {
    let (has_admin, has_client, has_mechanic) = sqlx::query_as::<_, (bool, bool, bool)>(
        r#"SELECT EXISTS(SELECT 1 FROM administrators WHERE user_id = ?1),
                  EXISTS(SELECT 1 FROM clients WHERE user_id = ?1),
                  EXISTS(SELECT 1 FROM mechanics WHERE user_id = ?1)"#,
    )
    .bind(&user.id)
    .fetch_one(pool)
    .await?;

    Ok(RoleEvidence {
        is_staff: user.is_staff,
        is_superuser: user.is_superuser,
        has_admin_profile: has_admin,
        has_client_profile: has_client,
        has_mechanic_profile: has_mechanic,
    })
}

/// Checks the credentials, resolves the landing role and opens a session.
pub async fn login(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<LoginOutcome, LoginError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(LoginError::MissingFields);
    }

    let user = authenticate_credentials(pool, username, password)
        .await?
        .ok_or(LoginError::InvalidCredentials)?;

    let resolution = resolve_role(role_evidence(pool, &user).await?);
    if resolution.defaulted {
        log::warn!(
            "User '{}' has no profile; signing in as client.",
            user.username
        );
    }

    let session = create_session(pool, &user.id, resolution.role).await?;
    Ok(LoginOutcome {
        user: AuthUser {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: resolution.role,
            session,
        },
        defaulted: resolution.defaulted,
    })
}

pub async fn create_session(pool: &SqlitePool, user_id: &str, role: Role) -> Result<String, sqlx::Error> {
    let token = new_id();
    sqlx::query("INSERT INTO sessions (token, user_id, role, created_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(role.as_str())
        .bind(db::now())
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn load_session(pool: &SqlitePool, token: &str) -> Result<Option<AuthUser>, sqlx::Error> {
    let row = sqlx::query_as::<_, (String, String, String, String)>(
        r#"SELECT u.id, u.username, u.display_name, s.role
           FROM sessions s
           JOIN users u ON s.user_id = u.id
           WHERE s.token = ? AND u.active = 1"#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(id, username, display_name, role)| {
        let role = role.parse().ok()?;
        Some(AuthUser {
            id,
            username,
            display_name,
            role,
            session: token.to_string(),
        })
    }))
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub fn session_token(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE).map(|cookie| cookie.value().to_string())
}

/// Session lookup for handlers outside the guarded scopes.
pub async fn current_user(state: &AppState, req: &HttpRequest) -> Option<AuthUser> {
    let token = session_token(req)?;
    match load_session(&state.db, &token).await {
        Ok(user) => user,
        Err(err) => {
            log::error!("Session lookup failed: {err}");
            None
        }
    }
}

pub fn session_cookie(req: &HttpRequest, token: &str) -> Cookie<'static> {
    let mut builder = Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(14));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn clear_session_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(0));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

#[derive(Clone, Copy)]
enum Denial {
    Redirect,
    Json,
}

async fn guard<B>(
    req: ServiceRequest,
    next: Next<B>,
    role: Role,
    denial: Denial,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    let user = match req.app_data::<web::Data<AppState>>() {
        Some(state) => current_user(state, req.request()).await,
        None => None,
    };

    match user {
        Some(user) if user.role == role => {
            req.extensions_mut().insert(user);
            let res = next.call(req).await?;
            Ok(res.map_into_boxed_body())
        }
        _ => {
            let response = match denial {
                Denial::Redirect => HttpResponse::Found()
                    .append_header((header::LOCATION, "/login"))
                    .insert_header((header::CACHE_CONTROL, "no-store"))
                    .finish(),
                Denial::Json => HttpResponse::Forbidden().json(json!({
                    "ok": false,
                    "error": "access denied",
                })),
            };
            Ok(req.into_response(response))
        }
    }
}

pub async fn client_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    guard(req, next, Role::Client, Denial::Redirect).await
}

pub async fn mechanic_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    guard(req, next, Role::Mechanic, Denial::Redirect).await
}

pub async fn admin_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    guard(req, next, Role::Administrator, Denial::Redirect).await
}

pub async fn admin_api_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    guard(req, next, Role::Administrator, Denial::Json).await
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Inserts an active user and returns its id.
    pub async fn insert_user(pool: &SqlitePool, username: &str, password: &str, staff: bool) -> String {
        let id = new_id();
        sqlx::query(
            r#"INSERT INTO users (id, username, display_name, password_hash, is_staff, is_superuser, active, created_at)
               VALUES (?, ?, ?, ?, ?, 0, 1, ?)"#,
        )
        .bind(&id)
        .bind(username)
        .bind(username)
        .bind(hash_password(password).unwrap())
        .bind(staff)
        .bind(db::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }
}
