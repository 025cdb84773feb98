// src/auth.rs
use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db;
use crate::error::AuthError;
use crate::models::{field, LoginForm, RegisterForm, User};

pub const SESSION_COOKIE: &str = "session";
const SESSION_HOURS: i64 = 24;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(AuthError::Hash)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(AuthError::Hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// Signs the session id into the cookie value so it cannot be forged or
// outlive its expiry.
fn create_token(
    session_id: Uuid,
    expires_at: DateTime<Utc>,
    secret: &str,
) -> Result<String, AuthError> {
    let claims = Claims {
        sub: session_id.to_string(),
        exp: expires_at.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn decode_token(token: &str, secret: &str) -> Result<Uuid, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::Token(ErrorKind::InvalidSubject.into()))
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Max-Age=0; HttpOnly; SameSite=Lax; Path=/")
}

struct Session {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// Server-side sessions. The cookie only carries a signed session id; the
/// logged-in user lives here, so logging out revokes the cookie.
#[derive(Clone)]
pub struct Sessions {
    store: Arc<RwLock<HashMap<Uuid, Session>>>,
    secret: Arc<String>,
}

impl Sessions {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            secret: Arc::new(secret.into()),
        }
    }

    /// Opens a session for `user_id` and returns the cookie token.
    pub async fn start(&self, user_id: i64) -> Result<String, AuthError> {
        self.start_until(user_id, Utc::now() + Duration::hours(SESSION_HOURS))
            .await
    }

    // Abandoned sessions are never ended explicitly, so each new one sweeps
    // out whatever has expired.
    async fn start_until(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let session_id = Uuid::new_v4();
        let token = create_token(session_id, expires_at, &self.secret)?;

        let now = Utc::now();
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, session| session.expires_at > now);
        if store.len() < before {
            debug!("Dropped {} expired sessions.", before - store.len());
        }
        store.insert(
            session_id,
            Session {
                user_id,
                expires_at,
            },
        );
        Ok(token)
    }

    pub async fn user_id(&self, token: &str) -> Option<i64> {
        let session_id = match decode_token(token, &self.secret) {
            Ok(id) => id,
            Err(e) => {
                debug!("Ignoring session cookie: {}", e);
                return None;
            }
        };
        let now = Utc::now();
        self.store
            .read()
            .await
            .get(&session_id)
            .filter(|session| session.expires_at > now)
            .map(|session| session.user_id)
    }

    /// Forgets the session behind `token`, if any.
    pub async fn end(&self, token: &str) {
        if let Ok(session_id) = decode_token(token, &self.secret) {
            if let Some(session) = self.store.write().await.remove(&session_id) {
                info!("User {} logged out.", session.user_id);
            }
        }
    }
}

pub async fn register(pool: &SqlitePool, form: &RegisterForm) -> Result<i64, AuthError> {
    let username = field(&form.username).ok_or(AuthError::MissingUsername)?;
    let password = field(&form.password).ok_or(AuthError::MissingPassword)?;
    let confirmation = field(&form.confirmation).ok_or(AuthError::MissingConfirmation)?;
    if password != confirmation {
        return Err(AuthError::PasswordMismatch);
    }

    if db::find_user_by_username(pool, username).await?.is_some() {
        return Err(AuthError::UsernameTaken);
    }

    let hash = hash_password(password)?;
    match db::insert_user(pool, username, &hash).await {
        Ok(user_id) => {
            info!("Registered user {} as {}.", username, user_id);
            Ok(user_id)
        }
        // Lost a race with a concurrent registration of the same name.
        Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
            Err(AuthError::UsernameTaken)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn authenticate(pool: &SqlitePool, form: &LoginForm) -> Result<User, AuthError> {
    let username = field(&form.username).ok_or(AuthError::MissingUsername)?;
    let password = field(&form.password).ok_or(AuthError::MissingPassword)?;

    let Some(user) = db::find_user_by_username(pool, username).await? else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &user.hash)? {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user)
}
