// src/error.rs
use warp::http::StatusCode;
use warp::reject::Reject;

/// Failures talking to the quote provider. An unknown symbol is not an
/// error; lookups report it as `None`.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("must provide username")]
    MissingUsername,
    #[error("must provide password")]
    MissingPassword,
    #[error("must provide confirmation password")]
    MissingConfirmation,
    #[error("password must match confirmation password")]
    PasswordMismatch,
    #[error("invalid username, choose another")]
    UsernameTaken,
    #[error("invalid username and/or password")]
    InvalidCredentials,
    #[error("invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AuthError {
    /// True when the failure came from what the user typed.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AuthError::MissingUsername
                | AuthError::MissingPassword
                | AuthError::MissingConfirmation
                | AuthError::PasswordMismatch
                | AuthError::UsernameTaken
                | AuthError::InvalidCredentials
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("Please type in a Stock Symbol")]
    MissingSymbol,
    #[error("Please type in a valid Stock Symbol")]
    InvalidSymbol,
    #[error("must provide number of shares")]
    MissingShares,
    #[error("Number of Shares is not a positive integer")]
    InvalidShares,
    #[error("Cannot Afford")]
    CannotAfford,
    #[error("must provide valid symbol")]
    NotHeld,
    #[error("Don't own that many shares")]
    InsufficientShares,
    #[error("User {0} not found")]
    UnknownUser(i64),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),
}

impl TradeError {
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            TradeError::UnknownUser(_) | TradeError::Database(_) | TradeError::Quote(_)
        )
    }
}

/// Server-side failures surfaced to the catch-all rejection handler.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("Trade error: {0}")]
    Trade(#[from] TradeError),
}

impl Reject for AppError {}

/// Raised by the login guard; recovered into a redirect to the login page.
#[derive(Debug)]
pub struct LoginRequired;

impl Reject for LoginRequired {}

/// Reason phrase shown on the apology page for `status`.
pub fn describe(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Internal Server Error")
}
