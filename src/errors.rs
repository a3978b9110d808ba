use actix_identity::error::{GetIdentityError, LoginError};
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use sqlx::Error as SqlxError;
use thiserror::Error;

use crate::utils::Money;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("Internal server error")]
    InternalServerError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Password hashing error: {0}")]
    PasswordError(String),

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("Identity error: {0}")]
    IdentityError(#[from] GetIdentityError),

    #[error("Login error: {0}")]
    LoginError(#[from] LoginError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] SqlxError),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
            return HttpResponse::build(status).body("Internal server error");
        }
        HttpResponse::build(status).body(self.to_string())
    }
}

/// Failures of login and registration that are shown to the user.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username and/or password.")]
    InvalidCredentials,

    #[error("Passwords must match.")]
    PasswordMismatch,

    #[error("Username already taken.")]
    UsernameTaken,

    #[error("All fields are required.")]
    MissingFields,

    #[error(transparent)]
    App(#[from] AppError),
}

/// Reasons a bid is turned down.
#[derive(Debug, Error)]
pub enum BidError {
    #[error("Listing not found.")]
    ListingNotFound,

    #[error("This auction is closed.")]
    AuctionClosed,

    #[error("Invalid bid amount.")]
    InvalidAmount,

    #[error("Your bid must be at least the starting price of {starting_price}.")]
    BelowStartingPrice { starting_price: Money },

    #[error("Your bid must be higher than the current bid of {highest}.")]
    TooLow { highest: Money },

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<SqlxError> for AuthError {
    fn from(err: SqlxError) -> Self {
        AuthError::App(AppError::SqlxError(err))
    }
}

impl From<SqlxError> for BidError {
    fn from(err: SqlxError) -> Self {
        BidError::App(AppError::SqlxError(err))
    }
}

/// Field-level errors from a submitted form, in field order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<(&'static str, String)>);

impl ValidationErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|(f, _)| *f == field)
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|(_, m)| m.clone()).collect()
    }
}
