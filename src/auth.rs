use actix_identity::Identity;
use serde::Deserialize;

use crate::{
    db,
    errors::{AppError, AuthError},
    structs::User,
    utils, AppState,
};

#[derive(Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct Register {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    pub confirmation: String,
}

/// Checks a username/password pair. Unknown users and wrong passwords fail alike.
pub async fn authenticate(state: &AppState, form: &Login) -> Result<User, AuthError> {
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }
    match db::get_user_by_username(state, username).await? {
        Some(user) if utils::verify_password(&form.password, &user.pwd_hash) => Ok(user),
        Some(user) => {
            log::warn!("Failed login for user ID: {}", user.id);
            Err(AuthError::InvalidCredentials)
        }
        None => Err(AuthError::InvalidCredentials),
    }
}

pub async fn register(state: &AppState, form: &Register) -> Result<User, AuthError> {
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    if form.password != form.confirmation {
        return Err(AuthError::PasswordMismatch);
    }
    let pwd_hash = utils::hash_password(&form.password)?;
    db::create_user(state, username, form.email.trim(), &pwd_hash)
        .await
        .map_err(|e| {
            let taken = e
                .as_database_error()
                .map(|db_err| db_err.is_unique_violation())
                .unwrap_or(false);
            if taken {
                AuthError::UsernameTaken
            } else {
                log::error!("Failed to create user: {}", e);
                AuthError::from(e)
            }
        })
}

/// Resolves the session identity to a user.
///
/// A session naming a user that no longer exists, or an id that does not
/// parse, counts as anonymous.
pub async fn current_user(
    state: &AppState,
    identity: Option<&Identity>,
) -> Result<Option<User>, AppError> {
    let Some(identity) = identity else {
        return Ok(None);
    };
    let id = identity.id()?;
    let Ok(user_id) = id.parse::<i64>() else {
        log::warn!("Session carries a malformed user id: {:?}", id);
        return Ok(None);
    };
    Ok(db::get_user_by_id(state, user_id).await?)
}
