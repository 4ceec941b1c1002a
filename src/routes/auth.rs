use axum::{extract::State, http::StatusCode, Form, Json};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser, ROLE_ANNOTATOR, ROLE_CLIENT},
    error::{AppError, AppResult},
    models::{NewUser, User},
    schema::users,
    state::AppState,
};

use super::to_iso;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserProfile,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email address is required"));
    }
    if payload.password.len() < 8 {
        return Err(AppError::validation(
            "password must be at least 8 characters",
        ));
    }
    if payload.full_name.trim().is_empty() {
        return Err(AppError::validation("full_name must not be empty"));
    }
    if payload.role != ROLE_ANNOTATOR && payload.role != ROLE_CLIENT {
        return Err(AppError::validation(
            "role must be 'annotator' or 'client'",
        ));
    }

    let mut conn = state.db()?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash: password::hash_password(&payload.password)?,
        full_name: payload.full_name.trim().to_string(),
        role: payload.role,
    };

    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::validation("email is already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let user: User = users::table.find(new_user.id).first(&mut conn)?;
    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, &user.role)
        .map_err(AppError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            access_token,
            token_type: "Bearer".to_string(),
            user: to_profile(user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Form(payload): Form<LoginForm>,
) -> AppResult<Json<LoginResponse>> {
    let mut conn = state.db()?;

    let user: User = match users::table
        .filter(users::email.eq(payload.username.trim().to_lowercase()))
        .first(&mut conn)
    {
        Ok(user) => user,
        Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid || !user.is_active {
        return Err(AppError::unauthorized());
    }

    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, &user.role)
        .map_err(AppError::from)?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt_expiry_minutes * 60,
    }))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

fn to_profile(user: User) -> UserProfile {
    UserProfile {
        id: user.id,
        email: user.email,
        full_name: user.full_name,
        role: user.role,
        is_active: user.is_active,
        created_at: to_iso(user.created_at),
    }
}
