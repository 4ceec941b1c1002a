use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::ROLE_ANNOTATOR,
    error::{AppError, AppResult},
    models::{Annotator, NewAnnotator, User},
    schema::{annotators, languages, users},
    state::AppState,
};

use super::to_iso;

pub const ANNOTATOR_STATUS_PENDING: &str = "pending";

#[derive(Deserialize)]
pub struct CreateAnnotatorRequest {
    pub email: String,
    pub country: String,
    pub languages: Vec<String>,
}

#[derive(Deserialize)]
pub struct AnnotatorFilter {
    pub language: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct AnnotatorResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub country: String,
    pub languages: Vec<String>,
    pub status: String,
    pub created_at: String,
}

pub async fn create_annotator(
    State(state): State<AppState>,
    Json(payload): Json<CreateAnnotatorRequest>,
) -> AppResult<(StatusCode, Json<AnnotatorResponse>)> {
    if payload.country.trim().is_empty() {
        return Err(AppError::validation("country must not be empty"));
    }
    if payload.languages.is_empty() {
        return Err(AppError::validation(
            "at least one language code is required",
        ));
    }

    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::email.eq(payload.email.trim().to_lowercase()))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("no registered user with that email"))?;

    if user.role != ROLE_ANNOTATOR {
        return Err(AppError::validation(
            "only annotator accounts can have an annotator profile",
        ));
    }

    let known_codes: Vec<String> = languages::table
        .filter(languages::code.eq_any(&payload.languages))
        .select(languages::code)
        .load(&mut conn)?;
    if let Some(unknown) = payload
        .languages
        .iter()
        .find(|code| !known_codes.contains(code))
    {
        return Err(AppError::validation(format!(
            "unknown language code: {unknown}"
        )));
    }

    let new_annotator = NewAnnotator {
        id: Uuid::new_v4(),
        user_id: user.id,
        country: payload.country.trim().to_string(),
        languages: payload.languages,
        status: ANNOTATOR_STATUS_PENDING.to_string(),
    };

    match diesel::insert_into(annotators::table)
        .values(&new_annotator)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::validation(
                "an annotator profile already exists for this user",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let annotator: Annotator = annotators::table.find(new_annotator.id).first(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(to_response(annotator, &user.email, &user.full_name)),
    ))
}

pub async fn list_annotators(
    State(state): State<AppState>,
    Query(filter): Query<AnnotatorFilter>,
) -> AppResult<Json<Vec<AnnotatorResponse>>> {
    let mut conn = state.db()?;

    let mut query = annotators::table
        .inner_join(users::table)
        .order(annotators::created_at.asc())
        .into_boxed();

    if let Some(status) = &filter.status {
        query = query.filter(annotators::status.eq(status.clone()));
    }

    let rows: Vec<(Annotator, User)> = query.load(&mut conn)?;

    let response = rows
        .into_iter()
        .filter(|(annotator, _)| match &filter.language {
            Some(code) => annotator.languages.contains(code),
            None => true,
        })
        .map(|(annotator, user)| to_response(annotator, &user.email, &user.full_name))
        .collect();

    Ok(Json(response))
}

pub async fn get_annotator(
    State(state): State<AppState>,
    Path(annotator_id): Path<Uuid>,
) -> AppResult<Json<AnnotatorResponse>> {
    let mut conn = state.db()?;

    let (annotator, user): (Annotator, User) = annotators::table
        .inner_join(users::table)
        .filter(annotators::id.eq(annotator_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("annotator not found"))?;

    Ok(Json(to_response(annotator, &user.email, &user.full_name)))
}

fn to_response(annotator: Annotator, email: &str, full_name: &str) -> AnnotatorResponse {
    AnnotatorResponse {
        id: annotator.id,
        user_id: annotator.user_id,
        email: email.to_string(),
        full_name: full_name.to_string(),
        country: annotator.country,
        languages: annotator.languages,
        status: annotator.status,
        created_at: to_iso(annotator.created_at),
    }
}
