use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::Language;
use crate::schema::languages;
use crate::state::AppState;

#[derive(Serialize)]
pub struct LanguageResponse {
    pub code: String,
    pub name: String,
    pub native_name: String,
    pub script: String,
    pub direction: String,
    pub speakers: i64,
    pub region: String,
}

pub async fn list_languages(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<LanguageResponse>>> {
    let mut conn = state.db()?;

    let catalog: Vec<Language> = languages::table
        .order(languages::speakers.desc())
        .load(&mut conn)?;

    Ok(Json(catalog.into_iter().map(to_response).collect()))
}

pub async fn get_language(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<LanguageResponse>> {
    let mut conn = state.db()?;

    let language: Language = languages::table
        .find(&code)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("language not found"))?;

    Ok(Json(to_response(language)))
}

pub async fn list_languages_by_region(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> AppResult<Json<Vec<LanguageResponse>>> {
    let mut conn = state.db()?;

    let catalog: Vec<Language> = languages::table
        .order(languages::speakers.desc())
        .load(&mut conn)?;

    let matching = catalog
        .into_iter()
        .filter(|language| language.region.eq_ignore_ascii_case(&region))
        .map(to_response)
        .collect();

    Ok(Json(matching))
}

fn to_response(language: Language) -> LanguageResponse {
    LanguageResponse {
        code: language.code,
        name: language.name,
        native_name: language.native_name,
        script: language.script,
        direction: language.direction,
        speakers: language.speakers,
        region: language.region,
    }
}
