use axum::{extract::State, Json};
use diesel::{dsl::count_star, prelude::*};
use serde::Serialize;

use crate::error::AppResult;
use crate::schema::{annotators, languages, projects};
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatsResponse {
    pub languages_supported: i64,
    pub total_speakers_reached: i64,
    pub annotators_registered: i64,
    pub projects_created: i64,
    pub regions: Vec<String>,
}

pub async fn platform_stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    let mut conn = state.db()?;

    let speakers: Vec<i64> = languages::table
        .select(languages::speakers)
        .load(&mut conn)?;
    let annotators_registered: i64 = annotators::table.select(count_star()).first(&mut conn)?;
    let projects_created: i64 = projects::table.select(count_star()).first(&mut conn)?;
    let regions: Vec<String> = languages::table
        .select(languages::region)
        .distinct()
        .order(languages::region.asc())
        .load(&mut conn)?;

    Ok(Json(StatsResponse {
        languages_supported: speakers.len() as i64,
        total_speakers_reached: speakers.iter().sum(),
        annotators_registered,
        projects_created,
        regions,
    }))
}
