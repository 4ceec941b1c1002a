use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    labelstudio::{label_config_for, AnnotationError},
    lifecycle::{ProjectStatus, TaskStatus},
    models::{NewProject, NewTask, Project, Task},
    schema::{languages, projects, tasks},
    state::AppState,
};

use super::tasks::{to_task_response, TaskResponse};
use super::to_iso;

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: String,
    pub language_code: String,
    pub annotation_type: String,
    pub instructions: String,
    pub price_per_task: f64,
    pub label_config: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub price_per_task: Option<f64>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ProjectFilter {
    pub status: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub description: String,
    pub language_code: String,
    pub annotation_type: String,
    pub instructions: String,
    pub label_config: Option<Value>,
    pub price_per_task: f64,
    pub status: String,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub label_studio_project_id: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectResponse>,
    pub total: i64,
}

#[derive(Deserialize)]
pub struct BulkTasksRequest {
    pub tasks: Vec<TaskItem>,
}

#[derive(Deserialize)]
pub struct TaskItem {
    pub data: Value,
}

#[derive(Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: i64,
}

#[derive(Deserialize, Default)]
pub struct SyncRequest {
    #[serde(default)]
    pub sync_annotations: bool,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub label_studio_project_id: Option<i32>,
    pub label_studio_url: Option<String>,
    pub synced_tasks: i64,
    pub synced_annotations: i64,
    pub is_available: bool,
    pub message: String,
}

impl SyncResponse {
    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            label_studio_project_id: None,
            label_studio_url: None,
            synced_tasks: 0,
            synced_annotations: 0,
            is_available: false,
            message: message.into(),
        }
    }
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    user.require_client()?;

    if payload.name.trim().is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }
    if payload.description.trim().is_empty() {
        return Err(AppError::validation("description must not be empty"));
    }
    if payload.instructions.trim().is_empty() {
        return Err(AppError::validation("instructions must not be empty"));
    }
    if payload.annotation_type.trim().is_empty() {
        return Err(AppError::validation("annotation_type must not be empty"));
    }
    if payload.price_per_task <= 0.0 {
        return Err(AppError::validation("price_per_task must be positive"));
    }

    let mut conn = state.db()?;

    let language_known: Option<String> = languages::table
        .find(&payload.language_code)
        .select(languages::code)
        .first(&mut conn)
        .optional()?;
    if language_known.is_none() {
        return Err(AppError::validation(format!(
            "unknown language code: {}",
            payload.language_code
        )));
    }

    let new_project = NewProject {
        id: Uuid::new_v4(),
        client_id: user.user_id,
        name: payload.name.trim().to_string(),
        description: payload.description,
        language_code: payload.language_code,
        annotation_type: payload.annotation_type,
        instructions: payload.instructions,
        label_config: payload.label_config,
        price_per_task: payload.price_per_task,
        status: ProjectStatus::Draft.as_str().to_string(),
    };

    diesel::insert_into(projects::table)
        .values(&new_project)
        .execute(&mut conn)?;

    let project: Project = projects::table.find(new_project.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(to_project_response(project))))
}

/// Clients see their own projects; annotators browse the active marketplace.
pub async fn list_projects(
    State(state): State<AppState>,
    Query(filter): Query<ProjectFilter>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProjectListResponse>> {
    if let Some(status) = &filter.status {
        if ProjectStatus::parse(status).is_none() {
            return Err(AppError::validation(format!("unknown status: {status}")));
        }
    }

    let mut conn = state.db()?;

    let mut query = projects::table
        .order(projects::created_at.desc())
        .into_boxed();

    if user.is_client() {
        query = query.filter(projects::client_id.eq(user.user_id));
    } else {
        query = query.filter(projects::status.eq(ProjectStatus::Active.as_str()));
    }

    if let Some(status) = &filter.status {
        query = query.filter(projects::status.eq(status.clone()));
    }
    if let Some(language_code) = &filter.language_code {
        query = query.filter(projects::language_code.eq(language_code.clone()));
    }

    let rows: Vec<Project> = query.load(&mut conn)?;
    let total = rows.len() as i64;

    Ok(Json(ProjectListResponse {
        projects: rows.into_iter().map(to_project_response).collect(),
        total,
    }))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProjectResponse>> {
    let mut conn = state.db()?;
    let project = load_project_for_read(&mut conn, project_id, &user)?;
    Ok(Json(to_project_response(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProjectRequest>,
) -> AppResult<Json<ProjectResponse>> {
    user.require_client()?;

    let mut conn = state.db()?;

    conn.transaction::<(), AppError, _>(|conn| {
        let project = load_owned_project(conn, project_id, &user)?;

        let mut name = project.name.clone();
        if let Some(value) = &payload.name {
            if value.trim().is_empty() {
                return Err(AppError::validation("name must not be empty"));
            }
            name = value.trim().to_string();
        }

        let mut description = project.description.clone();
        if let Some(value) = payload.description.clone() {
            if value.trim().is_empty() {
                return Err(AppError::validation("description must not be empty"));
            }
            description = value;
        }

        let mut instructions = project.instructions.clone();
        if let Some(value) = payload.instructions.clone() {
            if value.trim().is_empty() {
                return Err(AppError::validation("instructions must not be empty"));
            }
            instructions = value;
        }

        let mut price_per_task = project.price_per_task;
        if let Some(value) = payload.price_per_task {
            if value <= 0.0 {
                return Err(AppError::validation("price_per_task must be positive"));
            }
            price_per_task = value;
        }

        let mut status = project.status.clone();
        if let Some(value) = &payload.status {
            let current = ProjectStatus::parse(&project.status)
                .ok_or_else(|| AppError::internal("project has an unknown status"))?;
            let next = ProjectStatus::parse(value)
                .ok_or_else(|| AppError::validation(format!("unknown status: {value}")))?;
            if next != current {
                if !current.can_transition(next) {
                    return Err(AppError::invalid_transition(format!(
                        "cannot move project from '{current}' to '{next}'"
                    )));
                }
                status = next.as_str().to_string();
            }
        }

        diesel::update(projects::table.find(project_id))
            .set((
                projects::name.eq(name),
                projects::description.eq(description),
                projects::instructions.eq(instructions),
                projects::price_per_task.eq(price_per_task),
                projects::status.eq(status),
            ))
            .execute(conn)?;

        Ok(())
    })?;

    let project: Project = projects::table.find(project_id).first(&mut conn)?;
    Ok(Json(to_project_response(project)))
}

pub async fn activate_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProjectResponse>> {
    user.require_client()?;

    let mut conn = state.db()?;

    conn.transaction::<(), AppError, _>(|conn| {
        let project = load_owned_project(conn, project_id, &user)?;

        if project.status != ProjectStatus::Draft.as_str() {
            return Err(AppError::invalid_transition(format!(
                "only draft projects can be activated, project is '{}'",
                project.status
            )));
        }
        if project.total_tasks == 0 {
            return Err(AppError::validation(
                "cannot activate a project with no tasks",
            ));
        }

        diesel::update(projects::table.find(project_id))
            .set(projects::status.eq(ProjectStatus::Active.as_str()))
            .execute(conn)?;

        Ok(())
    })?;

    let project: Project = projects::table.find(project_id).first(&mut conn)?;
    Ok(Json(to_project_response(project)))
}

/// Hard-removes a project and its tasks. Refused once any task has left the
/// available pool, so approved work keeps its earnings record.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    user.require_client()?;

    let mut conn = state.db()?;

    let external_id = conn.transaction::<Option<i32>, AppError, _>(|conn| {
        let project = load_owned_project(conn, project_id, &user)?;

        let progressed: i64 = tasks::table
            .filter(tasks::project_id.eq(project_id))
            .filter(tasks::status.ne(TaskStatus::Available.as_str()))
            .count()
            .get_result(conn)?;
        if progressed > 0 {
            return Err(AppError::precondition(
                "cannot delete a project with tasks in progress or completed",
            ));
        }

        diesel::delete(tasks::table.filter(tasks::project_id.eq(project_id))).execute(conn)?;
        diesel::delete(projects::table.find(project_id)).execute(conn)?;

        Ok(project.label_studio_project_id)
    })?;
    drop(conn);

    // The local delete is the source of truth; external cleanup is
    // best-effort.
    if let (Some(external_id), Some(backend)) = (external_id, state.annotation.clone()) {
        if let Err(err) = backend.delete_project(external_id).await {
            warn!(%project_id, external_id, error = %err, "failed to delete external annotation project");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Bulk task ingestion. The inserts and the counter bump share one
/// transaction, so `total_tasks` can never drift from the real row count.
pub async fn add_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkTasksRequest>,
) -> AppResult<(StatusCode, Json<TaskListResponse>)> {
    user.require_client()?;

    if payload.tasks.is_empty() {
        return Err(AppError::validation("tasks must not be empty"));
    }

    let mut conn = state.db()?;

    let created = conn.transaction::<Vec<Task>, AppError, _>(|conn| {
        load_owned_project(conn, project_id, &user)?;

        let new_tasks: Vec<NewTask> = payload
            .tasks
            .iter()
            .map(|item| NewTask {
                id: Uuid::new_v4(),
                project_id,
                data: item.data.clone(),
                status: TaskStatus::Available.as_str().to_string(),
            })
            .collect();

        diesel::insert_into(tasks::table)
            .values(&new_tasks)
            .execute(conn)?;

        diesel::update(projects::table.find(project_id))
            .set(projects::total_tasks.eq(projects::total_tasks + new_tasks.len() as i32))
            .execute(conn)?;

        let ids: Vec<Uuid> = new_tasks.iter().map(|task| task.id).collect();
        let rows: Vec<Task> = tasks::table
            .filter(tasks::id.eq_any(ids))
            .order(tasks::created_at.asc())
            .load(conn)?;
        Ok(rows)
    })?;

    let total = created.len() as i64;
    Ok((
        StatusCode::CREATED,
        Json(TaskListResponse {
            tasks: created.into_iter().map(to_task_response).collect(),
            total,
        }),
    ))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(filter): Query<TaskFilter>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskListResponse>> {
    if let Some(status) = &filter.status {
        if TaskStatus::parse(status).is_none() {
            return Err(AppError::validation(format!("unknown status: {status}")));
        }
    }

    let mut conn = state.db()?;
    load_project_for_read(&mut conn, project_id, &user)?;

    let mut query = tasks::table
        .filter(tasks::project_id.eq(project_id))
        .order(tasks::created_at.asc())
        .into_boxed();

    if let Some(status) = &filter.status {
        query = query.filter(tasks::status.eq(status.clone()));
    }

    let rows: Vec<Task> = query.load(&mut conn)?;
    let total = rows.len() as i64;

    Ok(Json(TaskListResponse {
        tasks: rows.into_iter().map(to_task_response).collect(),
        total,
    }))
}

/// Reconcile the project with the external annotation tool: create the
/// external project on first sync, push unsynced tasks, and optionally pull
/// completed annotations back. Keyed by the stored external ids, so
/// re-running is idempotent.
pub async fn sync_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    user: AuthenticatedUser,
    payload: Option<Json<SyncRequest>>,
) -> AppResult<Json<SyncResponse>> {
    user.require_client()?;
    let sync_annotations = payload.map(|Json(body)| body.sync_annotations).unwrap_or(false);

    let mut conn = state.db()?;
    let project = load_owned_project(&mut conn, project_id, &user)?;
    drop(conn);

    let Some(backend) = state.annotation.clone() else {
        return Ok(Json(SyncResponse::unavailable(
            "annotation tool is not configured",
        )));
    };

    let external_project_id = match project.label_studio_project_id {
        Some(id) => id,
        None => {
            let config = label_config_for(&project.annotation_type, project.label_config.as_ref());
            let created = backend
                .create_project(&project.name, &project.description, &config)
                .await;
            let id = match created {
                Ok(id) => id,
                Err(err) if err.is_unreachable() => {
                    return Ok(Json(SyncResponse::unavailable(
                        "annotation tool is not reachable",
                    )))
                }
                Err(err) => return Err(external_error(err)),
            };

            let mut conn = state.db()?;
            diesel::update(projects::table.find(project_id))
                .set(projects::label_studio_project_id.eq(Some(id)))
                .execute(&mut conn)?;
            id
        }
    };

    let mut conn = state.db()?;
    let unsynced: Vec<Task> = tasks::table
        .filter(tasks::project_id.eq(project_id))
        .filter(tasks::label_studio_task_id.is_null())
        .order(tasks::created_at.asc())
        .load(&mut conn)?;
    drop(conn);

    let mut synced_tasks: i64 = 0;
    if !unsynced.is_empty() {
        let items: Vec<serde_json::Value> = unsynced.iter().map(|task| task.data.clone()).collect();
        let imported = match backend.import_tasks(external_project_id, items).await {
            Ok(ids) => ids,
            Err(err) if err.is_unreachable() => {
                return Ok(Json(partial_sync_response(
                    &backend,
                    external_project_id,
                    0,
                    0,
                    "annotation tool became unreachable before tasks were pushed",
                )))
            }
            Err(err) => return Err(external_error(err)),
        };

        if imported.len() != unsynced.len() {
            return Err(AppError::external(format!(
                "annotation tool returned {} task ids for {} tasks",
                imported.len(),
                unsynced.len()
            )));
        }

        // All external ids land in one transaction; a failure here leaves
        // every task unsynced rather than half-tracked.
        let mut conn = state.db()?;
        conn.transaction::<(), AppError, _>(|conn| {
            for (task, external_id) in unsynced.iter().zip(&imported) {
                diesel::update(tasks::table.find(task.id))
                    .set(tasks::label_studio_task_id.eq(Some(*external_id)))
                    .execute(conn)?;
            }
            Ok(())
        })?;
        synced_tasks = imported.len() as i64;
    }

    let mut synced_annotations: i64 = 0;
    if sync_annotations {
        let annotations = match backend.list_annotations(external_project_id).await {
            Ok(annotations) => annotations,
            Err(err) if err.is_unreachable() => {
                return Ok(Json(partial_sync_response(
                    &backend,
                    external_project_id,
                    synced_tasks,
                    0,
                    "annotation tool became unreachable before annotations were pulled",
                )))
            }
            Err(err) => return Err(external_error(err)),
        };

        let now = chrono::Utc::now().naive_utc();
        let mut conn = state.db()?;
        conn.transaction::<(), AppError, _>(|conn| {
            for annotation in &annotations {
                // Only externally-annotated tasks that are locally assigned
                // can move to submitted; an unassigned task would violate
                // the assignment invariant.
                let updated = diesel::update(
                    tasks::table
                        .filter(tasks::project_id.eq(project_id))
                        .filter(tasks::label_studio_task_id.eq(Some(annotation.task_id)))
                        .filter(tasks::status.eq_any([
                            TaskStatus::Assigned.as_str(),
                            TaskStatus::InProgress.as_str(),
                        ])),
                )
                .set((
                    tasks::status.eq(TaskStatus::Submitted.as_str()),
                    tasks::result.eq(Some(annotation.result.clone())),
                    tasks::completed_at.eq(Some(now)),
                ))
                .execute(conn)?;
                synced_annotations += updated as i64;
            }
            Ok(())
        })?;
    }

    Ok(Json(SyncResponse {
        label_studio_project_id: Some(external_project_id),
        label_studio_url: backend.project_url(external_project_id),
        synced_tasks,
        synced_annotations,
        is_available: true,
        message: format!("Synced {synced_tasks} tasks and {synced_annotations} annotations"),
    }))
}

fn partial_sync_response(
    backend: &std::sync::Arc<dyn crate::labelstudio::AnnotationBackend>,
    external_project_id: i32,
    synced_tasks: i64,
    synced_annotations: i64,
    message: &str,
) -> SyncResponse {
    SyncResponse {
        label_studio_project_id: Some(external_project_id),
        label_studio_url: backend.project_url(external_project_id),
        synced_tasks,
        synced_annotations,
        is_available: false,
        message: message.to_string(),
    }
}

fn external_error(err: AnnotationError) -> AppError {
    warn!(error = %err, "annotation tool request failed");
    AppError::external(err.to_string())
}

fn load_owned_project(
    conn: &mut PgConnection,
    project_id: Uuid,
    user: &AuthenticatedUser,
) -> Result<Project, AppError> {
    let project: Project = projects::table
        .find(project_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("project not found"))?;

    if project.client_id != user.user_id {
        return Err(AppError::forbidden(
            "only the project owner can perform this action",
        ));
    }

    Ok(project)
}

fn load_project_for_read(
    conn: &mut PgConnection,
    project_id: Uuid,
    user: &AuthenticatedUser,
) -> Result<Project, AppError> {
    let project: Project = projects::table
        .find(project_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("project not found"))?;

    if user.is_client() && project.client_id != user.user_id {
        return Err(AppError::forbidden(
            "you do not have access to this project",
        ));
    }

    Ok(project)
}

fn to_project_response(project: Project) -> ProjectResponse {
    ProjectResponse {
        id: project.id,
        client_id: project.client_id,
        name: project.name,
        description: project.description,
        language_code: project.language_code,
        annotation_type: project.annotation_type,
        instructions: project.instructions,
        label_config: project.label_config,
        price_per_task: project.price_per_task,
        status: project.status,
        total_tasks: project.total_tasks,
        completed_tasks: project.completed_tasks,
        label_studio_project_id: project.label_studio_project_id,
        created_at: to_iso(project.created_at),
        updated_at: to_iso(project.updated_at),
    }
}
