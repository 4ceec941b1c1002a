use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    lifecycle::{ProjectStatus, TaskStatus},
    models::{Project, Task},
    schema::{projects, tasks},
    state::AppState,
};

use super::to_iso;

#[derive(Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub data: Value,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub assigned_at: Option<String>,
    pub completed_at: Option<String>,
    pub time_spent: Option<i32>,
    pub result: Option<Value>,
    pub label_studio_task_id: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Deserialize)]
pub struct SubmitTaskRequest {
    pub result: Value,
    pub time_spent: Option<i32>,
}

#[derive(Deserialize)]
pub struct ReviewTaskRequest {
    pub decision: String,
}

pub fn to_task_response(task: Task) -> TaskResponse {
    TaskResponse {
        id: task.id,
        project_id: task.project_id,
        data: task.data,
        status: task.status,
        assigned_to: task.assigned_to,
        assigned_at: task.assigned_at.map(to_iso),
        completed_at: task.completed_at.map(to_iso),
        time_spent: task.time_spent,
        result: task.result,
        label_studio_task_id: task.label_studio_task_id,
        created_at: to_iso(task.created_at),
        updated_at: to_iso(task.updated_at),
    }
}

/// Claim an available task. The status guard lives in the UPDATE itself so
/// two concurrent claims produce exactly one winner; the loser sees 409.
pub async fn claim_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskResponse>> {
    user.require_annotator()?;

    let mut conn = state.db()?;

    let task: Task = tasks::table
        .find(task_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("task not found"))?;

    let project: Project = projects::table.find(task.project_id).first(&mut conn)?;
    if project.status != ProjectStatus::Active.as_str() {
        return Err(AppError::precondition(
            "tasks can only be claimed on an active project",
        ));
    }

    let now = Utc::now().naive_utc();
    let claimed = diesel::update(
        tasks::table
            .find(task_id)
            .filter(tasks::status.eq(TaskStatus::Available.as_str())),
    )
    .set((
        tasks::status.eq(TaskStatus::Assigned.as_str()),
        tasks::assigned_to.eq(Some(user.user_id)),
        tasks::assigned_at.eq(Some(now)),
    ))
    .execute(&mut conn)?;

    if claimed == 0 {
        return Err(AppError::conflict("task has already been claimed"));
    }

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    Ok(Json(to_task_response(task)))
}

pub async fn start_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskResponse>> {
    user.require_annotator()?;

    let mut conn = state.db()?;

    let updated = diesel::update(
        tasks::table
            .find(task_id)
            .filter(tasks::assigned_to.eq(Some(user.user_id)))
            .filter(tasks::status.eq(TaskStatus::Assigned.as_str())),
    )
    .set(tasks::status.eq(TaskStatus::InProgress.as_str()))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(diagnose_assignee_failure(
            &mut conn,
            task_id,
            &user,
            TaskStatus::InProgress,
        ));
    }

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    Ok(Json(to_task_response(task)))
}

pub async fn submit_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SubmitTaskRequest>,
) -> AppResult<Json<TaskResponse>> {
    user.require_annotator()?;

    if let Some(time_spent) = payload.time_spent {
        if time_spent < 0 {
            return Err(AppError::validation("time_spent must not be negative"));
        }
    }

    let mut conn = state.db()?;

    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        tasks::table
            .find(task_id)
            .filter(tasks::assigned_to.eq(Some(user.user_id)))
            .filter(tasks::status.eq_any([
                TaskStatus::Assigned.as_str(),
                TaskStatus::InProgress.as_str(),
            ])),
    )
    .set((
        tasks::status.eq(TaskStatus::Submitted.as_str()),
        tasks::result.eq(Some(payload.result)),
        tasks::time_spent.eq(payload.time_spent),
        tasks::completed_at.eq(Some(now)),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(diagnose_assignee_failure(
            &mut conn,
            task_id,
            &user,
            TaskStatus::Submitted,
        ));
    }

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    Ok(Json(to_task_response(task)))
}

pub async fn start_review(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskResponse>> {
    user.require_client()?;

    let mut conn = state.db()?;
    require_project_owner(&mut conn, task_id, &user)?;

    let updated = diesel::update(
        tasks::table
            .find(task_id)
            .filter(tasks::status.eq(TaskStatus::Submitted.as_str())),
    )
    .set(tasks::status.eq(TaskStatus::UnderReview.as_str()))
    .execute(&mut conn)?;

    if updated == 0 {
        let task: Task = tasks::table.find(task_id).first(&mut conn)?;
        return Err(AppError::invalid_transition(format!(
            "cannot move task from '{}' to '{}'",
            task.status,
            TaskStatus::UnderReview
        )));
    }

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    Ok(Json(to_task_response(task)))
}

/// Approve or reject a task under review. Approval bumps the project's
/// completed-task counter in the same transaction; rejection re-queues the
/// task with its assignment cleared.
pub async fn review_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<ReviewTaskRequest>,
) -> AppResult<Json<TaskResponse>> {
    user.require_client()?;

    let approve = match payload.decision.as_str() {
        "approve" => true,
        "reject" => false,
        other => {
            return Err(AppError::validation(format!(
                "decision must be 'approve' or 'reject', got '{other}'"
            )))
        }
    };

    let mut conn = state.db()?;
    let project = require_project_owner(&mut conn, task_id, &user)?;

    conn.transaction::<(), AppError, _>(|conn| {
        let under_review = tasks::table
            .find(task_id)
            .filter(tasks::status.eq(TaskStatus::UnderReview.as_str()));

        let updated = if approve {
            diesel::update(under_review)
                .set(tasks::status.eq(TaskStatus::Approved.as_str()))
                .execute(conn)?
        } else {
            diesel::update(under_review)
                .set((
                    tasks::status.eq(TaskStatus::Available.as_str()),
                    tasks::assigned_to.eq(None::<Uuid>),
                    tasks::assigned_at.eq(None::<chrono::NaiveDateTime>),
                    tasks::completed_at.eq(None::<chrono::NaiveDateTime>),
                    tasks::time_spent.eq(None::<i32>),
                    tasks::result.eq(None::<Value>),
                ))
                .execute(conn)?
        };

        if updated == 0 {
            let task: Task = tasks::table.find(task_id).first(conn)?;
            return Err(AppError::invalid_transition(format!(
                "task must be under review to be {}, but is '{}'",
                if approve { "approved" } else { "rejected" },
                task.status
            )));
        }

        if approve {
            diesel::update(projects::table.find(project.id))
                .set(projects::completed_tasks.eq(projects::completed_tasks + 1))
                .execute(conn)?;
        }

        Ok(())
    })?;

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    Ok(Json(to_task_response(task)))
}

fn require_project_owner(
    conn: &mut PgConnection,
    task_id: Uuid,
    user: &AuthenticatedUser,
) -> Result<Project, AppError> {
    let task: Task = tasks::table
        .find(task_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("task not found"))?;

    let project: Project = projects::table.find(task.project_id).first(conn)?;
    if project.client_id != user.user_id {
        return Err(AppError::forbidden(
            "only the project owner can review its tasks",
        ));
    }
    Ok(project)
}

fn diagnose_assignee_failure(
    conn: &mut PgConnection,
    task_id: Uuid,
    user: &AuthenticatedUser,
    target: TaskStatus,
) -> AppError {
    let task: Option<Task> = match tasks::table.find(task_id).first(conn).optional() {
        Ok(task) => task,
        Err(err) => return AppError::from(err),
    };

    match task {
        None => AppError::not_found("task not found"),
        Some(task) if task.assigned_to != Some(user.user_id) => {
            AppError::forbidden("task is not assigned to you")
        }
        Some(task) => AppError::invalid_transition(format!(
            "cannot move task from '{}' to '{}'",
            task.status, target
        )),
    }
}
