mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
struct ProjectInfo {
    id: Uuid,
    status: String,
    total_tasks: i32,
    completed_tasks: i32,
}

#[derive(Deserialize)]
struct TaskInfo {
    id: Uuid,
    status: String,
    assigned_to: Option<Uuid>,
    completed_at: Option<String>,
    result: Option<Value>,
}

#[derive(Deserialize)]
struct TaskList {
    tasks: Vec<TaskInfo>,
    total: i64,
}

#[derive(Deserialize)]
struct Earnings {
    total_earned: f64,
    pending: f64,
    available: f64,
}

async fn register(app: &TestApp, email: &str, role: &str) -> Result<String> {
    app.insert_user(email, "password-123", "Test User", role)
        .await?;
    app.login_token(email, "password-123").await
}

async fn setup_active_project(
    app: &TestApp,
    client: &str,
    task_count: usize,
    price: f64,
) -> Result<ProjectInfo> {
    let response = app
        .post_json(
            "/api/projects",
            &json!({
                "name": "Sentiment pass",
                "description": "Label sentiment of short posts",
                "language_code": "yo",
                "annotation_type": "sentiment",
                "instructions": "Choose the closest sentiment",
                "price_per_task": price
            }),
            Some(client),
        )
        .await?;
    anyhow::ensure!(response.status() == StatusCode::CREATED);
    let project: ProjectInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;

    let items: Vec<_> = (0..task_count)
        .map(|index| json!({ "data": { "text": format!("post {index}") } }))
        .collect();
    let added = app
        .post_json(
            &format!("/api/projects/{}/tasks", project.id),
            &json!({ "tasks": items }),
            Some(client),
        )
        .await?;
    anyhow::ensure!(added.status() == StatusCode::CREATED);

    let activated = app
        .post_json(
            &format!("/api/projects/{}/activate", project.id),
            &json!({}),
            Some(client),
        )
        .await?;
    anyhow::ensure!(activated.status() == StatusCode::OK);

    let refreshed = app
        .get(&format!("/api/projects/{}", project.id), Some(client))
        .await?;
    Ok(serde_json::from_slice(
        &body_to_vec(refreshed.into_body()).await?,
    )?)
}

async fn list_tasks(app: &TestApp, token: &str, project_id: Uuid) -> Result<TaskList> {
    let response = app
        .get(&format!("/api/projects/{project_id}/tasks"), Some(token))
        .await?;
    anyhow::ensure!(response.status() == StatusCode::OK);
    Ok(serde_json::from_slice(
        &body_to_vec(response.into_body()).await?,
    )?)
}

#[tokio::test]
async fn full_annotation_lifecycle_updates_counters_and_earnings() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let client = register(&app, "client@example.com", "client").await?;
    let annotator = register(&app, "amara@example.com", "annotator").await?;

    // Annotator profile so the earnings endpoint resolves.
    let profile = app
        .post_json(
            "/api/annotators",
            &json!({
                "email": "amara@example.com",
                "country": "Nigeria",
                "languages": ["yo"]
            }),
            None,
        )
        .await?;
    assert_eq!(profile.status(), StatusCode::CREATED);

    let project = setup_active_project(&app, &client, 3, 0.75).await?;
    assert_eq!(project.status, "active");
    assert_eq!(project.total_tasks, 3);
    assert_eq!(project.completed_tasks, 0);

    let tasks = list_tasks(&app, &client, project.id).await?;
    assert_eq!(tasks.total, 3);
    assert!(tasks
        .tasks
        .iter()
        .all(|task| task.status == "available" && task.assigned_to.is_none()));

    let task_id = tasks.tasks[0].id;

    let claim = app
        .post_json(
            &format!("/api/tasks/{task_id}/claim"),
            &json!({}),
            Some(&annotator),
        )
        .await?;
    assert_eq!(claim.status(), StatusCode::OK);
    let claimed: TaskInfo = serde_json::from_slice(&body_to_vec(claim.into_body()).await?)?;
    assert_eq!(claimed.status, "assigned");
    assert!(claimed.assigned_to.is_some());

    let start = app
        .post_json(
            &format!("/api/tasks/{task_id}/start"),
            &json!({}),
            Some(&annotator),
        )
        .await?;
    assert_eq!(start.status(), StatusCode::OK);

    let submit = app
        .post_json(
            &format!("/api/tasks/{task_id}/submit"),
            &json!({ "result": { "sentiment": "positive" }, "time_spent": 42 }),
            Some(&annotator),
        )
        .await?;
    assert_eq!(submit.status(), StatusCode::OK);
    let submitted: TaskInfo = serde_json::from_slice(&body_to_vec(submit.into_body()).await?)?;
    assert_eq!(submitted.status, "submitted");
    assert!(submitted.completed_at.is_some());

    // Submitted work is pending earnings, not yet available.
    let earnings = app.get("/api/payments/earnings", Some(&annotator)).await?;
    let earnings: Earnings = serde_json::from_slice(&body_to_vec(earnings.into_body()).await?)?;
    assert_eq!(earnings.pending, 0.75);
    assert_eq!(earnings.available, 0.0);
    assert_eq!(earnings.total_earned, 0.0);

    // Approval is only legal from under_review.
    let premature = app
        .post_json(
            &format!("/api/tasks/{task_id}/review"),
            &json!({ "decision": "approve" }),
            Some(&client),
        )
        .await?;
    assert_eq!(premature.status(), StatusCode::CONFLICT);

    let start_review = app
        .post_json(
            &format!("/api/tasks/{task_id}/start-review"),
            &json!({}),
            Some(&client),
        )
        .await?;
    assert_eq!(start_review.status(), StatusCode::OK);

    let approve = app
        .post_json(
            &format!("/api/tasks/{task_id}/review"),
            &json!({ "decision": "approve" }),
            Some(&client),
        )
        .await?;
    assert_eq!(approve.status(), StatusCode::OK);
    let approved: TaskInfo = serde_json::from_slice(&body_to_vec(approve.into_body()).await?)?;
    assert_eq!(approved.status, "approved");
    assert!(approved.assigned_to.is_some());

    let refreshed = app
        .get(&format!("/api/projects/{}", project.id), Some(&client))
        .await?;
    let refreshed: ProjectInfo = serde_json::from_slice(&body_to_vec(refreshed.into_body()).await?)?;
    assert_eq!(refreshed.completed_tasks, 1);
    assert_eq!(refreshed.total_tasks, 3);

    // The approved task's price moved from pending to available.
    let earnings = app.get("/api/payments/earnings", Some(&annotator)).await?;
    let earnings: Earnings = serde_json::from_slice(&body_to_vec(earnings.into_body()).await?)?;
    assert_eq!(earnings.pending, 0.0);
    assert_eq!(earnings.available, 0.75);
    assert_eq!(earnings.total_earned, 0.75);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejection_requeues_the_task() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let client = register(&app, "client@example.com", "client").await?;
    let annotator = register(&app, "worker@example.com", "annotator").await?;

    let project = setup_active_project(&app, &client, 1, 0.5).await?;
    let tasks = list_tasks(&app, &client, project.id).await?;
    let task_id = tasks.tasks[0].id;

    app.post_json(
        &format!("/api/tasks/{task_id}/claim"),
        &json!({}),
        Some(&annotator),
    )
    .await?;
    app.post_json(
        &format!("/api/tasks/{task_id}/submit"),
        &json!({ "result": { "sentiment": "neutral" } }),
        Some(&annotator),
    )
    .await?;
    app.post_json(
        &format!("/api/tasks/{task_id}/start-review"),
        &json!({}),
        Some(&client),
    )
    .await?;

    let reject = app
        .post_json(
            &format!("/api/tasks/{task_id}/review"),
            &json!({ "decision": "reject" }),
            Some(&client),
        )
        .await?;
    assert_eq!(reject.status(), StatusCode::OK);
    let rejected: TaskInfo = serde_json::from_slice(&body_to_vec(reject.into_body()).await?)?;
    assert_eq!(rejected.status, "available");
    assert!(rejected.assigned_to.is_none());
    assert!(rejected.completed_at.is_none());
    assert!(rejected.result.is_none());

    let refreshed = app
        .get(&format!("/api/projects/{}", project.id), Some(&client))
        .await?;
    let refreshed: ProjectInfo = serde_json::from_slice(&body_to_vec(refreshed.into_body()).await?)?;
    assert_eq!(refreshed.completed_tasks, 0);

    // The re-queued task can be claimed again.
    let reclaim = app
        .post_json(
            &format!("/api/tasks/{task_id}/claim"),
            &json!({}),
            Some(&annotator),
        )
        .await?;
    assert_eq!(reclaim.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn claiming_is_first_come_first_served() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let client = register(&app, "client@example.com", "client").await?;
    let first = register(&app, "first@example.com", "annotator").await?;
    let second = register(&app, "second@example.com", "annotator").await?;

    let project = setup_active_project(&app, &client, 1, 0.5).await?;
    let tasks = list_tasks(&app, &client, project.id).await?;
    let task_id = tasks.tasks[0].id;

    let winner = app
        .post_json(
            &format!("/api/tasks/{task_id}/claim"),
            &json!({}),
            Some(&first),
        )
        .await?;
    assert_eq!(winner.status(), StatusCode::OK);

    let loser = app
        .post_json(
            &format!("/api/tasks/{task_id}/claim"),
            &json!({}),
            Some(&second),
        )
        .await?;
    assert_eq!(loser.status(), StatusCode::CONFLICT);

    // Exactly one assignee, and it is the winner.
    let tasks = list_tasks(&app, &client, project.id).await?;
    assert_eq!(tasks.tasks[0].status, "assigned");
    assert!(tasks.tasks[0].assigned_to.is_some());

    // The loser cannot act on the task either.
    let foreign_submit = app
        .post_json(
            &format!("/api/tasks/{task_id}/submit"),
            &json!({ "result": {} }),
            Some(&second),
        )
        .await?;
    assert_eq!(foreign_submit.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn claims_require_an_active_project() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let client = register(&app, "client@example.com", "client").await?;
    let annotator = register(&app, "worker@example.com", "annotator").await?;

    // Draft project with tasks, never activated.
    let response = app
        .post_json(
            "/api/projects",
            &json!({
                "name": "Still draft",
                "description": "d",
                "language_code": "sw",
                "annotation_type": "ner",
                "instructions": "i",
                "price_per_task": 1.0
            }),
            Some(&client),
        )
        .await?;
    let project: ProjectInfo = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    app.post_json(
        &format!("/api/projects/{}/tasks", project.id),
        &json!({ "tasks": [{ "data": { "text": "hello" } }] }),
        Some(&client),
    )
    .await?;

    let tasks = list_tasks(&app, &client, project.id).await?;
    let claim = app
        .post_json(
            &format!("/api/tasks/{}/claim", tasks.tasks[0].id),
            &json!({}),
            Some(&annotator),
        )
        .await?;
    assert_eq!(claim.status(), StatusCode::PRECONDITION_FAILED);

    app.cleanup().await?;
    Ok(())
}
