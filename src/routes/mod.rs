use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod annotators;
pub mod auth;
pub mod health;
pub mod languages;
pub mod payments;
pub mod projects;
pub mod stats;
pub mod tasks;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let languages_routes = Router::new()
        .route("/", get(languages::list_languages))
        .route("/region/:region", get(languages::list_languages_by_region))
        .route("/:code", get(languages::get_language));

    let annotators_routes = Router::new()
        .route(
            "/",
            get(annotators::list_annotators).post(annotators::create_annotator),
        )
        .route("/:id", get(annotators::get_annotator));

    let projects_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/:id/activate", post(projects::activate_project))
        .route(
            "/:id/tasks",
            get(projects::list_tasks).post(projects::add_tasks),
        )
        .route("/:id/sync", post(projects::sync_project));

    let tasks_routes = Router::new()
        .route("/:id/claim", post(tasks::claim_task))
        .route("/:id/start", post(tasks::start_task))
        .route("/:id/submit", post(tasks::submit_task))
        .route("/:id/start-review", post(tasks::start_review))
        .route("/:id/review", post(tasks::review_task));

    let payments_routes = Router::new()
        .route("/status", get(payments::get_connect_status))
        .route("/connect/onboard", post(payments::start_onboarding))
        .route("/earnings", get(payments::get_earnings))
        .route("/withdraw", post(payments::request_withdrawal));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/projects", projects_routes)
        .nest("/api/tasks", tasks_routes)
        .nest("/api/payments", payments_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/languages", languages_routes)
        .nest("/api/annotators", annotators_routes)
        .route("/api/stats", get(stats::platform_stats))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}

pub(crate) fn to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339()
}
