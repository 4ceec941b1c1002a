use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use lingualabel::auth::jwt::JwtService;
use lingualabel::auth::password;
use lingualabel::config::AppConfig;
use lingualabel::db::{self, PgPool};
use lingualabel::labelstudio::{
    AnnotationBackend, AnnotationError, AnnotationResult, ExternalAnnotation,
};
use lingualabel::models::NewUser;
use lingualabel::routes;
use lingualabel::state::AppState;
use lingualabel::stripe::{AccountStatus, GatewayError, GatewayResult, PayoutDetails};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
struct FakeAnnotationState {
    next_project_id: i32,
    next_task_id: i32,
    projects: Vec<(i32, String)>,
    imported: HashMap<i32, Vec<i32>>,
    annotations: HashMap<i32, Vec<ExternalAnnotation>>,
    deleted_projects: Vec<i32>,
    unreachable: bool,
}

/// In-memory stand-in for the external annotation tool.
#[derive(Default)]
pub struct FakeAnnotationBackend {
    state: std::sync::Mutex<FakeAnnotationState>,
}

impl FakeAnnotationBackend {
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn project_count(&self) -> usize {
        self.state.lock().unwrap().projects.len()
    }

    pub fn imported_task_count(&self, project_id: i32) -> usize {
        self.state
            .lock()
            .unwrap()
            .imported
            .get(&project_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn deleted_projects(&self) -> Vec<i32> {
        self.state.lock().unwrap().deleted_projects.clone()
    }

    /// Stage an annotation the next `sync_annotations` pull will return.
    pub fn push_annotation(&self, project_id: i32, task_id: i32, result: Value) {
        let mut state = self.state.lock().unwrap();
        let annotation_id = (task_id as i64) * 1000;
        state
            .annotations
            .entry(project_id)
            .or_default()
            .push(ExternalAnnotation {
                task_id,
                annotation_id,
                result,
            });
    }

    fn check_reachable(&self) -> AnnotationResult<()> {
        if self.state.lock().unwrap().unreachable {
            Err(AnnotationError::Unreachable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AnnotationBackend for FakeAnnotationBackend {
    async fn create_project(
        &self,
        title: &str,
        _description: &str,
        _label_config: &str,
    ) -> AnnotationResult<i32> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.next_project_id += 1;
        let id = state.next_project_id;
        state.projects.push((id, title.to_string()));
        Ok(id)
    }

    async fn import_tasks(&self, project_id: i32, items: Vec<Value>) -> AnnotationResult<Vec<i32>> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        let mut ids = Vec::with_capacity(items.len());
        for _ in items {
            state.next_task_id += 1;
            let id = state.next_task_id;
            state.imported.entry(project_id).or_default().push(id);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn list_annotations(&self, project_id: i32) -> AnnotationResult<Vec<ExternalAnnotation>> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .annotations
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_project(&self, project_id: i32) -> AnnotationResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.projects.retain(|(id, _)| *id != project_id);
        state.deleted_projects.push(project_id);
        Ok(())
    }

    fn project_url(&self, project_id: i32) -> Option<String> {
        Some(format!("https://fake-labelstudio/projects/{project_id}"))
    }
}

#[derive(Default)]
struct FakeGatewayState {
    next_account: u32,
    next_transfer: u32,
    next_payout: u32,
    payouts_enabled: bool,
    fail_transfers: bool,
    transfer_keys: Vec<String>,
}

/// In-memory stand-in for the payment processor.
pub struct FakePaymentGateway {
    state: std::sync::Mutex<FakeGatewayState>,
}

impl Default for FakePaymentGateway {
    fn default() -> Self {
        Self {
            state: std::sync::Mutex::new(FakeGatewayState {
                payouts_enabled: true,
                ..FakeGatewayState::default()
            }),
        }
    }
}

impl FakePaymentGateway {
    pub fn set_payouts_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().payouts_enabled = enabled;
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.state.lock().unwrap().fail_transfers = fail;
    }

    pub fn transfer_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().transfer_keys.clone()
    }
}

#[async_trait]
impl lingualabel::stripe::PaymentGateway for FakePaymentGateway {
    async fn create_account(&self, _email: &str, _country: &str) -> GatewayResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_account += 1;
        Ok(format!("acct_test_{}", state.next_account))
    }

    async fn create_account_link(
        &self,
        account_id: &str,
        _refresh_url: &str,
        _return_url: &str,
    ) -> GatewayResult<String> {
        Ok(format!("https://fake-stripe/onboarding/{account_id}"))
    }

    async fn account_status(&self, account_id: &str) -> GatewayResult<AccountStatus> {
        let state = self.state.lock().unwrap();
        Ok(AccountStatus {
            id: account_id.to_string(),
            charges_enabled: true,
            payouts_enabled: state.payouts_enabled,
            details_submitted: true,
            requirements_due: if state.payouts_enabled {
                Vec::new()
            } else {
                vec!["external_account".to_string()]
            },
        })
    }

    async fn create_transfer(
        &self,
        _account_id: &str,
        _amount_cents: i64,
        _currency: &str,
        _description: &str,
        idempotency_key: &str,
    ) -> GatewayResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_transfers {
            return Err(GatewayError::Api {
                status: StatusCode::BAD_REQUEST,
                message: "insufficient platform funds".to_string(),
            });
        }
        state.next_transfer += 1;
        state.transfer_keys.push(idempotency_key.to_string());
        Ok(format!("tr_test_{}", state.next_transfer))
    }

    async fn create_payout(
        &self,
        _account_id: &str,
        _amount_cents: i64,
        _currency: &str,
        _idempotency_key: &str,
    ) -> GatewayResult<PayoutDetails> {
        let mut state = self.state.lock().unwrap();
        state.next_payout += 1;
        Ok(PayoutDetails {
            payout_id: format!("po_test_{}", state.next_payout),
            status: "pending".to_string(),
            arrival_date: Some(1_750_000_000),
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    annotation: Arc<FakeAnnotationBackend>,
    payments: Arc<FakePaymentGateway>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::build(true).await
    }

    /// An app with neither Label Studio nor Stripe configured.
    #[allow(dead_code)]
    pub async fn without_externals() -> Result<Self> {
        Self::build(false).await
    }

    async fn build(with_externals: bool) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            label_studio_url: None,
            label_studio_api_key: None,
            stripe_secret_key: None,
            external_timeout_secs: 5,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let annotation = Arc::new(FakeAnnotationBackend::default());
        let payments = Arc::new(FakePaymentGateway::default());
        let annotation_for_state: Arc<dyn AnnotationBackend> = annotation.clone();
        let payments_for_state: Arc<dyn lingualabel::stripe::PaymentGateway> = payments.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = if with_externals {
            AppState::new(
                pool.clone(),
                config,
                jwt,
                Some(annotation_for_state),
                Some(payments_for_state),
            )
        } else {
            AppState::new(pool.clone(), config, jwt, None, None)
        };
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            annotation,
            payments,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn annotation(&self) -> Arc<FakeAnnotationBackend> {
        self.annotation.clone()
    }

    #[allow(dead_code)]
    pub fn payments(&self) -> Arc<FakePaymentGateway> {
        self.payments.clone()
    }

    pub async fn insert_user(
        &self,
        email: &str,
        password_value: &str,
        full_name: &str,
        role: &str,
    ) -> Result<Uuid> {
        let email = email.to_string();
        let password_value = password_value.to_string();
        let full_name = full_name.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                password_hash: password::hash_password(&password_value)?,
                full_name,
                role,
            };
            diesel::insert_into(lingualabel::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password_value: &str) -> Result<String> {
        let response = self
            .post_form(
                "/api/auth/login",
                &format!("username={email}&password={password_value}"),
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    pub async fn post_form(&self, path: &str, body: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

// Languages are reference data seeded by migration; leave them in place.
fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE withdrawals, tasks, projects, annotators, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
