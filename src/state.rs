use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    labelstudio::AnnotationBackend,
    stripe::PaymentGateway,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    /// `None` when Label Studio is not configured; sync degrades gracefully.
    pub annotation: Option<Arc<dyn AnnotationBackend>>,
    /// `None` when Stripe is not configured; payout operations report 503.
    pub payments: Option<Arc<dyn PaymentGateway>>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        jwt: JwtService,
        annotation: Option<Arc<dyn AnnotationBackend>>,
        payments: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            annotation,
            payments,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
