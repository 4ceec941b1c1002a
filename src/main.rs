use std::{sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;

use lingualabel::{
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    labelstudio::{AnnotationBackend, LabelStudio},
    routes,
    state::AppState,
    stripe::{PaymentGateway, StripeGateway},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        label_studio_enabled = config.label_studio_url.is_some(),
        stripe_enabled = config.stripe_secret_key.is_some(),
        "loaded backend configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let jwt = JwtService::from_config(&config)?;
    let timeout = Duration::from_secs(config.external_timeout_secs);

    let annotation: Option<Arc<dyn AnnotationBackend>> =
        match (&config.label_studio_url, &config.label_studio_api_key) {
            (Some(url), Some(api_key)) => Some(Arc::new(LabelStudio::new(
                url.clone(),
                api_key.clone(),
                timeout,
            ))),
            _ => {
                tracing::warn!("label studio not configured; project sync is disabled");
                None
            }
        };

    let payments: Option<Arc<dyn PaymentGateway>> = match &config.stripe_secret_key {
        Some(secret_key) => Some(Arc::new(StripeGateway::new(secret_key.clone(), timeout))),
        None => {
            tracing::warn!("stripe not configured; payout operations are disabled");
            None
        }
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, jwt, annotation, payments);
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(component = "api", %addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
