use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment processor unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment processor returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Connected-account state, recomputed from the processor on each access.
#[derive(Debug, Clone, Default)]
pub struct AccountStatus {
    pub id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements_due: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PayoutDetails {
    pub payout_id: String,
    pub status: String,
    pub arrival_date: Option<i64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Create an Express connected account for an annotator.
    async fn create_account(&self, email: &str, country: &str) -> GatewayResult<String>;

    /// Create an onboarding link the annotator is redirected to.
    async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> GatewayResult<String>;

    async fn account_status(&self, account_id: &str) -> GatewayResult<AccountStatus>;

    /// Move platform funds to the connected account. The idempotency key
    /// makes a duplicate submission a no-op on the processor side.
    async fn create_transfer(
        &self,
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        description: &str,
        idempotency_key: &str,
    ) -> GatewayResult<String>;

    /// Pay out from the connected account to the annotator's bank.
    async fn create_payout(
        &self,
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> GatewayResult<PayoutDetails>;
}

pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>, timeout: Duration) -> Self {
        Self::with_api_base(secret_key, STRIPE_API_BASE, timeout)
    }

    pub fn with_api_base(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into(),
        }
    }

    async fn check_response(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        #[derive(Deserialize)]
        struct ErrorEnvelope {
            error: ErrorBody,
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            #[serde(default)]
            message: String,
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        Err(GatewayError::Api { status, message })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_account(&self, email: &str, country: &str) -> GatewayResult<String> {
        #[derive(Deserialize)]
        struct Account {
            id: String,
        }

        let params = [
            ("type", "express"),
            ("country", country),
            ("email", email),
            ("business_type", "individual"),
            ("capabilities[transfers][requested]", "true"),
        ];

        let response = self
            .client
            .post(format!("{}/accounts", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await?;

        let account: Account = Self::check_response(response).await?.json().await?;
        Ok(account.id)
    }

    async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> GatewayResult<String> {
        #[derive(Deserialize)]
        struct AccountLink {
            url: String,
        }

        let params = [
            ("account", account_id),
            ("refresh_url", refresh_url),
            ("return_url", return_url),
            ("type", "account_onboarding"),
        ];

        let response = self
            .client
            .post(format!("{}/account_links", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await?;

        let link: AccountLink = Self::check_response(response).await?.json().await?;
        Ok(link.url)
    }

    async fn account_status(&self, account_id: &str) -> GatewayResult<AccountStatus> {
        #[derive(Deserialize)]
        struct Account {
            id: String,
            #[serde(default)]
            charges_enabled: bool,
            #[serde(default)]
            payouts_enabled: bool,
            #[serde(default)]
            details_submitted: bool,
            #[serde(default)]
            requirements: Requirements,
        }

        #[derive(Deserialize, Default)]
        struct Requirements {
            #[serde(default)]
            currently_due: Vec<String>,
        }

        let response = self
            .client
            .get(format!("{}/accounts/{}", self.api_base, account_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let account: Account = Self::check_response(response).await?.json().await?;
        Ok(AccountStatus {
            id: account.id,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            requirements_due: account.requirements.currently_due,
        })
    }

    async fn create_transfer(
        &self,
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        description: &str,
        idempotency_key: &str,
    ) -> GatewayResult<String> {
        #[derive(Deserialize)]
        struct Transfer {
            id: String,
        }

        let amount = amount_cents.to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", currency),
            ("destination", account_id),
            ("description", description),
        ];

        let response = self
            .client
            .post(format!("{}/transfers", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("idempotency-key", format!("{idempotency_key}-transfer"))
            .form(&params)
            .send()
            .await?;

        let transfer: Transfer = Self::check_response(response).await?.json().await?;
        Ok(transfer.id)
    }

    async fn create_payout(
        &self,
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> GatewayResult<PayoutDetails> {
        #[derive(Deserialize)]
        struct Payout {
            id: String,
            status: String,
            arrival_date: Option<i64>,
        }

        let amount = amount_cents.to_string();
        let params = [("amount", amount.as_str()), ("currency", currency)];

        let response = self
            .client
            .post(format!("{}/payouts", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("stripe-account", account_id)
            .header("idempotency-key", format!("{idempotency_key}-payout"))
            .form(&params)
            .send()
            .await?;

        let payout: Payout = Self::check_response(response).await?.json().await?;
        Ok(PayoutDetails {
            payout_id: payout.id,
            status: payout.status,
            arrival_date: payout.arrival_date,
        })
    }
}
