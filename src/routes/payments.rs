use axum::{extract::State, Json};
use diesel::{prelude::*, PgConnection};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    lifecycle::TaskStatus,
    models::{Annotator, NewWithdrawal},
    schema::{annotators, projects, tasks, withdrawals},
    state::AppState,
    stripe::{GatewayError, PaymentGateway},
};

pub const WITHDRAWAL_PROCESSING: &str = "processing";
pub const WITHDRAWAL_COMPLETED: &str = "completed";
pub const WITHDRAWAL_FAILED: &str = "failed";

const PAYOUT_CURRENCY: &str = "usd";

#[derive(Serialize)]
pub struct ConnectStatusResponse {
    pub account_id: Option<String>,
    pub is_connected: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements_due: Vec<String>,
    pub message: String,
}

#[derive(Deserialize)]
pub struct ConnectOnboardRequest {
    #[serde(default = "default_country")]
    pub country: String,
    pub return_url: String,
    pub refresh_url: String,
}

fn default_country() -> String {
    "US".to_string()
}

#[derive(Serialize)]
pub struct ConnectOnboardResponse {
    pub account_id: String,
    pub onboarding_url: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct EarningsResponse {
    pub total_earned: f64,
    pub pending: f64,
    pub available: f64,
    pub currency: String,
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub amount: f64,
}

#[derive(Serialize)]
pub struct WithdrawResponse {
    pub payout_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub estimated_arrival: Option<String>,
    pub message: String,
}

/// Connected-account state, recomputed from the processor on each call.
pub async fn get_connect_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ConnectStatusResponse>> {
    let mut conn = state.db()?;
    let annotator = load_annotator_profile(&mut conn, &user)?;
    drop(conn);

    let Some(account_id) = annotator.stripe_account_id else {
        return Ok(Json(not_connected_status(
            "No payout account connected. Complete onboarding to receive payments.",
        )));
    };

    let Some(gateway) = state.payments.clone() else {
        return Ok(Json(ConnectStatusResponse {
            account_id: Some(account_id),
            is_connected: true,
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
            requirements_due: Vec::new(),
            message: "Payment processor is not configured. Contact support.".to_string(),
        }));
    };

    let status = match gateway.account_status(&account_id).await {
        Ok(status) => status,
        Err(err) => {
            warn!(error = %err, "failed to retrieve connected-account status");
            return Ok(Json(ConnectStatusResponse {
                account_id: Some(account_id),
                is_connected: true,
                charges_enabled: false,
                payouts_enabled: false,
                details_submitted: false,
                requirements_due: Vec::new(),
                message: "Unable to retrieve account status. Please try again.".to_string(),
            }));
        }
    };

    let message = if status.payouts_enabled {
        "Account connected"
    } else {
        "Complete account setup to receive payouts"
    };

    Ok(Json(ConnectStatusResponse {
        account_id: Some(status.id),
        is_connected: true,
        charges_enabled: status.charges_enabled,
        payouts_enabled: status.payouts_enabled,
        details_submitted: status.details_submitted,
        requirements_due: status.requirements_due,
        message: message.to_string(),
    }))
}

pub async fn start_onboarding(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ConnectOnboardRequest>,
) -> AppResult<Json<ConnectOnboardResponse>> {
    if payload.country.len() != 2 {
        return Err(AppError::validation(
            "country must be a two-letter country code",
        ));
    }
    if payload.return_url.trim().is_empty() || payload.refresh_url.trim().is_empty() {
        return Err(AppError::validation(
            "return_url and refresh_url are required",
        ));
    }

    let mut conn = state.db()?;
    let annotator = load_annotator_profile(&mut conn, &user)?;
    drop(conn);

    let Some(gateway) = state.payments.clone() else {
        return Err(AppError::unconfigured(
            "Payment processor is not configured. Contact support.",
        ));
    };

    let account_id = match annotator.stripe_account_id {
        Some(account_id) => account_id,
        None => {
            let account_id = gateway
                .create_account(&user.email, &payload.country.to_uppercase())
                .await
                .map_err(gateway_error)?;

            let mut conn = state.db()?;
            diesel::update(annotators::table.find(annotator.id))
                .set(annotators::stripe_account_id.eq(Some(account_id.clone())))
                .execute(&mut conn)?;
            account_id
        }
    };

    let onboarding_url = gateway
        .create_account_link(&account_id, &payload.refresh_url, &payload.return_url)
        .await
        .map_err(gateway_error)?;

    Ok(Json(ConnectOnboardResponse {
        account_id,
        onboarding_url,
        message: "Redirect user to complete onboarding".to_string(),
    }))
}

pub async fn get_earnings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<EarningsResponse>> {
    let mut conn = state.db()?;
    let annotator = load_annotator_profile(&mut conn, &user)?;
    let earnings = compute_earnings(&mut conn, annotator.user_id, annotator.id)?;

    Ok(Json(EarningsResponse {
        total_earned: earnings.total_earned,
        pending: earnings.pending,
        available: earnings.available,
        currency: "USD".to_string(),
    }))
}

/// Withdraw available earnings. The balance check and the `processing`
/// ledger row share one transaction holding a row lock on the annotator, so
/// concurrent withdrawals cannot both spend the same balance; the processor
/// calls carry the row's idempotency key, so a duplicate submission cannot
/// move money twice.
pub async fn request_withdrawal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<WithdrawRequest>,
) -> AppResult<Json<WithdrawResponse>> {
    if payload.amount <= 0.0 || !payload.amount.is_finite() {
        return Err(AppError::validation("amount must be positive"));
    }

    let mut conn = state.db()?;
    let annotator = load_annotator_profile(&mut conn, &user)?;
    drop(conn);

    let Some(account_id) = annotator.stripe_account_id.clone() else {
        return Err(AppError::precondition(
            "connect your payout account before withdrawing",
        ));
    };

    let Some(gateway) = state.payments.clone() else {
        return Err(AppError::unconfigured(
            "Payment processor is not configured. Contact support.",
        ));
    };

    let status = gateway
        .account_status(&account_id)
        .await
        .map_err(gateway_error)?;
    if !status.payouts_enabled {
        return Err(AppError::precondition(
            "complete your payout account setup to receive payouts",
        ));
    }

    let withdrawal_id = Uuid::new_v4();
    let idempotency_key = generate_idempotency_key();

    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        // The lock serializes withdrawals per annotator.
        let locked: Annotator = annotators::table
            .find(annotator.id)
            .for_update()
            .first(conn)?;

        let earnings = compute_earnings(conn, locked.user_id, locked.id)?;
        if payload.amount > earnings.available {
            return Err(AppError::validation(format!(
                "insufficient balance, available: ${:.2}",
                earnings.available
            )));
        }

        let reservation = NewWithdrawal {
            id: withdrawal_id,
            annotator_id: locked.id,
            amount: payload.amount,
            currency: PAYOUT_CURRENCY.to_string(),
            status: WITHDRAWAL_PROCESSING.to_string(),
            idempotency_key: idempotency_key.clone(),
        };
        diesel::insert_into(withdrawals::table)
            .values(&reservation)
            .execute(conn)?;

        Ok(())
    })?;
    drop(conn);

    let amount_cents = (payload.amount * 100.0).round() as i64;
    let outcome = transfer_and_pay_out(
        gateway.as_ref(),
        &account_id,
        amount_cents,
        &idempotency_key,
    )
    .await;

    let mut conn = state.db()?;
    match outcome {
        Ok((transfer_id, payout)) => {
            diesel::update(withdrawals::table.find(withdrawal_id))
                .set((
                    withdrawals::status.eq(WITHDRAWAL_COMPLETED),
                    withdrawals::stripe_transfer_id.eq(Some(transfer_id)),
                    withdrawals::stripe_payout_id.eq(Some(payout.payout_id.clone())),
                ))
                .execute(&mut conn)?;

            let estimated_arrival = payout
                .arrival_date
                .and_then(|timestamp| chrono::DateTime::from_timestamp(timestamp, 0))
                .map(|datetime| datetime.to_rfc3339());

            Ok(Json(WithdrawResponse {
                payout_id: Some(payout.payout_id),
                amount: payload.amount,
                currency: "USD".to_string(),
                status: payout.status,
                estimated_arrival,
                message: "Withdrawal initiated successfully. Funds will arrive in 1-2 business days."
                    .to_string(),
            }))
        }
        Err(err) => {
            // A failed withdrawal stops counting against the balance.
            diesel::update(withdrawals::table.find(withdrawal_id))
                .set(withdrawals::status.eq(WITHDRAWAL_FAILED))
                .execute(&mut conn)?;
            Err(gateway_error(err))
        }
    }
}

async fn transfer_and_pay_out(
    gateway: &dyn PaymentGateway,
    account_id: &str,
    amount_cents: i64,
    idempotency_key: &str,
) -> Result<(String, crate::stripe::PayoutDetails), GatewayError> {
    let transfer_id = gateway
        .create_transfer(
            account_id,
            amount_cents,
            PAYOUT_CURRENCY,
            "LinguaLabel earnings withdrawal",
            idempotency_key,
        )
        .await?;

    let payout = gateway
        .create_payout(account_id, amount_cents, PAYOUT_CURRENCY, idempotency_key)
        .await?;

    Ok((transfer_id, payout))
}

struct EarningsBreakdown {
    total_earned: f64,
    pending: f64,
    available: f64,
}

fn compute_earnings(
    conn: &mut PgConnection,
    user_id: Uuid,
    annotator_id: Uuid,
) -> Result<EarningsBreakdown, AppError> {
    let pending: Vec<f64> = tasks::table
        .inner_join(projects::table)
        .filter(tasks::assigned_to.eq(Some(user_id)))
        .filter(tasks::status.eq_any([
            TaskStatus::Submitted.as_str(),
            TaskStatus::UnderReview.as_str(),
        ]))
        .select(projects::price_per_task)
        .load(conn)?;

    let approved: Vec<f64> = tasks::table
        .inner_join(projects::table)
        .filter(tasks::assigned_to.eq(Some(user_id)))
        .filter(tasks::status.eq(TaskStatus::Approved.as_str()))
        .select(projects::price_per_task)
        .load(conn)?;

    let withdrawn: Vec<f64> = withdrawals::table
        .filter(withdrawals::annotator_id.eq(annotator_id))
        .filter(withdrawals::status.ne(WITHDRAWAL_FAILED))
        .select(withdrawals::amount)
        .load(conn)?;

    let total_earned: f64 = approved.iter().sum();
    let withdrawn_total: f64 = withdrawn.iter().sum();

    Ok(EarningsBreakdown {
        total_earned,
        pending: pending.iter().sum(),
        available: (total_earned - withdrawn_total).max(0.0),
    })
}

fn load_annotator_profile(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
) -> Result<Annotator, AppError> {
    user.require_annotator()?;

    annotators::table
        .filter(annotators::user_id.eq(user.user_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| {
            AppError::not_found("annotator profile not found, complete your profile setup first")
        })
}

fn not_connected_status(message: &str) -> ConnectStatusResponse {
    ConnectStatusResponse {
        account_id: None,
        is_connected: false,
        charges_enabled: false,
        payouts_enabled: false,
        details_submitted: false,
        requirements_due: Vec::new(),
        message: message.to_string(),
    }
}

fn gateway_error(err: GatewayError) -> AppError {
    warn!(error = %err, "payment processor request failed");
    AppError::external(err.to_string())
}

fn generate_idempotency_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
