pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

pub const ROLE_ANNOTATOR: &str = "annotator";
pub const ROLE_CLIENT: &str = "client";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub email: String,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn is_client(&self) -> bool {
        self.role == ROLE_CLIENT
    }

    pub fn is_annotator(&self) -> bool {
        self.role == ROLE_ANNOTATOR
    }

    pub fn require_client(&self) -> Result<(), AppError> {
        if self.is_client() {
            Ok(())
        } else {
            Err(AppError::forbidden("only clients can perform this action"))
        }
    }

    pub fn require_annotator(&self) -> Result<(), AppError> {
        if self.is_annotator() {
            Ok(())
        } else {
            Err(AppError::forbidden(
                "only annotators can perform this action",
            ))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }
}
