//! Owner context extractor for multi-tenancy support.
//!
//! Extracts the business owner id from the `X-Owner-ID` header set by the
//! authenticating front-end after validating the caller's session. Every
//! repository call takes this id; owner scoping is a correctness invariant,
//! not just an authorization nicety.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const OWNER_ID_HEADER: &str = "X-Owner-ID";

/// Owner (tenant) context extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct OwnerContext {
    pub owner_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for OwnerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", OWNER_ID_HEADER))
            })?;

        let owner_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("Invalid {} header", OWNER_ID_HEADER))
        })?;

        tracing::Span::current().record("owner_id", tracing::field::display(owner_id));

        Ok(OwnerContext { owner_id })
    }
}
